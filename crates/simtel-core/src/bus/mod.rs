//! Publish/subscribe event routing with per-subscriber backpressure.
//!
//! The [`EventBus`] fans each published event out to every subscription
//! whose [`EventFilter`] matches, enqueueing into that subscription's
//! bounded queue. What happens when a queue is full is the subscription's
//! own [`BackpressurePolicy`]:
//!
//! - **`Block`**: the publisher waits for capacity (or subscription close).
//! - **`DropNew`**: the new event is discarded.
//! - **`DropOld`**: the oldest queued event is evicted, keeping the queue a
//!   sliding window of the most recent events.
//!
//! Delivery is per-subscription FIFO: a single publisher's events arrive at
//! any one subscription in publish order. There is no ordering across
//! subscriptions or across concurrent publishers.

mod filter;
mod queue;
mod router;
mod subscription;

pub use filter::EventFilter;
pub use router::{BusError, BusStats, EventBus};
pub use subscription::{BackpressurePolicy, Subscription, SubscriptionOptions};
