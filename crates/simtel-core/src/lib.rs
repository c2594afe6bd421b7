//! # simtel-core
//!
//! The in-process core of the simulation telemetry pipeline:
//!
//! - **Event model**: immutable telemetry [`Event`]s with an opaque payload,
//!   parsed from line-delimited JSON ([`event`]).
//! - **EventBus**: synchronous fan-out to filtered subscriptions, each with
//!   its own bounded queue and backpressure policy ([`bus`]).
//! - **Live buffers**: per-run rings of recent events fed by a bus
//!   subscription, for tailing and frame lookup ([`buffer`]).
//!
//! ## Design Principles
//!
//! 1. **No task per event**: publishing fans out inline; only subscribers
//!    run dedicated reader tasks.
//! 2. **Zero-copy fan-out**: events are shared as `Arc<Event>` across all
//!    matching subscriptions; the payload is never re-parsed.
//! 3. **Isolated consumers**: a slow subscriber affects publishers only
//!    through its own policy (`Block`), never through another subscriber's
//!    queue.
//!
//! ## Example
//!
//! ```rust,ignore
//! use simtel_core::{EventBus, EventFilter, SubscriptionOptions};
//!
//! let bus = EventBus::new();
//! let mut sub = bus.subscribe(EventFilter::default(), SubscriptionOptions::default())?;
//!
//! bus.publish(event).await;
//! while let Some(event) = sub.recv().await {
//!     handle(event);
//! }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod buffer;
pub mod bus;
pub mod event;

pub use buffer::{BufferConfig, BufferManager, RingBuffer};
pub use bus::{
    BackpressurePolicy, BusError, BusStats, EventBus, EventFilter, Subscription,
    SubscriptionOptions,
};
pub use event::Event;
