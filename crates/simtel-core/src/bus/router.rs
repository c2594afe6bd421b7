//! The fan-out event bus.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

use crate::event::Event;

use super::filter::EventFilter;
use super::subscription::{Subscription, SubscriptionOptions, SubscriptionShared};

// ---------------------------------------------------------------------------
// BusError / BusStats
// ---------------------------------------------------------------------------

/// Errors from bus operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    /// The bus has been closed; no new subscriptions are accepted.
    #[error("event bus is closed")]
    Closed,
}

/// A point-in-time snapshot of bus counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusStats {
    /// Number of subscriptions the bus holds. Closing a subscription does
    /// not remove it from the bus, so this count never decreases before
    /// bus shutdown.
    pub subscribers: usize,

    /// Total events published (whether or not anything matched).
    pub total_published: u64,

    /// Total sends that reported a drop, summed across subscriptions.
    pub total_dropped: u64,
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// In-process publish/subscribe router.
///
/// Publishing fans out synchronously: each matching subscription's queue is
/// offered the event in turn, with no task spawned per event. A `Block`
/// subscription with a full queue suspends the publisher until the queue
/// drains or that subscription closes; all other policies never block.
///
/// The subscription list sits behind a read/write lock. Publishers take a
/// snapshot under the read lock and release it before any enqueue, so
/// `subscribe` only ever contends with the snapshot copy, and the lock is
/// never held across an await.
pub struct EventBus {
    subscribers: RwLock<Vec<Arc<SubscriptionShared>>>,
    total_published: AtomicU64,
    total_dropped: AtomicU64,
    closed: AtomicBool,
}

impl EventBus {
    /// Creates an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            total_published: AtomicU64::new(0),
            total_dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Publishes one event, fanning it out to every matching subscription.
    ///
    /// Suspends only while a matching `Block` subscription is at capacity.
    /// Publishing to a closed bus is a silent no-op.
    pub async fn publish(&self, event: Event) {
        self.publish_arc(Arc::new(event)).await;
    }

    /// Publishes an already-shared event. See [`publish`](Self::publish).
    pub async fn publish_arc(&self, event: Arc<Event>) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }

        let subs = self.snapshot();
        self.fan_out(&subs, &event).await;
        self.total_published.fetch_add(1, Ordering::Relaxed);
    }

    /// Publishes a batch of events in order, returning how many were
    /// attempted. The count equals `events.len()` unless the bus is closed,
    /// in which case it is 0.
    pub async fn publish_batch(&self, events: Vec<Event>) -> usize {
        if self.closed.load(Ordering::Acquire) {
            return 0;
        }

        let subs = self.snapshot();
        let mut published = 0;
        for event in events {
            let event = Arc::new(event);
            self.fan_out(&subs, &event).await;
            self.total_published.fetch_add(1, Ordering::Relaxed);
            published += 1;
        }
        published
    }

    /// Creates a subscription and returns its reader handle.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Closed`] if the bus has been closed.
    pub fn subscribe(
        &self,
        filter: EventFilter,
        options: SubscriptionOptions,
    ) -> Result<Subscription, BusError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BusError::Closed);
        }

        let shared = Arc::new(SubscriptionShared::new(filter, options));
        self.subscribers.write().push(Arc::clone(&shared));
        tracing::debug!(
            name = shared.name().unwrap_or("<unnamed>"),
            "subscription created"
        );
        Ok(Subscription::new(shared))
    }

    /// Returns a snapshot of the bus counters.
    #[must_use]
    pub fn stats(&self) -> BusStats {
        BusStats {
            subscribers: self.subscribers.read().len(),
            total_published: self.total_published.load(Ordering::Relaxed),
            total_dropped: self.total_dropped.load(Ordering::Relaxed),
        }
    }

    /// Returns `true` once [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Closes the bus and every subscription. Idempotent. Publishers that
    /// already hold a snapshot finish against closed queues, recording
    /// drops.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let subs = std::mem::take(&mut *self.subscribers.write());
        for sub in &subs {
            sub.close();
        }
        tracing::debug!(subscriptions = subs.len(), "event bus closed");
    }

    fn snapshot(&self) -> Vec<Arc<SubscriptionShared>> {
        self.subscribers.read().clone()
    }

    async fn fan_out(&self, subs: &[Arc<SubscriptionShared>], event: &Arc<Event>) {
        for sub in subs {
            if sub.filter().matches(event) && !sub.send(Arc::clone(event)).await {
                self.total_dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("EventBus")
            .field("subscribers", &stats.subscribers)
            .field("total_published", &stats.total_published)
            .field("total_dropped", &stats.total_dropped)
            .field("closed", &self.is_closed())
            .finish()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
