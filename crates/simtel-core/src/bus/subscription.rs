//! Subscriptions and backpressure policies.

use std::sync::Arc;

use crate::event::Event;

use super::filter::EventFilter;
use super::queue::EventQueue;

// ---------------------------------------------------------------------------
// BackpressurePolicy
// ---------------------------------------------------------------------------

/// What a subscription does when its queue is full.
///
/// This is a closed set: dispatch happens inside the subscription's send
/// path, and every policy keeps the queue bounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackpressurePolicy {
    /// The publisher waits until the queue has space or the subscription
    /// closes. No events are lost while the subscription lives.
    #[default]
    Block,

    /// The incoming event is discarded and counted as dropped.
    DropNew,

    /// The oldest queued event is evicted to admit the new one, making the
    /// queue a sliding window of the most recent events under overload.
    DropOld,
}

// ---------------------------------------------------------------------------
// SubscriptionOptions
// ---------------------------------------------------------------------------

/// Options for creating a subscription.
#[derive(Debug, Clone)]
pub struct SubscriptionOptions {
    /// Queue capacity. Values below 1 are clamped to 1.
    pub buffer_size: usize,

    /// Backpressure policy when the queue is full.
    pub policy: BackpressurePolicy,

    /// Debug label, surfaced in logs only.
    pub name: Option<String>,
}

impl Default for SubscriptionOptions {
    fn default() -> Self {
        Self {
            buffer_size: 1024,
            policy: BackpressurePolicy::default(),
            name: None,
        }
    }
}

// ---------------------------------------------------------------------------
// SubscriptionShared — bus-side state
// ---------------------------------------------------------------------------

/// Per-subscription state shared between the bus (sender side) and the
/// [`Subscription`] reader handle.
pub(crate) struct SubscriptionShared {
    filter: EventFilter,
    policy: BackpressurePolicy,
    name: Option<String>,
    queue: EventQueue,
}

impl SubscriptionShared {
    pub(crate) fn new(filter: EventFilter, options: SubscriptionOptions) -> Self {
        Self {
            filter,
            policy: options.policy,
            name: options.name,
            queue: EventQueue::new(options.buffer_size),
        }
    }

    pub(crate) fn filter(&self) -> &EventFilter {
        &self.filter
    }

    pub(crate) fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Enqueues one matching event under this subscription's policy.
    ///
    /// Returns `true` if the event was accepted into the queue, `false` if
    /// it was dropped (queue full under `DropNew`, or closed under any
    /// policy). Never returns an error: losses are visible only through the
    /// drop counters.
    pub(crate) async fn send(&self, event: Arc<Event>) -> bool {
        match self.policy {
            BackpressurePolicy::Block => self.queue.send_block(event).await,
            BackpressurePolicy::DropNew => self.queue.send_drop_new(event),
            BackpressurePolicy::DropOld => self.queue.send_drop_old(event),
        }
    }

    /// Closes the queue, waking blocked senders and the reader. Idempotent.
    pub(crate) fn close(&self) {
        if self.queue.close() {
            tracing::debug!(
                name = self.name.as_deref().unwrap_or("<unnamed>"),
                dropped = self.queue.dropped(),
                "subscription closed"
            );
        }
    }

    pub(crate) fn dropped(&self) -> u64 {
        self.queue.dropped()
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }

    pub(crate) async fn recv(&self) -> Option<Arc<Event>> {
        self.queue.recv().await
    }

    pub(crate) fn try_recv(&self) -> Option<Arc<Event>> {
        self.queue.try_recv()
    }
}

// ---------------------------------------------------------------------------
// Subscription — reader handle
// ---------------------------------------------------------------------------

/// The single-consumer reader handle for a subscription.
///
/// `recv` requires `&mut self`, enforcing one reader: concurrent consumers
/// would break per-subscription ordering. Dropping the handle closes the
/// subscription, so abandoning a reader can never wedge a `Block`
/// publisher.
///
/// ```rust,ignore
/// let mut sub = bus.subscribe(filter, options)?;
/// while let Some(event) = sub.recv().await {
///     handle(event);
/// }
/// // end-of-stream: the subscription (or the bus) was closed
/// ```
pub struct Subscription {
    shared: Arc<SubscriptionShared>,
}

impl Subscription {
    pub(crate) fn new(shared: Arc<SubscriptionShared>) -> Self {
        Self { shared }
    }

    /// Receives the next event, waiting while the queue is empty.
    ///
    /// After close, remaining queued events are still delivered; `None`
    /// signals end-of-stream.
    pub async fn recv(&mut self) -> Option<Arc<Event>> {
        self.shared.recv().await
    }

    /// Pops the next event without waiting, or `None` if the queue is empty.
    pub fn try_recv(&mut self) -> Option<Arc<Event>> {
        self.shared.try_recv()
    }

    /// Total events this subscription has lost to backpressure.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.shared.dropped()
    }

    /// Number of events currently queued.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.len()
    }

    /// Returns `true` if no events are queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shared.len() == 0
    }

    /// Returns `true` if the subscription has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Debug label given at creation, if any.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.shared.name()
    }

    /// Closes the subscription. Idempotent; pending `Block` senders unblock
    /// and report a drop, and `recv` drains the queue then ends.
    pub fn close(&self) {
        self.shared.close();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.shared.close();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("name", &self.shared.name())
            .field("len", &self.shared.len())
            .field("dropped", &self.shared.dropped())
            .field("closed", &self.shared.is_closed())
            .finish()
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    fn event(kind: &str, frame: i64) -> Arc<Event> {
        Arc::new(Event {
            v: 1,
            run_id: "r".into(),
            source_id: "s".into(),
            channel: String::new(),
            kind: kind.into(),
            frame_index: frame,
            sim_time: 0.0,
            wall_time_ms: None,
            tags: HashMap::new(),
            payload: None,
        })
    }

    fn make_sub(buffer_size: usize, policy: BackpressurePolicy) -> (Arc<SubscriptionShared>, Subscription) {
        let shared = Arc::new(SubscriptionShared::new(
            EventFilter::default(),
            SubscriptionOptions {
                buffer_size,
                policy,
                name: Some("test".into()),
            },
        ));
        let sub = Subscription::new(Arc::clone(&shared));
        (shared, sub)
    }

    // --- Options ---

    #[test]
    fn default_options() {
        let opts = SubscriptionOptions::default();
        assert_eq!(opts.buffer_size, 1024);
        assert_eq!(opts.policy, BackpressurePolicy::Block);
        assert!(opts.name.is_none());
    }

    // --- Send policies through the subscription ---

    #[tokio::test]
    async fn drop_new_counts_losses() {
        let (shared, mut sub) = make_sub(1, BackpressurePolicy::DropNew);
        assert!(shared.send(event("a", 1)).await);
        assert!(!shared.send(event("a", 2)).await);
        assert!(!shared.send(event("a", 3)).await);
        assert_eq!(sub.dropped(), 2);
        assert_eq!(sub.recv().await.unwrap().frame_index, 1);
    }

    #[tokio::test]
    async fn drop_old_slides_window() {
        let (shared, mut sub) = make_sub(1, BackpressurePolicy::DropOld);
        assert!(shared.send(event("a", 1)).await);
        assert!(shared.send(event("a", 2)).await);
        assert_eq!(sub.dropped(), 1);
        assert_eq!(sub.recv().await.unwrap().frame_index, 2);
    }

    // --- Handle lifecycle ---

    #[tokio::test]
    async fn dropping_handle_unblocks_sender() {
        let (shared, sub) = make_sub(1, BackpressurePolicy::Block);
        assert!(shared.send(event("a", 1)).await);

        let sender = {
            let shared = Arc::clone(&shared);
            tokio::spawn(async move { shared.send(event("a", 2)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!sender.is_finished());

        drop(sub);
        assert!(!sender.await.unwrap());
        assert_eq!(shared.dropped(), 1);
        assert!(shared.is_closed());
    }

    #[tokio::test]
    async fn close_then_recv_drains_remaining() {
        let (shared, mut sub) = make_sub(4, BackpressurePolicy::Block);
        assert!(shared.send(event("a", 1)).await);
        assert!(shared.send(event("a", 2)).await);

        sub.close();
        assert_eq!(sub.recv().await.unwrap().frame_index, 1);
        assert_eq!(sub.recv().await.unwrap().frame_index, 2);
        assert!(sub.recv().await.is_none());
    }

    #[test]
    fn try_recv_on_empty() {
        let (_shared, mut sub) = make_sub(4, BackpressurePolicy::Block);
        assert!(sub.try_recv().is_none());
        assert!(sub.is_empty());
    }
}
