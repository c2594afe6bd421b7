//! Bounded per-subscription event queue.
//!
//! A single-consumer queue with three producer-side admission policies.
//! Producers and the consumer synchronize through one short-lived mutex;
//! blocked parties park on [`Notify`] and are woken by the opposite side.
//!
//! The `closed` flag lives inside the mutex, so a send observed as accepted
//! is always visible to the reader before it sees end-of-stream.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::event::Event;

/// Outcome of a non-blocking push attempt.
enum TryPush {
    /// The event was enqueued.
    Pushed,
    /// The queue is at capacity; the event is handed back.
    Full(Arc<Event>),
    /// The queue has been closed.
    Closed,
}

/// Bounded FIFO queue between the bus and one subscription reader.
pub(crate) struct EventQueue {
    inner: Mutex<QueueInner>,
    capacity: usize,
    /// Events lost to this subscription: failed sends plus evictions.
    dropped: AtomicU64,
    /// Signalled when an event is enqueued or the queue closes.
    readable: Notify,
    /// Signalled when a slot frees up or the queue closes.
    writable: Notify,
}

struct QueueInner {
    deque: VecDeque<Arc<Event>>,
    closed: bool,
}

impl EventQueue {
    /// Creates a queue with the given capacity (clamped to at least 1).
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(QueueInner {
                deque: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            capacity,
            dropped: AtomicU64::new(0),
            readable: Notify::new(),
            writable: Notify::new(),
        }
    }

    fn try_push(&self, event: Arc<Event>) -> TryPush {
        let mut inner = self.inner.lock();
        if inner.closed {
            return TryPush::Closed;
        }
        if inner.deque.len() >= self.capacity {
            return TryPush::Full(event);
        }
        inner.deque.push_back(event);
        drop(inner);
        self.readable.notify_one();
        TryPush::Pushed
    }

    /// `Block` policy: waits for capacity, racing against queue closure.
    ///
    /// Returns `true` if the event was enqueued, `false` if the queue closed
    /// first (recorded as a drop).
    pub(crate) async fn send_block(&self, event: Arc<Event>) -> bool {
        let mut event = event;
        loop {
            match self.try_push(event) {
                TryPush::Pushed => return true,
                TryPush::Closed => return self.record_drop(),
                TryPush::Full(back) => event = back,
            }

            // Register for a wakeup, then re-check: a slot may have freed
            // (or the queue closed) between the failed push and now.
            let notified = self.writable.notified();
            match self.try_push(event) {
                TryPush::Pushed => return true,
                TryPush::Closed => return self.record_drop(),
                TryPush::Full(back) => {
                    event = back;
                    notified.await;
                }
            }
        }
    }

    /// `DropNew` policy: non-blocking; a full or closed queue discards the
    /// incoming event.
    pub(crate) fn send_drop_new(&self, event: Arc<Event>) -> bool {
        match self.try_push(event) {
            TryPush::Pushed => true,
            TryPush::Full(_) | TryPush::Closed => self.record_drop(),
        }
    }

    /// `DropOld` policy: non-blocking; a full queue evicts its oldest event
    /// to admit the new one, keeping a sliding window of the most recent
    /// `capacity` events.
    pub(crate) fn send_drop_old(&self, event: Arc<Event>) -> bool {
        {
            let mut inner = self.inner.lock();
            if inner.closed {
                drop(inner);
                return self.record_drop();
            }
            if inner.deque.len() >= self.capacity {
                inner.deque.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            inner.deque.push_back(event);
        }
        self.readable.notify_one();
        true
    }

    /// Receives the next event, waiting if the queue is empty.
    ///
    /// Remaining events are drained after close; `None` means the queue is
    /// closed and empty (end-of-stream).
    pub(crate) async fn recv(&self) -> Option<Arc<Event>> {
        loop {
            if let Some(event) = self.try_recv() {
                return Some(event);
            }
            if self.is_closed() {
                // Final check under the lock: a send may have landed between
                // the failed pop and the closed read.
                return self.try_recv();
            }

            let notified = self.readable.notified();
            if let Some(event) = self.try_recv() {
                return Some(event);
            }
            if self.is_closed() {
                return self.try_recv();
            }
            notified.await;
        }
    }

    /// Pops the next event without waiting.
    pub(crate) fn try_recv(&self) -> Option<Arc<Event>> {
        let event = self.inner.lock().deque.pop_front();
        if event.is_some() {
            self.writable.notify_one();
        }
        event
    }

    /// Closes the queue. Further sends fail; pending `Block` senders wake
    /// and report a drop. Returns `true` on the first close.
    pub(crate) fn close(&self) -> bool {
        let newly_closed = {
            let mut inner = self.inner.lock();
            !std::mem::replace(&mut inner.closed, true)
        };
        if newly_closed {
            self.readable.notify_waiters();
            self.writable.notify_waiters();
        }
        newly_closed
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().deque.len()
    }

    pub(crate) fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Counts one lost event and reports the send as failed.
    fn record_drop(&self) -> bool {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        false
    }
}

impl std::fmt::Debug for EventQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventQueue")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .field("dropped", &self.dropped())
            .field("closed", &self.is_closed())
            .finish()
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn event(frame: i64) -> Arc<Event> {
        Arc::new(Event {
            v: 1,
            run_id: "r".into(),
            source_id: "s".into(),
            channel: String::new(),
            kind: "t".into(),
            frame_index: frame,
            sim_time: 0.0,
            wall_time_ms: None,
            tags: std::collections::HashMap::new(),
            payload: None,
        })
    }

    // --- Capacity and FIFO ---

    #[test]
    fn capacity_clamped_to_one() {
        let q = EventQueue::new(0);
        assert!(q.send_drop_new(event(1)));
        assert!(!q.send_drop_new(event(2)));
        assert_eq!(q.len(), 1);
    }

    #[tokio::test]
    async fn fifo_order() {
        let q = EventQueue::new(8);
        for i in 0..5 {
            assert!(q.send_drop_new(event(i)));
        }
        for i in 0..5 {
            assert_eq!(q.recv().await.unwrap().frame_index, i);
        }
    }

    // --- DropNew ---

    #[test]
    fn drop_new_discards_when_full() {
        let q = EventQueue::new(2);
        assert!(q.send_drop_new(event(1)));
        assert!(q.send_drop_new(event(2)));
        assert!(!q.send_drop_new(event(3)));
        assert_eq!(q.dropped(), 1);
        assert_eq!(q.len(), 2);
    }

    // --- DropOld ---

    #[tokio::test]
    async fn drop_old_keeps_sliding_window() {
        let q = EventQueue::new(2);
        for i in 1..=4 {
            assert!(q.send_drop_old(event(i)));
        }
        assert_eq!(q.dropped(), 2);
        assert_eq!(q.recv().await.unwrap().frame_index, 3);
        assert_eq!(q.recv().await.unwrap().frame_index, 4);
    }

    // --- Block ---

    #[tokio::test]
    async fn block_waits_for_reader() {
        let q = Arc::new(EventQueue::new(1));
        assert!(q.send_block(event(1)).await);

        let sender = {
            let q = Arc::clone(&q);
            tokio::spawn(async move { q.send_block(event(2)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!sender.is_finished());

        assert_eq!(q.recv().await.unwrap().frame_index, 1);
        assert!(sender.await.unwrap());
        assert_eq!(q.recv().await.unwrap().frame_index, 2);
        assert_eq!(q.dropped(), 0);
    }

    #[tokio::test]
    async fn block_unblocks_on_close_with_drop() {
        let q = Arc::new(EventQueue::new(1));
        assert!(q.send_block(event(1)).await);

        let sender = {
            let q = Arc::clone(&q);
            tokio::spawn(async move { q.send_block(event(2)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        q.close();
        assert!(!sender.await.unwrap());
        assert_eq!(q.dropped(), 1);
    }

    // --- Close semantics ---

    #[tokio::test]
    async fn recv_drains_then_ends_after_close() {
        let q = EventQueue::new(4);
        assert!(q.send_drop_new(event(1)));
        assert!(q.send_drop_new(event(2)));
        q.close();

        assert_eq!(q.recv().await.unwrap().frame_index, 1);
        assert_eq!(q.recv().await.unwrap().frame_index, 2);
        assert!(q.recv().await.is_none());
    }

    #[test]
    fn close_is_idempotent() {
        let q = EventQueue::new(1);
        assert!(q.close());
        assert!(!q.close());
    }

    #[test]
    fn send_after_close_is_counted_drop() {
        let q = EventQueue::new(4);
        q.close();
        assert!(!q.send_drop_new(event(1)));
        assert!(!q.send_drop_old(event(2)));
        assert_eq!(q.dropped(), 2);
    }

    #[tokio::test]
    async fn recv_on_empty_closed_queue_returns_none() {
        let q = EventQueue::new(1);
        q.close();
        assert!(q.recv().await.is_none());
    }
}
