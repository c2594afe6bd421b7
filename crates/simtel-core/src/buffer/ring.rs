//! Bounded ring of recent events for a single run.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::event::Event;

/// A fixed-capacity circular store of the most recent events.
///
/// `append` is O(1) and overwrites the oldest slot once the ring is full.
/// Readers run concurrently with each other; all operations serialize on an
/// internal read/write lock.
pub struct RingBuffer {
    inner: RwLock<RingInner>,
    capacity: usize,
}

struct RingInner {
    /// Slot array. `head` is the next write position; the oldest element
    /// sits at `(head - size + capacity) % capacity`.
    slots: Vec<Option<Arc<Event>>>,
    head: usize,
    size: usize,
}

impl RingBuffer {
    /// Creates a ring with the given capacity (clamped to at least 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: RwLock::new(RingInner {
                slots: vec![None; capacity],
                head: 0,
                size: 0,
            }),
            capacity,
        }
    }

    /// Appends an event, overwriting the oldest when full.
    pub fn append(&self, event: Arc<Event>) {
        let mut inner = self.inner.write();
        let head = inner.head;
        inner.slots[head] = Some(event);
        inner.head = (head + 1) % self.capacity;
        if inner.size < self.capacity {
            inner.size += 1;
        }
    }

    /// Returns the last `min(n, len)` events in insertion order.
    #[must_use]
    pub fn tail(&self, n: usize) -> Vec<Arc<Event>> {
        let inner = self.inner.read();
        if n == 0 || inner.size == 0 {
            return Vec::new();
        }

        let count = n.min(inner.size);
        let start = (inner.head + self.capacity - count) % self.capacity;

        let mut result = Vec::with_capacity(count);
        for i in 0..count {
            let idx = (start + i) % self.capacity;
            if let Some(event) = &inner.slots[idx] {
                result.push(Arc::clone(event));
            }
        }
        result
    }

    /// Returns the first buffered event with the given frame index, if any.
    ///
    /// Linear scan over the valid region, oldest first. Acceptable because
    /// the ring is bounded and lookups come from interactive readers, not
    /// the publish path.
    #[must_use]
    pub fn get(&self, frame_index: i64) -> Option<Arc<Event>> {
        let inner = self.inner.read();
        let start = (inner.head + self.capacity - inner.size) % self.capacity;
        for i in 0..inner.size {
            let idx = (start + i) % self.capacity;
            if let Some(event) = &inner.slots[idx] {
                if event.frame_index == frame_index {
                    return Some(Arc::clone(event));
                }
            }
        }
        None
    }

    /// Number of events currently buffered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().size
    }

    /// Returns `true` if nothing has been buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().size == 0
    }

    /// The fixed slot capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Empties the ring.
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.slots.iter_mut().for_each(|slot| *slot = None);
        inner.head = 0;
        inner.size = 0;
    }
}

impl std::fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
