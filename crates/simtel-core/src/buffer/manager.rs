//! Per-run live buffer management.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::bus::{BackpressurePolicy, BusError, EventBus, EventFilter, SubscriptionOptions};
use crate::event::Event;

use super::ring::RingBuffer;

/// Queue capacity for the manager's own bus subscription.
const SUBSCRIPTION_BUFFER: usize = 1000;

// ---------------------------------------------------------------------------
// BufferConfig
// ---------------------------------------------------------------------------

/// Configuration for the [`BufferManager`].
#[derive(Debug, Clone)]
pub struct BufferConfig {
    /// Ring capacity per run.
    pub capacity: usize,

    /// Cadence of the background maintenance task. Zero disables it.
    pub cleanup_interval: Duration,

    /// Maximum number of concurrently buffered runs (0 = unlimited). When
    /// the cap is hit, the least-recently-appended run is evicted.
    pub max_runs: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            cleanup_interval: Duration::from_secs(300),
            max_runs: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// BufferManager
// ---------------------------------------------------------------------------

/// Demultiplexes one bus subscription into per-run [`RingBuffer`]s.
///
/// Subscribes with an empty filter and the `DropOld` policy: the live path
/// keeps only the freshest events and never pushes back on publishers. A
/// dedicated reader task appends until the subscription closes.
pub struct BufferManager {
    inner: Arc<ManagerInner>,
    shutdown: watch::Sender<bool>,
    reader: Option<JoinHandle<()>>,
    maintenance: Option<JoinHandle<()>>,
}

struct ManagerInner {
    buffers: RwLock<HashMap<String, BufferEntry>>,
    capacity: usize,
    max_runs: usize,
}

struct BufferEntry {
    buffer: Arc<RingBuffer>,
    last_append: Instant,
}

impl BufferManager {
    /// Creates the manager, subscribes it to the bus, and starts its reader
    /// (and, unless disabled, maintenance) task.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Closed`] if the bus is already closed.
    pub fn new(bus: &EventBus, config: BufferConfig) -> Result<Self, BusError> {
        let capacity = if config.capacity < 1 {
            BufferConfig::default().capacity
        } else {
            config.capacity
        };

        let mut subscription = bus.subscribe(
            EventFilter::default(),
            SubscriptionOptions {
                buffer_size: SUBSCRIPTION_BUFFER,
                policy: BackpressurePolicy::DropOld,
                name: Some("live-buffer".into()),
            },
        )?;

        let inner = Arc::new(ManagerInner {
            buffers: RwLock::new(HashMap::new()),
            capacity,
            max_runs: config.max_runs,
        });

        let (shutdown, shutdown_rx) = watch::channel(false);

        let reader = {
            let inner = Arc::clone(&inner);
            let mut shutdown_rx = shutdown_rx.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown_rx.changed() => break,
                        event = subscription.recv() => match event {
                            Some(event) => inner.append(event),
                            None => break,
                        },
                    }
                }
            })
        };

        let maintenance = if config.cleanup_interval.is_zero() {
            None
        } else {
            let inner = Arc::clone(&inner);
            let mut shutdown_rx = shutdown_rx;
            let period = config.cleanup_interval;
            Some(tokio::spawn(async move {
                let start = tokio::time::Instant::now() + period;
                let mut ticker = tokio::time::interval_at(start, period);
                loop {
                    tokio::select! {
                        _ = shutdown_rx.changed() => break,
                        _ = ticker.tick() => inner.maintain(),
                    }
                }
            }))
        };

        Ok(Self {
            inner,
            shutdown,
            reader: Some(reader),
            maintenance,
        })
    }

    /// Returns the ring for a run, or `None` if the run is unknown.
    #[must_use]
    pub fn buffer(&self, run_id: &str) -> Option<Arc<RingBuffer>> {
        self.inner
            .buffers
            .read()
            .get(run_id)
            .map(|entry| Arc::clone(&entry.buffer))
    }

    /// Snapshots the currently buffered run ids. Order is unspecified.
    #[must_use]
    pub fn runs(&self) -> Vec<String> {
        self.inner.buffers.read().keys().cloned().collect()
    }

    /// Number of currently buffered runs.
    #[must_use]
    pub fn run_count(&self) -> usize {
        self.inner.buffers.read().len()
    }

    /// Closes the subscription and stops the background tasks, waiting for
    /// them to finish. Buffered events remain readable afterwards.
    pub async fn close(&mut self) {
        let _ = self.shutdown.send(true);
        if let Some(handle) = self.reader.take() {
            let _ = handle.await;
        }
        if let Some(handle) = self.maintenance.take() {
            let _ = handle.await;
        }
    }
}

impl std::fmt::Debug for BufferManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferManager")
            .field("runs", &self.run_count())
            .field("capacity", &self.inner.capacity)
            .field("max_runs", &self.inner.max_runs)
            .finish()
    }
}

impl ManagerInner {
    fn append(&self, event: Arc<Event>) {
        // The ring is appended outside the map lock; the map lock never
        // nests around a ring lock.
        let buffer = {
            let mut map = self.buffers.write();
            if !map.contains_key(&event.run_id)
                && self.max_runs > 0
                && map.len() >= self.max_runs
            {
                Self::evict_lru(&mut map);
            }

            let entry = map.entry(event.run_id.clone()).or_insert_with(|| BufferEntry {
                buffer: Arc::new(RingBuffer::new(self.capacity)),
                last_append: Instant::now(),
            });
            entry.last_append = Instant::now();
            Arc::clone(&entry.buffer)
        };

        buffer.append(event);
    }

    /// Evicts the run whose last append is oldest.
    fn evict_lru(map: &mut HashMap<String, BufferEntry>) {
        let oldest = map
            .iter()
            .min_by_key(|(_, entry)| entry.last_append)
            .map(|(run_id, _)| run_id.clone());
        if let Some(run_id) = oldest {
            map.remove(&run_id);
            tracing::debug!(run_id = %run_id, "evicted live buffer at run cap");
        }
    }

    fn maintain(&self) {
        if self.max_runs > 0 {
            let mut map = self.buffers.write();
            while map.len() > self.max_runs {
                Self::evict_lru(&mut map);
            }
        }
        tracing::debug!(runs = self.buffers.read().len(), "live buffer maintenance");
    }
}

// ===========================================================================
// Tests
// ===========================================================================
