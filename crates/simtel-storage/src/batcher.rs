//! Bus-driven batch accumulation and flushing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use simtel_core::{
    BackpressurePolicy, Event, EventBus, EventFilter, Subscription, SubscriptionOptions,
};

use crate::client::Sink;
use crate::error::StorageError;
use crate::metadata::{MetadataWriter, RunSummary, RUN_END};
use crate::retry::RetryPolicy;

// ---------------------------------------------------------------------------
// BatcherConfig / BatcherStats
// ---------------------------------------------------------------------------

/// Configuration for the [`Batcher`].
#[derive(Debug, Clone)]
pub struct BatcherConfig {
    /// Events accumulated before a size-triggered flush.
    pub batch_size: usize,

    /// Interval of the time-triggered flush.
    pub flush_interval: Duration,

    /// Which events the batcher subscribes to.
    pub filter: EventFilter,

    /// Queue capacity of the bus subscription.
    pub buffer_size: usize,

    /// Backpressure policy of the bus subscription. `Block` keeps the
    /// durable copy lossless at the cost of stalling publishers when the
    /// batcher falls behind.
    pub policy: BackpressurePolicy,

    /// Retry schedule for sink writes.
    pub retry: RetryPolicy,

    /// Sink table receiving event rows.
    pub events_table: String,

    /// Sink table receiving run metadata rows.
    pub metadata_table: String,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            batch_size: 10_000,
            flush_interval: Duration::from_millis(500),
            filter: EventFilter::default(),
            buffer_size: 8192,
            policy: BackpressurePolicy::Block,
            retry: RetryPolicy::default(),
            events_table: "telemetry_events".into(),
            metadata_table: "run_metadata".into(),
        }
    }
}

/// A point-in-time snapshot of batcher counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatcherStats {
    /// Batches successfully written to the sink.
    pub total_batches: u64,

    /// Events successfully written to the sink.
    pub total_events: u64,

    /// Flushes abandoned after exhausting retries (or failing to encode).
    pub total_errors: u64,

    /// Events currently accumulated and not yet flushed.
    pub pending: usize,
}

// ---------------------------------------------------------------------------
// Batcher
// ---------------------------------------------------------------------------

/// Accumulates bus events and flushes them to the columnar sink.
///
/// A single reader task drains the bus subscription and flushes on four
/// triggers: batch size, `run.end`, the flush interval, and shutdown. The
/// pending list is swapped out under a mutex at flush time, so
/// accumulation resumes immediately while the write is in flight.
pub struct Batcher {
    bus: Arc<EventBus>,
    worker: Arc<FlushWorker>,
    filter: EventFilter,
    buffer_size: usize,
    policy: BackpressurePolicy,
    flush_interval: Duration,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl Batcher {
    /// Creates a batcher. Nothing runs until [`start`](Self::start).
    #[must_use]
    pub fn new(bus: Arc<EventBus>, sink: Arc<dyn Sink>, config: BatcherConfig) -> Self {
        let worker = Arc::new(FlushWorker {
            sink: Arc::clone(&sink),
            pending: Mutex::new(Vec::with_capacity(config.batch_size)),
            batch_size: config.batch_size.max(1),
            retry: config.retry,
            events_table: config.events_table,
            metadata: MetadataWriter::new(sink, config.metadata_table),
            batches: AtomicU64::new(0),
            events: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        });

        Self {
            bus,
            worker,
            filter: config.filter,
            buffer_size: config.buffer_size,
            policy: config.policy,
            flush_interval: config.flush_interval,
            shutdown: None,
            task: None,
        }
    }

    /// Subscribes to the bus and starts the reader task.
    ///
    /// # Errors
    ///
    /// [`StorageError::AlreadyStarted`] on double start,
    /// [`StorageError::Bus`] if the bus is closed.
    pub fn start(&mut self) -> Result<(), StorageError> {
        if self.task.is_some() {
            return Err(StorageError::AlreadyStarted);
        }

        let subscription = self.bus.subscribe(
            self.filter.clone(),
            SubscriptionOptions {
                buffer_size: self.buffer_size,
                policy: self.policy,
                name: Some("sink-batcher".into()),
            },
        )?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let worker = Arc::clone(&self.worker);
        let flush_interval = self.flush_interval;
        let task = tokio::spawn(run_loop(worker, subscription, flush_interval, shutdown_rx));

        self.shutdown = Some(shutdown_tx);
        self.task = Some(task);
        tracing::info!("batcher started");
        Ok(())
    }

    /// Signals shutdown and waits for the reader to drain and perform its
    /// final flush, bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::ShutdownTimeout`] if the reader does not
    /// finish in time (the task is aborted).
    pub async fn stop(&mut self, timeout: Duration) -> Result<(), StorageError> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let Some(mut task) = self.task.take() else {
            return Ok(());
        };

        match tokio::time::timeout(timeout, &mut task).await {
            Ok(_) => Ok(()),
            Err(_) => {
                task.abort();
                Err(StorageError::ShutdownTimeout)
            }
        }
    }

    /// Returns a snapshot of the batcher counters.
    #[must_use]
    pub fn stats(&self) -> BatcherStats {
        BatcherStats {
            total_batches: self.worker.batches.load(Ordering::Relaxed),
            total_events: self.worker.events.load(Ordering::Relaxed),
            total_errors: self.worker.errors.load(Ordering::Relaxed),
            pending: self.worker.pending.lock().len(),
        }
    }
}

impl std::fmt::Debug for Batcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("Batcher")
            .field("running", &self.task.is_some())
            .field("stats", &stats)
            .finish()
    }
}

/// Reader loop: accumulate, flush on size / `run.end` / tick / shutdown.
async fn run_loop(
    worker: Arc<FlushWorker>,
    mut subscription: Subscription,
    flush_interval: Duration,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let first_tick = tokio::time::Instant::now() + flush_interval;
    let mut ticker = tokio::time::interval_at(first_tick, flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = &mut shutdown_rx => {
                worker.flush().await;
                break;
            }
            _ = ticker.tick() => {
                worker.flush().await;
            }
            event = subscription.recv() => match event {
                Some(event) => {
                    let is_run_end = event.kind == RUN_END;
                    let pending = worker.push(event);
                    if pending >= worker.batch_size || is_run_end {
                        worker.flush().await;
                    }
                }
                None => {
                    worker.flush().await;
                    break;
                }
            },
        }
    }
    tracing::debug!("batcher reader stopped");
}

// ---------------------------------------------------------------------------
// FlushWorker
// ---------------------------------------------------------------------------

/// Shared state between the reader task and the [`Batcher`] handle.
struct FlushWorker {
    sink: Arc<dyn Sink>,
    pending: Mutex<Vec<Arc<Event>>>,
    batch_size: usize,
    retry: RetryPolicy,
    events_table: String,
    metadata: MetadataWriter,
    batches: AtomicU64,
    events: AtomicU64,
    errors: AtomicU64,
}

impl FlushWorker {
    /// Appends to the pending batch; returns the new pending length.
    fn push(&self, event: Arc<Event>) -> usize {
        let mut pending = self.pending.lock();
        pending.push(event);
        pending.len()
    }

    /// Flushes the pending batch, if any.
    ///
    /// The batch is swapped out under the lock so accumulation continues
    /// while the write runs. A batch that still fails after the retry
    /// schedule is dropped and counted.
    async fn flush(&self) {
        let batch = {
            let mut pending = self.pending.lock();
            if pending.is_empty() {
                return;
            }
            let capacity = pending.capacity();
            std::mem::replace(&mut *pending, Vec::with_capacity(capacity))
        };

        match self.write_events(&batch).await {
            Ok(()) => {
                self.batches.fetch_add(1, Ordering::Relaxed);
                self.events.fetch_add(batch.len() as u64, Ordering::Relaxed);
                tracing::debug!(events = batch.len(), "batch flushed");
                self.write_metadata(&batch).await;
            }
            Err(error) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    error = %error,
                    events = batch.len(),
                    "batch flush failed; dropping batch"
                );
            }
        }
    }

    async fn write_events(&self, batch: &[Arc<Event>]) -> Result<(), StorageError> {
        let body = encode_rows(batch)?;
        let mut attempt = 0u32;
        loop {
            match self
                .sink
                .insert_batch(&self.events_table, body.clone())
                .await
            {
                Ok(()) => return Ok(()),
                Err(error) if self.retry.should_retry(attempt) => {
                    attempt += 1;
                    tracing::warn!(attempt, error = %error, "sink insert failed; retrying");
                    tokio::time::sleep(self.retry.delay_for_attempt(attempt)).await;
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// Derives and upserts one metadata row per run in the batch.
    async fn write_metadata(&self, batch: &[Arc<Event>]) {
        let mut runs: HashMap<&str, Vec<Arc<Event>>> = HashMap::new();
        for event in batch {
            runs.entry(event.run_id.as_str())
                .or_default()
                .push(Arc::clone(event));
        }

        let now_ms = Utc::now().timestamp_millis();
        for (run_id, events) in &runs {
            let Some(summary) = RunSummary::from_events(run_id, events, now_ms) else {
                continue;
            };
            if let Err(error) = self.metadata.upsert(&summary).await {
                tracing::warn!(run_id = %run_id, error = %error, "metadata upsert failed");
            }
        }
    }
}

/// Sink row for one event.
#[derive(Serialize)]
struct EventRow<'a> {
    run_id: &'a str,
    source_id: &'a str,
    channel: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
    frame_index: i64,
    sim_time: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    wall_time_ms: Option<i64>,
    /// Tags re-encoded as a JSON string, per the sink schema.
    tags: String,
    /// Payload bytes passed through verbatim, wrapped as a string field.
    payload: &'a str,
}

/// Serializes a batch as newline-separated sink rows.
fn encode_rows(batch: &[Arc<Event>]) -> Result<Bytes, StorageError> {
    let mut body = String::new();
    for (i, event) in batch.iter().enumerate() {
        if i > 0 {
            body.push('\n');
        }
        let row = EventRow {
            run_id: &event.run_id,
            source_id: &event.source_id,
            channel: &event.channel,
            kind: &event.kind,
            frame_index: event.frame_index,
            sim_time: event.sim_time,
            wall_time_ms: event.wall_time_ms,
            tags: serde_json::to_string(&event.tags)?,
            payload: event.payload_str(),
        };
        body.push_str(&serde_json::to_string(&row)?);
    }
    Ok(Bytes::from(body))
}

// ===========================================================================
// Tests
// ===========================================================================
