//! # simtel-storage
//!
//! The durable path of the telemetry pipeline: a [`Batcher`] subscribes to
//! the event bus (normally with the `Block` policy, since the durable copy
//! should not lose data) and flushes accumulated events to a columnar
//! analytical store over HTTP, in NDJSON batches. Each flushed batch also
//! produces one metadata summary row per run.
//!
//! Flush triggers: batch size, flush interval, a `run.end` sentinel event,
//! and shutdown. Transient sink failures are retried with linear backoff;
//! exhausted retries drop the batch and count an error. Sink latency and
//! sink outages never stall the live path beyond the subscription's own
//! backpressure policy.

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

mod batcher;
mod client;
mod error;
mod metadata;
mod retry;

pub use batcher::{Batcher, BatcherConfig, BatcherStats};
pub use client::{HttpSink, Sink};
pub use error::StorageError;
pub use metadata::{MetadataWriter, RunStatus, RunSummary};
pub use retry::RetryPolicy;
