//! Storage error types.

use thiserror::Error;

/// Errors from the durable storage path.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The sink URL could not be parsed.
    #[error("invalid sink URL: {0}")]
    InvalidUrl(String),

    /// The HTTP request itself failed (connect, timeout, transport).
    #[error("sink request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The sink answered with a non-success status.
    #[error("sink error (status {status}): {message}")]
    Sink {
        /// HTTP status code returned by the sink.
        status: u16,
        /// Response body, as far as it could be read.
        message: String,
    },

    /// A row could not be serialized.
    #[error("failed to serialize row: {0}")]
    Serialize(#[from] serde_json::Error),

    /// `start` was called on an already-running batcher.
    #[error("batcher already started")]
    AlreadyStarted,

    /// The event bus refused the subscription.
    #[error("event bus unavailable: {0}")]
    Bus(#[from] simtel_core::BusError),

    /// Graceful shutdown did not finish within its budget.
    #[error("shutdown timed out")]
    ShutdownTimeout,
}
