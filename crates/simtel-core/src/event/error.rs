//! Event validation and parse errors.

use thiserror::Error;

/// Errors produced while parsing or validating a telemetry event.
///
/// Every variant maps to a single dropped input line; none of them abort
/// stream processing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventError {
    /// The required `v` field is missing or zero.
    #[error("missing required field 'v'")]
    MissingVersion,

    /// The required `runId` field is missing or empty.
    #[error("missing required field 'runId'")]
    MissingRunId,

    /// The required `sourceId` field is missing or empty.
    #[error("missing required field 'sourceId'")]
    MissingSourceId,

    /// `frameIndex` is negative.
    #[error("invalid frameIndex (must be >= 0)")]
    InvalidFrameIndex,

    /// `simTime` is negative.
    #[error("invalid simTime (must be >= 0)")]
    InvalidSimTime,

    /// The line is not a valid JSON object of the expected shape.
    #[error("invalid JSON format")]
    InvalidJson,

    /// The line is empty after trimming.
    #[error("empty line")]
    EmptyLine,
}
