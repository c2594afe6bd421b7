//! Telemetry event model and NDJSON parsing.
//!
//! An [`Event`] is the immutable record routed by the bus. Its `payload` is
//! carried as raw JSON bytes and never interpreted by the core; consumers
//! that care about payload contents parse it themselves.
//!
//! Parsing follows the ingest contract: one JSON object per line, blank
//! lines skipped, and a malformed or invalid line dropped without aborting
//! the rest of the stream ([`parse_stream`]).

mod error;
mod parser;
mod record;

pub use error::EventError;
pub use parser::{parse_line, parse_stream};
pub use record::Event;
