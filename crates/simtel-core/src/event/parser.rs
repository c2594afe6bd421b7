//! NDJSON event parsing.

use super::error::EventError;
use super::record::Event;

/// Parses a single NDJSON line into an [`Event`].
///
/// The line is trimmed first. The payload field is kept as raw JSON and not
/// interpreted.
///
/// # Errors
///
/// - [`EventError::EmptyLine`] if the trimmed line is empty.
/// - [`EventError::InvalidJson`] if the line is not a JSON object of the
///   expected shape.
/// - A validation variant if a required-field invariant is violated.
pub fn parse_line(line: &str) -> Result<Event, EventError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(EventError::EmptyLine);
    }

    let event: Event = serde_json::from_str(line).map_err(|_| EventError::InvalidJson)?;
    event.validate()?;
    Ok(event)
}

/// Parses a multi-line NDJSON chunk.
///
/// Each line is handled independently: blank lines are skipped, and a bad
/// line is recorded as an error without stopping the remaining lines.
/// Returns the successfully parsed events and the per-line errors.
#[must_use]
pub fn parse_stream(data: &str) -> (Vec<Event>, Vec<EventError>) {
    let mut events = Vec::new();
    let mut errors = Vec::new();

    for line in data.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match parse_line(line) {
            Ok(event) => events.push(event),
            Err(err) => errors.push(err),
        }
    }

    (events, errors)
}

// ===========================================================================
// Tests
// ===========================================================================
