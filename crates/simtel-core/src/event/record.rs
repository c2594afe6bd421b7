//! The telemetry event record.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use super::error::EventError;

/// A single telemetry event.
///
/// Events are immutable once published and shared between subscribers as
/// `Arc<Event>`. The `payload` is opaque raw JSON: the core carries it by
/// reference and hands the bytes through to the sink verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Event schema version. Must be positive.
    #[serde(default)]
    pub v: u32,

    /// Identifier of the simulation run this event belongs to.
    #[serde(default)]
    pub run_id: String,

    /// Identifier of the producing engine or process.
    #[serde(default)]
    pub source_id: String,

    /// Logical event group (e.g. `physics`, `aero`). May be empty.
    #[serde(default)]
    pub channel: String,

    /// Event type (e.g. `run.start`, `frame.state`).
    #[serde(default, rename = "type")]
    pub kind: String,

    /// Simulation frame index, the primary analysis axis.
    #[serde(default)]
    pub frame_index: i64,

    /// Simulation time in seconds.
    #[serde(default)]
    pub sim_time: f64,

    /// Host wall-clock time in epoch milliseconds, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wall_time_ms: Option<i64>,

    /// Free-form tags used for filtering.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub tags: HashMap<String, String>,

    /// Opaque event payload. Never parsed by the core.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Box<RawValue>>,
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.v == other.v
            && self.run_id == other.run_id
            && self.source_id == other.source_id
            && self.channel == other.channel
            && self.kind == other.kind
            && self.frame_index == other.frame_index
            && self.sim_time == other.sim_time
            && self.wall_time_ms == other.wall_time_ms
            && self.tags == other.tags
            && self.payload.as_ref().map(|p| p.get()) == other.payload.as_ref().map(|p| p.get())
    }
}

impl Event {
    /// Checks the required-field invariants.
    ///
    /// # Errors
    ///
    /// Returns the [`EventError`] variant matching the first violated
    /// invariant: `v > 0`, non-empty `run_id` and `source_id`,
    /// `frame_index >= 0`, `sim_time >= 0`.
    pub fn validate(&self) -> Result<(), EventError> {
        if self.v == 0 {
            return Err(EventError::MissingVersion);
        }
        if self.run_id.is_empty() {
            return Err(EventError::MissingRunId);
        }
        if self.source_id.is_empty() {
            return Err(EventError::MissingSourceId);
        }
        if self.frame_index < 0 {
            return Err(EventError::InvalidFrameIndex);
        }
        if self.sim_time < 0.0 {
            return Err(EventError::InvalidSimTime);
        }
        Ok(())
    }

    /// Fills `wall_time_ms` with the current epoch milliseconds if unset.
    ///
    /// Ingest calls this before publishing so every routed event carries a
    /// host timestamp.
    pub fn set_wall_time_now(&mut self) {
        if self.wall_time_ms.is_none() {
            self.wall_time_ms = Some(now_millis());
        }
    }

    /// Returns the payload bytes as a string slice, or `"{}"` when absent.
    #[must_use]
    pub fn payload_str(&self) -> &str {
        self.payload.as_deref().map_or("{}", RawValue::get)
    }
}

/// Current wall-clock time in epoch milliseconds.
#[allow(clippy::cast_possible_truncation)] // epoch millis fit i64 for ~292M years
fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as i64)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_event() -> Event {
        Event {
            v: 1,
            run_id: "r-1".into(),
            source_id: "s-1".into(),
            channel: String::new(),
            kind: "frame.state".into(),
            frame_index: 0,
            sim_time: 0.0,
            wall_time_ms: None,
            tags: HashMap::new(),
            payload: None,
        }
    }

    // --- Validation tests ---

    #[test]
    fn validate_accepts_minimal_event() {
        assert!(valid_event().validate().is_ok());
    }

    #[test]
    fn validate_rejects_missing_version() {
        let mut e = valid_event();
        e.v = 0;
        assert_eq!(e.validate(), Err(EventError::MissingVersion));
    }

    #[test]
    fn validate_rejects_empty_run_id() {
        let mut e = valid_event();
        e.run_id.clear();
        assert_eq!(e.validate(), Err(EventError::MissingRunId));
    }

    #[test]
    fn validate_rejects_empty_source_id() {
        let mut e = valid_event();
        e.source_id.clear();
        assert_eq!(e.validate(), Err(EventError::MissingSourceId));
    }

    #[test]
    fn validate_rejects_negative_frame_index() {
        let mut e = valid_event();
        e.frame_index = -1;
        assert_eq!(e.validate(), Err(EventError::InvalidFrameIndex));
    }

    #[test]
    fn validate_rejects_negative_sim_time() {
        let mut e = valid_event();
        e.sim_time = -0.5;
        assert_eq!(e.validate(), Err(EventError::InvalidSimTime));
    }

    // --- Wall time tests ---

    #[test]
    fn set_wall_time_fills_missing() {
        let mut e = valid_event();
        e.set_wall_time_now();
        assert!(e.wall_time_ms.is_some());
        assert!(e.wall_time_ms.unwrap() > 0);
    }

    #[test]
    fn set_wall_time_keeps_existing() {
        let mut e = valid_event();
        e.wall_time_ms = Some(1_730_000_000_000);
        e.set_wall_time_now();
        assert_eq!(e.wall_time_ms, Some(1_730_000_000_000));
    }

    // --- Payload tests ---

    #[test]
    fn payload_str_defaults_to_empty_object() {
        assert_eq!(valid_event().payload_str(), "{}");
    }

    #[test]
    fn payload_str_returns_raw_bytes() {
        let mut e = valid_event();
        e.payload = Some(RawValue::from_string(r#"{"speed":12.5}"#.into()).unwrap());
        assert_eq!(e.payload_str(), r#"{"speed":12.5}"#);
    }
}
