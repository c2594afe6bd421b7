//! Per-run metadata derivation.
//!
//! Each flushed batch is folded into one [`RunSummary`] per run and
//! upserted to the sink. The sink deduplicates by `run_id` across batches
//! (ReplacingMergeTree-style), so every emission is a complete snapshot of
//! the batch it was derived from, not a delta.

use std::collections::HashSet;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;

use simtel_core::Event;

use crate::client::Sink;
use crate::error::StorageError;

/// Event type that opens a run.
pub(crate) const RUN_START: &str = "run.start";
/// Event type that closes a run and forces a batch flush.
pub(crate) const RUN_END: &str = "run.end";

// ---------------------------------------------------------------------------
// RunStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of a run as far as the derived metadata can tell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// No `run.end` has been seen in the batch.
    Running,
    /// A `run.end` event was present.
    Completed,
}

impl RunStatus {
    /// The sink-facing column value.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// RunSummary
// ---------------------------------------------------------------------------

/// Metadata summary of one run, derived from a single flushed batch.
///
/// Derivation is a pure fold over the batch: the same events in any order
/// produce the same summary.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    /// The run this summary describes.
    pub run_id: String,
    /// Source id taken from the `run.start` event, if present.
    pub source_id: String,
    /// Engine version soft-parsed from the `run.start` payload.
    pub engine_version: String,
    /// Seed soft-parsed from the `run.start` payload.
    pub seed: Option<u64>,
    /// Raw `run.start` payload bytes, carried as the run configuration.
    pub config: String,
    /// JSON-encoded tags of the `run.start` event.
    pub tags: String,
    /// `Completed` iff the batch contains a `run.end` event.
    pub status: RunStatus,
    /// Run start time (epoch ms): `run.start` wall time, else the earliest
    /// frame's wall time, else derivation time.
    pub started_at_ms: i64,
    /// Set to derivation time when the run completed in this batch.
    pub ended_at_ms: Option<i64>,
    /// `run.end.sim_time - run.start.sim_time`, when both exist and the
    /// difference is positive.
    pub duration_seconds: Option<f64>,
    /// Optional `reason` from the `run.end` payload.
    pub end_reason: Option<String>,
    /// Events in the batch for this run.
    pub total_events: u64,
    /// Highest frame index observed.
    pub max_frame_index: u64,
    /// Number of distinct frame indexes observed.
    pub total_frames: u64,
}

impl RunSummary {
    /// Folds a batch's events for one run into a summary.
    ///
    /// `now_ms` stands in for the derivation wall clock so the fold stays a
    /// deterministic function of its inputs. Returns `None` for an empty
    /// slice.
    #[must_use]
    pub fn from_events(run_id: &str, events: &[Arc<Event>], now_ms: i64) -> Option<Self> {
        if events.is_empty() {
            return None;
        }

        let mut first_event: Option<&Arc<Event>> = None;
        let mut run_start: Option<&Arc<Event>> = None;
        let mut run_end: Option<&Arc<Event>> = None;
        let mut max_frame_index = 0u64;
        let mut frame_indexes = HashSet::new();

        for event in events {
            if first_event.is_none_or(|f| event.frame_index < f.frame_index) {
                first_event = Some(event);
            }
            if event.kind == RUN_START {
                run_start = Some(event);
            }
            if event.kind == RUN_END {
                run_end = Some(event);
            }
            let frame = u64::try_from(event.frame_index).unwrap_or(0);
            max_frame_index = max_frame_index.max(frame);
            frame_indexes.insert(event.frame_index);
        }

        let (source_id, engine_version, seed, config, tags) = run_start.map_or_else(
            || (String::new(), String::new(), None, String::new(), String::new()),
            |start| {
                let (engine_version, seed) = parse_start_payload(start);
                let tags = serde_json::to_string(&start.tags).unwrap_or_default();
                (
                    start.source_id.clone(),
                    engine_version,
                    seed,
                    start.payload_str().to_string(),
                    tags,
                )
            },
        );

        let (status, ended_at_ms, end_reason) = match run_end {
            Some(end) => (
                RunStatus::Completed,
                Some(now_ms),
                parse_end_reason(end),
            ),
            None => (RunStatus::Running, None, None),
        };

        let duration_seconds = match (run_start, run_end) {
            (Some(start), Some(end)) if end.sim_time > start.sim_time => {
                Some(end.sim_time - start.sim_time)
            }
            _ => None,
        };

        let started_at_ms = run_start
            .and_then(|e| e.wall_time_ms)
            .or_else(|| first_event.and_then(|e| e.wall_time_ms))
            .unwrap_or(now_ms);

        Some(Self {
            run_id: run_id.to_string(),
            source_id,
            engine_version,
            seed,
            config,
            tags,
            status,
            started_at_ms,
            ended_at_ms,
            duration_seconds,
            end_reason,
            total_events: events.len() as u64,
            max_frame_index,
            total_frames: frame_indexes.len() as u64,
        })
    }

    /// Serializes the sink upsert row, stamped with `updated_at_ms`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Serialize`] if the row cannot be encoded.
    pub fn to_row_json(&self, updated_at_ms: i64) -> Result<String, StorageError> {
        let row = SummaryRow {
            run_id: &self.run_id,
            source_id: &self.source_id,
            config: &self.config,
            engine_version: &self.engine_version,
            tags: &self.tags,
            status: self.status.as_str(),
            total_events: self.total_events,
            total_frames: self.total_frames,
            max_frame_index: self.max_frame_index,
            seed: self.seed,
            started_at: rfc3339(self.started_at_ms),
            ended_at: self.ended_at_ms.map(|ms| ms / 1000),
            duration_seconds: self.duration_seconds,
            end_reason: self.end_reason.as_deref(),
            updated_at: rfc3339(updated_at_ms),
        };
        Ok(serde_json::to_string(&row)?)
    }
}

/// Sink row for one run summary.
#[derive(Serialize)]
struct SummaryRow<'a> {
    run_id: &'a str,
    source_id: &'a str,
    config: &'a str,
    engine_version: &'a str,
    tags: &'a str,
    status: &'a str,
    total_events: u64,
    total_frames: u64,
    max_frame_index: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u64>,
    started_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    ended_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    end_reason: Option<&'a str>,
    updated_at: String,
}

/// Soft-parses `engine_version` and `seed` out of a `run.start` payload.
/// Missing or ill-typed fields are silently absent.
fn parse_start_payload(start: &Event) -> (String, Option<u64>) {
    let Ok(payload) = serde_json::from_str::<serde_json::Value>(start.payload_str()) else {
        return (String::new(), None);
    };

    let engine_version = payload
        .get("engine_version")
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default()
        .to_string();

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let seed = payload.get("seed").and_then(|v| {
        v.as_u64()
            .or_else(|| v.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
    });

    (engine_version, seed)
}

/// Soft-parses the optional `reason` from a `run.end` payload.
fn parse_end_reason(end: &Event) -> Option<String> {
    serde_json::from_str::<serde_json::Value>(end.payload_str())
        .ok()?
        .get("reason")
        .and_then(serde_json::Value::as_str)
        .map(ToString::to_string)
}

fn rfc3339(epoch_ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(epoch_ms)
        .unwrap_or_else(|| DateTime::<Utc>::from_timestamp_millis(0).unwrap_or_default())
        .to_rfc3339()
}

// ---------------------------------------------------------------------------
// MetadataWriter
// ---------------------------------------------------------------------------

/// Upserts [`RunSummary`] rows into the sink's metadata table.
pub struct MetadataWriter {
    sink: Arc<dyn Sink>,
    table: String,
}

impl MetadataWriter {
    /// Creates a writer targeting the given table.
    pub fn new(sink: Arc<dyn Sink>, table: impl Into<String>) -> Self {
        Self {
            sink,
            table: table.into(),
        }
    }

    /// Writes one summary row, stamped with the current wall clock.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if serialization or the sink write fails.
    pub async fn upsert(&self, summary: &RunSummary) -> Result<(), StorageError> {
        let row = summary.to_row_json(Utc::now().timestamp_millis())?;
        self.sink
            .insert_batch(&self.table, Bytes::from(row))
            .await
    }
}

impl std::fmt::Debug for MetadataWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataWriter")
            .field("table", &self.table)
            .finish()
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::value::RawValue;
    use std::collections::HashMap;

    const NOW_MS: i64 = 1_730_000_100_000;

    fn event(kind: &str, frame: i64, sim_time: f64) -> Arc<Event> {
        Arc::new(Event {
            v: 1,
            run_id: "r-1".into(),
            source_id: "flight-engine".into(),
            channel: String::new(),
            kind: kind.into(),
            frame_index: frame,
            sim_time,
            wall_time_ms: None,
            tags: HashMap::new(),
            payload: None,
        })
    }

    fn with_payload(mut e: Arc<Event>, payload: &str) -> Arc<Event> {
        let inner = Arc::make_mut(&mut e);
        inner.payload = Some(RawValue::from_string(payload.into()).unwrap());
        e
    }

    fn with_wall_time(mut e: Arc<Event>, ms: i64) -> Arc<Event> {
        Arc::make_mut(&mut e).wall_time_ms = Some(ms);
        e
    }

    // --- Fold basics ---

    #[test]
    fn empty_batch_yields_nothing() {
        assert!(RunSummary::from_events("r-1", &[], NOW_MS).is_none());
    }

    #[test]
    fn counts_events_frames_and_max_index() {
        let events = vec![
            event("frame.state", 0, 0.0),
            event("frame.state", 1, 0.1),
            event("sensor.sample", 1, 0.1),
            event("frame.state", 4, 0.4),
        ];
        let s = RunSummary::from_events("r-1", &events, NOW_MS).unwrap();
        assert_eq!(s.total_events, 4);
        assert_eq!(s.total_frames, 3); // frames 0, 1, 4
        assert_eq!(s.max_frame_index, 4);
        assert_eq!(s.status, RunStatus::Running);
        assert!(s.ended_at_ms.is_none());
        assert!(s.duration_seconds.is_none());
    }

    // --- run.start extraction ---

    #[test]
    fn run_start_supplies_source_config_and_soft_fields() {
        let start = with_payload(
            event(RUN_START, 0, 0.0),
            r#"{"engine_version":"2.4.1","seed":42,"gravity":9.81}"#,
        );
        let events = vec![start, event("frame.state", 1, 0.1)];

        let s = RunSummary::from_events("r-1", &events, NOW_MS).unwrap();
        assert_eq!(s.source_id, "flight-engine");
        assert_eq!(s.engine_version, "2.4.1");
        assert_eq!(s.seed, Some(42));
        assert_eq!(s.config, r#"{"engine_version":"2.4.1","seed":42,"gravity":9.81}"#);
    }

    #[test]
    fn soft_parse_tolerates_missing_and_ill_typed_fields() {
        let start = with_payload(event(RUN_START, 0, 0.0), r#"{"seed":"not-a-number"}"#);
        let s = RunSummary::from_events("r-1", &[start], NOW_MS).unwrap();
        assert_eq!(s.engine_version, "");
        assert_eq!(s.seed, None);
    }

    #[test]
    fn seed_accepts_float_encoding() {
        let start = with_payload(event(RUN_START, 0, 0.0), r#"{"seed":42.0}"#);
        let s = RunSummary::from_events("r-1", &[start], NOW_MS).unwrap();
        assert_eq!(s.seed, Some(42));
    }

    // --- run.end and duration ---

    #[test]
    fn run_end_completes_the_run() {
        let end = with_payload(event(RUN_END, 10, 2.5), r#"{"reason":"finished"}"#);
        let events = vec![event(RUN_START, 0, 0.5), event("frame.state", 5, 1.0), end];

        let s = RunSummary::from_events("r-1", &events, NOW_MS).unwrap();
        assert_eq!(s.status, RunStatus::Completed);
        assert_eq!(s.ended_at_ms, Some(NOW_MS));
        assert_eq!(s.end_reason.as_deref(), Some("finished"));
        assert_eq!(s.duration_seconds, Some(2.0));
    }

    #[test]
    fn duration_absent_when_not_positive() {
        let events = vec![event(RUN_START, 0, 3.0), event(RUN_END, 1, 3.0)];
        let s = RunSummary::from_events("r-1", &events, NOW_MS).unwrap();
        assert!(s.duration_seconds.is_none());
    }

    #[test]
    fn end_without_start_still_completes() {
        let events = vec![event("frame.state", 0, 0.0), event(RUN_END, 1, 1.0)];
        let s = RunSummary::from_events("r-1", &events, NOW_MS).unwrap();
        assert_eq!(s.status, RunStatus::Completed);
        assert!(s.duration_seconds.is_none());
        assert_eq!(s.source_id, "");
    }

    // --- started_at preference chain ---

    #[test]
    fn started_at_prefers_run_start_wall_time() {
        let start = with_wall_time(event(RUN_START, 5, 0.0), 111);
        let first = with_wall_time(event("frame.state", 0, 0.0), 222);
        let s = RunSummary::from_events("r-1", &[first, start], NOW_MS).unwrap();
        assert_eq!(s.started_at_ms, 111);
    }

    #[test]
    fn started_at_falls_back_to_earliest_frame() {
        let first = with_wall_time(event("frame.state", 0, 0.0), 222);
        let later = event("frame.state", 3, 0.3);
        let s = RunSummary::from_events("r-1", &[later, first], NOW_MS).unwrap();
        assert_eq!(s.started_at_ms, 222);
    }

    #[test]
    fn started_at_falls_back_to_now() {
        let s = RunSummary::from_events("r-1", &[event("frame.state", 0, 0.0)], NOW_MS).unwrap();
        assert_eq!(s.started_at_ms, NOW_MS);
    }

    // --- Permutation invariance (scenario: same batch, any order) ---

    #[test]
    fn derivation_is_permutation_invariant() {
        let events = vec![
            with_payload(event(RUN_START, 0, 0.0), r#"{"engine_version":"1.0","seed":7}"#),
            event("frame.state", 1, 0.1),
            event("frame.state", 2, 0.2),
            with_payload(event(RUN_END, 3, 0.9), r#"{"reason":"done"}"#),
        ];
        let mut reversed = events.clone();
        reversed.reverse();

        let a = RunSummary::from_events("r-1", &events, NOW_MS).unwrap();
        let b = RunSummary::from_events("r-1", &reversed, NOW_MS).unwrap();
        assert_eq!(a, b);

        // Byte-identical rows given the same update stamp.
        assert_eq!(
            a.to_row_json(NOW_MS).unwrap(),
            b.to_row_json(NOW_MS).unwrap()
        );
    }

    // --- Row serialization ---

    #[test]
    fn row_json_shape() {
        let events = vec![
            with_payload(event(RUN_START, 0, 0.0), r#"{"engine_version":"1.0"}"#),
            with_payload(event(RUN_END, 2, 1.5), r#"{"reason":"done"}"#),
        ];
        let s = RunSummary::from_events("r-1", &events, NOW_MS).unwrap();
        let row: serde_json::Value =
            serde_json::from_str(&s.to_row_json(NOW_MS).unwrap()).unwrap();

        assert_eq!(row["run_id"], "r-1");
        assert_eq!(row["status"], "completed");
        assert_eq!(row["total_events"], 2);
        assert_eq!(row["ended_at"], NOW_MS / 1000);
        assert!(row["started_at"].as_str().unwrap().starts_with("2024-"));
        assert!(row.get("seed").is_none(), "absent seed must be omitted");
    }
}
