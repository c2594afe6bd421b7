//! Subscription filtering.

use std::collections::HashMap;

use crate::event::Event;

/// A conjunction of optional event predicates.
///
/// Every non-empty condition must hold for an event to match. An empty
/// filter (the [`Default`]) matches every event. Evaluation is
/// short-circuit, cheapest checks first.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Exact run id to match. Empty means any run.
    pub run_id: String,

    /// Exact source id to match. Empty means any source.
    pub source_id: String,

    /// Exact channel to match. Empty means any channel.
    pub channel: String,

    /// Event types to accept. Empty means any type, not none.
    pub types: Vec<String>,

    /// Prefix the event type must start with. Empty means any type.
    pub type_prefix: String,

    /// Tags the event must carry with exactly these values.
    pub tags_all: HashMap<String, String>,
}

impl EventFilter {
    /// Returns `true` if the event satisfies every non-empty condition.
    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        if !self.run_id.is_empty() && event.run_id != self.run_id {
            return false;
        }
        if !self.source_id.is_empty() && event.source_id != self.source_id {
            return false;
        }
        if !self.channel.is_empty() && event.channel != self.channel {
            return false;
        }
        if !self.types.is_empty() && !self.types.iter().any(|t| *t == event.kind) {
            return false;
        }
        if !self.type_prefix.is_empty() && !event.kind.starts_with(&self.type_prefix) {
            return false;
        }
        if !self.tags_all.is_empty() {
            for (key, value) in &self.tags_all {
                if event.tags.get(key) != Some(value) {
                    return false;
                }
            }
        }
        true
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn event(run: &str, source: &str, channel: &str, kind: &str) -> Event {
        Event {
            v: 1,
            run_id: run.into(),
            source_id: source.into(),
            channel: channel.into(),
            kind: kind.into(),
            frame_index: 0,
            sim_time: 0.0,
            wall_time_ms: None,
            tags: HashMap::new(),
            payload: None,
        }
    }

    #[test]
    fn empty_filter_matches_everything() {
        let f = EventFilter::default();
        assert!(f.matches(&event("r-1", "s-1", "physics", "body.state")));
        assert!(f.matches(&event("r-2", "s-2", "", "")));
    }

    #[test]
    fn run_id_exact_match() {
        let f = EventFilter {
            run_id: "r-1".into(),
            ..EventFilter::default()
        };
        assert!(f.matches(&event("r-1", "s", "", "t")));
        assert!(!f.matches(&event("r-2", "s", "", "t")));
    }

    #[test]
    fn source_id_exact_match() {
        let f = EventFilter {
            source_id: "flight-engine".into(),
            ..EventFilter::default()
        };
        assert!(f.matches(&event("r", "flight-engine", "", "t")));
        assert!(!f.matches(&event("r", "drive-engine", "", "t")));
    }

    #[test]
    fn channel_exact_match() {
        let f = EventFilter {
            channel: "aero".into(),
            ..EventFilter::default()
        };
        assert!(f.matches(&event("r", "s", "aero", "t")));
        assert!(!f.matches(&event("r", "s", "physics", "t")));
        assert!(!f.matches(&event("r", "s", "", "t")));
    }

    #[test]
    fn types_set_membership() {
        let f = EventFilter {
            types: vec!["run.start".into(), "run.end".into()],
            ..EventFilter::default()
        };
        assert!(f.matches(&event("r", "s", "", "run.start")));
        assert!(f.matches(&event("r", "s", "", "run.end")));
        assert!(!f.matches(&event("r", "s", "", "frame.state")));
    }

    #[test]
    fn empty_types_is_wildcard_not_reject_all() {
        let f = EventFilter {
            types: Vec::new(),
            ..EventFilter::default()
        };
        assert!(f.matches(&event("r", "s", "", "anything")));
    }

    #[test]
    fn type_prefix_match() {
        let f = EventFilter {
            type_prefix: "frame.".into(),
            ..EventFilter::default()
        };
        assert!(f.matches(&event("r", "s", "", "frame.start")));
        assert!(f.matches(&event("r", "s", "", "frame.state")));
        assert!(!f.matches(&event("r", "s", "", "run.start")));
        assert!(!f.matches(&event("r", "s", "", "frame"))); // shorter than prefix
    }

    #[test]
    fn tags_all_requires_every_pair() {
        let f = EventFilter {
            tags_all: [("env".to_string(), "ci".to_string())].into(),
            ..EventFilter::default()
        };

        let mut with_tag = event("r", "s", "", "t");
        with_tag.tags.insert("env".into(), "ci".into());
        with_tag.tags.insert("extra".into(), "x".into());
        assert!(f.matches(&with_tag));

        let mut wrong_value = event("r", "s", "", "t");
        wrong_value.tags.insert("env".into(), "prod".into());
        assert!(!f.matches(&wrong_value));

        // No tags at all never satisfies a tags_all condition.
        assert!(!f.matches(&event("r", "s", "", "t")));
    }

    #[test]
    fn conjunction_of_all_conditions() {
        let f = EventFilter {
            run_id: "r-1".into(),
            source_id: "s-1".into(),
            channel: "physics".into(),
            types: vec!["body.state".into()],
            type_prefix: "body.".into(),
            tags_all: [("k".to_string(), "v".to_string())].into(),
        };

        let mut e = event("r-1", "s-1", "physics", "body.state");
        e.tags.insert("k".into(), "v".into());
        assert!(f.matches(&e));

        let mut wrong_run = e.clone();
        wrong_run.run_id = "r-2".into();
        assert!(!f.matches(&wrong_run));
    }
}
