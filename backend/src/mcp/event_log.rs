//! Per-session journal of delivered stream events.
//!
//! The log is a bounded FIFO: once `capacity` events are retained, recording
//! a new one drops the oldest. Arrival order is the only ordering used for
//! replay.

use chrono::Utc;
use serde_json::Value;
use std::collections::VecDeque;
use tether_types::{StreamEvent, StreamEventType};
use tracing::debug;

/// Default number of retained events per session.
pub const DEFAULT_MAX_EVENTS: usize = 1000;

/// Default number of events replayed when a cursor cannot be resolved.
pub const DEFAULT_REPLAY_FALLBACK: usize = 20;

/// Events selected for replay.
#[derive(Debug, Clone)]
pub struct EventSlice {
    pub events: Vec<StreamEvent>,
    /// False when the cursor was evicted or never existed and the most
    /// recent events were returned instead.
    pub cursor_found: bool,
}

/// Bounded, ordered event journal of one session.
#[derive(Debug)]
pub struct EventLog {
    session_id: String,
    events: VecDeque<StreamEvent>,
    capacity: usize,
    replay_fallback: usize,
    next_seq: u64,
}

impl EventLog {
    /// Create an empty log.
    pub fn new(session_id: impl Into<String>, capacity: usize, replay_fallback: usize) -> Self {
        Self {
            session_id: session_id.into(),
            events: VecDeque::with_capacity(capacity.min(64)),
            capacity: capacity.max(1),
            replay_fallback,
            next_seq: 1,
        }
    }

    /// Append a new event and return it.
    ///
    /// The event id is derived from a per-session sequence that never
    /// repeats, so ids stay unique even after eviction.
    pub fn record(&mut self, event_type: StreamEventType, data: Value) -> StreamEvent {
        let event = StreamEvent {
            id: format!("evt-{}", self.next_seq),
            event_type,
            data,
            timestamp: Utc::now(),
            session_id: self.session_id.clone(),
        };
        self.next_seq += 1;

        self.events.push_back(event.clone());
        while self.events.len() > self.capacity {
            if let Some(evicted) = self.events.pop_front() {
                debug!("Evicted {}", evicted.description());
            }
        }
        debug!("Recorded {}", event.description());
        event
    }

    /// Events recorded strictly after `after_id`, in arrival order.
    ///
    /// If `after_id` is not in the retained window the most recent
    /// `replay_fallback` events are returned and `cursor_found` is false.
    pub fn slice_after(&self, after_id: &str) -> EventSlice {
        match self.events.iter().position(|e| e.id == after_id) {
            Some(index) => EventSlice {
                events: self.events.iter().skip(index + 1).cloned().collect(),
                cursor_found: true,
            },
            None => {
                let skip = self.events.len().saturating_sub(self.replay_fallback);
                EventSlice {
                    events: self.events.iter().skip(skip).cloned().collect(),
                    cursor_found: false,
                }
            }
        }
    }

    /// Retained events, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &StreamEvent> {
        self.events.iter()
    }

    /// Id of the newest retained event.
    pub fn last_id(&self) -> Option<&str> {
        self.events.back().map(|e| e.id.as_str())
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn filled(count: usize, capacity: usize) -> EventLog {
        let mut log = EventLog::new("s1", capacity, DEFAULT_REPLAY_FALLBACK);
        for i in 0..count {
            log.record(StreamEventType::Progress, json!({ "n": i }));
        }
        log
    }

    #[test]
    fn test_record_assigns_increasing_ids() {
        let log = filled(3, 10);
        let ids: Vec<_> = log.iter().map(|e| e.id.clone()).collect();
        assert_eq!(ids, vec!["evt-1", "evt-2", "evt-3"]);
        assert!(log.iter().all(|e| e.session_id == "s1"));
        assert_eq!(log.last_id(), Some("evt-3"));
    }

    #[test]
    fn test_cap_evicts_oldest() {
        let log = filled(DEFAULT_MAX_EVENTS + 1, DEFAULT_MAX_EVENTS);
        assert_eq!(log.len(), DEFAULT_MAX_EVENTS);
        assert_eq!(log.iter().next().unwrap().id, "evt-2");
        assert_eq!(log.last_id(), Some("evt-1001"));
    }

    #[test]
    fn test_slice_after_known_cursor() {
        let log = filled(5, 10);
        let slice = log.slice_after("evt-2");
        assert!(slice.cursor_found);
        let ids: Vec<_> = slice.events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["evt-3", "evt-4", "evt-5"]);

        let slice = log.slice_after("evt-5");
        assert!(slice.cursor_found);
        assert!(slice.events.is_empty());
    }

    #[test]
    fn test_slice_after_unknown_cursor_falls_back() {
        let log = filled(50, 100);
        let slice = log.slice_after("evt-unknown");
        assert!(!slice.cursor_found);
        assert_eq!(slice.events.len(), DEFAULT_REPLAY_FALLBACK);
        assert_eq!(slice.events.first().unwrap().id, "evt-31");
        assert_eq!(slice.events.last().unwrap().id, "evt-50");
    }

    #[test]
    fn test_slice_after_evicted_cursor_falls_back() {
        let log = filled(30, 25);
        // evt-1..evt-5 were evicted
        let slice = log.slice_after("evt-3");
        assert!(!slice.cursor_found);
        assert_eq!(slice.events.len(), DEFAULT_REPLAY_FALLBACK);
    }

    #[test]
    fn test_fallback_on_short_log_returns_everything() {
        let log = filled(4, 10);
        let slice = log.slice_after("nope");
        assert!(!slice.cursor_found);
        assert_eq!(slice.events.len(), 4);
    }
}
