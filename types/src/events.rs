//! Events pushed to streaming clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of a stream event, carried as `type` in every SSE frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamEventType {
    /// Always the first frame of a stream
    Connection,
    /// A task checkpoint
    Progress,
    /// Terminal frame of a successful call
    Result,
    /// Terminal frame of a failed call
    Error,
}

impl StreamEventType {
    /// Whether the event closes its stream.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Result | Self::Error)
    }
}

impl std::fmt::Display for StreamEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connection => write!(f, "connection"),
            Self::Progress => write!(f, "progress"),
            Self::Result => write!(f, "result"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// One unit of information pushed to a streaming client.
///
/// The `id` is unique within its session and doubles as the replay cursor
/// (`Last-Event-ID`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: StreamEventType,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
}

impl StreamEvent {
    /// Description of the event for logging.
    pub fn description(&self) -> String {
        format!("{} event {} (session {})", self.event_type, self.id, self.session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_wire_format() {
        let event = StreamEvent {
            id: "evt-1".to_string(),
            event_type: StreamEventType::Progress,
            data: json!({ "progress": 0.5 }),
            timestamp: Utc::now(),
            session_id: "s1".to_string(),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "progress");
        assert_eq!(json["sessionId"], "s1");
        assert_eq!(json["data"]["progress"], 0.5);
    }

    #[test]
    fn test_terminal_types() {
        assert!(StreamEventType::Result.is_terminal());
        assert!(StreamEventType::Error.is_terminal());
        assert!(!StreamEventType::Progress.is_terminal());
        assert!(!StreamEventType::Connection.is_terminal());
    }
}
