//! API response types.

use crate::events::StreamEvent;
use crate::task::Task;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How the missed events of a reconnection were selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplayMode {
    /// Every event recorded after the cursor
    Exact,
    /// The cursor was unknown; only the most recent events are replayed
    Fallback,
}

/// Result payload of a reconnection (`result` of the JSON-RPC response).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconnectionResult {
    /// Always `"reconnection"`
    #[serde(rename = "type")]
    pub result_type: String,
    pub session_id: String,
    pub last_event_id: String,
    pub replay_mode: ReplayMode,
    pub missed_events: Vec<StreamEvent>,
    pub current_tasks: Vec<Task>,
    pub resume_instructions: Vec<String>,
    pub reconnected_at: DateTime<Utc>,
}
