//! Session definitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Connection state of a session's streaming client.
///
/// Transitions follow `active → disconnected → reconnecting → active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// The client is connected (or has recently made a request)
    #[default]
    Active,
    /// A streaming response lost its client
    Disconnected,
    /// The client is replaying missed events
    Reconnecting,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Disconnected => write!(f, "disconnected"),
            Self::Reconnecting => write!(f, "reconnecting"),
        }
    }
}

/// Client implementation info sent with `initialize`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    #[serde(default)]
    pub version: String,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            name: "unknown".to_string(),
            version: String::new(),
        }
    }
}

/// Point-in-time view of a session, safe to hand out without holding its lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    /// Unique session identifier
    pub id: String,
    /// Negotiated protocol version
    pub protocol_version: String,
    /// Client implementation info
    pub client_info: ClientInfo,
    /// Capabilities declared by the client
    pub capabilities: Value,
    /// When the session was created
    pub created_at: DateTime<Utc>,
    /// Last accepted request
    pub last_activity: DateTime<Utc>,
    /// Whether the client completed the handshake
    pub initialized: bool,
    /// Streaming connection state
    pub connection_status: ConnectionStatus,
    /// Number of events retained for replay
    pub event_count: usize,
    /// Number of tracked tasks (active and finished)
    pub task_count: usize,
}
