//! Shared types for the Tether session server.
//!
//! This crate contains the session, task and stream-event models shared
//! between the server and its clients.

/// Default port for the Tether server.
pub const DEFAULT_PORT: u16 = 8080;

pub mod api;
pub mod events;
pub mod session;
pub mod task;

// Re-export commonly used types
pub use api::{ReconnectionResult, ReplayMode};
pub use events::{StreamEvent, StreamEventType};
pub use session::{ClientInfo, ConnectionStatus, SessionInfo};
pub use task::{Checkpoint, Task, TaskStatus};
