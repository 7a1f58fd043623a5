//! Task definitions.
//!
//! A task tracks one long-running tool invocation that was answered with a
//! Server-Sent Events stream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle state of a task.
///
/// Transitions are monotonic: `pending → running → (completed | failed)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    /// Whether no further transitions are allowed.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether the task still counts as in flight.
    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }

    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Running => 1,
            Self::Completed | Self::Failed => 2,
        }
    }

    /// Whether moving from `self` to `next` respects the lifecycle order.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// A timestamped snapshot of a task's progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    /// Progress in `[0, 1]`
    pub progress: f64,
    pub phase: String,
    #[serde(default)]
    pub data: Value,
}

/// One long-running operation spawned by a streamed tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    /// Operation name (the tool that spawned the task)
    #[serde(rename = "type")]
    pub task_type: String,
    pub status: TaskStatus,
    /// Progress in `[0, 1]`
    pub progress: f64,
    /// Phase of the most recent checkpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    /// Oldest first, bounded
    #[serde(default)]
    pub checkpoints: Vec<Checkpoint>,
    pub created_at: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Task {
    /// Create a new pending task with zero progress.
    pub fn new(id: impl Into<String>, task_type: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            task_type: task_type.into(),
            status: TaskStatus::Pending,
            progress: 0.0,
            phase: None,
            checkpoints: Vec::new(),
            created_at: now,
            last_update: now,
            result: None,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions_are_monotonic() {
        use TaskStatus::*;
        assert!(Pending.can_transition_to(Running));
        assert!(Pending.can_transition_to(Completed));
        assert!(Running.can_transition_to(Failed));
        assert!(!Running.can_transition_to(Pending));
        assert!(!Running.can_transition_to(Running));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Completed));
    }

    #[test]
    fn test_new_task_is_pending() {
        let task = Task::new("t1", "analyze_project");
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.progress, 0.0);
        assert!(task.checkpoints.is_empty());

        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["type"], "analyze_project");
        assert_eq!(json["status"], "pending");
        assert!(json.get("result").is_none());
    }
}
