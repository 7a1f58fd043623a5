//! Replay of missed events for clients that lost their stream.
//!
//! A reconnection moves the session through `reconnecting` back to
//! `active`. The original stream is not reopened; the client receives the
//! missed events and a task summary in a single JSON response.

use chrono::Utc;
use tether_types::{
    ConnectionStatus, ReconnectionResult, ReplayMode, StreamEvent, StreamEventType, Task,
    TaskStatus,
};
use tracing::info;

use super::session::Session;

/// Result type tag of a reconnection response.
pub const RECONNECTION_RESULT_TYPE: &str = "reconnection";

/// Compute the replay for `session` starting after `last_event_id`.
///
/// The caller must hold the session lock for the whole call.
pub fn resolve(session: &mut Session, last_event_id: &str) -> ReconnectionResult {
    let previous = session.connection_status();
    session.set_connection_status(ConnectionStatus::Reconnecting);

    let slice = session.events.slice_after(last_event_id);
    let replay_mode = if slice.cursor_found {
        ReplayMode::Exact
    } else {
        ReplayMode::Fallback
    };
    let current_tasks = session.tasks.all_tasks();
    let active_tasks = session.tasks.active_tasks();
    let resume_instructions = resume_instructions(
        last_event_id,
        replay_mode,
        &slice.events,
        &current_tasks,
        &active_tasks,
    );

    session.touch();

    info!(
        "Session {} reconnected from {} after {} ({} missed events, mode {:?})",
        session.id(),
        previous,
        last_event_id,
        slice.events.len(),
        replay_mode
    );

    ReconnectionResult {
        result_type: RECONNECTION_RESULT_TYPE.to_string(),
        session_id: session.id().to_string(),
        last_event_id: last_event_id.to_string(),
        replay_mode,
        missed_events: slice.events,
        current_tasks,
        resume_instructions,
        reconnected_at: Utc::now(),
    }
}

/// Human-readable summary of what the client missed and what happens next.
pub fn resume_instructions(
    last_event_id: &str,
    replay_mode: ReplayMode,
    missed: &[StreamEvent],
    tasks: &[Task],
    active: &[Task],
) -> Vec<String> {
    let mut lines = Vec::new();

    match (replay_mode, missed.len()) {
        (ReplayMode::Exact, 0) => {
            lines.push(format!("No events were missed since event {last_event_id}."))
        }
        (ReplayMode::Exact, n) => lines.push(format!(
            "Replaying {n} event(s) recorded after event {last_event_id}, in original order."
        )),
        (ReplayMode::Fallback, n) => lines.push(format!(
            "Event {last_event_id} is no longer retained; replaying the {n} most recent \
             event(s) instead. Earlier events may be missing and some may repeat events \
             already received."
        )),
    }

    for task in tasks {
        lines.push(describe_task(task, missed));
    }

    if active.is_empty() {
        lines.push("No tasks are in progress.".to_string());
    } else {
        let ids: Vec<&str> = active.iter().map(|t| t.id.as_str()).collect();
        lines.push(format!(
            "{} task(s) ({}) are still running server-side and will continue automatically. \
             The original stream is not reopened: reconnect again with the newest event id \
             to collect their remaining progress and results.",
            active.len(),
            ids.join(", ")
        ));
    }

    lines
}

fn describe_task(task: &Task, missed: &[StreamEvent]) -> String {
    let percent = (task.progress * 100.0).round();
    let phase = task.phase.as_deref().unwrap_or("not started");
    match task.status {
        TaskStatus::Pending => format!(
            "Task {} ({}) is pending and has not reported progress yet.",
            task.id, task.task_type
        ),
        TaskStatus::Running => format!(
            "Task {} ({}) is running in phase '{}' at {}% progress.",
            task.id, task.task_type, phase, percent
        ),
        TaskStatus::Completed => {
            if has_terminal_event(task, missed) {
                format!(
                    "Task {} ({}) completed; its result is included in the missed events.",
                    task.id, task.task_type
                )
            } else {
                format!(
                    "Task {} ({}) completed; its result is attached to the task.",
                    task.id, task.task_type
                )
            }
        }
        TaskStatus::Failed => format!(
            "Task {} ({}) failed: {}.",
            task.id,
            task.task_type,
            task.error.as_deref().unwrap_or("unknown error")
        ),
    }
}

fn has_terminal_event(task: &Task, missed: &[StreamEvent]) -> bool {
    missed.iter().any(|e| {
        e.event_type == StreamEventType::Result
            && e.data.get("taskId").and_then(|v| v.as_str()) == Some(task.id.as_str())
    })
}
