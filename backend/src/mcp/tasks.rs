//! Per-session tracking of streamed tool invocations.
//!
//! Terminal transitions happen exactly once. Completing or failing a task
//! that already finished is a no-op so duplicate deliveries are harmless.

use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use tether_types::{Checkpoint, Task, TaskStatus};
use tracing::{debug, info};

/// Default number of checkpoints retained per task.
pub const DEFAULT_MAX_CHECKPOINTS: usize = 50;

/// Error type for task operations.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("Task already exists: {0}")]
    AlreadyExists(String),

    #[error("Task not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, TaskError>;

/// Tasks of one session, keyed by task id.
#[derive(Debug)]
pub struct TaskTracker {
    tasks: HashMap<String, Task>,
    max_checkpoints: usize,
    next_checkpoint: u64,
}

impl TaskTracker {
    pub fn new(max_checkpoints: usize) -> Self {
        Self {
            tasks: HashMap::new(),
            max_checkpoints: max_checkpoints.max(1),
            next_checkpoint: 1,
        }
    }

    /// Register a new pending task with zero progress.
    pub fn create_task(
        &mut self,
        task_id: impl Into<String>,
        task_type: impl Into<String>,
    ) -> Result<&Task> {
        let task_id = task_id.into();
        if self.tasks.contains_key(&task_id) {
            return Err(TaskError::AlreadyExists(task_id));
        }
        let task = Task::new(task_id.clone(), task_type);
        debug!("Created task {} ({})", task.id, task.task_type);
        Ok(self.tasks.entry(task_id).or_insert(task))
    }

    /// Record a checkpoint.
    ///
    /// The first update moves a pending task to running. Updates for a
    /// finished task are ignored and return `Ok(None)`.
    pub fn update_progress(
        &mut self,
        task_id: &str,
        progress: f64,
        phase: impl Into<String>,
        data: Value,
    ) -> Result<Option<Checkpoint>> {
        let checkpoint_id = format!("cp-{}", self.next_checkpoint);
        let max_checkpoints = self.max_checkpoints;
        let task = self
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| TaskError::NotFound(task_id.to_string()))?;

        if task.status.is_terminal() {
            debug!(
                "Ignoring progress for finished task {} ({})",
                task.id, task.status
            );
            return Ok(None);
        }
        self.next_checkpoint += 1;

        if task.status == TaskStatus::Pending {
            task.status = TaskStatus::Running;
        }
        if progress.is_finite() {
            task.progress = progress.clamp(0.0, 1.0);
        }

        let checkpoint = Checkpoint {
            id: checkpoint_id,
            timestamp: Utc::now(),
            progress: task.progress,
            phase: phase.into(),
            data,
        };
        task.phase = Some(checkpoint.phase.clone());
        task.last_update = checkpoint.timestamp;
        push_bounded(&mut task.checkpoints, checkpoint.clone(), max_checkpoints);

        Ok(Some(checkpoint))
    }

    /// Mark a task completed with its result.
    ///
    /// Returns `Ok(false)` if the task had already finished.
    pub fn complete(&mut self, task_id: &str, result: Value) -> Result<bool> {
        self.finish(task_id, TaskStatus::Completed, |task| {
            task.progress = 1.0;
            task.result = Some(result);
        })
    }

    /// Mark a task failed with an error message.
    ///
    /// Returns `Ok(false)` if the task had already finished.
    pub fn fail(&mut self, task_id: &str, error: impl Into<String>) -> Result<bool> {
        let error = error.into();
        self.finish(task_id, TaskStatus::Failed, |task| {
            task.error = Some(error);
        })
    }

    fn finish(
        &mut self,
        task_id: &str,
        status: TaskStatus,
        apply: impl FnOnce(&mut Task),
    ) -> Result<bool> {
        let checkpoint_id = format!("cp-{}", self.next_checkpoint);
        let max_checkpoints = self.max_checkpoints;
        let task = self
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| TaskError::NotFound(task_id.to_string()))?;

        if !task.status.can_transition_to(status) {
            debug!(
                "Ignoring {} for task {} already {}",
                status, task.id, task.status
            );
            return Ok(false);
        }
        self.next_checkpoint += 1;

        task.status = status;
        apply(task);
        let now = Utc::now();
        task.last_update = now;
        task.phase = Some(status.to_string());
        let checkpoint = Checkpoint {
            id: checkpoint_id,
            timestamp: now,
            progress: task.progress,
            phase: status.to_string(),
            data: Value::Null,
        };
        push_bounded(&mut task.checkpoints, checkpoint, max_checkpoints);

        info!("Task {} ({}) {}", task.id, task.task_type, status);
        Ok(true)
    }

    pub fn get(&self, task_id: &str) -> Option<&Task> {
        self.tasks.get(task_id)
    }

    /// Tasks that are pending or running, oldest first.
    pub fn active_tasks(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self
            .tasks
            .values()
            .filter(|t| t.status.is_active())
            .cloned()
            .collect();
        sort_by_creation(&mut tasks);
        tasks
    }

    /// Every task, oldest first.
    pub fn all_tasks(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.tasks.values().cloned().collect();
        sort_by_creation(&mut tasks);
        tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

fn push_bounded(checkpoints: &mut Vec<Checkpoint>, checkpoint: Checkpoint, max: usize) {
    checkpoints.push(checkpoint);
    if checkpoints.len() > max {
        let excess = checkpoints.len() - max;
        checkpoints.drain(..excess);
    }
}

fn sort_by_creation(tasks: &mut [Task]) {
    tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
}
