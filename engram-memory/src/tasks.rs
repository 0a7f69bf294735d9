//! Finalize task registry.
//!
//! Every `finalize_session` call registers a task before it is queued, and
//! the registry never deletes entries, so a task id returned to a caller
//! stays resolvable for the life of the process.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use engram_core::id::TaskId;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Lifecycle of a finalize task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// A finalize task as tracked by the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalizeTask {
    pub task_id: TaskId,
    pub task_type: String,
    pub user_id: String,
    pub agent_id: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// Status lookup result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum TaskStatusReport {
    Found(FinalizeTask),
    NotFound { task_id: TaskId },
}

/// Append-only concurrent task table.
#[derive(Default)]
pub struct TaskRegistry {
    tasks: DashMap<TaskId, FinalizeTask>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            tasks: DashMap::new(),
        }
    }

    /// Register a new queued task and return its id.
    pub fn register(&self, user_id: &str, agent_id: &str) -> TaskId {
        let task_id = TaskId::new();
        self.tasks.insert(
            task_id,
            FinalizeTask {
                task_id,
                task_type: "finalize_session".to_string(),
                user_id: user_id.to_string(),
                agent_id: agent_id.to_string(),
                status: TaskStatus::Queued,
                created_at: Utc::now(),
                start_time: None,
                end_time: None,
                error: None,
            },
        );
        debug!(task_id = %task_id, user_id, agent_id, "Registered finalize task");
        task_id
    }

    pub fn mark_processing(&self, task_id: TaskId) {
        if let Some(mut task) = self.tasks.get_mut(&task_id) {
            task.status = TaskStatus::Processing;
            task.start_time = Some(Utc::now());
        }
    }

    pub fn mark_completed(&self, task_id: TaskId) {
        if let Some(mut task) = self.tasks.get_mut(&task_id) {
            task.status = TaskStatus::Completed;
            task.end_time = Some(Utc::now());
        }
    }

    pub fn mark_failed(&self, task_id: TaskId, error: impl Into<String>) {
        if let Some(mut task) = self.tasks.get_mut(&task_id) {
            task.status = TaskStatus::Failed;
            task.end_time = Some(Utc::now());
            task.error = Some(error.into());
        }
    }

    pub fn get(&self, task_id: TaskId) -> TaskStatusReport {
        match self.tasks.get(&task_id) {
            Some(task) => TaskStatusReport::Found(task.clone()),
            None => TaskStatusReport::NotFound { task_id },
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
