//! Task store trait.

use async_trait::async_trait;
use thiserror::Error;

use super::types::{ConversionTask, CreateTaskRequest, TaskState};

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("task not found: {0}")]
    NotFound(String),
    #[error("conflicting transition for task {task_id}: expected state '{expected}', found '{actual}'")]
    Conflict {
        task_id: String,
        expected: String,
        actual: String,
    },
    #[error("database error: {0}")]
    Database(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl TaskError {
    /// True when a compare-and-set precondition failed. The caller lost
    /// the race and must stand down, not retry.
    pub fn is_conflict(&self) -> bool {
        matches!(self, TaskError::Conflict { .. })
    }
}

impl From<rusqlite::Error> for TaskError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::QueryReturnedNoRows => TaskError::NotFound("<unknown>".to_string()),
            other => TaskError::Database(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for TaskError {
    fn from(e: serde_json::Error) -> Self {
        TaskError::Serialization(e.to_string())
    }
}

/// Filter for listing tasks.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    /// Match the state discriminant ("pending", "processing", ...).
    pub state: Option<String>,
    pub created_by: Option<String>,
    pub engine_id: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl TaskFilter {
    pub fn with_state(state: &str) -> Self {
        Self {
            state: Some(state.to_string()),
            ..Default::default()
        }
    }
}

/// Persistent store for conversion tasks.
///
/// `transition` is the only way to change a task's state and it is
/// atomic: the update applies only if the stored state discriminant
/// still matches `from_state_type`. Every concurrency guarantee in the
/// pipeline (single execution per task, cancellation winning over late
/// completion) reduces to this compare-and-set.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Create a task in the pending state and return it.
    async fn create(&self, request: CreateTaskRequest) -> Result<ConversionTask, TaskError>;

    async fn get(&self, id: &str) -> Result<ConversionTask, TaskError>;

    async fn list(&self, filter: &TaskFilter) -> Result<Vec<ConversionTask>, TaskError>;

    async fn count(&self, filter: &TaskFilter) -> Result<u64, TaskError>;

    /// Atomically move a task from `from_state_type` to `new_state`.
    ///
    /// Returns the updated task, `TaskError::Conflict` if the stored
    /// state no longer matches, or `TaskError::NotFound`.
    async fn transition(
        &self,
        id: &str,
        from_state_type: &str,
        new_state: TaskState,
    ) -> Result<ConversionTask, TaskError>;

    async fn delete(&self, id: &str) -> Result<(), TaskError>;

    /// Delete terminal tasks last updated more than `older_than_secs`
    /// ago. Returns how many were removed.
    async fn prune_terminal(&self, older_than_secs: u64) -> Result<u64, TaskError>;
}
