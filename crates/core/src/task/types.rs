//! Task data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::ErrorClass;
use crate::options::ConversionOptions;
use crate::registry::{EngineId, MediaFormat};

/// Where the input bytes live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputSource {
    /// A file already present on shared storage.
    Upload { location: String },
    /// A URL the engine fetches itself.
    RemoteUrl { url: String },
}

impl InputSource {
    /// Location identifier handed to engines as the conversion input.
    pub fn location(&self) -> &str {
        match self {
            InputSource::Upload { location } => location,
            InputSource::RemoteUrl { url } => url,
        }
    }
}

/// Details of a successful conversion. Present iff the task completed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputDetails {
    /// Location identifier of the converted file.
    pub location: String,
    pub size_bytes: u64,
    /// Wall-clock execution time of the successful attempt.
    pub duration_ms: u64,
}

/// Details of a permanent failure. Present iff the task failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureDetails {
    pub classification: ErrorClass,
    pub message: String,
    /// Attempts consumed before giving up.
    pub attempts: u32,
}

/// Task lifecycle state with per-state data.
///
/// Serialized as a tagged JSON object so per-state fields can only
/// exist in the state they belong to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskState {
    /// Created, waiting to be dispatched.
    Pending,
    /// An executor attempt is in flight.
    Processing {
        /// 1-based attempt counter.
        attempt: u32,
        started_at: DateTime<Utc>,
        /// Best-effort progress, 0.0 to 100.0.
        progress_pct: f32,
    },
    /// Terminal: conversion succeeded.
    Completed {
        output: OutputDetails,
        completed_at: DateTime<Utc>,
    },
    /// Terminal: all attempts exhausted or a non-retryable error.
    Failed {
        failure: FailureDetails,
        failed_at: DateTime<Utc>,
    },
    /// Terminal: cancelled by a caller. Wins over any late completion.
    Cancelled {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cancelled_by: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        cancelled_at: DateTime<Utc>,
    },
}

impl TaskState {
    /// Discriminant string, as stored in the database and used for
    /// compare-and-set preconditions.
    pub fn state_type(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Processing { .. } => "processing",
            TaskState::Completed { .. } => "completed",
            TaskState::Failed { .. } => "failed",
            TaskState::Cancelled { .. } => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed { .. } | TaskState::Failed { .. } | TaskState::Cancelled { .. }
        )
    }

    /// Cancellation is allowed from any non-terminal state.
    pub fn can_cancel(&self) -> bool {
        !self.is_terminal()
    }

    /// Current attempt number while processing.
    pub fn attempt(&self) -> Option<u32> {
        match self {
            TaskState::Processing { attempt, .. } => Some(*attempt),
            _ => None,
        }
    }

    pub fn processing(attempt: u32) -> Self {
        TaskState::Processing {
            attempt,
            started_at: Utc::now(),
            progress_pct: 0.0,
        }
    }

    pub fn completed(output: OutputDetails) -> Self {
        TaskState::Completed {
            output,
            completed_at: Utc::now(),
        }
    }

    pub fn failed(failure: FailureDetails) -> Self {
        TaskState::Failed {
            failure,
            failed_at: Utc::now(),
        }
    }

    pub fn cancelled(cancelled_by: Option<String>, reason: Option<String>) -> Self {
        TaskState::Cancelled {
            cancelled_by,
            reason,
            cancelled_at: Utc::now(),
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.state_type())
    }
}

/// A conversion task as held in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionTask {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    pub input: InputSource,
    pub original_filename: String,
    pub input_format: MediaFormat,
    pub output_format: MediaFormat,
    /// Validated option snapshot, immutable after creation.
    pub options: ConversionOptions,
    /// Engine chosen at creation time.
    pub engine_id: EngineId,
    pub state: TaskState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Everything needed to create a task. The store assigns id, state and
/// timestamps.
#[derive(Debug, Clone)]
pub struct CreateTaskRequest {
    pub created_by: Option<String>,
    pub input: InputSource,
    pub original_filename: String,
    pub input_format: MediaFormat,
    pub output_format: MediaFormat,
    pub options: ConversionOptions,
    pub engine_id: EngineId,
}

impl CreateTaskRequest {
    pub(crate) fn into_task(self) -> ConversionTask {
        let now = Utc::now();
        ConversionTask {
            id: Uuid::new_v4().to_string(),
            created_by: self.created_by,
            input: self.input,
            original_filename: self.original_filename,
            input_format: self.input_format,
            output_format: self.output_format,
            options: self.options,
            engine_id: self.engine_id,
            state: TaskState::Pending,
            created_at: now,
            updated_at: now,
        }
    }
}
