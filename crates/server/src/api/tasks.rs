//! Task API handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use mediamill_core::{
    dispatch::DispatchError,
    metrics,
    options::{self, ConversionOptions},
    registry::{EngineId, MediaFormat},
    task::{
        ConversionTask, CreateTaskRequest, InputSource, TaskError, TaskFilter, TaskState,
    },
};

use crate::state::AppState;

/// Maximum allowed limit for task queries
const MAX_LIMIT: u32 = 1000;

/// Default limit for task queries
const DEFAULT_LIMIT: u32 = 100;

/// How many times cancel retries its compare-and-set when the task
/// moves between states underneath it.
const CANCEL_CAS_RETRIES: usize = 3;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for creating a task
#[derive(Debug, Deserialize)]
pub struct CreateTaskBody {
    /// Where the input bytes live
    pub input: InputSource,
    /// Original filename; also used to infer the input format
    pub original_filename: Option<String>,
    /// Explicit input format, overriding filename inference
    pub input_format: Option<MediaFormat>,
    pub output_format: MediaFormat,
    #[serde(default)]
    pub options: ConversionOptions,
}

/// Query parameters for listing tasks
#[derive(Debug, Deserialize)]
pub struct ListTasksParams {
    /// Filter by state type
    pub state: Option<String>,
    /// Filter by creator
    pub created_by: Option<String>,
    /// Filter by engine
    pub engine: Option<String>,
    /// Maximum number of tasks to return
    pub limit: Option<u32>,
    /// Pagination offset
    pub offset: Option<u32>,
}

/// Request body for cancelling a task
#[derive(Debug, Deserialize)]
pub struct CancelTaskBody {
    /// Who asked for the cancellation
    pub cancelled_by: Option<String>,
    /// Optional reason for cancellation
    pub reason: Option<String>,
}

/// Response for task operations
#[derive(Debug, Serialize)]
pub struct TaskResponse {
    pub id: String,
    pub created_by: Option<String>,
    pub input: InputSource,
    pub original_filename: String,
    pub input_format: MediaFormat,
    pub output_format: MediaFormat,
    pub options: ConversionOptions,
    pub engine_id: EngineId,
    pub state: TaskState,
    pub created_at: String,
    pub updated_at: String,
}

impl From<ConversionTask> for TaskResponse {
    fn from(task: ConversionTask) -> Self {
        Self {
            id: task.id,
            created_by: task.created_by,
            input: task.input,
            original_filename: task.original_filename,
            input_format: task.input_format,
            output_format: task.output_format,
            options: task.options,
            engine_id: task.engine_id,
            state: task.state,
            created_at: task.created_at.to_rfc3339(),
            updated_at: task.updated_at.to_rfc3339(),
        }
    }
}

/// Response for listing tasks
#[derive(Debug, Serialize)]
pub struct ListTasksResponse {
    pub tasks: Vec<TaskResponse>,
    pub total: u64,
    pub limit: u32,
    pub offset: u32,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct TaskErrorResponse {
    pub error: String,
}

type ErrorReply = (StatusCode, Json<TaskErrorResponse>);

fn error_reply(status: StatusCode, error: impl Into<String>) -> ErrorReply {
    (
        status,
        Json(TaskErrorResponse {
            error: error.into(),
        }),
    )
}

fn store_error(e: TaskError) -> ErrorReply {
    match e {
        TaskError::NotFound(id) => {
            error_reply(StatusCode::NOT_FOUND, format!("Task not found: {id}"))
        }
        TaskError::Conflict { .. } => error_reply(StatusCode::CONFLICT, e.to_string()),
        other => error_reply(StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Create a new conversion task and hand it to the dispatcher.
///
/// Returns 201 when the task was dispatched, 202 when it was created
/// but its engine is currently unavailable (the task stays pending and
/// is retried by the runner's sweep).
pub async fn create_task(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateTaskBody>,
) -> Result<(StatusCode, Json<TaskResponse>), ErrorReply> {
    let original_filename = body
        .original_filename
        .clone()
        .unwrap_or_else(|| input_filename(&body.input));

    let input_format = match body.input_format {
        Some(format) => format,
        None => infer_format(&original_filename).ok_or_else(|| {
            error_reply(
                StatusCode::UNPROCESSABLE_ENTITY,
                "input_format missing and not inferable from the filename",
            )
        })?,
    };

    let size_bytes = input_size(&body.input).await;

    let engine_entry = state
        .registry()
        .resolve(input_format, body.output_format, size_bytes, &body.options)
        .map_err(|e| error_reply(StatusCode::UNPROCESSABLE_ENTITY, e.to_string()))?;

    let validated = options::validate(&body.options, &engine_entry.capabilities)
        .map_err(|e| error_reply(StatusCode::UNPROCESSABLE_ENTITY, e.to_string()))?;

    let task = state
        .store()
        .create(CreateTaskRequest {
            created_by: None,
            input: body.input,
            original_filename,
            input_format,
            output_format: body.output_format,
            options: validated,
            engine_id: engine_entry.id.clone(),
        })
        .await
        .map_err(store_error)?;
    metrics::TASKS_CREATED_TOTAL
        .with_label_values(&[task.engine_id.as_str()])
        .inc();

    let status = match state.dispatcher().dispatch(&task.id).await {
        Ok(()) => StatusCode::CREATED,
        Err(DispatchError::EngineUnavailable { .. }) => StatusCode::ACCEPTED,
        Err(e) => {
            // Task exists; the pending sweep will pick it up.
            tracing::warn!(task_id = %task.id, error = %e, "dispatch after create failed");
            StatusCode::ACCEPTED
        }
    };

    let task = state.store().get(&task.id).await.map_err(store_error)?;
    Ok((status, Json(TaskResponse::from(task))))
}

/// Get a task by ID
pub async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<TaskResponse>, ErrorReply> {
    let task = state.store().get(&id).await.map_err(store_error)?;
    Ok(Json(TaskResponse::from(task)))
}

/// List tasks with optional filters
pub async fn list_tasks(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListTasksParams>,
) -> Result<Json<ListTasksResponse>, ErrorReply> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = params.offset.unwrap_or(0);

    let filter = TaskFilter {
        state: params.state,
        created_by: params.created_by,
        engine_id: params.engine,
        limit: Some(limit),
        offset: Some(offset),
    };

    let tasks = state.store().list(&filter).await.map_err(store_error)?;
    let total = state.store().count(&filter).await.map_err(store_error)?;

    Ok(Json(ListTasksResponse {
        tasks: tasks.into_iter().map(TaskResponse::from).collect(),
        total,
        limit,
        offset,
    }))
}

/// Cancel a task.
///
/// Cancellation is a compare-and-set from the task's live state, so it
/// wins against any in-flight completion; the worker observes the
/// cancelled state and discards its output. Terminal tasks return 409.
pub async fn cancel_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Option<Json<CancelTaskBody>>,
) -> Result<Json<TaskResponse>, ErrorReply> {
    let (cancelled_by, reason) = body
        .map(|Json(b)| (b.cancelled_by, b.reason))
        .unwrap_or_default();

    for _ in 0..CANCEL_CAS_RETRIES {
        let task = state.store().get(&id).await.map_err(store_error)?;
        if !task.state.can_cancel() {
            return Err(error_reply(
                StatusCode::CONFLICT,
                format!("Task {id} is already {}", task.state),
            ));
        }
        match state
            .store()
            .transition(
                &id,
                task.state.state_type(),
                TaskState::cancelled(cancelled_by.clone(), reason.clone()),
            )
            .await
        {
            Ok(task) => return Ok(Json(TaskResponse::from(task))),
            // The task changed state underneath us (e.g. pending ->
            // processing); re-read and try again from the new state.
            Err(e) if e.is_conflict() => continue,
            Err(e) => return Err(store_error(e)),
        }
    }
    Err(error_reply(
        StatusCode::CONFLICT,
        format!("Task {id} reached a terminal state before it could be cancelled"),
    ))
}

/// Re-dispatch a failed task.
pub async fn retry_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<TaskResponse>), ErrorReply> {
    let task = state.store().get(&id).await.map_err(store_error)?;
    if task.state.state_type() != "failed" {
        return Err(error_reply(
            StatusCode::CONFLICT,
            format!("Task {id} is {}, only failed tasks can be retried", task.state),
        ));
    }

    let task = state
        .store()
        .transition(&id, "failed", TaskState::Pending)
        .await
        .map_err(store_error)?;

    let status = match state.dispatcher().dispatch(&task.id).await {
        Ok(()) => StatusCode::OK,
        Err(DispatchError::EngineUnavailable { .. }) => StatusCode::ACCEPTED,
        Err(e) => {
            tracing::warn!(task_id = %task.id, error = %e, "dispatch after retry failed");
            StatusCode::ACCEPTED
        }
    };
    let task = state.store().get(&id).await.map_err(store_error)?;
    Ok((status, Json(TaskResponse::from(task))))
}

// ============================================================================
// Helpers
// ============================================================================

fn input_filename(input: &InputSource) -> String {
    let location = input.location();
    location
        .rsplit('/')
        .next()
        .unwrap_or(location)
        .to_string()
}

fn infer_format(filename: &str) -> Option<MediaFormat> {
    let extension = filename.rsplit('.').next()?;
    MediaFormat::from_extension(extension)
}

async fn input_size(input: &InputSource) -> u64 {
    match input {
        InputSource::Upload { location } => tokio::fs::metadata(location)
            .await
            .map(|m| m.len())
            .unwrap_or(0),
        InputSource::RemoteUrl { .. } => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infer_format() {
        assert_eq!(infer_format("clip.mov"), Some(MediaFormat::Mov));
        assert_eq!(infer_format("a.b.MKV"), Some(MediaFormat::Mkv));
        assert_eq!(infer_format("noextension"), None);
    }

    #[test]
    fn test_input_filename() {
        let input = InputSource::Upload {
            location: "/srv/uploads/abc/clip.mov".to_string(),
        };
        assert_eq!(input_filename(&input), "clip.mov");
    }
}
