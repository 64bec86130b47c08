//! Task dispatcher.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use super::queue::{Queue, QueueError};
use crate::engine::EngineSet;
use crate::metrics;
use crate::registry::EngineId;
use crate::task::{TaskError, TaskStore};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("engine '{engine_id}' is unavailable: {reason}")]
    EngineUnavailable { engine_id: EngineId, reason: String },
    #[error("no executor registered for engine '{0}'")]
    UnknownEngine(EngineId),
    #[error("task {task_id} in state '{state}' cannot be dispatched")]
    NotDispatchable { task_id: String, state: String },
    #[error(transparent)]
    Store(#[from] TaskError),
    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Hands pending tasks to the work queue.
///
/// Dispatch is idempotent: a task already processing or completed is a
/// no-op, so callers may safely dispatch the same task twice. The
/// single-execution guarantee itself lives in the worker's pending ->
/// processing compare-and-set, not here.
pub struct Dispatcher {
    store: Arc<dyn TaskStore>,
    engines: Arc<EngineSet>,
    queue: Arc<dyn Queue>,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn TaskStore>, engines: Arc<EngineSet>, queue: Arc<dyn Queue>) -> Self {
        Self {
            store,
            engines,
            queue,
        }
    }

    pub async fn dispatch(&self, task_id: &str) -> Result<(), DispatchError> {
        let task = self.store.get(task_id).await?;
        match task.state.state_type() {
            "pending" => {}
            "processing" | "completed" => {
                debug!(task_id, state = %task.state, "dispatch is a no-op");
                return Ok(());
            }
            other => {
                return Err(DispatchError::NotDispatchable {
                    task_id: task_id.to_string(),
                    state: other.to_string(),
                });
            }
        }

        let executor = self
            .engines
            .get(&task.engine_id)
            .ok_or_else(|| DispatchError::UnknownEngine(task.engine_id.clone()))?;

        // The task stays pending when its engine is down; a later
        // dispatch (or the runner's pending sweep) will pick it up.
        if let Err(e) = executor.availability().await {
            metrics::ENGINE_UNAVAILABLE_TOTAL
                .with_label_values(&[task.engine_id.as_str()])
                .inc();
            return Err(DispatchError::EngineUnavailable {
                engine_id: task.engine_id.clone(),
                reason: e.to_string(),
            });
        }

        self.queue.enqueue(task_id)?;
        metrics::TASKS_DISPATCHED_TOTAL
            .with_label_values(&[task.engine_id.as_str()])
            .inc();
        info!(task_id, engine = %task.engine_id, "task dispatched");
        Ok(())
    }
}
