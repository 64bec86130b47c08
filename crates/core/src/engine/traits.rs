//! Executor trait and the runtime set of executors.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::context::ExecutionContext;
use super::error::ExecutionError;
use crate::registry::{EngineCapabilities, EngineId};
use crate::task::ConversionTask;

/// What a successful attempt produced.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutput {
    /// Location identifier of the converted file.
    pub location: String,
    pub size_bytes: u64,
    /// Wall-clock duration of the attempt.
    pub duration_ms: u64,
}

/// A conversion engine.
///
/// `execute` performs exactly one attempt and must respect the
/// context's deadline and cancellation signal; on either it abandons
/// the attempt, cleans up what it started, and returns the matching
/// error. It never touches the task store.
#[async_trait]
pub trait EngineExecutor: Send + Sync {
    fn id(&self) -> &EngineId;

    /// Cheap liveness probe, used by the dispatcher before enqueueing.
    async fn availability(&self) -> Result<(), ExecutionError>;

    async fn execute(
        &self,
        task: &ConversionTask,
        capabilities: &EngineCapabilities,
        ctx: ExecutionContext,
    ) -> Result<ExecutionOutput, ExecutionError>;
}

/// Executors indexed by engine id, built at startup.
#[derive(Default)]
pub struct EngineSet {
    executors: HashMap<EngineId, Arc<dyn EngineExecutor>>,
}

impl EngineSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, executor: Arc<dyn EngineExecutor>) {
        self.executors.insert(executor.id().clone(), executor);
    }

    pub fn with(mut self, executor: Arc<dyn EngineExecutor>) -> Self {
        self.insert(executor);
        self
    }

    pub fn get(&self, id: &EngineId) -> Option<Arc<dyn EngineExecutor>> {
        self.executors.get(id).cloned()
    }

    pub fn ids(&self) -> Vec<EngineId> {
        self.executors.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}
