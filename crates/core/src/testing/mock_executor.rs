//! Scriptable executor for tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::engine::{
    cancelled, EngineExecutor, ExecutionContext, ExecutionError, ExecutionOutput,
};
use crate::registry::{EngineCapabilities, EngineId};
use crate::task::ConversionTask;

/// In-memory executor with scriptable failures.
///
/// Queued errors are consumed one per attempt, so "fail twice then
/// succeed" is two pushes. Without a queued error the mock sleeps for
/// the configured delay, reporting 50% progress at the halfway point
/// and honouring the context's deadline and cancellation signal like a
/// real engine.
pub struct MockExecutor {
    id: EngineId,
    available: AtomicBool,
    delay_ms: AtomicU64,
    output_size_bytes: AtomicU64,
    queued_errors: Mutex<VecDeque<ExecutionError>>,
    executions: Mutex<Vec<String>>,
}

impl MockExecutor {
    pub fn new(id: &str) -> Self {
        Self {
            id: EngineId::from(id),
            available: AtomicBool::new(true),
            delay_ms: AtomicU64::new(0),
            output_size_bytes: AtomicU64::new(1024),
            queued_errors: Mutex::new(VecDeque::new()),
            executions: Mutex::new(Vec::new()),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set_output_size(&self, size_bytes: u64) {
        self.output_size_bytes.store(size_bytes, Ordering::SeqCst);
    }

    /// Queue an error for the next attempt.
    pub fn push_error(&self, error: ExecutionError) {
        self.lock_errors().push_back(error);
    }

    pub fn execution_count(&self) -> usize {
        self.lock_executions().len()
    }

    pub fn executed_task_ids(&self) -> Vec<String> {
        self.lock_executions().clone()
    }

    fn lock_errors(&self) -> std::sync::MutexGuard<'_, VecDeque<ExecutionError>> {
        self.queued_errors.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_executions(&self) -> std::sync::MutexGuard<'_, Vec<String>> {
        self.executions.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl EngineExecutor for MockExecutor {
    fn id(&self) -> &EngineId {
        &self.id
    }

    async fn availability(&self) -> Result<(), ExecutionError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ExecutionError::Unavailable("mock engine is down".to_string()))
        }
    }

    async fn execute(
        &self,
        task: &ConversionTask,
        _capabilities: &EngineCapabilities,
        ctx: ExecutionContext,
    ) -> Result<ExecutionOutput, ExecutionError> {
        self.lock_executions().push(task.id.clone());

        if let Some(error) = self.lock_errors().pop_front() {
            return Err(error);
        }

        let started = Instant::now();
        let delay = Duration::from_millis(self.delay_ms.load(Ordering::SeqCst));
        let mut cancel = ctx.cancel_signal();
        if delay >= ctx.deadline {
            tokio::time::sleep(ctx.deadline).await;
            return Err(ExecutionError::Timeout {
                timeout_secs: ctx.deadline.as_secs(),
            });
        }
        let half = delay / 2;
        tokio::select! {
            _ = tokio::time::sleep(half) => {}
            _ = cancelled(&mut cancel) => return Err(ExecutionError::Cancelled),
        }
        ctx.report_progress(50.0);
        tokio::select! {
            _ = tokio::time::sleep(delay - half) => {}
            _ = cancelled(&mut cancel) => return Err(ExecutionError::Cancelled),
        }

        ctx.report_progress(100.0);
        Ok(ExecutionOutput {
            location: format!("/srv/out/{}.{}", task.id, task.output_format.extension()),
            size_bytes: self.output_size_bytes.load(Ordering::SeqCst),
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }
}
