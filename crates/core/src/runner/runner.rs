//! Worker pool driving task execution.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::config::RunnerConfig;
use crate::dispatch::Queue;
use crate::engine::{
    cancellation_channel, CancelHandle, EngineSet, ExecutionContext, ExecutionError,
};
use crate::metrics;
use crate::registry::{EngineCapabilities, EngineRegistry};
use crate::task::{
    ConversionTask, FailureDetails, OutputDetails, TaskError, TaskFilter, TaskState, TaskStore,
};

/// Runs queued tasks on a pool of workers.
///
/// Every state change a worker makes is a compare-and-set against the
/// store, so a cancellation arriving at any point wins: the worker's
/// transition fails with a conflict and it stands down.
pub struct JobRunner {
    config: RunnerConfig,
    store: Arc<dyn TaskStore>,
    engines: Arc<EngineSet>,
    registry: Arc<EngineRegistry>,
    queue: Arc<dyn Queue>,
    running: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl JobRunner {
    pub fn new(
        config: RunnerConfig,
        store: Arc<dyn TaskStore>,
        engines: Arc<EngineSet>,
        registry: Arc<EngineRegistry>,
        queue: Arc<dyn Queue>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            store,
            engines,
            registry,
            queue,
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Spawn the worker pool and the pending sweep. Idempotent.
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(workers = self.config.workers, "starting job runner");

        let mut handles = self.handles.lock().await;
        handles.push(self.spawn_sweep());
        for worker_id in 0..self.config.workers {
            handles.push(self.spawn_worker(worker_id));
        }
    }

    /// Signal shutdown and wait for workers to finish their current
    /// select iteration. In-flight executions are abandoned; their
    /// tasks stay processing and show up as stale on the next boot.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("stopping job runner");
        let _ = self.shutdown_tx.send(());
        let mut handles = self.handles.lock().await;
        for handle in handles.drain(..) {
            handle.abort();
            let _ = handle.await;
        }
    }

    fn worker_context(&self) -> WorkerContext {
        WorkerContext {
            config: self.config.clone(),
            store: self.store.clone(),
            engines: self.engines.clone(),
            registry: self.registry.clone(),
            shutdown_tx: self.shutdown_tx.clone(),
        }
    }

    fn spawn_worker(&self, worker_id: usize) -> JoinHandle<()> {
        let ctx = self.worker_context();
        let queue = self.queue.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            debug!(worker_id, "worker started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    maybe_id = queue.recv() => {
                        let Some(task_id) = maybe_id else { break };
                        if let Err(e) = ctx.process(&task_id).await {
                            error!(worker_id, task_id, error = %e, "task processing failed");
                        }
                    }
                }
            }
            debug!(worker_id, "worker stopped");
        })
    }

    /// Periodically re-enqueue pending and processing tasks. This is
    /// the recovery path after a restart and the retry path for tasks
    /// whose engine was down at dispatch time. Processing entries are
    /// only acted on once they look abandoned (see `reclaim_stale`);
    /// duplicate queue entries are harmless, the claim compare-and-set
    /// dedupes them.
    fn spawn_sweep(&self) -> JoinHandle<()> {
        let store = self.store.clone();
        let queue = self.queue.clone();
        let interval = self.config.poll_interval();
        let batch = self.config.sweep_batch_size;
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            loop {
                for state in ["pending", "processing"] {
                    let filter = TaskFilter {
                        state: Some(state.to_string()),
                        limit: Some(batch),
                        ..Default::default()
                    };
                    match store.list(&filter).await {
                        Ok(tasks) => {
                            for task in tasks {
                                if queue.enqueue(&task.id).is_err() {
                                    return;
                                }
                            }
                        }
                        Err(e) => warn!(state, error = %e, "sweep failed"),
                    }
                }
                tokio::select! {
                    _ = shutdown_rx.recv() => return,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        })
    }
}

/// Everything a worker needs, cheap to clone into spawned tasks.
#[derive(Clone)]
struct WorkerContext {
    config: RunnerConfig,
    store: Arc<dyn TaskStore>,
    engines: Arc<EngineSet>,
    registry: Arc<EngineRegistry>,
    shutdown_tx: broadcast::Sender<()>,
}

impl WorkerContext {
    async fn process(&self, task_id: &str) -> Result<(), TaskError> {
        let task = match self.store.get(task_id).await {
            Ok(task) => task,
            Err(TaskError::NotFound(_)) => {
                debug!(task_id, "queued task no longer exists");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        match task.state {
            TaskState::Pending => {}
            TaskState::Processing { .. } => return self.reclaim_stale(task).await,
            _ => {
                // Duplicate dispatch or a stale sweep entry.
                debug!(task_id, state = %task.state, "skipping terminal task");
                return Ok(());
            }
        }

        let capabilities = match self.registry.capabilities(&task.engine_id) {
            Ok(caps) => caps.clone(),
            Err(e) => {
                // Engine disappeared from configuration after creation.
                return self
                    .fail(
                        task_id,
                        ExecutionError::Internal(e.to_string()),
                        0,
                    )
                    .await;
            }
        };
        let Some(executor) = self.engines.get(&task.engine_id) else {
            return self
                .fail(
                    task_id,
                    ExecutionError::Internal(format!(
                        "no executor registered for engine '{}'",
                        task.engine_id
                    )),
                    0,
                )
                .await;
        };

        // A down engine leaves the task pending for a later sweep
        // instead of burning attempts.
        if let Err(e) = executor.availability().await {
            metrics::ENGINE_UNAVAILABLE_TOTAL
                .with_label_values(&[task.engine_id.as_str()])
                .inc();
            debug!(task_id, engine = %task.engine_id, error = %e, "engine down, task stays pending");
            return Ok(());
        }

        // Claim. Losing here means another worker or a cancel got in
        // first; either way this worker is done with the task.
        let task = match self
            .store
            .transition(task_id, "pending", TaskState::processing(1))
            .await
        {
            Ok(task) => task,
            Err(e) if e.is_conflict() => {
                debug!(task_id, "lost the claim race");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        metrics::TASKS_IN_PROGRESS.inc();
        let result = self.run_attempts(task, &capabilities, executor).await;
        metrics::TASKS_IN_PROGRESS.dec();
        result
    }

    /// Age past which a processing task has no worker behind it. A live
    /// attempt refreshes `updated_at` through progress writes and retry
    /// transitions within the attempt deadline plus one backoff wait.
    fn stale_after(&self, capabilities: &EngineCapabilities) -> Duration {
        Duration::from_secs(capabilities.timeout_secs)
            + Duration::from_millis(self.config.retry_backoff_max_ms)
            + self.config.poll_interval()
    }

    /// Resume a processing task whose worker died, typically across a
    /// process restart. The re-claim is a processing -> processing
    /// compare-and-set counting a fresh attempt, so it can never
    /// overwrite a cancellation and the interrupted attempt stays
    /// spent.
    async fn reclaim_stale(&self, task: ConversionTask) -> Result<(), TaskError> {
        let Some(attempt) = task.state.attempt() else {
            return Ok(());
        };
        let capabilities = match self.registry.capabilities(&task.engine_id) {
            Ok(caps) => caps.clone(),
            Err(e) => {
                return self
                    .fail(&task.id, ExecutionError::Internal(e.to_string()), attempt)
                    .await;
            }
        };
        let age = Utc::now()
            .signed_duration_since(task.updated_at)
            .to_std()
            .unwrap_or_default();
        if age < self.stale_after(&capabilities) {
            // A worker still owns this task.
            return Ok(());
        }

        if attempt >= self.config.max_attempts {
            return self
                .fail(
                    &task.id,
                    ExecutionError::Transient(format!(
                        "attempt {attempt} was interrupted with no attempts remaining"
                    )),
                    attempt,
                )
                .await;
        }
        let Some(executor) = self.engines.get(&task.engine_id) else {
            return self
                .fail(
                    &task.id,
                    ExecutionError::Internal(format!(
                        "no executor registered for engine '{}'",
                        task.engine_id
                    )),
                    attempt,
                )
                .await;
        };
        if executor.availability().await.is_err() {
            // The next sweep retries.
            return Ok(());
        }

        let next = attempt + 1;
        let task = match self
            .store
            .transition(&task.id, "processing", TaskState::processing(next))
            .await
        {
            Ok(task) => task,
            Err(e) if e.is_conflict() => return Ok(()),
            Err(e) => return Err(e),
        };
        info!(task_id = %task.id, attempt = next, "reclaimed stale processing task");

        metrics::TASKS_IN_PROGRESS.inc();
        let result = self.run_attempts(task, &capabilities, executor).await;
        metrics::TASKS_IN_PROGRESS.dec();
        result
    }

    async fn run_attempts(
        &self,
        task: ConversionTask,
        capabilities: &EngineCapabilities,
        executor: Arc<dyn crate::engine::EngineExecutor>,
    ) -> Result<(), TaskError> {
        let deadline = Duration::from_secs(capabilities.timeout_secs);
        let engine = task.engine_id.as_str().to_string();
        let mut attempt = task.state.attempt().unwrap_or(1);
        let mut started_at = match task.state {
            TaskState::Processing { started_at, .. } => started_at,
            _ => Utc::now(),
        };
        let mut task = task;

        loop {
            let (cancel_handle, cancel_rx) = cancellation_channel();
            let watcher = self.spawn_cancel_watcher(task.id.clone(), cancel_handle);
            let (progress_tx, progress_rx) = mpsc::channel(8);
            let progress_writer =
                self.spawn_progress_writer(task.id.clone(), attempt, started_at, progress_rx);

            let ctx = ExecutionContext::new(deadline, cancel_rx, Some(progress_tx));
            let result = executor.execute(&task, capabilities, ctx).await;

            watcher.abort();
            progress_writer.abort();

            match result {
                Ok(output) => {
                    metrics::EXECUTIONS_TOTAL
                        .with_label_values(&[&engine, "completed"])
                        .inc();
                    metrics::EXECUTION_DURATION_SECONDS
                        .with_label_values(&[&engine])
                        .observe(output.duration_ms as f64 / 1000.0);
                    let state = TaskState::completed(OutputDetails {
                        location: output.location,
                        size_bytes: output.size_bytes,
                        duration_ms: output.duration_ms,
                    });
                    match self.store.transition(&task.id, "processing", state).await {
                        Ok(_) => info!(task_id = %task.id, attempt, "task completed"),
                        Err(e) if e.is_conflict() => {
                            // Cancelled while the executor was finishing.
                            info!(task_id = %task.id, "completed after cancellation, output discarded");
                        }
                        Err(e) => return Err(e),
                    }
                    return Ok(());
                }
                Err(ExecutionError::Cancelled) => {
                    metrics::EXECUTIONS_TOTAL
                        .with_label_values(&[&engine, "cancelled"])
                        .inc();
                    info!(task_id = %task.id, attempt, "execution cancelled");
                    return Ok(());
                }
                Err(e) if e.is_retryable() && attempt < self.config.max_attempts => {
                    metrics::EXECUTIONS_TOTAL
                        .with_label_values(&[&engine, "retried"])
                        .inc();
                    metrics::EXECUTION_RETRIES_TOTAL
                        .with_label_values(&[&engine])
                        .inc();
                    let backoff = self.config.backoff_for(attempt);
                    warn!(
                        task_id = %task.id, attempt, error = %e,
                        backoff_ms = backoff.as_millis() as u64,
                        "attempt failed, will retry"
                    );
                    let mut shutdown_rx = self.shutdown_tx.subscribe();
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = shutdown_rx.recv() => {
                            info!(task_id = %task.id, "shutdown during backoff");
                            return Ok(());
                        }
                    }
                    attempt += 1;
                    task = match self
                        .store
                        .transition(&task.id, "processing", TaskState::processing(attempt))
                        .await
                    {
                        Ok(task) => task,
                        Err(e) if e.is_conflict() => {
                            info!(task_id = %task.id, "cancelled during backoff");
                            return Ok(());
                        }
                        Err(e) => return Err(e),
                    };
                    // The retry transition stamped a fresh start time;
                    // progress writes must carry it, not the old one.
                    started_at = match task.state {
                        TaskState::Processing { started_at, .. } => started_at,
                        _ => Utc::now(),
                    };
                }
                Err(e) => {
                    metrics::EXECUTIONS_TOTAL
                        .with_label_values(&[&engine, "failed"])
                        .inc();
                    return self.fail(&task.id, e, attempt).await;
                }
            }
        }
    }

    /// Record a permanent failure. A conflict means a cancellation beat
    /// us to the terminal state, which is fine.
    async fn fail(
        &self,
        task_id: &str,
        error: ExecutionError,
        attempts: u32,
    ) -> Result<(), TaskError> {
        let classification = error.classification();
        metrics::TASK_FAILURES_TOTAL
            .with_label_values(&[classification.as_str()])
            .inc();
        let failure = FailureDetails {
            classification,
            message: error.to_string(),
            attempts,
        };
        warn!(task_id, %classification, attempts, "task failed permanently");
        // attempts == 0 means the failure happened before the claim.
        let from = if attempts == 0 { "pending" } else { "processing" };
        match self
            .store
            .transition(task_id, from, TaskState::failed(failure))
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.is_conflict() => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn spawn_cancel_watcher(&self, task_id: String, handle: CancelHandle) -> JoinHandle<()> {
        let store = self.store.clone();
        let interval = self.config.cancel_poll_interval();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                match store.get(&task_id).await {
                    Ok(task) if task.state.state_type() == "cancelled" => {
                        handle.cancel();
                        return;
                    }
                    Ok(task) if task.state.is_terminal() => return,
                    Ok(_) => {}
                    Err(e) => debug!(task_id, error = %e, "cancel watcher read failed"),
                }
            }
        })
    }

    /// Fold executor progress reports into the processing state.
    /// Updates are throttled to 5% steps; a conflict means the task
    /// left processing and the writer stops.
    fn spawn_progress_writer(
        &self,
        task_id: String,
        attempt: u32,
        started_at: DateTime<Utc>,
        mut rx: mpsc::Receiver<f32>,
    ) -> JoinHandle<()> {
        let store = self.store.clone();
        tokio::spawn(async move {
            let mut last = 0.0f32;
            while let Some(pct) = rx.recv().await {
                if pct - last < 5.0 && pct < 100.0 {
                    continue;
                }
                last = pct;
                let state = TaskState::Processing {
                    attempt,
                    started_at,
                    progress_pct: pct,
                };
                if store.transition(&task_id, "processing", state).await.is_err() {
                    return;
                }
            }
        })
    }
}
