//! Pipeline lifecycle integration tests.
//!
//! These tests drive the real dispatcher, queue, store and runner with
//! a mock executor:
//! - happy path from creation to completed
//! - retry with backoff, exhaustion and failure classification
//! - the single-execution guarantee under duplicate dispatch
//! - cancellation winning over in-flight execution
//! - recovery of pending and abandoned processing tasks after a restart

use std::sync::Arc;
use std::time::Duration;

use mediamill_core::{
    dispatch::{Dispatcher, InProcessQueue},
    engine::{EngineSet, ExecutionError},
    options::{self, ConversionOptions, QualityPreset, VideoOptions},
    registry::{
        EngineCapabilities, EngineEntry, EngineId, EngineKind, EngineRegistry, FormatPair,
        MediaFormat,
    },
    runner::{JobRunner, RunnerConfig},
    task::{CreateTaskRequest, InputSource, SqliteTaskStore, TaskState, TaskStore},
    testing::MockExecutor,
};

struct TestHarness {
    store: Arc<SqliteTaskStore>,
    executor: Arc<MockExecutor>,
    registry: Arc<EngineRegistry>,
    dispatcher: Dispatcher,
    runner: JobRunner,
}

impl TestHarness {
    async fn new() -> Self {
        Self::with_engine_timeout(fast_config(), 5).await
    }

    async fn with_engine_timeout(config: RunnerConfig, timeout_secs: u64) -> Self {
        let store = Arc::new(SqliteTaskStore::in_memory().expect("task store"));
        let executor = Arc::new(MockExecutor::new("mock"));
        let engines = Arc::new(EngineSet::new().with(executor.clone()));
        let registry = Arc::new(
            EngineRegistry::new(vec![EngineEntry {
                id: EngineId::from("mock"),
                kind: EngineKind::Local,
                priority: 10,
                pairs: vec![FormatPair {
                    input: MediaFormat::Mov,
                    output: MediaFormat::Mp4,
                }],
                capabilities: EngineCapabilities {
                    allowed_qualities: vec![QualityPreset::Medium, QualityPreset::High],
                    allowed_framerates: vec![10, 24, 30],
                    timeout_secs,
                    ..Default::default()
                },
            }])
            .expect("registry"),
        );
        let queue = Arc::new(InProcessQueue::new());
        let dispatcher = Dispatcher::new(store.clone(), engines.clone(), queue.clone());
        let runner = JobRunner::new(config, store.clone(), engines, registry.clone(), queue);

        Self {
            store,
            executor,
            registry,
            dispatcher,
            runner,
        }
    }

    /// Create a mov -> mp4 task the way the API layer would: resolve
    /// the engine, validate the options, store the snapshot.
    async fn create_task(&self, options: ConversionOptions) -> String {
        let entry = self
            .registry
            .resolve(MediaFormat::Mov, MediaFormat::Mp4, 1024, &options)
            .expect("engine resolution");
        let validated = options::validate(&options, &entry.capabilities).expect("valid options");
        let task = self
            .store
            .create(CreateTaskRequest {
                created_by: Some("test".to_string()),
                input: InputSource::Upload {
                    location: "/srv/in/clip.mov".to_string(),
                },
                original_filename: "clip.mov".to_string(),
                input_format: MediaFormat::Mov,
                output_format: MediaFormat::Mp4,
                options: validated,
                engine_id: entry.id.clone(),
            })
            .await
            .expect("task creation");
        task.id
    }

    async fn wait_for_state(&self, task_id: &str, state_type: &str) -> TaskState {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let task = self.store.get(task_id).await.expect("task lookup");
            if task.state.state_type() == state_type {
                return task.state;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "task {task_id} stuck in '{}' waiting for '{state_type}'",
                task.state
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

fn fast_config() -> RunnerConfig {
    RunnerConfig {
        workers: 2,
        max_attempts: 3,
        retry_backoff_base_ms: 10,
        retry_backoff_max_ms: 50,
        poll_interval_ms: 50,
        cancel_poll_interval_ms: 20,
        sweep_batch_size: 50,
    }
}

fn medium_10fps() -> ConversionOptions {
    ConversionOptions::Video(VideoOptions {
        quality: Some(QualityPreset::Medium),
        resolution: None,
        framerate: Some(10),
    })
}

#[tokio::test]
async fn test_happy_path_to_completed() {
    let harness = TestHarness::new().await;
    harness.runner.start().await;

    let task_id = harness.create_task(medium_10fps()).await;
    harness.dispatcher.dispatch(&task_id).await.unwrap();

    let state = harness.wait_for_state(&task_id, "completed").await;
    match state {
        TaskState::Completed { output, .. } => {
            assert_eq!(output.location, format!("/srv/out/{task_id}.mp4"));
            assert!(output.size_bytes > 0);
        }
        other => panic!("expected completed, got {other}"),
    }
    assert_eq!(harness.executor.execution_count(), 1);

    // the validated option snapshot survived on the task
    let task = harness.store.get(&task_id).await.unwrap();
    assert_eq!(task.options.quality(), Some(QualityPreset::Medium));
    assert_eq!(task.options.framerate(), Some(10));

    harness.runner.stop().await;
}

#[tokio::test]
async fn test_timeouts_exhaust_attempts_then_fail() {
    let harness = TestHarness::new().await;
    harness.runner.start().await;

    for _ in 0..3 {
        harness
            .executor
            .push_error(ExecutionError::Timeout { timeout_secs: 5 });
    }
    let task_id = harness.create_task(medium_10fps()).await;
    harness.dispatcher.dispatch(&task_id).await.unwrap();

    let state = harness.wait_for_state(&task_id, "failed").await;
    match state {
        TaskState::Failed { failure, .. } => {
            assert_eq!(failure.classification.as_str(), "timeout");
            assert_eq!(failure.attempts, 3);
        }
        other => panic!("expected failed, got {other}"),
    }
    assert_eq!(harness.executor.execution_count(), 3);

    harness.runner.stop().await;
}

#[tokio::test]
async fn test_transient_error_retried_then_succeeds() {
    let harness = TestHarness::new().await;
    harness.runner.start().await;

    harness
        .executor
        .push_error(ExecutionError::Transient("connection reset".to_string()));
    let task_id = harness.create_task(medium_10fps()).await;
    harness.dispatcher.dispatch(&task_id).await.unwrap();

    harness.wait_for_state(&task_id, "completed").await;
    assert_eq!(harness.executor.execution_count(), 2);

    harness.runner.stop().await;
}

#[tokio::test]
async fn test_non_retryable_error_fails_immediately() {
    let harness = TestHarness::new().await;
    harness.runner.start().await;

    harness
        .executor
        .push_error(ExecutionError::CorruptInput("moov atom not found".to_string()));
    let task_id = harness.create_task(medium_10fps()).await;
    harness.dispatcher.dispatch(&task_id).await.unwrap();

    let state = harness.wait_for_state(&task_id, "failed").await;
    match state {
        TaskState::Failed { failure, .. } => {
            assert_eq!(failure.classification.as_str(), "corrupt_input");
            assert_eq!(failure.attempts, 1);
        }
        other => panic!("expected failed, got {other}"),
    }
    assert_eq!(harness.executor.execution_count(), 1);

    harness.runner.stop().await;
}

#[tokio::test]
async fn test_duplicate_dispatch_executes_once() {
    let harness = TestHarness::new().await;
    harness.runner.start().await;

    // Slow execution so the duplicate lands while the first is running.
    harness.executor.set_delay(Duration::from_millis(200));
    let task_id = harness.create_task(medium_10fps()).await;

    let (a, b) = tokio::join!(
        harness.dispatcher.dispatch(&task_id),
        harness.dispatcher.dispatch(&task_id),
    );
    a.unwrap();
    b.unwrap();

    harness.wait_for_state(&task_id, "completed").await;
    // Give any duplicate queue entry time to be drained and skipped.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(harness.executor.execution_count(), 1);

    harness.runner.stop().await;
}

#[tokio::test]
async fn test_cancel_during_processing_sticks() {
    let harness = TestHarness::new().await;
    harness.runner.start().await;

    harness.executor.set_delay(Duration::from_secs(3));
    let task_id = harness.create_task(medium_10fps()).await;
    harness.dispatcher.dispatch(&task_id).await.unwrap();
    harness.wait_for_state(&task_id, "processing").await;

    // Cancel the way the API does: compare-and-set on the live state.
    harness
        .store
        .transition(
            &task_id,
            "processing",
            TaskState::cancelled(Some("test".to_string()), None),
        )
        .await
        .unwrap();

    harness.wait_for_state(&task_id, "cancelled").await;
    // The worker observes the cancel and must not overwrite it.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let task = harness.store.get(&task_id).await.unwrap();
    assert_eq!(task.state.state_type(), "cancelled");

    harness.runner.stop().await;
}

#[tokio::test]
async fn test_pending_sweep_recovers_undispatched_tasks() {
    let harness = TestHarness::new().await;
    // Created before the runner exists, never dispatched: simulates
    // tasks found in the store after a restart.
    let task_id = harness.create_task(medium_10fps()).await;

    harness.runner.start().await;
    harness.wait_for_state(&task_id, "completed").await;

    harness.runner.stop().await;
}

#[tokio::test]
async fn test_stale_processing_task_reclaimed_after_restart() {
    // Short engine timeout so the abandoned attempt ages out quickly.
    let harness = TestHarness::with_engine_timeout(fast_config(), 1).await;
    let task_id = harness.create_task(medium_10fps()).await;
    // A worker claimed the task, then its process died before finishing.
    harness
        .store
        .transition(&task_id, "pending", TaskState::processing(1))
        .await
        .unwrap();

    harness.runner.start().await;
    harness.wait_for_state(&task_id, "completed").await;
    assert_eq!(harness.executor.execution_count(), 1);

    harness.runner.stop().await;
}

#[tokio::test]
async fn test_stale_processing_with_no_attempts_left_fails() {
    let harness = TestHarness::with_engine_timeout(fast_config(), 1).await;
    let task_id = harness.create_task(medium_10fps()).await;
    harness
        .store
        .transition(&task_id, "pending", TaskState::processing(1))
        .await
        .unwrap();
    harness
        .store
        .transition(&task_id, "processing", TaskState::processing(3))
        .await
        .unwrap();

    harness.runner.start().await;
    let state = harness.wait_for_state(&task_id, "failed").await;
    match state {
        TaskState::Failed { failure, .. } => {
            assert_eq!(failure.attempts, 3);
            assert_eq!(failure.classification.as_str(), "transient");
        }
        other => panic!("expected failed, got {other}"),
    }
    // The interrupted attempts were spent; no fresh execution runs.
    assert_eq!(harness.executor.execution_count(), 0);

    harness.runner.stop().await;
}

#[tokio::test]
async fn test_retry_attempt_carries_its_own_start_time() {
    let harness = TestHarness::new().await;
    harness.runner.start().await;

    harness
        .executor
        .push_error(ExecutionError::Transient("connection reset".to_string()));
    harness.executor.set_delay(Duration::from_millis(400));
    let task_id = harness.create_task(medium_10fps()).await;
    harness.dispatcher.dispatch(&task_id).await.unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    // Catch the second attempt right after its claim, before any
    // progress lands.
    let claimed_at = loop {
        assert!(
            tokio::time::Instant::now() < deadline,
            "second attempt never observed"
        );
        let task = harness.store.get(&task_id).await.unwrap();
        if let TaskState::Processing {
            attempt: 2,
            started_at,
            progress_pct,
        } = task.state
        {
            if progress_pct == 0.0 {
                break started_at;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    };

    // The mid-attempt progress write must keep the retry's start time,
    // not the first attempt's.
    loop {
        assert!(
            tokio::time::Instant::now() < deadline,
            "no progress write observed on the second attempt"
        );
        let task = harness.store.get(&task_id).await.unwrap();
        match task.state {
            TaskState::Processing {
                attempt: 2,
                started_at,
                progress_pct,
            } if progress_pct > 0.0 => {
                assert_eq!(started_at, claimed_at);
                break;
            }
            _ => tokio::time::sleep(Duration::from_millis(5)).await,
        }
    }

    harness.runner.stop().await;
}

#[tokio::test]
async fn test_unavailable_engine_leaves_task_pending() {
    let harness = TestHarness::new().await;
    harness.executor.set_available(false);
    let task_id = harness.create_task(medium_10fps()).await;

    let err = harness.dispatcher.dispatch(&task_id).await.unwrap_err();
    assert!(err.to_string().contains("unavailable"));

    let task = harness.store.get(&task_id).await.unwrap();
    assert_eq!(task.state, TaskState::Pending);
}
