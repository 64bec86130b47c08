//! Prometheus metrics for the pipeline.
//!
//! Metrics are process-wide statics; the server registers them into
//! its registry at startup via [`all_metrics`].

use once_cell::sync::Lazy;
use prometheus::{
    core::Collector, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts,
};

fn counter_vec(name: &str, help: &str, labels: &[&str]) -> IntCounterVec {
    IntCounterVec::new(Opts::new(name, help), labels)
        .unwrap_or_else(|e| panic!("failed to create metric {name}: {e}"))
}

pub static TASKS_CREATED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    counter_vec(
        "mediamill_tasks_created_total",
        "Conversion tasks created",
        &["engine"],
    )
});

pub static TASKS_DISPATCHED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    counter_vec(
        "mediamill_tasks_dispatched_total",
        "Tasks handed to the work queue",
        &["engine"],
    )
});

pub static ENGINE_UNAVAILABLE_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    counter_vec(
        "mediamill_engine_unavailable_total",
        "Dispatch attempts rejected because the engine was down",
        &["engine"],
    )
});

pub static EXECUTIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    counter_vec(
        "mediamill_executions_total",
        "Executor attempts by outcome",
        &["engine", "outcome"],
    )
});

pub static EXECUTION_RETRIES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    counter_vec(
        "mediamill_execution_retries_total",
        "Retried attempts after a retryable failure",
        &["engine"],
    )
});

pub static TASK_FAILURES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    counter_vec(
        "mediamill_task_failures_total",
        "Tasks that ended failed, by error class",
        &["classification"],
    )
});

pub static EXECUTION_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "mediamill_execution_duration_seconds",
            "Wall-clock duration of successful executor attempts",
        )
        .buckets(vec![0.5, 1.0, 5.0, 15.0, 60.0, 300.0, 900.0, 3600.0]),
        &["engine"],
    )
    .unwrap_or_else(|e| panic!("failed to create duration histogram: {e}"))
});

pub static TASKS_IN_PROGRESS: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "mediamill_tasks_in_progress",
        "Tasks currently being executed",
    )
    .unwrap_or_else(|e| panic!("failed to create gauge: {e}"))
});

/// Every collector this crate exports, for registration at startup.
pub fn all_metrics() -> Vec<Box<dyn Collector>> {
    vec![
        Box::new(TASKS_CREATED_TOTAL.clone()),
        Box::new(TASKS_DISPATCHED_TOTAL.clone()),
        Box::new(ENGINE_UNAVAILABLE_TOTAL.clone()),
        Box::new(EXECUTIONS_TOTAL.clone()),
        Box::new(EXECUTION_RETRIES_TOTAL.clone()),
        Box::new(TASK_FAILURES_TOTAL.clone()),
        Box::new(EXECUTION_DURATION_SECONDS.clone()),
        Box::new(TASKS_IN_PROGRESS.clone()),
    ]
}
