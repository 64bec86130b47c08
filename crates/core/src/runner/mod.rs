//! Background execution of conversion tasks.
//!
//! The runner owns the worker pool, the retry policy and the pending
//! sweep. Workers pull task ids off the queue, claim the task with a
//! pending -> processing compare-and-set, and drive attempts against
//! the task's engine until the task reaches a terminal state.

mod config;
#[allow(clippy::module_inception)]
mod runner;

pub use config::RunnerConfig;
pub use runner::JobRunner;
