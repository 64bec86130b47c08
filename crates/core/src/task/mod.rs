//! Conversion tasks and their persistent store.
//!
//! A task is the unit of work in the pipeline. Its lifecycle is a
//! strict state machine (pending -> processing -> completed / failed /
//! cancelled) and every transition goes through the store's
//! compare-and-set operation, which is the system's sole arbiter of
//! concurrent writers.

mod sqlite_store;
mod store;
mod types;

pub use sqlite_store::SqliteTaskStore;
pub use store::{TaskError, TaskFilter, TaskStore};
pub use types::{
    ConversionTask, CreateTaskRequest, FailureDetails, InputSource, OutputDetails, TaskState,
};
