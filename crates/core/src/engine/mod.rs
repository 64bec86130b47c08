//! Conversion engines.
//!
//! An engine executor takes a task, performs exactly one conversion
//! attempt, and reports either output details or a classified error.
//! Executors are stateless between attempts and know nothing about the
//! task store, retries or queues; the runner owns all of that.

mod context;
mod error;
mod ffmpeg;
mod remote;
mod traits;

pub(crate) use context::cancelled;
pub use context::{cancellation_channel, CancelHandle, ExecutionContext};
pub use error::{ErrorClass, ExecutionError};
pub use ffmpeg::{FfmpegConfig, FfmpegExecutor, MediaProbe};
pub use remote::{RemoteEngineConfig, RemoteEngineExecutor};
pub use traits::{EngineExecutor, EngineSet, ExecutionOutput};
