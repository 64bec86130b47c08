pub mod config;
pub mod dispatch;
pub mod engine;
pub mod metrics;
pub mod options;
pub mod registry;
pub mod runner;
pub mod task;
pub mod testing;

pub use config::{load_config, load_config_from_str, validate_config, Config, ConfigError};
pub use dispatch::{DispatchError, Dispatcher, InProcessQueue, Queue};
pub use engine::{
    EngineExecutor, EngineSet, ErrorClass, ExecutionContext, ExecutionError, ExecutionOutput,
    FfmpegExecutor, RemoteEngineExecutor,
};
pub use options::{validate, ConversionOptions, ValidationError};
pub use registry::{EngineId, EngineRegistry, MediaFormat, RegistryError};
pub use runner::{JobRunner, RunnerConfig};
pub use task::{
    ConversionTask, CreateTaskRequest, SqliteTaskStore, TaskError, TaskFilter, TaskState,
    TaskStore,
};
