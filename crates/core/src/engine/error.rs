//! Execution errors and their classification.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable failure classification stored on failed tasks and exported
/// as a metric label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Timeout,
    Transient,
    ResourceExhausted,
    CorruptInput,
    UnsupportedCodec,
    InputTooLarge,
    Unavailable,
    Cancelled,
    Io,
    Internal,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Timeout => "timeout",
            ErrorClass::Transient => "transient",
            ErrorClass::ResourceExhausted => "resource_exhausted",
            ErrorClass::CorruptInput => "corrupt_input",
            ErrorClass::UnsupportedCodec => "unsupported_codec",
            ErrorClass::InputTooLarge => "input_too_large",
            ErrorClass::Unavailable => "unavailable",
            ErrorClass::Cancelled => "cancelled",
            ErrorClass::Io => "io",
            ErrorClass::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error from a single conversion attempt.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("execution timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("resource exhaustion: {0}")]
    ResourceExhausted(String),

    #[error("corrupt or unreadable input: {0}")]
    CorruptInput(String),

    #[error("unsupported codec or parameters: {0}")]
    UnsupportedCodec(String),

    #[error("input of {size_bytes} bytes exceeds engine limit of {max_bytes} bytes")]
    InputTooLarge { size_bytes: u64, max_bytes: u64 },

    #[error("engine unavailable: {0}")]
    Unavailable(String),

    #[error("execution cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("engine failure: {0}")]
    Internal(String),
}

impl ExecutionError {
    pub fn classification(&self) -> ErrorClass {
        match self {
            ExecutionError::Timeout { .. } => ErrorClass::Timeout,
            ExecutionError::Transient(_) => ErrorClass::Transient,
            ExecutionError::ResourceExhausted(_) => ErrorClass::ResourceExhausted,
            ExecutionError::CorruptInput(_) => ErrorClass::CorruptInput,
            ExecutionError::UnsupportedCodec(_) => ErrorClass::UnsupportedCodec,
            ExecutionError::InputTooLarge { .. } => ErrorClass::InputTooLarge,
            ExecutionError::Unavailable(_) => ErrorClass::Unavailable,
            ExecutionError::Cancelled => ErrorClass::Cancelled,
            ExecutionError::Io(_) => ErrorClass::Io,
            ExecutionError::Internal(_) => ErrorClass::Internal,
        }
    }

    /// Whether another attempt could plausibly succeed.
    ///
    /// Deterministic failures (bad input, unsupported codec, oversized
    /// file) would fail identically on retry; environmental ones get
    /// further attempts up to the runner's limit.
    pub fn is_retryable(&self) -> bool {
        match self {
            ExecutionError::Timeout { .. }
            | ExecutionError::Transient(_)
            | ExecutionError::ResourceExhausted(_)
            | ExecutionError::Unavailable(_)
            | ExecutionError::Io(_) => true,
            ExecutionError::CorruptInput(_)
            | ExecutionError::UnsupportedCodec(_)
            | ExecutionError::InputTooLarge { .. }
            | ExecutionError::Cancelled
            | ExecutionError::Internal(_) => false,
        }
    }
}
