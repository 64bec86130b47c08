//! Conversion options and their validation.
//!
//! Options arrive from the HTTP boundary as a closed, typed structure
//! (no free-form key/value bags). The validator checks a caller-supplied
//! option set against the capability allow-lists of the engine that was
//! resolved for the task, fills engine defaults for missing keys, and
//! returns the immutable snapshot that is stored on the task. Validation
//! is pure: no I/O, no clock, no store access.

mod types;
mod validator;

pub use types::{AudioOptions, ConversionOptions, QualityPreset, Resolution, VideoOptions};
pub use validator::{validate, ValidationError};
