//! Format and engine registry.
//!
//! The registry is the single source of truth for which conversions the
//! system supports and which engine handles each one. It is built from
//! configuration at startup and is immutable afterwards; resolution is
//! a pure lookup with no I/O.

mod registry;
mod types;

pub use registry::{EngineRegistry, RegistryError};
pub use types::{EngineCapabilities, EngineEntry, EngineId, EngineKind, FormatPair, MediaFormat};
