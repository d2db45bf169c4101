//! Error taxonomy for the tracer engine
//!
//! Only misuse of the single-writer contract and registry naming produce
//! errors on the hot path. Stack mismatches are logged, never returned.

use std::thread::ThreadId;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by tracer, registry and consumer helpers
#[derive(Error, Debug)]
pub enum TracerError {
    /// Producer call from a thread other than the one pinned by the first `fork()`.
    ///
    /// `pinned` is `None` when `branch()`/`timer()` is called before any fork.
    #[error("tracer '{tracer}': producer call from {current:?}, but producer thread is {pinned:?}")]
    ThreadAffinityViolation {
        tracer: String,
        pinned: Option<ThreadId>,
        current: ThreadId,
    },

    #[error("tracer name '{name}' already registered at order {order}")]
    NameCollision { order: i32, name: String },

    #[error("tracer '{tracer}' did not deliver a fetch within {waited:?}")]
    FetchTimeout { tracer: String, waited: Duration },

    #[error("invalid trace pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("invalid tracer configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to parse tracer configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for tracer operations
pub type Result<T> = std::result::Result<T, TracerError>;
