//! Tracer configuration
//!
//! The engine needs no persisted settings; this only tunes optional
//! behavior (bookkeeping branches, default sampling, consumer timeouts).

use crate::error::{Result, TracerError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Per-tracer options
///
/// # Example
/// ```
/// use perfscope::TracerConfig;
///
/// let config = TracerConfig::default();
/// assert!(config.internals);
/// assert_eq!(config.fetch_timeout_ms, 3000);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TracerConfig {
    /// Emit the `[[internals]]` bookkeeping subtree on every fork
    pub internals: bool,

    /// Sampling interval for callers that do not choose their own (0 or 1 = every call)
    pub fork_interval: usize,

    /// How long blocking consumers wait for a fetch delivery
    pub fetch_timeout_ms: u64,

    /// Entity table pre-reservation
    pub initial_capacity: usize,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            internals: true,
            fork_interval: 0,
            fetch_timeout_ms: 3000,
            initial_capacity: 64,
        }
    }
}

impl TracerConfig {
    /// No bookkeeping branches: the tree holds exactly what the caller traces.
    pub fn lean() -> Self {
        Self {
            internals: false,
            ..Self::default()
        }
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.fetch_timeout_ms == 0 {
            return Err(TracerError::InvalidConfig(
                "fetch_timeout_ms must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Parse and validate a TOML document. Missing keys take defaults.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: TracerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }
}
