//! Sandbox configuration

use crate::error::SandboxError;
use crate::limits::ResourceLimits;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use stepbox_common::ExecutionMode;

/// Top-level sandbox configuration, loadable from TOML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Wall-clock budget for auto-mode runs without an explicit timeout
    #[serde(with = "humantime_serde")]
    pub default_timeout: Duration,

    /// Wall-clock budget for manual-mode runs without an explicit timeout.
    /// Covers the time spent waiting on the host between steps.
    #[serde(with = "humantime_serde")]
    pub manual_timeout: Duration,

    /// How long to wait for a torn-down context to release its thread
    #[serde(with = "humantime_serde")]
    pub teardown_grace: Duration,

    /// Maximum buffered stdout/stderr lines kept in session state
    pub output_buffer_lines: usize,

    /// Step lines and snapshots kept per session before the oldest are dropped
    pub history_limit: usize,

    pub snapshot: SnapshotOptions,

    pub limits: ResourceLimits,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(5),
            manual_timeout: Duration::from_secs(600),
            teardown_grace: Duration::from_secs(2),
            output_buffer_lines: 1000,
            history_limit: 10_000,
            snapshot: SnapshotOptions::default(),
            limits: ResourceLimits::default(),
        }
    }
}

impl SandboxConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Load from `path` when given, defaults otherwise
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: SandboxConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.history_limit == 0 {
            return Err(SandboxError::Config(
                "history_limit must be at least 1".to_string(),
            ));
        }
        if self.snapshot.max_entries == 0 {
            return Err(SandboxError::Config(
                "snapshot.max_entries must be at least 1".to_string(),
            ));
        }
        if self.snapshot.max_string_len == 0 {
            return Err(SandboxError::Config(
                "snapshot.max_string_len must be at least 1".to_string(),
            ));
        }
        if self.snapshot.result_max_entries == 0 {
            return Err(SandboxError::Config(
                "snapshot.result_max_entries must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Timeout applied when a request does not carry its own
    pub fn timeout_for(&self, mode: ExecutionMode, requested_ms: Option<u64>) -> Duration {
        match (requested_ms, mode) {
            (Some(ms), _) => Duration::from_millis(ms),
            (None, ExecutionMode::Auto) => self.default_timeout,
            (None, ExecutionMode::Manual) => self.manual_timeout,
        }
    }
}

/// Bounds applied when capturing variables and results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotOptions {
    /// Nesting depth of serialized variable values
    pub depth: usize,

    /// Entries kept per collection in a snapshot
    pub max_entries: usize,

    /// Characters kept per string in a snapshot; longer strings are cut and
    /// marked with their full length
    pub max_string_len: usize,

    /// Properties listed per heap object
    pub heap_properties: usize,

    /// Nesting depth of the entry point's return value
    pub result_depth: usize,

    /// Entries kept per collection in the return value
    pub result_max_entries: usize,
}

impl Default for SnapshotOptions {
    fn default() -> Self {
        Self {
            depth: 2,
            max_entries: 10,
            max_string_len: 1000,
            heap_properties: 10,
            result_depth: 16,
            result_max_entries: 10_000,
        }
    }
}
