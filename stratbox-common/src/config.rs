//! Configuration file model
//!
//! Loaded from a TOML file at startup. Every field has a default so an empty
//! file (or no file at all) yields a working configuration.

use crate::types::Severity;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// System-wide hard ceiling that clamps any caller-requested resource limit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceCeiling {
    /// Maximum CPU seconds any execution may request
    pub max_cpu_secs: u64,

    /// Maximum wall-clock seconds any execution may request
    pub max_wall_secs: u64,

    /// Maximum resident memory in bytes
    pub max_memory_bytes: u64,

    /// Maximum open file handles
    pub max_open_files: u64,

    /// Maximum child processes
    pub max_processes: u64,

    /// Maximum threads
    pub max_threads: u64,
}

impl Default for ResourceCeiling {
    fn default() -> Self {
        Self {
            max_cpu_secs: 60,
            max_wall_secs: 120,
            max_memory_bytes: 512 * 1024 * 1024,
            max_open_files: 64,
            max_processes: 8,
            max_threads: 32,
        }
    }
}

/// Top-level configuration surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StratboxConfig {
    /// Upper bound on concurrently running sandboxed executions.
    /// Excess requests queue FIFO rather than being rejected.
    pub max_concurrent_executions: usize,

    /// Hard ceiling applied to every execution regardless of overrides
    pub default_resource_ceiling: ResourceCeiling,

    /// Minimum scan severity that blocks execution
    pub block_severity_threshold: Severity,

    /// Monitor polling interval
    #[serde(with = "humantime_serde")]
    pub monitor_poll_interval: Duration,

    /// Maximum retained snapshots per execution (oldest dropped first)
    pub snapshot_retention_cap: usize,

    /// Whether new executions default to container-grade isolation
    pub container_mode_default: bool,
}

impl Default for StratboxConfig {
    fn default() -> Self {
        Self {
            max_concurrent_executions: 4,
            default_resource_ceiling: ResourceCeiling::default(),
            block_severity_threshold: Severity::High,
            monitor_poll_interval: Duration::from_millis(500),
            snapshot_retention_cap: 2048,
            container_mode_default: false,
        }
    }
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

impl StratboxConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    /// Load from a file if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}
