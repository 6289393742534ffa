//! Resource limits for sandboxed execution
//!
//! Immutable policy value object, created once per execution request from
//! caller-supplied overrides clamped to the system-wide ceiling.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use stratbox_common::ResourceCeiling;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Maximum CPU time in seconds (enforced by the OS at launch)
    pub max_cpu_secs: u64,

    /// Maximum wall-clock time in seconds (enforced by the watchdog)
    pub max_wall_secs: u64,

    /// Maximum resident memory in bytes
    pub max_memory_bytes: u64,

    /// Maximum open file handles
    pub max_open_files: u64,

    /// Maximum child processes
    pub max_processes: u64,

    /// Maximum threads
    pub max_threads: u64,

    /// Filesystem path prefixes the execution may touch (empty = workdir only)
    #[serde(default)]
    pub allowed_paths: Vec<PathBuf>,

    /// Path prefixes that are always rejected; deny wins on overlap
    #[serde(default)]
    pub denied_paths: Vec<PathBuf>,

    /// Container-grade isolation instead of lightweight process isolation
    #[serde(default)]
    pub container_mode: bool,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_cpu_secs: 30,
            max_wall_secs: 30,
            max_memory_bytes: 256 * 1024 * 1024,
            max_open_files: 32,
            max_processes: 4,
            max_threads: 16,
            allowed_paths: Vec::new(),
            denied_paths: Vec::new(),
            container_mode: false,
        }
    }
}

impl ResourceLimits {
    /// Tight limits for fully untrusted code
    pub fn strict() -> Self {
        Self {
            max_cpu_secs: 5,
            max_wall_secs: 5,
            max_memory_bytes: 32 * 1024 * 1024,
            max_open_files: 16,
            max_processes: 1,
            max_threads: 4,
            ..Self::default()
        }
    }

    /// Clamp every field to the system-wide ceiling. Path lists and the
    /// container flag pass through; they narrow rather than widen access.
    pub fn clamp_to(&self, ceiling: &ResourceCeiling) -> Self {
        Self {
            max_cpu_secs: self.max_cpu_secs.min(ceiling.max_cpu_secs),
            max_wall_secs: self.max_wall_secs.min(ceiling.max_wall_secs),
            max_memory_bytes: self.max_memory_bytes.min(ceiling.max_memory_bytes),
            max_open_files: self.max_open_files.min(ceiling.max_open_files),
            max_processes: self.max_processes.min(ceiling.max_processes),
            max_threads: self.max_threads.min(ceiling.max_threads),
            allowed_paths: self.allowed_paths.clone(),
            denied_paths: self.denied_paths.clone(),
            container_mode: self.container_mode,
        }
    }

    pub fn with_wall_secs(mut self, secs: u64) -> Self {
        self.max_wall_secs = secs;
        self
    }

    pub fn with_memory_bytes(mut self, bytes: u64) -> Self {
        self.max_memory_bytes = bytes;
        self
    }
}
