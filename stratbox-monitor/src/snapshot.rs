//! Point-in-time resource readings for one observed process

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sysinfo::{Pid, ProcessRefreshKind, System};

/// One polled reading of a process's resource counters.
///
/// Disk byte counters are cumulative over the process lifetime, not deltas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub timestamp: DateTime<Utc>,
    pub cpu_percent: f32,
    pub memory_bytes: u64,
    pub memory_percent: f32,
    pub disk_read_bytes: u64,
    pub disk_written_bytes: u64,
    pub open_files: u64,
    pub threads: u64,
    pub connections: u64,
}

/// Probe wrapping a [`System`] scoped to one pid.
pub struct ProcessProbe {
    system: System,
    pid: Pid,
    total_memory: u64,
}

impl ProcessProbe {
    pub fn new(pid: u32) -> Self {
        let mut system = System::new();
        system.refresh_memory();
        let total_memory = system.total_memory();
        Self {
            system,
            pid: Pid::from_u32(pid),
            total_memory,
        }
    }

    /// Take one reading, or `None` once the process is gone.
    pub fn sample(&mut self) -> Option<ResourceSnapshot> {
        let refreshed = self.system.refresh_process_specifics(
            self.pid,
            ProcessRefreshKind::new().with_cpu().with_memory().with_disk_usage(),
        );
        if !refreshed {
            return None;
        }
        let process = self.system.process(self.pid)?;

        let memory_bytes = process.memory();
        let memory_percent = if self.total_memory > 0 {
            (memory_bytes as f64 / self.total_memory as f64 * 100.0) as f32
        } else {
            0.0
        };
        let disk = process.disk_usage();
        let (open_files, threads, connections) = procfs_counts(self.pid.as_u32());

        Some(ResourceSnapshot {
            timestamp: Utc::now(),
            cpu_percent: process.cpu_usage(),
            memory_bytes,
            memory_percent,
            disk_read_bytes: disk.total_read_bytes,
            disk_written_bytes: disk.total_written_bytes,
            open_files,
            threads,
            connections,
        })
    }
}

/// Open-handle, thread and socket counts from /proc. sysinfo does not expose
/// fd tables, so these come straight from the kernel. Zeroes on non-Linux.
#[cfg(target_os = "linux")]
fn procfs_counts(pid: u32) -> (u64, u64, u64) {
    let open_files = std::fs::read_dir(format!("/proc/{pid}/fd"))
        .map(|entries| entries.count() as u64)
        .unwrap_or(0);
    let threads = std::fs::read_dir(format!("/proc/{pid}/task"))
        .map(|entries| entries.count() as u64)
        .unwrap_or(0);
    let connections = std::fs::read_dir(format!("/proc/{pid}/fd"))
        .map(|entries| {
            entries
                .flatten()
                .filter(|entry| {
                    std::fs::read_link(entry.path())
                        .map(|target| target.to_string_lossy().starts_with("socket:"))
                        .unwrap_or(false)
                })
                .count() as u64
        })
        .unwrap_or(0);
    (open_files, threads, connections)
}

#[cfg(not(target_os = "linux"))]
fn procfs_counts(_pid: u32) -> (u64, u64, u64) {
    (0, 0, 0)
}
