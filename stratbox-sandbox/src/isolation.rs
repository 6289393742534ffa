//! Isolated execution context: scratch working directory, scrubbed
//! environment, OS-enforced resource ceilings.
//!
//! CPU and memory ceilings are applied via `setrlimit` in the child between
//! fork and exec, so a runaway process can never exceed them even briefly.
//! Container mode additionally unshares user/mount/pid/net namespaces,
//! which is strictly stronger isolation; memory-ceiling precision is the
//! same (both paths use RLIMIT_AS).

use crate::limits::ResourceLimits;
use crate::types::{ExecutionRequest, Interpreter};
use std::path::PathBuf;
use tempfile::TempDir;
use tokio::process::Command;

/// Environment variables that survive scrubbing
const KEPT_ENV: &[&str] = &["PATH", "LANG", "TZ"];

/// A prepared, not-yet-launched execution context. Dropping it removes the
/// working directory.
pub struct IsolationContext {
    workdir: TempDir,
    script_path: PathBuf,
    interpreter: Interpreter,
}

impl IsolationContext {
    /// Write the code unit into a fresh scratch directory.
    pub async fn prepare(request: &ExecutionRequest) -> std::io::Result<Self> {
        let workdir = tempfile::Builder::new().prefix("stratbox-").tempdir()?;
        let script_path = workdir.path().join(request.interpreter.script_name());
        tokio::fs::write(&script_path, &request.code).await?;
        Ok(Self {
            workdir,
            script_path,
            interpreter: request.interpreter,
        })
    }

    pub fn workdir_path(&self) -> &std::path::Path {
        self.workdir.path()
    }

    /// Build the launch command: scrubbed environment, scratch working
    /// directory, stdio piped, ceilings applied in the child.
    pub fn command(&self, limits: &ResourceLimits) -> Command {
        let mut cmd = Command::new(self.interpreter.program());
        cmd.args(self.interpreter.args())
            .arg(&self.script_path)
            .current_dir(self.workdir.path())
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        // Ambient credentials never reach the child
        cmd.env_clear();
        for key in KEPT_ENV {
            if let Ok(value) = std::env::var(key) {
                cmd.env(key, value);
            }
        }
        cmd.env("HOME", self.workdir.path());

        apply_child_limits(&mut cmd, limits);
        cmd
    }
}

#[cfg(unix)]
fn apply_child_limits(cmd: &mut Command, limits: &ResourceLimits) {
    use nix::sys::resource::{setrlimit, Resource};

    let cpu = limits.max_cpu_secs;
    let memory = limits.max_memory_bytes;
    let files = limits.max_open_files;
    // Threads count against NPROC on Linux
    let procs = limits.max_processes.max(limits.max_threads);
    let container = limits.container_mode;

    // Runs in the forked child before exec
    unsafe {
        cmd.pre_exec(move || {
            if container {
                unshare_namespaces()?;
            }
            // Own process group so the whole tree can be killed at once
            nix::unistd::setpgid(nix::unistd::Pid::from_raw(0), nix::unistd::Pid::from_raw(0))
                .map_err(io_err)?;
            setrlimit(Resource::RLIMIT_CPU, cpu, cpu).map_err(io_err)?;
            setrlimit(Resource::RLIMIT_AS, memory, memory).map_err(io_err)?;
            setrlimit(Resource::RLIMIT_NOFILE, files, files).map_err(io_err)?;
            setrlimit(Resource::RLIMIT_NPROC, procs, procs).map_err(io_err)?;
            Ok(())
        });
    }
}

#[cfg(unix)]
fn unshare_namespaces() -> std::io::Result<()> {
    use nix::sched::{unshare, CloneFlags};
    unshare(
        CloneFlags::CLONE_NEWUSER
            | CloneFlags::CLONE_NEWNS
            | CloneFlags::CLONE_NEWPID
            | CloneFlags::CLONE_NEWNET,
    )
    .map_err(io_err)
}

#[cfg(unix)]
fn io_err(err: nix::Error) -> std::io::Error {
    std::io::Error::from_raw_os_error(err as i32)
}

#[cfg(not(unix))]
fn apply_child_limits(_cmd: &mut Command, _limits: &ResourceLimits) {
    // Ceilings rely on Unix rlimits; the wall-clock watchdog still applies.
}
