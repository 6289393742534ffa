//! Sandbox executor: launch, watchdog, cancellation, bounded concurrency

use crate::isolation::IsolationContext;
use crate::policy::PathPolicy;
use crate::types::{ExecutionRequest, ExecutionResult};
use std::process::ExitStatus;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use stratbox_common::{ExecutionId, ResourceCeiling, StratboxConfig, TerminationReason};
use tokio::io::AsyncReadExt;
use tokio::sync::{oneshot, watch, Semaphore};

/// Per-stream capture cap; partial output up to the cap is retained
const MAX_CAPTURE_BYTES: usize = 1024 * 1024;

/// Executes code units in isolated processes.
///
/// No shared mutable state across executions; each gets an independent
/// context. Concurrency is bounded by a semaphore whose waiters are served
/// FIFO, so excess requests queue rather than fail.
pub struct SandboxExecutor {
    ceiling: ResourceCeiling,
    slots: Arc<Semaphore>,
    launches: Arc<AtomicU64>,
}

/// Handle to one in-flight execution
pub struct ExecutionHandle {
    pub id: ExecutionId,
    cancel: watch::Sender<bool>,
    pid: oneshot::Receiver<Option<u32>>,
    result: tokio::task::JoinHandle<ExecutionResult>,
}

impl ExecutionHandle {
    /// Request early termination. The result will carry
    /// `termination_reason = cancelled`.
    pub fn cancel(&self) {
        let _ = self.cancel.send(true);
    }

    /// OS pid of the child, once it has been launched (None if launch failed
    /// or the execution was cancelled while queued).
    pub async fn pid(&mut self) -> Option<u32> {
        (&mut self.pid).await.ok().flatten()
    }

    /// Wait for the execution to finish. Returns only after the child has
    /// fully terminated; no orphaned processes are reported as done.
    pub async fn wait(self) -> ExecutionResult {
        let id = self.id;
        self.result.await.unwrap_or_else(|_| {
            ExecutionResult::pre_launch(id, TerminationReason::InternalError, "execution task failed")
        })
    }
}

impl SandboxExecutor {
    pub fn new(config: &StratboxConfig) -> Self {
        Self {
            ceiling: config.default_resource_ceiling.clone(),
            slots: Arc::new(Semaphore::new(config.max_concurrent_executions)),
            launches: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of processes actually launched; lets callers verify that
    /// blocked code never reached the sandbox.
    pub fn launch_count(&self) -> u64 {
        self.launches.load(Ordering::SeqCst)
    }

    /// Execute a code unit and block until it finishes, times out, violates
    /// a limit, or is cancelled.
    pub async fn execute(&self, request: ExecutionRequest) -> ExecutionResult {
        self.start(request).wait().await
    }

    /// Start an execution and return a handle for cancellation and
    /// monitor attachment.
    pub fn start(&self, request: ExecutionRequest) -> ExecutionHandle {
        let id = request.id;
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (pid_tx, pid_rx) = oneshot::channel();

        let slots = self.slots.clone();
        let launches = self.launches.clone();
        let limits = request.limits.clamp_to(&self.ceiling);

        let task = tokio::spawn(async move {
            // FIFO queueing; a closed semaphore never happens in practice
            let _permit = match slots.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    let _ = pid_tx.send(None);
                    return ExecutionResult::pre_launch(
                        id,
                        TerminationReason::InternalError,
                        "execution queue unavailable",
                    );
                }
            };
            run_one(request, limits, cancel_rx, launches, pid_tx).await
        });

        ExecutionHandle {
            id,
            cancel: cancel_tx,
            pid: pid_rx,
            result: task,
        }
    }
}

async fn run_one(
    request: ExecutionRequest,
    limits: crate::limits::ResourceLimits,
    mut cancel_rx: watch::Receiver<bool>,
    launches: Arc<AtomicU64>,
    pid_tx: oneshot::Sender<Option<u32>>,
) -> ExecutionResult {
    let id = request.id;
    let start = Instant::now();

    let ctx = match IsolationContext::prepare(&request).await {
        Ok(ctx) => ctx,
        Err(err) => {
            tracing::warn!(execution_id = %id, error = %err, "context preparation failed");
            let _ = pid_tx.send(None);
            return ExecutionResult::pre_launch(
                id,
                TerminationReason::InternalError,
                "failed to prepare execution context",
            );
        }
    };

    // The isolation boundary rejects a working directory the path policy
    // does not admit, before anything runs
    let policy = PathPolicy::from_limits(&limits);
    if !policy.is_allowed(ctx.workdir_path()) {
        let _ = pid_tx.send(None);
        return ExecutionResult::pre_launch(
            id,
            TerminationReason::InternalError,
            "execution context outside permitted paths",
        );
    }

    let mut child = match ctx.command(&limits).spawn() {
        Ok(child) => child,
        Err(err) => {
            tracing::warn!(execution_id = %id, error = %err, "launch failed");
            let _ = pid_tx.send(None);
            // Sanitized: no host paths or raw OS error text
            return ExecutionResult::pre_launch(
                id,
                TerminationReason::InternalError,
                "failed to launch execution context",
            );
        }
    };
    launches.fetch_add(1, Ordering::SeqCst);
    let pid = child.id();
    let _ = pid_tx.send(pid);
    tracing::info!(
        execution_id = %id,
        principal = %request.principal,
        pid = ?pid,
        wall_limit_secs = limits.max_wall_secs,
        "execution launched"
    );

    let stdout_task = child.stdout.take().map(|s| tokio::spawn(read_capped(s)));
    let stderr_task = child.stderr.take().map(|s| tokio::spawn(read_capped(s)));

    let wall_limit = Duration::from_secs(limits.max_wall_secs);
    let mut reaper = spawn_reaper(child, pid);
    let (reaped, mut reason) = tokio::select! {
        reaped = &mut reaper => (reaped, None),
        _ = tokio::time::sleep(wall_limit) => {
            tracing::warn!(execution_id = %id, "wall-clock limit hit, terminating");
            kill_tree(pid);
            (reaper.await, Some(TerminationReason::Timeout))
        }
        // The watch ref must not be held across the kill; only the signal
        // that cancellation happened leaves the block
        _ = async { let _ = cancel_rx.wait_for(|&cancelled| cancelled).await; } => {
            tracing::info!(execution_id = %id, "cancellation requested");
            kill_tree(pid);
            (reaper.await, Some(TerminationReason::Cancelled))
        }
    };
    let (status, cpu_time_ms) = reaped.unwrap_or((None, 0));

    let stdout = collect(stdout_task).await;
    let stderr = collect(stderr_task).await;
    let duration_ms = start.elapsed().as_millis() as u64;

    let (exit_code, success) = match (&status, &reason) {
        (Some(status), None) => {
            let (mapped, code) = classify_exit(status, &stderr);
            reason = Some(mapped);
            (code, mapped == TerminationReason::Completed && code == Some(0))
        }
        _ => (None, false),
    };
    let reason = reason.unwrap_or(TerminationReason::InternalError);

    tracing::info!(
        execution_id = %id,
        reason = %reason,
        success,
        duration_ms,
        "execution finished"
    );

    ExecutionResult {
        id,
        success,
        stdout,
        stderr,
        exit_code,
        duration_ms,
        cpu_time_ms,
        reason,
    }
}

/// Map a natural exit status to a termination reason.
fn classify_exit(status: &ExitStatus, stderr: &str) -> (TerminationReason, Option<i32>) {
    if let Some(code) = status.code() {
        // RLIMIT_AS surfaces as a failed allocation inside the interpreter
        if code != 0 && stderr.contains("MemoryError") {
            return (TerminationReason::ResourceLimitExceeded, Some(code));
        }
        return (TerminationReason::Completed, Some(code));
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        match status.signal() {
            // SIGXCPU (CPU rlimit) and SIGKILL/SIGSEGV under memory pressure
            Some(libsig) if libsig == 24 || libsig == 9 || libsig == 11 => {
                return (TerminationReason::ResourceLimitExceeded, None);
            }
            _ => {}
        }
    }
    (TerminationReason::InternalError, None)
}

#[cfg(unix)]
fn kill_tree(pid: Option<u32>) {
    use nix::sys::signal::{kill, killpg, Signal};
    use nix::unistd::Pid;
    let Some(pid) = pid else { return };
    let pid = Pid::from_raw(pid as i32);
    // The child leads its own process group; kill the whole tree
    if killpg(pid, Signal::SIGKILL).is_err() {
        let _ = kill(pid, Signal::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_tree(_pid: Option<u32>) {}

/// Reap the child on a blocking thread via wait4(2), which yields the exit
/// status together with that child's own rusage. Accounting stays
/// per-execution even when siblings are reaped in the same window.
#[cfg(unix)]
fn spawn_reaper(
    child: tokio::process::Child,
    pid: Option<u32>,
) -> tokio::task::JoinHandle<(Option<ExitStatus>, u64)> {
    tokio::task::spawn_blocking(move || {
        let outcome = pid.map_or((None, 0), reap_with_usage);
        // Dropping the handle only after the reap keeps the runtime's own
        // orphan reaper from racing us for the wait status
        drop(child);
        outcome
    })
}

#[cfg(not(unix))]
fn spawn_reaper(
    mut child: tokio::process::Child,
    _pid: Option<u32>,
) -> tokio::task::JoinHandle<(Option<ExitStatus>, u64)> {
    tokio::spawn(async move { (child.wait().await.ok(), 0) })
}

#[cfg(unix)]
fn reap_with_usage(pid: u32) -> (Option<ExitStatus>, u64) {
    use std::os::unix::process::ExitStatusExt;
    let mut status: nix::libc::c_int = 0;
    let mut usage: nix::libc::rusage = unsafe { std::mem::zeroed() };
    // SAFETY: blocking wait4 on a pid we spawned; both out-params outlive
    // the call
    let reaped = unsafe { nix::libc::wait4(pid as i32, &mut status, 0, &mut usage) };
    if reaped != pid as i32 {
        return (None, 0);
    }
    let cpu_ms = (usage.ru_utime.tv_sec as u64 + usage.ru_stime.tv_sec as u64) * 1000
        + (usage.ru_utime.tv_usec as u64 + usage.ru_stime.tv_usec as u64) / 1000;
    (Some(ExitStatus::from_raw(status)), cpu_ms)
}

async fn read_capped(mut stream: impl tokio::io::AsyncRead + Unpin) -> Vec<u8> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let room = MAX_CAPTURE_BYTES.saturating_sub(buffer.len());
                buffer.extend_from_slice(&chunk[..n.min(room)]);
                // Keep draining past the cap so the child never blocks on a
                // full pipe
            }
        }
    }
    buffer
}

async fn collect(task: Option<tokio::task::JoinHandle<Vec<u8>>>) -> String {
    match task {
        Some(task) => String::from_utf8_lossy(&task.await.unwrap_or_default()).into_owned(),
        None => String::new(),
    }
}
