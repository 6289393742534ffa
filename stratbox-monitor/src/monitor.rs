//! Monitor attachment and the per-execution polling loop

use crate::alerts::{AlertCallback, AlertEngine, AlertThresholds};
use crate::snapshot::ProcessProbe;
use crate::summary::{ExecutionSummary, Timeline};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use stratbox_common::{SessionId, StratboxConfig};
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("no monitor attached for session {0}")]
    UnknownSession(SessionId),
    #[error("monitor task for session {0} failed")]
    TaskFailed(SessionId),
}

/// Handle returned by [`ExecutionMonitor::attach`]; identifies the session
/// for a later `detach`.
#[derive(Debug, Clone, Copy)]
pub struct MonitorHandle {
    pub session_id: SessionId,
}

struct ActiveMonitor {
    stop: watch::Sender<bool>,
    task: JoinHandle<ExecutionSummary>,
}

/// Oversees concurrent per-execution polling loops.
///
/// Each attached session gets its own task polling the target process at the
/// configured interval. The loop stops on detach or the instant the process
/// becomes unobservable, so a dead process is never polled.
pub struct ExecutionMonitor {
    poll_interval: Duration,
    retention_cap: usize,
    sessions: Mutex<HashMap<SessionId, ActiveMonitor>>,
}

impl ExecutionMonitor {
    pub fn new(config: &StratboxConfig) -> Self {
        Self {
            poll_interval: config.monitor_poll_interval,
            retention_cap: config.snapshot_retention_cap,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Start polling `pid`. Alerts are evaluated per snapshot against
    /// `thresholds`, invoking `callback` once per threshold crossing.
    pub fn attach(
        &self,
        pid: u32,
        session_id: SessionId,
        thresholds: AlertThresholds,
        callback: Option<AlertCallback>,
    ) -> MonitorHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let engine = AlertEngine::new(thresholds, callback);
        let task = tokio::spawn(poll_loop(
            pid,
            session_id,
            self.poll_interval,
            self.retention_cap,
            engine,
            stop_rx,
        ));
        tracing::debug!(session_id = %session_id, pid, "monitor attached");

        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.insert(
            session_id,
            ActiveMonitor {
                stop: stop_tx,
                task,
            },
        );
        MonitorHandle { session_id }
    }

    /// Stop polling and return the finalized summary. Returns only after the
    /// polling loop has fully wound down.
    pub async fn detach(&self, session_id: SessionId) -> Result<ExecutionSummary, MonitorError> {
        let active = {
            let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
            sessions
                .remove(&session_id)
                .ok_or(MonitorError::UnknownSession(session_id))?
        };
        let _ = active.stop.send(true);
        let summary = active
            .task
            .await
            .map_err(|_| MonitorError::TaskFailed(session_id))?;
        tracing::debug!(
            session_id = %session_id,
            snapshots = summary.snapshots.len(),
            breaches = summary.breach_count,
            "monitor detached"
        );
        Ok(summary)
    }
}

async fn poll_loop(
    pid: u32,
    session_id: SessionId,
    poll_interval: Duration,
    retention_cap: usize,
    mut engine: AlertEngine,
    mut stop_rx: watch::Receiver<bool>,
) -> ExecutionSummary {
    let started = Instant::now();
    let mut probe = ProcessProbe::new(pid);
    let mut timeline = Timeline::new(retention_cap);
    let mut process_unavailable = false;

    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // First tick fires immediately, giving a snapshot right at attach time
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match probe.sample() {
                    Some(snapshot) => {
                        engine.evaluate(&snapshot);
                        timeline.push(snapshot);
                    }
                    None => {
                        // Process exited or became unobservable; finalize
                        // with what was collected instead of raising
                        process_unavailable = true;
                        break;
                    }
                }
            }
            _ = stop_rx.wait_for(|&stopped| stopped) => break,
        }
    }

    timeline.into_summary(
        session_id,
        started.elapsed().as_millis() as u64,
        engine.breach_count(),
        process_unavailable,
    )
}
