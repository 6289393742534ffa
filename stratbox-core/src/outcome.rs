//! Structured pipeline results

use serde::{Deserialize, Serialize};
use stratbox_auth::AuthError;
use stratbox_monitor::ExecutionSummary;
use stratbox_sandbox::ExecutionResult;
use stratbox_scan::ScanResult;

/// Everything one `run_user_code` call produced: the execution outcome, the
/// scan verdict that gated it, and the resource summary when the code
/// actually ran.
///
/// Denied or blocked requests still yield an outcome; the embedded result
/// carries `permission_denied` or `blocked_by_scan` and nothing was launched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineOutcome {
    pub execution: ExecutionResult,
    /// Absent when the permission check failed before scanning.
    pub scan: Option<ScanResult>,
    /// Absent unless a process was launched and monitored.
    pub summary: Option<ExecutionSummary>,
}

impl PipelineOutcome {
    pub fn gated(execution: ExecutionResult, scan: Option<ScanResult>) -> Self {
        Self {
            execution,
            scan,
            summary: None,
        }
    }
}

/// Faults surfaced before any gating decision could be made. Everything that
/// happens during or after gating is reported inside [`PipelineOutcome`].
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Auth(#[from] AuthError),
}
