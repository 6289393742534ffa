//! The execution pipeline: permission check, threat scan, sandboxed run,
//! resource monitoring, audit.

use crate::outcome::{PipelineError, PipelineOutcome};
use std::sync::Arc;
use stratbox_auth::{AccessLogEntry, AccessLogFilter, PermissionService, PermissionStore, SessionToken};
use stratbox_common::{
    ExecutionId, GrantId, PermissionType, ResourceType, SessionId, StratboxConfig,
    TerminationReason,
};
use stratbox_monitor::{AlertThresholds, ExecutionMonitor};
use stratbox_sandbox::{
    ExecutionRequest, ExecutionResult, Interpreter, ResourceLimits, SandboxExecutor,
};
use stratbox_scan::Scanner;

/// Front door for the whole subsystem.
///
/// Sequencing per request: permission check, static scan, sandboxed
/// execution with an attached monitor, summary on completion. Denials and
/// blocking verdicts short-circuit; blocked code never reaches the executor.
pub struct SandboxService {
    permissions: Arc<PermissionService>,
    scanner: Scanner,
    executor: SandboxExecutor,
    monitor: ExecutionMonitor,
    container_mode_default: bool,
}

impl SandboxService {
    pub fn new(config: &StratboxConfig, store: Arc<dyn PermissionStore>) -> Self {
        Self {
            permissions: Arc::new(PermissionService::new(store)),
            scanner: Scanner::with_threshold(config.block_severity_threshold),
            executor: SandboxExecutor::new(config),
            monitor: ExecutionMonitor::new(config),
            container_mode_default: config.container_mode_default,
        }
    }

    pub fn permissions(&self) -> &PermissionService {
        &self.permissions
    }

    /// Processes launched since startup. A blocked or denied request leaves
    /// this unchanged.
    pub fn executions_launched(&self) -> u64 {
        self.executor.launch_count()
    }

    /// Run a code unit on behalf of the session's principal.
    ///
    /// Only session resolution failures surface as errors; everything after
    /// that gate is reported inside the returned [`PipelineOutcome`].
    pub async fn run_user_code(
        &self,
        token: &SessionToken,
        code: &str,
        interpreter: Interpreter,
        limit_overrides: Option<ResourceLimits>,
    ) -> Result<PipelineOutcome, PipelineError> {
        let principal = self.permissions.session_principal(token).await?;
        let id = ExecutionId::new();

        let allowed = self
            .permissions
            .check(token, PermissionType::CodeExecute, ResourceType::Process, None)
            .await?;
        if !allowed {
            tracing::warn!(execution_id = %id, principal = %principal, "execution denied");
            return Ok(PipelineOutcome::gated(
                ExecutionResult::pre_launch(
                    id,
                    TerminationReason::PermissionDenied,
                    "principal lacks code execution permission",
                ),
                None,
            ));
        }

        let scan = self.scanner.scan(code);
        if scan.blocking {
            tracing::warn!(
                execution_id = %id,
                principal = %principal,
                severity = ?scan.severity,
                findings = scan.findings.len(),
                "execution blocked by scan"
            );
            return Ok(PipelineOutcome::gated(
                ExecutionResult::pre_launch(
                    id,
                    TerminationReason::BlockedByScan,
                    "static analysis verdict prohibits execution",
                ),
                Some(scan),
            ));
        }

        let limits = limit_overrides.unwrap_or_else(|| ResourceLimits {
            container_mode: self.container_mode_default,
            ..ResourceLimits::default()
        });
        let thresholds = AlertThresholds {
            memory_bytes: Some(limits.max_memory_bytes),
            open_files: Some(limits.max_open_files),
            threads: Some(limits.max_threads),
            ..AlertThresholds::default()
        };

        let request = ExecutionRequest::new(code, &principal)
            .with_interpreter(interpreter)
            .with_limits(limits);
        let request = ExecutionRequest { id, ..request };

        let mut handle = self.executor.start(request);
        let session = SessionId::new();
        let attached = match handle.pid().await {
            Some(pid) => {
                self.monitor.attach(pid, session, thresholds, None);
                true
            }
            None => false,
        };

        let execution = handle.wait().await;
        // The child is fully terminated here, so detach finalizes promptly
        let summary = if attached {
            self.monitor.detach(session).await.ok()
        } else {
            None
        };

        Ok(PipelineOutcome {
            execution,
            scan: Some(scan),
            summary,
        })
    }

    // Administrative surface, delegated to the permission service.

    pub async fn authenticate(
        &self,
        principal: &str,
        credential: &str,
    ) -> Result<SessionToken, PipelineError> {
        Ok(self.permissions.authenticate(principal, credential).await?)
    }

    pub async fn create_principal(
        &self,
        id: &str,
        credential: &str,
        roles: &[&str],
    ) -> Result<(), PipelineError> {
        Ok(self.permissions.create_principal(id, credential, roles).await?)
    }

    pub async fn assign_role(&self, principal: &str, role: &str) -> Result<(), PipelineError> {
        Ok(self.permissions.assign_role(principal, role).await?)
    }

    pub async fn grant_permission(
        &self,
        granting_principal: &str,
        target_principal: &str,
        permission: PermissionType,
        resource: ResourceType,
        scope: Option<String>,
        expires_in: Option<chrono::Duration>,
    ) -> Result<GrantId, PipelineError> {
        Ok(self
            .permissions
            .grant(
                granting_principal,
                target_principal,
                permission,
                resource,
                scope,
                expires_in,
            )
            .await?)
    }

    pub async fn revoke_grant(&self, grant_id: GrantId) -> Result<bool, PipelineError> {
        Ok(self.permissions.revoke(grant_id).await?)
    }

    pub async fn query_access_log(
        &self,
        filter: &AccessLogFilter,
    ) -> Result<Vec<AccessLogEntry>, PipelineError> {
        Ok(self.permissions.query_access_log(filter).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratbox_auth::MemoryStore;

    async fn service_with_trader() -> (SandboxService, SessionToken) {
        let store = Arc::new(MemoryStore::with_builtin_roles());
        let service = SandboxService::new(&StratboxConfig::default(), store);
        service
            .create_principal("alice", "hunter2", &["trader"])
            .await
            .unwrap();
        let token = service.authenticate("alice", "hunter2").await.unwrap();
        (service, token)
    }

    #[tokio::test]
    async fn test_successful_run_embeds_scan_and_summary() {
        let (service, token) = service_with_trader().await;
        let outcome = service
            .run_user_code(&token, "echo pipeline", Interpreter::Shell, None)
            .await
            .unwrap();
        assert!(outcome.execution.success);
        assert_eq!(outcome.execution.reason, TerminationReason::Completed);
        assert!(outcome.execution.stdout.contains("pipeline"));
        assert!(outcome.scan.is_some());
        assert!(!outcome.scan.unwrap().blocking);
    }

    #[tokio::test]
    async fn test_blocked_scan_never_launches() {
        let (service, token) = service_with_trader().await;
        let outcome = service
            .run_user_code(
                &token,
                "import os\nos.system(\"rm -rf /\")",
                Interpreter::Python,
                None,
            )
            .await
            .unwrap();
        assert_eq!(outcome.execution.reason, TerminationReason::BlockedByScan);
        assert!(!outcome.execution.success);
        assert!(outcome.scan.unwrap().blocking);
        assert!(outcome.summary.is_none());
        assert_eq!(service.executions_launched(), 0);
    }

    #[tokio::test]
    async fn test_observer_is_denied_without_scanning() {
        let store = Arc::new(MemoryStore::with_builtin_roles());
        let service = SandboxService::new(&StratboxConfig::default(), store);
        service
            .create_principal("watcher", "secret", &["observer"])
            .await
            .unwrap();
        let token = service.authenticate("watcher", "secret").await.unwrap();

        let outcome = service
            .run_user_code(&token, "echo nope", Interpreter::Shell, None)
            .await
            .unwrap();
        assert_eq!(outcome.execution.reason, TerminationReason::PermissionDenied);
        assert!(outcome.scan.is_none());
        assert_eq!(service.executions_launched(), 0);
    }

    #[tokio::test]
    async fn test_invalid_session_is_an_error() {
        let store = Arc::new(MemoryStore::with_builtin_roles());
        let service = SandboxService::new(&StratboxConfig::default(), store);
        let bogus = SessionToken::generate();
        let err = service
            .run_user_code(&bogus, "echo hi", Interpreter::Shell, None)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Auth(_)));
    }
}
