//! Permission service: authentication, checks, grant lifecycle

use crate::error::AuthError;
use crate::model::{AccessDecision, AccessLogEntry, AccessLogFilter, Grant, Principal, RolePermission};
use crate::session::{Session, SessionToken};
use crate::store::PermissionStore;
use crate::Result;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use stratbox_common::{GrantId, PermissionType, ResourceType};
use tokio::sync::{Mutex, RwLock};

const DEFAULT_SESSION_TTL_HOURS: i64 = 8;

/// The permission service. One instance per process, store injected.
pub struct PermissionService {
    store: Arc<dyn PermissionStore>,
    sessions: RwLock<HashMap<String, Session>>,
    /// Per-principal write serialization for grant issuance/revocation;
    /// checks across different principals stay fully concurrent.
    principal_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    session_ttl: Duration,
}

impl PermissionService {
    pub fn new(store: Arc<dyn PermissionStore>) -> Self {
        Self {
            store,
            sessions: RwLock::new(HashMap::new()),
            principal_locks: Mutex::new(HashMap::new()),
            session_ttl: Duration::hours(DEFAULT_SESSION_TTL_HOURS),
        }
    }

    async fn principal_lock(&self, principal: &str) -> Arc<Mutex<()>> {
        let mut locks = self.principal_locks.lock().await;
        // Uncontended entries are pruned so the map tracks in-flight writers,
        // not every name ever seen
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks
            .entry(principal.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Authenticate a principal and issue a session token.
    ///
    /// The error is identical for an unknown principal, a wrong credential,
    /// and a disabled account, to prevent enumeration.
    pub async fn authenticate(&self, name: &str, credential: &str) -> Result<SessionToken> {
        let principal = self
            .store
            .get_principal(name)
            .await?
            .ok_or(AuthError::AuthenticationFailed)?;

        if !principal.active || !principal.credential.verify(credential) {
            tracing::warn!(principal = name, "authentication failed");
            return Err(AuthError::AuthenticationFailed);
        }

        let session = Session::new(&principal.id, self.session_ttl);
        let token = session.token.clone();
        let mut sessions = self.sessions.write().await;
        // Each login sweeps whatever lazy rejection never touched
        let now = Utc::now();
        sessions.retain(|_, s| s.is_valid(now));
        sessions.insert(token.0.clone(), session);
        tracing::info!(principal = name, "session issued");
        Ok(token)
    }

    async fn resolve_session(&self, token: &SessionToken) -> Result<Session> {
        let sessions = self.sessions.read().await;
        let session = sessions.get(&token.0).ok_or(AuthError::InvalidSession)?;
        if session.is_valid(Utc::now()) {
            return Ok(session.clone());
        }
        drop(sessions);
        // Expired entries are evicted on first rejection
        self.sessions.write().await.remove(&token.0);
        Err(AuthError::InvalidSession)
    }

    /// Principal name behind a valid session token.
    pub async fn session_principal(&self, token: &SessionToken) -> Result<String> {
        Ok(self.resolve_session(token).await?.principal)
    }

    /// Check whether the session's principal holds `permission` on `resource`.
    ///
    /// Every call, allow or deny, appends exactly one access-log entry before
    /// returning.
    pub async fn check(
        &self,
        token: &SessionToken,
        permission: PermissionType,
        resource: ResourceType,
        scope: Option<&str>,
    ) -> Result<bool> {
        let session = self.resolve_session(token).await?;
        let context = format!("session:{}", session.token);
        self.check_principal(&session.principal, permission, resource, scope, Some(context))
            .await
    }

    /// Check by principal name; used internally and by operator tooling.
    pub async fn check_principal(
        &self,
        principal_id: &str,
        permission: PermissionType,
        resource: ResourceType,
        scope: Option<&str>,
        context: Option<String>,
    ) -> Result<bool> {
        let principal = self.store.get_principal(principal_id).await?;

        let allowed = match &principal {
            None => false,
            // Disabled principals fail without grant inspection
            Some(p) if !p.active => false,
            Some(p) => self.principal_allowed(p, permission, resource, scope).await?,
        };

        let entry = AccessLogEntry {
            timestamp: Utc::now(),
            principal: principal_id.to_string(),
            permission,
            resource,
            scope: scope.map(str::to_string),
            decision: if allowed {
                AccessDecision::Allow
            } else {
                AccessDecision::Deny
            },
            context,
        };
        // Audit append completes before the verdict is returned
        self.store.append_access_log(entry).await?;

        tracing::debug!(
            principal = principal_id,
            permission = ?permission,
            resource = ?resource,
            allowed,
            "permission check"
        );
        Ok(allowed)
    }

    async fn principal_allowed(
        &self,
        principal: &Principal,
        permission: PermissionType,
        resource: ResourceType,
        scope: Option<&str>,
    ) -> Result<bool> {
        // Role assignments are static and unscoped
        let wanted = RolePermission {
            permission,
            resource,
        };
        for role_name in &principal.roles {
            if let Some(role) = self.store.get_role(role_name).await? {
                if role.permissions.contains(&wanted) {
                    return Ok(true);
                }
            }
        }

        // Direct grants: must be non-expired, non-revoked, scope-compatible.
        // An expired grant never poisons an unrelated active one.
        let now = Utc::now();
        let grants = self
            .store
            .grants_for(&principal.id, permission, resource)
            .await?;
        Ok(grants
            .iter()
            .any(|g| g.is_active(now) && g.matches_scope(scope)))
    }

    /// Issue a direct grant to `target`.
    pub async fn grant(
        &self,
        granting_principal: &str,
        target_principal: &str,
        permission: PermissionType,
        resource: ResourceType,
        scope: Option<String>,
        expires_in: Option<Duration>,
    ) -> Result<GrantId> {
        if self.store.get_principal(target_principal).await?.is_none() {
            return Err(AuthError::PrincipalNotFound(target_principal.to_string()));
        }

        let lock = self.principal_lock(target_principal).await;
        let _guard = lock.lock().await;

        let now = Utc::now();
        let grant = Grant {
            id: GrantId::new(),
            principal: target_principal.to_string(),
            permission,
            resource,
            scope,
            granted_by: granting_principal.to_string(),
            issued_at: now,
            expires_at: expires_in.map(|ttl| now + ttl),
            revoked: false,
        };
        let id = grant.id;
        self.store.insert_grant(grant).await?;
        tracing::info!(
            grant = %id,
            target = target_principal,
            granted_by = granting_principal,
            "grant issued"
        );
        Ok(id)
    }

    /// Revoke a grant. Idempotent: revoking twice is safe, with one net
    /// state change. Returns false only when the grant does not exist.
    pub async fn revoke(&self, grant_id: GrantId) -> Result<bool> {
        let Some(grant) = self.store.get_grant(grant_id).await? else {
            return Ok(false);
        };

        let lock = self.principal_lock(&grant.principal).await;
        let _guard = lock.lock().await;

        // Re-read under the lock; revocation is absorbing
        let Some(mut grant) = self.store.get_grant(grant_id).await? else {
            return Ok(false);
        };
        if !grant.revoked {
            grant.revoked = true;
            self.store.update_grant(grant).await?;
            tracing::info!(grant = %grant_id, "grant revoked");
        }
        Ok(true)
    }

    // --- administrative API ---

    pub async fn create_principal(
        &self,
        id: &str,
        credential: &str,
        roles: &[&str],
    ) -> Result<()> {
        let lock = self.principal_lock(id).await;
        let _guard = lock.lock().await;

        if self.store.get_principal(id).await?.is_some() {
            return Err(AuthError::PrincipalExists(id.to_string()));
        }
        for role in roles {
            if self.store.get_role(role).await?.is_none() {
                return Err(AuthError::RoleNotFound(role.to_string()));
            }
        }

        let mut principal = Principal::new(id, credential);
        principal.roles = roles.iter().map(|r| r.to_string()).collect();
        self.store.put_principal(principal).await?;
        tracing::info!(principal = id, "principal created");
        Ok(())
    }

    pub async fn assign_role(&self, principal_id: &str, role: &str) -> Result<()> {
        if self.store.get_role(role).await?.is_none() {
            return Err(AuthError::RoleNotFound(role.to_string()));
        }
        let lock = self.principal_lock(principal_id).await;
        let _guard = lock.lock().await;

        let mut principal = self
            .store
            .get_principal(principal_id)
            .await?
            .ok_or_else(|| AuthError::PrincipalNotFound(principal_id.to_string()))?;
        principal.roles.insert(role.to_string());
        self.store.put_principal(principal).await
    }

    /// Enable or disable a principal. Disabling does not touch grants; the
    /// account simply stops passing checks.
    pub async fn set_active(&self, principal_id: &str, active: bool) -> Result<()> {
        let lock = self.principal_lock(principal_id).await;
        let _guard = lock.lock().await;

        let mut principal = self
            .store
            .get_principal(principal_id)
            .await?
            .ok_or_else(|| AuthError::PrincipalNotFound(principal_id.to_string()))?;
        principal.active = active;
        self.store.put_principal(principal).await
    }

    pub async fn query_access_log(
        &self,
        filter: &AccessLogFilter,
    ) -> Result<Vec<AccessLogEntry>> {
        self.store.query_access_log(filter).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    async fn service() -> PermissionService {
        PermissionService::new(Arc::new(MemoryStore::with_builtin_roles()))
    }

    #[tokio::test]
    async fn test_authenticate_and_check_role_permission() {
        let svc = service().await;
        svc.create_principal("alice", "pw", &["trader"]).await.unwrap();

        let token = svc.authenticate("alice", "pw").await.unwrap();
        let allowed = svc
            .check(&token, PermissionType::CodeExecute, ResourceType::Process, None)
            .await
            .unwrap();
        assert!(allowed);
    }

    #[tokio::test]
    async fn test_authenticate_errors_are_generic() {
        let svc = service().await;
        svc.create_principal("alice", "pw", &[]).await.unwrap();

        let unknown = svc.authenticate("nobody", "pw").await.unwrap_err();
        let wrong = svc.authenticate("alice", "bad").await.unwrap_err();
        assert_eq!(unknown.to_string(), wrong.to_string());
    }

    #[tokio::test]
    async fn test_observer_denied_with_single_audit_entry() {
        let svc = service().await;
        svc.create_principal("olive", "pw", &["observer"]).await.unwrap();
        let token = svc.authenticate("olive", "pw").await.unwrap();

        let before = svc
            .query_access_log(&AccessLogFilter::default())
            .await
            .unwrap()
            .len();
        let allowed = svc
            .check(&token, PermissionType::CodeExecute, ResourceType::Process, None)
            .await
            .unwrap();
        assert!(!allowed);

        let entries = svc.query_access_log(&AccessLogFilter::default()).await.unwrap();
        assert_eq!(entries.len(), before + 1);
        assert_eq!(entries.last().unwrap().decision, AccessDecision::Deny);
        assert_eq!(entries.last().unwrap().principal, "olive");
    }

    #[tokio::test]
    async fn test_expired_grant_does_not_poison_active_role() {
        let svc = service().await;
        svc.create_principal("tim", "pw", &["trader"]).await.unwrap();
        // Direct grant already expired
        svc.grant(
            "admin",
            "tim",
            PermissionType::CodeExecute,
            ResourceType::Process,
            None,
            Some(Duration::seconds(-60)),
        )
        .await
        .unwrap();

        let token = svc.authenticate("tim", "pw").await.unwrap();
        // Role permission is independently active, so the check passes
        assert!(svc
            .check(&token, PermissionType::CodeExecute, ResourceType::Process, None)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_expired_grant_alone_is_denied() {
        let svc = service().await;
        svc.create_principal("eve", "pw", &[]).await.unwrap();
        svc.grant(
            "admin",
            "eve",
            PermissionType::CodeExecute,
            ResourceType::Process,
            None,
            Some(Duration::seconds(-1)),
        )
        .await
        .unwrap();

        let token = svc.authenticate("eve", "pw").await.unwrap();
        assert!(!svc
            .check(&token, PermissionType::CodeExecute, ResourceType::Process, None)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_revoke_idempotent() {
        let svc = service().await;
        svc.create_principal("eve", "pw", &[]).await.unwrap();
        let grant_id = svc
            .grant(
                "admin",
                "eve",
                PermissionType::FileRead,
                ResourceType::File,
                None,
                None,
            )
            .await
            .unwrap();

        assert!(svc.revoke(grant_id).await.unwrap());
        assert!(svc.revoke(grant_id).await.unwrap());
        assert!(!svc.revoke(GrantId::new()).await.unwrap());

        let token = svc.authenticate("eve", "pw").await.unwrap();
        assert!(!svc
            .check(&token, PermissionType::FileRead, ResourceType::File, None)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_disabled_principal_denied_without_grants() {
        let svc = service().await;
        svc.create_principal("mallory", "pw", &["admin"]).await.unwrap();
        let token = svc.authenticate("mallory", "pw").await.unwrap();
        svc.set_active("mallory", false).await.unwrap();

        assert!(!svc
            .check(&token, PermissionType::CodeExecute, ResourceType::Process, None)
            .await
            .unwrap());
        // And new sessions cannot be established at all
        assert!(svc.authenticate("mallory", "pw").await.is_err());
    }

    #[tokio::test]
    async fn test_scoped_grant_prefix_match() {
        let svc = service().await;
        svc.create_principal("sam", "pw", &[]).await.unwrap();
        svc.grant(
            "admin",
            "sam",
            PermissionType::FileRead,
            ResourceType::File,
            Some("/data/strategies".into()),
            None,
        )
        .await
        .unwrap();

        let token = svc.authenticate("sam", "pw").await.unwrap();
        assert!(svc
            .check(
                &token,
                PermissionType::FileRead,
                ResourceType::File,
                Some("/data/strategies/sma.py"),
            )
            .await
            .unwrap());
        assert!(!svc
            .check(
                &token,
                PermissionType::FileRead,
                ResourceType::File,
                Some("/etc/passwd"),
            )
            .await
            .unwrap());
        // Scoped grant never satisfies an unscoped request
        assert!(!svc
            .check(&token, PermissionType::FileRead, ResourceType::File, None)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_expired_sessions_are_evicted() {
        let mut svc = service().await;
        svc.create_principal("alice", "pw", &[]).await.unwrap();

        svc.session_ttl = Duration::milliseconds(-1);
        let stale = svc.authenticate("alice", "pw").await.unwrap();
        assert!(matches!(
            svc.session_principal(&stale).await,
            Err(AuthError::InvalidSession)
        ));
        assert!(svc.sessions.read().await.is_empty());

        // A stale entry that was never queried goes out with the next login
        let _unqueried = svc.authenticate("alice", "pw").await.unwrap();
        svc.session_ttl = Duration::hours(1);
        let _live = svc.authenticate("alice", "pw").await.unwrap();
        assert_eq!(svc.sessions.read().await.len(), 1);
    }

    #[tokio::test]
    async fn test_principal_locks_do_not_accumulate() {
        let svc = service().await;
        for name in ["ghost-1", "ghost-2", "ghost-3"] {
            assert!(svc.assign_role(name, "trader").await.is_err());
        }
        let _held = svc.principal_lock("alice").await;
        assert_eq!(svc.principal_locks.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_session_rejected() {
        let svc = service().await;
        let bogus = SessionToken("bogus".into());
        assert!(matches!(
            svc.check(&bogus, PermissionType::CodeExecute, ResourceType::Process, None)
                .await,
            Err(AuthError::InvalidSession)
        ));
    }
}
