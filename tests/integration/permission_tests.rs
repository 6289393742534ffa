//! Permission service behavior against the file-backed store

use crate::common::setup_test_logging;
use std::sync::Arc;
use stratbox_auth::{AccessLogFilter, AuthError, FileStore, PermissionService};
use stratbox_common::{PermissionType, ResourceType};

async fn file_service(dir: &std::path::Path) -> PermissionService {
    let store = FileStore::open(dir).await.expect("open store");
    PermissionService::new(Arc::new(store))
}

#[tokio::test]
async fn test_principals_and_grants_survive_reopen() {
    setup_test_logging();
    let dir = tempfile::tempdir().expect("tempdir");

    {
        let service = file_service(dir.path()).await;
        service
            .create_principal("carol", "pw", &["observer"])
            .await
            .expect("create");
        service
            .grant(
                "carol",
                "carol",
                PermissionType::FileWrite,
                ResourceType::File,
                Some("/data/reports".into()),
                None,
            )
            .await
            .expect("grant");
    }

    let service = file_service(dir.path()).await;
    let token = service.authenticate("carol", "pw").await.expect("login");
    assert!(service
        .check(
            &token,
            PermissionType::FileWrite,
            ResourceType::File,
            Some("/data/reports/q3.csv"),
        )
        .await
        .expect("check"));
}

#[tokio::test]
async fn test_audit_log_durable_across_reopen() {
    setup_test_logging();
    let dir = tempfile::tempdir().expect("tempdir");

    {
        let service = file_service(dir.path()).await;
        service
            .create_principal("dave", "pw", &["observer"])
            .await
            .expect("create");
        let token = service.authenticate("dave", "pw").await.expect("login");
        // Denied, but still audited
        let allowed = service
            .check(&token, PermissionType::CodeExecute, ResourceType::Process, None)
            .await
            .expect("check");
        assert!(!allowed);
    }

    // The JSONL log was flushed before check returned, so a fresh store
    // sees the entry
    let service = file_service(dir.path()).await;
    let entries = service
        .query_access_log(&AccessLogFilter {
            principal: Some("dave".into()),
            ..AccessLogFilter::default()
        })
        .await
        .expect("query");
    assert_eq!(entries.len(), 1);
}

#[tokio::test]
async fn test_expired_grant_does_not_poison_active_role() {
    setup_test_logging();
    let dir = tempfile::tempdir().expect("tempdir");
    let service = file_service(dir.path()).await;

    // Trader role carries code execution; the expired direct grant for the
    // same permission must not mask it
    service
        .create_principal("erin", "pw", &["trader"])
        .await
        .expect("create");
    service
        .grant(
            "erin",
            "erin",
            PermissionType::CodeExecute,
            ResourceType::Process,
            None,
            Some(chrono::Duration::seconds(-60)),
        )
        .await
        .expect("grant");

    let token = service.authenticate("erin", "pw").await.expect("login");
    assert!(service
        .check(&token, PermissionType::CodeExecute, ResourceType::Process, None)
        .await
        .expect("check"));
}

#[tokio::test]
async fn test_revoke_is_idempotent() {
    setup_test_logging();
    let dir = tempfile::tempdir().expect("tempdir");
    let service = file_service(dir.path()).await;

    service
        .create_principal("frank", "pw", &[])
        .await
        .expect("create");
    let grant_id = service
        .grant(
            "frank",
            "frank",
            PermissionType::NetworkAccess,
            ResourceType::Network,
            None,
            None,
        )
        .await
        .expect("grant");

    assert!(service.revoke(grant_id).await.expect("first revoke"));
    assert!(service.revoke(grant_id).await.expect("second revoke"));

    let token = service.authenticate("frank", "pw").await.expect("login");
    assert!(!service
        .check(&token, PermissionType::NetworkAccess, ResourceType::Network, None)
        .await
        .expect("check"));
}

#[tokio::test]
async fn test_authentication_error_is_generic() {
    setup_test_logging();
    let dir = tempfile::tempdir().expect("tempdir");
    let service = file_service(dir.path()).await;
    service
        .create_principal("grace", "right-pw", &[])
        .await
        .expect("create");

    let unknown = service.authenticate("nobody", "pw").await.unwrap_err();
    let wrong = service.authenticate("grace", "wrong-pw").await.unwrap_err();
    // Same error either way; no principal enumeration
    assert_matches::assert_matches!(unknown, AuthError::AuthenticationFailed);
    assert_matches::assert_matches!(wrong, AuthError::AuthenticationFailed);
}

#[tokio::test]
async fn test_disabled_principal_always_denied() {
    setup_test_logging();
    let dir = tempfile::tempdir().expect("tempdir");
    let service = file_service(dir.path()).await;

    service
        .create_principal("henry", "pw", &["trader"])
        .await
        .expect("create");
    let token = service.authenticate("henry", "pw").await.expect("login");
    service.set_active("henry", false).await.expect("disable");

    assert!(!service
        .check(&token, PermissionType::CodeExecute, ResourceType::Process, None)
        .await
        .expect("check"));
}
