//! Shared helpers for integration tests

use std::sync::Arc;
use stratbox_auth::{MemoryStore, SessionToken};
use stratbox_common::StratboxConfig;
use stratbox_core::SandboxService;

pub fn setup_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::DEBUG.into()),
        )
        .with_test_writer()
        .try_init();
}

/// True when a python3 interpreter is on PATH; tests that execute Python
/// skip themselves otherwise.
pub fn python_available() -> bool {
    std::process::Command::new("python3")
        .arg("--version")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

/// In-memory service with one principal per builtin role, authenticated.
pub struct TestBench {
    pub service: SandboxService,
    pub trader_token: SessionToken,
    pub observer_token: SessionToken,
}

impl TestBench {
    pub async fn new() -> Self {
        Self::with_config(StratboxConfig::default()).await
    }

    pub async fn with_config(config: StratboxConfig) -> Self {
        let store = Arc::new(MemoryStore::with_builtin_roles());
        let service = SandboxService::new(&config, store);
        service
            .create_principal("trader-1", "trader-secret", &["trader"])
            .await
            .expect("create trader");
        service
            .create_principal("observer-1", "observer-secret", &["observer"])
            .await
            .expect("create observer");
        let trader_token = service
            .authenticate("trader-1", "trader-secret")
            .await
            .expect("trader login");
        let observer_token = service
            .authenticate("observer-1", "observer-secret")
            .await
            .expect("observer login");
        Self {
            service,
            trader_token,
            observer_token,
        }
    }
}
