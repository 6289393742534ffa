//! End-to-end pipeline behavior: gating, execution, and outcome mapping

use crate::common::{python_available, setup_test_logging, TestBench};
use stratbox_auth::{AccessDecision, AccessLogFilter};
use stratbox_common::{Severity, TerminationReason, ThreatCategory};
use stratbox_sandbox::{Interpreter, ResourceLimits};

#[tokio::test]
async fn test_destructive_command_is_blocked_before_launch() {
    setup_test_logging();
    let bench = TestBench::new().await;

    let outcome = bench
        .service
        .run_user_code(
            &bench.trader_token,
            "import os\nos.system(\"rm -rf /\")",
            Interpreter::Python,
            None,
        )
        .await
        .expect("pipeline runs");

    assert_eq!(outcome.execution.reason, TerminationReason::BlockedByScan);
    assert!(!outcome.execution.success);
    // Nothing was ever launched for blocked code
    assert_eq!(bench.service.executions_launched(), 0);
    assert!(outcome.summary.is_none());

    let scan = outcome.scan.expect("scan verdict embedded");
    assert!(scan.blocking);
    assert!(scan
        .findings
        .iter()
        .any(|f| f.category == ThreatCategory::CommandInjection && f.severity >= Severity::High));
}

#[tokio::test]
async fn test_benign_python_completes_with_output() {
    setup_test_logging();
    if !python_available() {
        return;
    }
    let bench = TestBench::new().await;

    let outcome = bench
        .service
        .run_user_code(
            &bench.trader_token,
            "print(sum(range(100)))",
            Interpreter::Python,
            None,
        )
        .await
        .expect("pipeline runs");

    assert!(outcome.execution.success);
    assert_eq!(outcome.execution.reason, TerminationReason::Completed);
    assert!(outcome.execution.stdout.contains("4950"));
    assert!(!outcome.scan.expect("scan verdict").blocking);
}

#[tokio::test]
async fn test_observer_denied_with_single_audit_entry() {
    setup_test_logging();
    let bench = TestBench::new().await;

    let before = bench
        .service
        .query_access_log(&AccessLogFilter::default())
        .await
        .expect("audit query")
        .len();

    let outcome = bench
        .service
        .run_user_code(
            &bench.observer_token,
            "print('read only')",
            Interpreter::Python,
            None,
        )
        .await
        .expect("pipeline runs");

    assert_eq!(
        outcome.execution.reason,
        TerminationReason::PermissionDenied
    );
    assert_eq!(bench.service.executions_launched(), 0);

    let entries = bench
        .service
        .query_access_log(&AccessLogFilter::default())
        .await
        .expect("audit query");
    assert_eq!(entries.len(), before + 1);
    let entry = entries.last().expect("new entry");
    assert_eq!(entry.principal, "observer-1");
    assert_eq!(entry.decision, AccessDecision::Deny);
}

#[tokio::test]
async fn test_wall_clock_timeout_maps_to_timeout_reason() {
    setup_test_logging();
    let bench = TestBench::new().await;

    let limits = ResourceLimits::default().with_wall_secs(1);
    let started = std::time::Instant::now();
    let outcome = bench
        .service
        .run_user_code(
            &bench.trader_token,
            "sleep 30",
            Interpreter::Shell,
            Some(limits),
        )
        .await
        .expect("pipeline runs");

    assert_eq!(outcome.execution.reason, TerminationReason::Timeout);
    assert!(!outcome.execution.success);
    // Limit plus bounded overhead
    assert!(started.elapsed() < std::time::Duration::from_secs(6));
}

#[tokio::test]
async fn test_memory_hog_hits_resource_limit() {
    setup_test_logging();
    if !python_available() {
        return;
    }
    let bench = TestBench::new().await;

    let limits = ResourceLimits::default().with_memory_bytes(64 * 1024 * 1024);
    let outcome = bench
        .service
        .run_user_code(
            &bench.trader_token,
            "data = bytearray(256 * 1024 * 1024)\nprint(len(data))",
            Interpreter::Python,
            Some(limits),
        )
        .await
        .expect("pipeline runs");

    assert_eq!(
        outcome.execution.reason,
        TerminationReason::ResourceLimitExceeded
    );
    assert!(!outcome.execution.success);
}

#[tokio::test]
async fn test_summary_present_for_executed_code() {
    setup_test_logging();
    let bench = TestBench::new().await;

    let outcome = bench
        .service
        .run_user_code(
            &bench.trader_token,
            "sleep 1; echo done",
            Interpreter::Shell,
            None,
        )
        .await
        .expect("pipeline runs");

    assert!(outcome.execution.success);
    let summary = outcome.summary.expect("monitor summary for executed code");
    assert!(!summary.snapshots.is_empty());
    for pair in summary.snapshots.windows(2) {
        assert!(pair[0].timestamp <= pair[1].timestamp);
    }
}
