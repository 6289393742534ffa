//! Executor isolation and monitor behavior against real processes

use crate::common::{setup_test_logging, TestBench};
use stratbox_common::{SessionId, StratboxConfig, TerminationReason};
use stratbox_monitor::{AlertThresholds, ExecutionMonitor};
use stratbox_sandbox::{ExecutionResult, Interpreter, ResourceLimits};

#[tokio::test]
async fn test_execution_result_log_round_trip() {
    let result = ExecutionResult {
        id: stratbox_common::ExecutionId::new(),
        success: false,
        stdout: "partial".into(),
        stderr: "killed".into(),
        exit_code: None,
        duration_ms: 1234,
        cpu_time_ms: 56,
        reason: TerminationReason::Timeout,
    };
    let json = serde_json::to_string(&result).expect("serialize");
    let back: ExecutionResult = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(result, back);
}

#[tokio::test]
async fn test_environment_is_scrubbed() {
    setup_test_logging();
    let bench = TestBench::new().await;

    // Ambient secrets in the parent must not reach the child
    std::env::set_var("STRATBOX_TEST_SECRET", "hunter2");
    let outcome = bench
        .service
        .run_user_code(
            &bench.trader_token,
            "echo \"secret=[$STRATBOX_TEST_SECRET]\"",
            Interpreter::Shell,
            None,
        )
        .await
        .expect("pipeline runs");
    std::env::remove_var("STRATBOX_TEST_SECRET");

    assert!(outcome.execution.success);
    assert!(outcome.execution.stdout.contains("secret=[]"));
}

#[tokio::test]
async fn test_cancellation_reason_is_distinct_from_timeout() {
    setup_test_logging();
    // Long limit so only cancellation can stop it early
    let limits = ResourceLimits::default().with_wall_secs(30);

    let exec = stratbox_sandbox::SandboxExecutor::new(&StratboxConfig::default());
    let request = stratbox_sandbox::ExecutionRequest::new("sleep 30", "trader-1")
        .with_interpreter(Interpreter::Shell)
        .with_limits(limits);
    let handle = exec.start(request);
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    handle.cancel();
    let result = handle.wait().await;

    assert_eq!(result.reason, TerminationReason::Cancelled);
    assert_ne!(result.reason, TerminationReason::Timeout);
}

#[tokio::test]
async fn test_monitor_sequence_ends_near_process_exit() {
    setup_test_logging();
    let poll = std::time::Duration::from_millis(100);
    let config = StratboxConfig {
        monitor_poll_interval: poll,
        ..StratboxConfig::default()
    };
    let monitor = ExecutionMonitor::new(&config);

    let mut child = tokio::process::Command::new("sleep")
        .arg("0.5")
        .spawn()
        .expect("spawn sleep");
    let session = SessionId::new();
    let pid = child.id().expect("child pid");
    monitor.attach(pid, session, AlertThresholds::default(), None);

    // Awaiting the exit keeps the poll loop running alongside the child
    let _ = child.wait().await;
    let exited_at = chrono::Utc::now();
    // Leave time for the loop to observe the exit
    tokio::time::sleep(poll * 3).await;
    let summary = monitor.detach(session).await.expect("summary");

    assert!(!summary.snapshots.is_empty());
    for pair in summary.snapshots.windows(2) {
        assert!(pair[0].timestamp <= pair[1].timestamp);
    }
    let last = summary.snapshots.last().expect("last snapshot");
    // The sequence ends within one poll interval of actual termination
    let cutoff = exited_at + chrono::Duration::from_std(poll).expect("interval");
    assert!(last.timestamp <= cutoff);
}

#[tokio::test]
async fn test_excess_executions_queue_fifo() {
    setup_test_logging();
    let config = StratboxConfig {
        max_concurrent_executions: 2,
        ..StratboxConfig::default()
    };
    let exec = stratbox_sandbox::SandboxExecutor::new(&config);

    let handles: Vec<_> = (0..5)
        .map(|i| {
            let request = stratbox_sandbox::ExecutionRequest::new(
                format!("echo unit-{i}"),
                "trader-1",
            )
            .with_interpreter(Interpreter::Shell);
            exec.start(request)
        })
        .collect();

    for (i, handle) in handles.into_iter().enumerate() {
        let result = handle.wait().await;
        assert!(result.success, "unit {i} should complete");
        assert!(result.stdout.contains(&format!("unit-{i}")));
    }
    assert_eq!(exec.launch_count(), 5);
}
