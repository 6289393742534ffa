//! Execution request and result types

use crate::limits::ResourceLimits;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stratbox_common::{ExecutionId, TerminationReason};

/// How a code unit is run inside the sandbox
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Interpreter {
    /// `python3 -I <script>`: isolated mode ignores the ambient environment
    #[default]
    Python,
    /// `/bin/sh <script>`
    Shell,
}

impl Interpreter {
    pub fn program(self) -> &'static str {
        match self {
            Interpreter::Python => "python3",
            Interpreter::Shell => "/bin/sh",
        }
    }

    pub fn script_name(self) -> &'static str {
        match self {
            Interpreter::Python => "unit.py",
            Interpreter::Shell => "unit.sh",
        }
    }

    pub fn args(self) -> &'static [&'static str] {
        match self {
            Interpreter::Python => &["-I"],
            Interpreter::Shell => &[],
        }
    }
}

/// One request to execute a code unit. Consumed exactly once by the executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub id: ExecutionId,

    /// Opaque text payload
    pub code: String,

    pub limits: ResourceLimits,

    pub principal: String,

    pub created_at: DateTime<Utc>,

    #[serde(default)]
    pub interpreter: Interpreter,
}

impl ExecutionRequest {
    pub fn new(code: impl Into<String>, principal: impl Into<String>) -> Self {
        Self {
            id: ExecutionId::new(),
            code: code.into(),
            limits: ResourceLimits::default(),
            principal: principal.into(),
            created_at: Utc::now(),
            interpreter: Interpreter::default(),
        }
    }

    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_interpreter(mut self, interpreter: Interpreter) -> Self {
        self.interpreter = interpreter;
        self
    }
}

/// Outcome of one execution. Immutable once produced; exactly one
/// termination reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub id: ExecutionId,

    pub success: bool,

    /// Captured stdout, truncated at the capture cap; partial output up to a
    /// kill is retained
    pub stdout: String,

    pub stderr: String,

    /// Exit code when the child exited normally
    pub exit_code: Option<i32>,

    pub duration_ms: u64,

    /// CPU time consumed by the child tree
    pub cpu_time_ms: u64,

    pub reason: TerminationReason,
}

impl ExecutionResult {
    /// Result for a failure that happened before any code ran.
    pub fn pre_launch(id: ExecutionId, reason: TerminationReason, stderr: impl Into<String>) -> Self {
        Self {
            id,
            success: false,
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code: None,
            duration_ms: 0,
            cpu_time_ms: 0,
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_json_roundtrip() {
        let result = ExecutionResult {
            id: ExecutionId::new(),
            success: true,
            stdout: "4950\n".into(),
            stderr: String::new(),
            exit_code: Some(0),
            duration_ms: 42,
            cpu_time_ms: 17,
            reason: TerminationReason::Completed,
        };
        let json = serde_json::to_string(&result).unwrap();
        let back: ExecutionResult = serde_json::from_str(&json).unwrap();
        assert_eq!(result, back);
    }

    #[test]
    fn test_request_builder() {
        let request = ExecutionRequest::new("print(1)", "alice")
            .with_interpreter(Interpreter::Shell)
            .with_limits(ResourceLimits::strict());
        assert_eq!(request.interpreter, Interpreter::Shell);
        assert_eq!(request.limits.max_wall_secs, 5);
        assert_eq!(request.principal, "alice");
    }

    #[test]
    fn test_interpreter_programs() {
        assert_eq!(Interpreter::Python.program(), "python3");
        assert_eq!(Interpreter::Shell.program(), "/bin/sh");
    }
}
