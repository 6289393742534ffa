//! Scanner entry point combining the structural, pattern, and heuristic passes

use crate::ast::{self, AstNode};
use crate::heuristics;
use crate::rules::{default_rules, PatternRule};
use crate::types::{ScanResult, ThreatFinding};
use stratbox_common::{Severity, ThreatCategory};

/// Static threat scanner. Construct once, scan many times.
pub struct Scanner {
    rules: Vec<PatternRule>,
    block_threshold: Severity,
}

impl Scanner {
    /// Scanner with the default rule list and the default block threshold (High).
    pub fn new() -> Self {
        Self::with_threshold(Severity::High)
    }

    /// Scanner blocking at a caller-chosen threshold.
    pub fn with_threshold(block_threshold: Severity) -> Self {
        Self {
            rules: default_rules(),
            block_threshold,
        }
    }

    /// Scan a code unit. Pure and deterministic; never fails.
    ///
    /// An internal fault in any pass degrades to a single high-severity
    /// finding instead of letting the code through unscreened.
    pub fn scan(&self, code: &str) -> ScanResult {
        if code.trim().is_empty() {
            return ScanResult::safe();
        }

        let collected = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.collect_findings(code)
        }));

        let findings = match collected {
            Ok(findings) => findings,
            Err(_) => {
                tracing::error!("scanner pass panicked, failing closed");
                vec![ThreatFinding {
                    pattern_id: "scanner-failure".to_string(),
                    category: ThreatCategory::CodeInjection,
                    severity: Severity::High,
                    line: 0,
                    offset: 0,
                    description: "scanner failure: treat as unsafe".to_string(),
                }]
            }
        };

        let result = ScanResult::from_findings(findings, self.block_threshold);
        tracing::debug!(
            findings = result.findings.len(),
            severity = %result.severity,
            blocking = result.blocking,
            "scan complete"
        );
        result
    }

    fn collect_findings(&self, code: &str) -> Vec<ThreatFinding> {
        let mut findings = Vec::new();

        // Pass 1: structural analysis over the syntax tree
        match ast::parse(code) {
            Ok(statements) => {
                for statement in &statements {
                    statement.walk(&mut |node| structural_check(node, &mut findings));
                }
                // Pass 3 needs the tree, so it runs here
                findings.extend(heuristics::analyze(&statements, code));
            }
            Err(err) => {
                findings.push(ThreatFinding {
                    pattern_id: "unparsable".to_string(),
                    category: ThreatCategory::CodeInjection,
                    severity: Severity::Medium,
                    line: 0,
                    offset: 0,
                    description: format!("unparsable input: {err}"),
                });
            }
        }

        // Pass 2: ordered pattern rules over the raw text
        for rule in &self.rules {
            rule.apply(code, &mut findings);
        }

        findings
    }
}

impl Default for Scanner {
    fn default() -> Self {
        Self::new()
    }
}

/// Call paths that spawn processes or invoke a shell
const SPAWN_CALLS: &[&[&str]] = &[
    &["os", "system"],
    &["os", "popen"],
    &["os", "execv"],
    &["os", "execve"],
    &["os", "spawnv"],
    &["subprocess", "run"],
    &["subprocess", "call"],
    &["subprocess", "check_output"],
    &["subprocess", "check_call"],
    &["subprocess", "Popen"],
];

/// Bare names that execute a string as code
const EVAL_CALLS: &[&str] = &["eval", "exec"];

/// Reflection primitives that can bypass static review
const REFLECTION_CALLS: &[&str] = &["getattr", "setattr", "delattr", "globals", "locals", "vars"];

/// Modules granting raw OS/network access, with per-module severity
fn import_risk(module: &str) -> Option<(ThreatCategory, Severity, &'static str)> {
    let root = module.split('.').next().unwrap_or(module);
    match root {
        "subprocess" => Some((
            ThreatCategory::CommandInjection,
            Severity::High,
            "imports a process-spawning module",
        )),
        "ctypes" | "cffi" => Some((
            ThreatCategory::SystemCall,
            Severity::High,
            "imports a raw foreign-function interface",
        )),
        "os" | "sys" => Some((
            ThreatCategory::SystemCall,
            Severity::Medium,
            "imports a raw OS access module",
        )),
        "socket" => Some((
            ThreatCategory::NetworkAccess,
            Severity::Medium,
            "imports a raw socket module",
        )),
        "telnetlib" | "paramiko" => Some((
            ThreatCategory::NetworkAccess,
            Severity::High,
            "imports a remote-session module",
        )),
        "requests" | "urllib" | "http" => Some((
            ThreatCategory::NetworkAccess,
            Severity::Low,
            "imports an HTTP client module",
        )),
        "pickle" | "marshal" => Some((
            ThreatCategory::CodeInjection,
            Severity::Medium,
            "imports an unsafe deserialization module",
        )),
        "importlib" => Some((
            ThreatCategory::DynamicCodeExecution,
            Severity::Medium,
            "imports the dynamic import machinery",
        )),
        _ => None,
    }
}

fn structural_check(node: &AstNode, findings: &mut Vec<ThreatFinding>) {
    match node {
        AstNode::Import { module, line, col } => {
            if let Some((category, severity, description)) = import_risk(module) {
                findings.push(ThreatFinding {
                    pattern_id: format!("import-{}", module.split('.').next().unwrap_or(module)),
                    category,
                    severity,
                    line: *line,
                    offset: col.saturating_sub(1),
                    description: format!("{description} ({module})"),
                });
            }
        }
        AstNode::Call { path, line, col, .. } => {
            if SPAWN_CALLS.iter().any(|candidate| path == candidate) {
                findings.push(ThreatFinding {
                    pattern_id: format!("call-{}", path.join(".")),
                    category: ThreatCategory::CommandInjection,
                    severity: Severity::High,
                    line: *line,
                    offset: col.saturating_sub(1),
                    description: format!("call to process-spawning primitive {}", path.join(".")),
                });
            } else if path.len() == 1 && EVAL_CALLS.contains(&path[0].as_str()) {
                findings.push(ThreatFinding {
                    pattern_id: format!("call-{}", path[0]),
                    category: ThreatCategory::DynamicCodeExecution,
                    severity: Severity::High,
                    line: *line,
                    offset: col.saturating_sub(1),
                    description: format!("call to {} executes a string as code", path[0]),
                });
            } else if path.len() == 1 && path[0] == "__import__" {
                findings.push(ThreatFinding {
                    pattern_id: "call-dunder-import".to_string(),
                    category: ThreatCategory::DynamicCodeExecution,
                    severity: Severity::Medium,
                    line: *line,
                    offset: col.saturating_sub(1),
                    description: "dynamic import call".to_string(),
                });
            } else if path.len() == 1 && REFLECTION_CALLS.contains(&path[0].as_str()) {
                findings.push(ThreatFinding {
                    pattern_id: format!("reflect-{}", path[0]),
                    category: ThreatCategory::UnauthorizedAccess,
                    severity: Severity::Medium,
                    line: *line,
                    offset: col.saturating_sub(1),
                    description: format!("reflection primitive {} bypasses static review", path[0]),
                });
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_code_is_safe() {
        let scanner = Scanner::new();
        let result = scanner.scan("");
        assert_eq!(result.severity, Severity::Safe);
        assert!(!result.blocking);
        assert!(result.findings.is_empty());

        let result = scanner.scan("   \n\t\n");
        assert!(result.findings.is_empty());
    }

    #[test]
    fn test_os_system_blocks() {
        let scanner = Scanner::new();
        let result = scanner.scan("import os\nos.system(\"rm -rf /\")\n");
        assert!(result.blocking);
        assert!(result.severity >= Severity::High);
        assert!(result.findings.iter().any(|f| {
            f.category == ThreatCategory::CommandInjection && f.severity >= Severity::High
        }));
    }

    #[test]
    fn test_benign_strategy_passes() {
        let scanner = Scanner::new();
        let code = "\
prices = [100, 102, 101, 105]
window = 3
sma = sum(prices[-window:]) / window
signal = \"buy\" if prices[-1] > sma else \"hold\"
print(signal)
";
        let result = scanner.scan(code);
        assert!(!result.blocking, "unexpected findings: {:?}", result.findings);
    }

    #[test]
    fn test_structural_findings_carry_line_offset() {
        let scanner = Scanner::new();
        // `os` the module starts at column 8; `os.system` at column 5
        let result = scanner.scan("import os\nx = os.system(\"ls\")\n");
        assert!(result
            .findings
            .iter()
            .any(|f| f.pattern_id == "import-os" && f.line == 1 && f.offset == 7));
        assert!(result
            .findings
            .iter()
            .any(|f| f.pattern_id == "call-os.system" && f.line == 2 && f.offset == 4));
    }

    #[test]
    fn test_unparsable_input_is_medium_not_error() {
        let scanner = Scanner::new();
        let result = scanner.scan("x = \"never closed");
        assert!(!result.blocking);
        assert!(result
            .findings
            .iter()
            .any(|f| f.pattern_id == "unparsable" && f.severity == Severity::Medium));
    }

    #[test]
    fn test_eval_is_flagged_structurally_and_by_pattern() {
        let scanner = Scanner::new();
        let result = scanner.scan("eval(user_input)");
        assert!(result.blocking);
        // Structural + pattern findings at the same line/category collapse to one
        let eval_findings: Vec<_> = result
            .findings
            .iter()
            .filter(|f| f.category == ThreatCategory::DynamicCodeExecution && f.line == 1)
            .collect();
        assert_eq!(eval_findings.len(), 1);
    }

    #[test]
    fn test_dangerous_import_flagged() {
        let scanner = Scanner::new();
        let result = scanner.scan("import subprocess\n");
        assert!(result
            .findings
            .iter()
            .any(|f| f.pattern_id == "import-subprocess" && f.severity == Severity::High));
    }

    #[test]
    fn test_deterministic() {
        let scanner = Scanner::new();
        let code = "import socket\neval(x)\ny = \"a\" + \"b\"\n";
        assert_eq!(scanner.scan(code), scanner.scan(code));
    }

    #[test]
    fn test_stricter_threshold() {
        let code = "data = pickle.loads(blob)";
        let default = Scanner::new().scan(code);
        assert!(default.blocking); // pickle.loads rule is high
        let lenient = Scanner::with_threshold(Severity::Critical).scan(code);
        assert!(!lenient.blocking);
    }

    #[test]
    fn test_scan_result_roundtrip() {
        let result = Scanner::new().scan("import os\nos.system(\"ls\")\n");
        let json = serde_json::to_string(&result).unwrap();
        let back: ScanResult = serde_json::from_str(&json).unwrap();
        assert_eq!(result, back);
    }
}
