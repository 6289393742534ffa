//! Ordered regex rule list applied to the raw code text.
//!
//! Each rule carries its own severity; a match yields one finding at the
//! matched line. Rules are compiled once at scanner construction.

use crate::types::ThreatFinding;
use regex::Regex;
use stratbox_common::{Severity, ThreatCategory};

/// One text-matching rule
pub struct PatternRule {
    pub id: &'static str,
    pub category: ThreatCategory,
    pub severity: Severity,
    pub description: &'static str,
    regex: Regex,
}

impl PatternRule {
    fn new(
        id: &'static str,
        category: ThreatCategory,
        severity: Severity,
        pattern: &str,
        description: &'static str,
    ) -> Self {
        Self {
            id,
            category,
            severity,
            description,
            // Patterns are static and reviewed; a bad one is a programming error
            regex: Regex::new(pattern).unwrap_or_else(|e| panic!("bad rule {id}: {e}")),
        }
    }

    /// Apply this rule line by line, appending one finding per matching line.
    pub fn apply(&self, code: &str, out: &mut Vec<ThreatFinding>) {
        for (idx, line) in code.lines().enumerate() {
            if let Some(m) = self.regex.find(line) {
                out.push(ThreatFinding {
                    pattern_id: self.id.to_string(),
                    category: self.category,
                    severity: self.severity,
                    line: (idx + 1) as u32,
                    offset: m.start() as u32,
                    description: self.description.to_string(),
                });
            }
        }
    }
}

/// Build the default rule list.
pub fn default_rules() -> Vec<PatternRule> {
    use Severity::*;
    use ThreatCategory::*;

    #[rustfmt::skip]
    let table: &[(&'static str, ThreatCategory, Severity, &str, &'static str)] = &[
        ("os-system", CommandInjection, High, r"\bos\.system\s*\(", "shell command execution via os.system"),
        ("os-popen", CommandInjection, High, r"\bos\.popen\s*\(", "shell command execution via os.popen"),
        ("subprocess-call", CommandInjection, High, r"\bsubprocess\.(Popen|call|run|check_output|check_call)\s*\(", "process spawn via subprocess"),
        ("shell-true", CommandInjection, High, r"shell\s*=\s*True", "subprocess invoked with shell interpretation"),
        ("destructive-rm", CommandInjection, Critical, r"rm\s+-[a-z]*[rf]", "destructive recursive file removal in command string"),
        ("disk-overwrite", CommandInjection, Critical, r"\bmkfs\b|\bdd\s+if=", "disk formatting or raw device write in command string"),
        ("eval-call", DynamicCodeExecution, High, r"\beval\s*\(", "string evaluated as code via eval"),
        ("exec-call", DynamicCodeExecution, High, r"\bexec\s*\(", "string executed as code via exec"),
        ("compile-call", DynamicCodeExecution, Medium, r"\bcompile\s*\(", "runtime code compilation"),
        ("dunder-import", DynamicCodeExecution, Medium, r"__import__\s*\(", "dynamic module import"),
        ("pickle-load", CodeInjection, High, r"\bpickle\.loads?\s*\(|\bmarshal\.loads?\s*\(", "deserialization of attacker-controllable data"),
        ("file-write-mode", FileOperation, Medium, r#"\bopen\s*\([^)]*['"][wax]"#, "file opened for writing"),
        ("file-removal", FileOperation, High, r"\b(shutil\.rmtree|os\.remove|os\.unlink|os\.rmdir)\s*\(", "file or directory removal"),
        ("raw-socket", NetworkAccess, Medium, r"\bsocket\.socket\s*\(", "raw socket creation"),
        ("http-client", NetworkAccess, Low, r"\brequests\.(get|post|put|delete|request)\s*\(|\burllib\.request\b", "outbound HTTP request"),
        ("remote-shell-tool", NetworkAccess, High, r"\b(telnetlib|paramiko)\b", "remote shell/session library"),
        ("port-scan", NetworkScan, High, r"\bnmap\b|\bmasscan\b|connect_ex\s*\(", "port scanning construct"),
        ("ctypes-ffi", SystemCall, High, r"\bctypes\b|\bcffi\b", "direct foreign-function / syscall access"),
        ("setuid", PrivilegeEscalation, Critical, r"\bos\.(setuid|setgid|seteuid|setegid)\s*\(", "process credential change"),
        ("sudo-chmod", PrivilegeEscalation, High, r"\bsudo\b|chmod\s+[0-7]*77[0-7]?", "privilege escalation via sudo or world-writable chmod"),
        ("credential-files", UnauthorizedAccess, High, r"/etc/(passwd|shadow|sudoers)|\.ssh/id_[a-z]+", "access to system credential files"),
        ("reflection", UnauthorizedAccess, Medium, r"\b(getattr|setattr|delattr|globals|locals|vars)\s*\(", "reflection primitive bypassing static review"),
        ("base64-decode", CryptographicOperation, Low, r"\bbase64\.b64decode\s*\(", "encoded payload decode"),
        ("crypto-library", CryptographicOperation, Low, r"\bCrypto\.|\bcryptography\.|\bhashlib\.", "cryptographic library use"),
        ("exfil-transfer", DataExfiltration, Medium, r"\bftplib\b|\bsmtplib\b|\bcurl\s+|\bwget\s+", "bulk data transfer channel"),
    ];

    table
        .iter()
        .map(|&(id, category, severity, pattern, description)| {
            PatternRule::new(id, category, severity, pattern, description)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_count_covers_categories() {
        let rules = default_rules();
        assert!(rules.len() >= 20);
        let categories: std::collections::HashSet<_> =
            rules.iter().map(|r| format!("{:?}", r.category)).collect();
        assert!(categories.len() >= 10);
    }

    #[test]
    fn test_os_system_matches() {
        let rules = default_rules();
        let mut findings = Vec::new();
        for rule in &rules {
            rule.apply("import os\nos.system(\"rm -rf /\")\n", &mut findings);
        }
        assert!(findings
            .iter()
            .any(|f| f.pattern_id == "os-system" && f.line == 2 && f.severity >= Severity::High));
        assert!(findings
            .iter()
            .any(|f| f.pattern_id == "destructive-rm" && f.severity == Severity::Critical));
    }

    #[test]
    fn test_benign_code_matches_nothing() {
        let rules = default_rules();
        let mut findings = Vec::new();
        for rule in &rules {
            rule.apply("total = sum(range(100))\nprint(total)\n", &mut findings);
        }
        assert!(findings.is_empty());
    }
}
