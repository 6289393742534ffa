//! Scan verdict types

use serde::{Deserialize, Serialize};
use stratbox_common::{Severity, ThreatCategory};

/// One detected suspicious pattern
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreatFinding {
    /// Identifier of the rule or check that produced this finding
    pub pattern_id: String,

    /// Threat classification
    pub category: ThreatCategory,

    /// Finding severity
    pub severity: Severity,

    /// 1-based line of the match (0 when the location is unknown)
    pub line: u32,

    /// Byte offset of the match within its line
    pub offset: u32,

    /// Human-readable description
    pub description: String,
}

/// Aggregated scan verdict
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanResult {
    /// All deduplicated findings, ordered by line
    pub findings: Vec<ThreatFinding>,

    /// Maximum severity across findings (Safe when empty)
    pub severity: Severity,

    /// Whether this verdict prohibits execution
    pub blocking: bool,
}

impl ScanResult {
    /// Build a verdict from raw findings.
    ///
    /// Findings at the same (line, category) are deduplicated keeping the
    /// highest severity; `blocking` is set iff the maximum severity reaches
    /// `block_threshold`.
    pub fn from_findings(mut findings: Vec<ThreatFinding>, block_threshold: Severity) -> Self {
        findings.sort_by(|a, b| {
            (a.line, a.category_key(), std::cmp::Reverse(a.severity)).cmp(&(
                b.line,
                b.category_key(),
                std::cmp::Reverse(b.severity),
            ))
        });
        findings.dedup_by(|next, kept| {
            kept.line == next.line && kept.category == next.category
        });

        let severity = findings
            .iter()
            .map(|f| f.severity)
            .max()
            .unwrap_or(Severity::Safe);

        Self {
            findings,
            severity,
            blocking: severity >= block_threshold,
        }
    }

    /// A clean verdict with no findings
    pub fn safe() -> Self {
        Self {
            findings: Vec::new(),
            severity: Severity::Safe,
            blocking: false,
        }
    }
}

impl ThreatFinding {
    fn category_key(&self) -> u8 {
        self.category as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finding(line: u32, category: ThreatCategory, severity: Severity) -> ThreatFinding {
        ThreatFinding {
            pattern_id: "test".into(),
            category,
            severity,
            line,
            offset: 0,
            description: "test".into(),
        }
    }

    #[test]
    fn test_empty_findings_are_safe() {
        let result = ScanResult::from_findings(Vec::new(), Severity::High);
        assert_eq!(result.severity, Severity::Safe);
        assert!(!result.blocking);
        assert!(result.findings.is_empty());
    }

    #[test]
    fn test_dedup_keeps_highest_severity() {
        let result = ScanResult::from_findings(
            vec![
                finding(3, ThreatCategory::CommandInjection, Severity::Medium),
                finding(3, ThreatCategory::CommandInjection, Severity::High),
            ],
            Severity::High,
        );
        assert_eq!(result.findings.len(), 1);
        assert_eq!(result.findings[0].severity, Severity::High);
        assert!(result.blocking);
    }

    #[test]
    fn test_distinct_categories_not_deduped() {
        let result = ScanResult::from_findings(
            vec![
                finding(3, ThreatCategory::CommandInjection, Severity::Low),
                finding(3, ThreatCategory::NetworkAccess, Severity::Low),
            ],
            Severity::High,
        );
        assert_eq!(result.findings.len(), 2);
        assert!(!result.blocking);
    }

    #[test]
    fn test_threshold_configurable() {
        let findings = vec![finding(1, ThreatCategory::FileOperation, Severity::Medium)];
        let default = ScanResult::from_findings(findings.clone(), Severity::High);
        assert!(!default.blocking);
        let strict = ScanResult::from_findings(findings, Severity::Medium);
        assert!(strict.blocking);
    }
}
