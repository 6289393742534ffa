//! Obfuscation heuristics
//!
//! Three signals: Shannon entropy of string literals, the ratio of
//! string-concatenation operations to total tokens, and dynamic-execution
//! constructs combined with high-entropy strings.

use crate::ast::AstNode;
use crate::types::ThreatFinding;
use stratbox_common::{Severity, ThreatCategory};

/// Entropy above which a string literal alone is reported
const ENTROPY_THRESHOLD: f64 = 4.5;

/// Minimum literal length before entropy is meaningful
const ENTROPY_MIN_LEN: usize = 20;

/// Entropy that, combined with eval/exec, is reported at high severity
const COMBINED_ENTROPY_THRESHOLD: f64 = 4.0;

/// Concat-to-token ratio above which string assembly is reported
const CONCAT_RATIO_THRESHOLD: f64 = 0.05;

const CONCAT_MIN_COUNT: usize = 5;

/// Shannon entropy in bits per character.
pub fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }
    let mut counts = std::collections::HashMap::new();
    for c in s.chars() {
        *counts.entry(c).or_insert(0usize) += 1;
    }
    let len = s.chars().count() as f64;
    counts
        .values()
        .map(|&count| {
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

pub fn analyze(statements: &[AstNode], code: &str) -> Vec<ThreatFinding> {
    let mut strings: Vec<(String, u32)> = Vec::new();
    let mut concat_count = 0usize;
    let mut has_dynamic_exec = false;

    for statement in statements {
        statement.walk(&mut |node| match node {
            AstNode::StringLit { value, line } => strings.push((value.clone(), *line)),
            AstNode::BinOp {
                op: '+',
                left,
                right,
                ..
            } => {
                if involves_string(left) || involves_string(right) {
                    concat_count += 1;
                }
            }
            AstNode::Call { path, .. } => {
                if matches!(path.last().map(String::as_str), Some("eval" | "exec")) {
                    has_dynamic_exec = true;
                }
            }
            _ => {}
        });
    }

    let mut findings = Vec::new();
    let mut max_entropy = 0.0f64;

    for (value, line) in &strings {
        let entropy = shannon_entropy(value);
        max_entropy = max_entropy.max(entropy);
        if value.chars().count() >= ENTROPY_MIN_LEN && entropy > ENTROPY_THRESHOLD {
            findings.push(ThreatFinding {
                pattern_id: "entropy-string".to_string(),
                category: ThreatCategory::CodeInjection,
                severity: Severity::Medium,
                line: *line,
                offset: 0,
                description: format!(
                    "high-entropy string literal ({entropy:.2} bits/char) suggests an encoded payload"
                ),
            });
        }
    }

    let total_tokens = code.split_whitespace().count().max(1);
    let ratio = concat_count as f64 / total_tokens as f64;
    if concat_count >= CONCAT_MIN_COUNT && ratio > CONCAT_RATIO_THRESHOLD {
        findings.push(ThreatFinding {
            pattern_id: "string-assembly".to_string(),
            category: ThreatCategory::CodeInjection,
            severity: Severity::Medium,
            line: 0,
            offset: 0,
            description: format!(
                "heavy string concatenation ({concat_count} ops over {total_tokens} tokens) suggests payload assembly"
            ),
        });
    }

    if has_dynamic_exec && max_entropy > COMBINED_ENTROPY_THRESHOLD {
        findings.push(ThreatFinding {
            pattern_id: "dynamic-exec-obfuscated".to_string(),
            category: ThreatCategory::DynamicCodeExecution,
            severity: Severity::High,
            line: 0,
            offset: 0,
            description:
                "dynamic code execution combined with high-entropy string data".to_string(),
        });
    }

    findings
}

fn involves_string(node: &AstNode) -> bool {
    match node {
        AstNode::StringLit { .. } => true,
        AstNode::BinOp { left, right, .. } => involves_string(left) || involves_string(right),
        _ => false,
    }
}
