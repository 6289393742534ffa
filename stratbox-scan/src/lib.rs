//! Static threat screening for user-supplied strategy code.
//!
//! Three independent passes, combined by taking the maximum severity across
//! all findings: a structural pass over a parsed syntax tree, an ordered
//! regex rule list against the raw text, and obfuscation heuristics. The
//! scanner is a pure function of its input: no side effects, no I/O,
//! deterministic output.

mod ast;
mod heuristics;
mod rules;
mod scanner;
mod types;

pub use ast::{AstNode, ParseError};
pub use rules::PatternRule;
pub use scanner::Scanner;
pub use types::{ScanResult, ThreatFinding};
