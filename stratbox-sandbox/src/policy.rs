//! Filesystem path mediation
//!
//! Access outside the allow-list, or matching the deny-list, is rejected at
//! the isolation boundary before launch; deny wins on overlap.

use crate::limits::ResourceLimits;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default)]
pub struct PathPolicy {
    allowed: Vec<PathBuf>,
    denied: Vec<PathBuf>,
}

impl PathPolicy {
    pub fn new(allowed: Vec<PathBuf>, denied: Vec<PathBuf>) -> Self {
        Self { allowed, denied }
    }

    pub fn from_limits(limits: &ResourceLimits) -> Self {
        Self {
            allowed: limits.allowed_paths.clone(),
            denied: limits.denied_paths.clone(),
        }
    }

    /// Deny takes precedence; an empty allow-list admits any non-denied path.
    pub fn is_allowed(&self, path: &Path) -> bool {
        if self.denied.iter().any(|denied| path.starts_with(denied)) {
            return false;
        }
        if self.allowed.is_empty() {
            return true;
        }
        self.allowed.iter().any(|allowed| path.starts_with(allowed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_policy_allows_everything() {
        let policy = PathPolicy::default();
        assert!(policy.is_allowed(Path::new("/tmp/anything")));
    }

    #[test]
    fn test_deny_wins_on_overlap() {
        let policy = PathPolicy::new(
            vec![PathBuf::from("/data")],
            vec![PathBuf::from("/data/secrets")],
        );
        assert!(policy.is_allowed(Path::new("/data/strategies/sma.py")));
        assert!(!policy.is_allowed(Path::new("/data/secrets/keys.json")));
    }

    #[test]
    fn test_outside_allow_list_rejected() {
        let policy = PathPolicy::new(vec![PathBuf::from("/data")], vec![]);
        assert!(!policy.is_allowed(Path::new("/etc/passwd")));
    }

    #[test]
    fn test_deny_without_allow_list() {
        let policy = PathPolicy::new(vec![], vec![PathBuf::from("/etc")]);
        assert!(!policy.is_allowed(Path::new("/etc/shadow")));
        assert!(policy.is_allowed(Path::new("/tmp/x")));
    }
}
