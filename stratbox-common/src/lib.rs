//! Shared types for the stratbox workspace.
//!
//! Severity scale, threat categories, permission/resource enums, execution
//! identifiers, and the configuration file model used by every other crate.

pub mod config;
pub mod types;

pub use config::{ResourceCeiling, StratboxConfig};
pub use types::{
    ExecutionId, GrantId, PermissionType, ResourceType, SessionId, Severity, TerminationReason,
    ThreatCategory,
};
