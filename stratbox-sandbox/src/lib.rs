//! Sandbox executor: runs untrusted code units in isolated OS processes
//! under hard resource ceilings.
//!
//! The executor does not re-validate permissions or scan verdicts; callers
//! gate on those first. It does independently enforce resource limits,
//! clamped to a system ceiling it owns, no matter what the caller requested.

mod executor;
mod isolation;
mod limits;
mod policy;
mod types;

pub use executor::{ExecutionHandle, SandboxExecutor};
pub use limits::ResourceLimits;
pub use policy::PathPolicy;
pub use types::{ExecutionRequest, ExecutionResult, Interpreter};
