//! Pipeline layer tying the permission service, threat scanner, sandbox
//! executor, and execution monitor into one invocation surface.

mod outcome;
mod service;

pub use outcome::{PipelineError, PipelineOutcome};
pub use service::SandboxService;
