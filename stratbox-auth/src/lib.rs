//! Permission service: authentication, role/permission storage, grant
//! lifecycle, and the append-only access audit log.
//!
//! The persistent store is an explicit, injected handle ([`PermissionStore`]),
//! not a process-wide singleton. Grant issuance/revocation is serialized per
//! principal; checks across different principals proceed concurrently.

mod error;
mod model;
mod service;
mod session;
mod store;

pub use error::AuthError;
pub use model::{
    AccessDecision, AccessLogEntry, AccessLogFilter, CredentialHash, Grant, Principal, Role,
    RolePermission,
};
pub use service::PermissionService;
pub use session::{Session, SessionToken};
pub use store::{FileStore, MemoryStore, PermissionStore};

pub type Result<T> = std::result::Result<T, AuthError>;
