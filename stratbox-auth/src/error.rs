//! Error types for the permission service

/// Permission service errors.
///
/// `AuthenticationFailed` is deliberately generic: it never reveals whether
/// the principal name or the credential was wrong.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Unknown principal, wrong credential, or disabled account
    #[error("authentication failed")]
    AuthenticationFailed,

    /// Session token unknown or expired
    #[error("invalid or expired session")]
    InvalidSession,

    /// Administrative lookup against a principal that does not exist
    #[error("principal '{0}' not found")]
    PrincipalNotFound(String),

    /// Administrative lookup against a role that does not exist
    #[error("role '{0}' not found")]
    RoleNotFound(String),

    /// A principal with this name already exists
    #[error("principal '{0}' already exists")]
    PrincipalExists(String),

    /// Persistent store failure
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<std::io::Error> for AuthError {
    fn from(err: std::io::Error) -> Self {
        AuthError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(err: serde_json::Error) -> Self {
        AuthError::Storage(format!("serialization: {err}"))
    }
}
