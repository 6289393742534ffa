//! Principals, roles, grants, and the audit log record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use stratbox_common::{GrantId, PermissionType, ResourceType};

/// Salted SHA-256 credential hash, stored as `salt$hexdigest`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialHash(String);

impl CredentialHash {
    pub fn new(credential: &str) -> Self {
        let salt: String = {
            use rand::Rng;
            let bytes: [u8; 16] = rand::thread_rng().gen();
            hex_encode(&bytes)
        };
        let digest = Self::digest(&salt, credential);
        Self(format!("{salt}${digest}"))
    }

    pub fn verify(&self, credential: &str) -> bool {
        let Some((salt, expected)) = self.0.split_once('$') else {
            return false;
        };
        // Not constant-time; credentials here gate strategy execution, not
        // funds movement. Upgrade to a MAC comparison if that changes.
        Self::digest(salt, credential) == expected
    }

    fn digest(salt: &str, credential: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(salt.as_bytes());
        hasher.update(credential.as_bytes());
        hex_encode(&hasher.finalize())
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// An authenticated identity subject to permission checks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Principal {
    /// Stable identifier (login name)
    pub id: String,

    pub credential: CredentialHash,

    /// Assigned role names
    pub roles: HashSet<String>,

    /// Disabled principals fail every check without grant inspection
    pub active: bool,

    pub created_at: DateTime<Utc>,
}

impl Principal {
    pub fn new(id: impl Into<String>, credential: &str) -> Self {
        Self {
            id: id.into(),
            credential: CredentialHash::new(credential),
            roles: HashSet::new(),
            active: true,
            created_at: Utc::now(),
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.insert(role.into());
        self
    }
}

/// One static permission assignment inside a role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RolePermission {
    pub permission: PermissionType,
    pub resource: ResourceType,
}

/// A named set of permission assignments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Role {
    pub name: String,
    pub permissions: HashSet<RolePermission>,
}

impl Role {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            permissions: HashSet::new(),
        }
    }

    pub fn allow(mut self, permission: PermissionType, resource: ResourceType) -> Self {
        self.permissions.insert(RolePermission {
            permission,
            resource,
        });
        self
    }

    /// The three built-in roles seeded into a fresh store.
    pub fn builtins() -> Vec<Role> {
        use PermissionType::*;
        use ResourceType::*;
        vec![
            Role::new("admin")
                .allow(CodeExecute, Process)
                .allow(FileRead, File)
                .allow(FileWrite, File)
                .allow(NetworkAccess, Network)
                .allow(StrategyManage, Strategy)
                .allow(AdminManage, System),
            Role::new("trader")
                .allow(CodeExecute, Process)
                .allow(StrategyManage, Strategy)
                .allow(FileRead, File),
            Role::new("observer")
                .allow(FileRead, File),
        ]
    }
}

/// A time-bounded, revocable assignment of one permission to one principal.
///
/// Append-mostly: expiry and revocation flip flags instead of deleting the
/// row, preserving audit history. A grant with a past expiry or
/// `revoked = true` is never honored regardless of role membership.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grant {
    pub id: GrantId,
    pub principal: String,
    pub permission: PermissionType,
    pub resource: ResourceType,

    /// Optional narrowing scope, e.g. a file path prefix or strategy id
    pub scope: Option<String>,

    pub granted_by: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked: bool,
}

impl Grant {
    /// Expiry is evaluated lazily at query time; there is no background sweep.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        if self.revoked {
            return false;
        }
        match self.expires_at {
            Some(expiry) => expiry > now,
            None => true,
        }
    }

    /// Whether this grant satisfies a request for `scope`.
    ///
    /// An unscoped grant matches any request. A scoped grant matches an exact
    /// request or a narrower one under a `/` boundary, and never matches an
    /// unscoped request (the request asks for more than the grant covers).
    /// The boundary matters: `/data` covers `/data/x` but not `/database/x`.
    pub fn matches_scope(&self, requested: Option<&str>) -> bool {
        match (&self.scope, requested) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(granted), Some(requested)) => {
                let granted = granted.trim_end_matches('/');
                requested == granted
                    || requested
                        .strip_prefix(granted)
                        .is_some_and(|rest| rest.starts_with('/'))
            }
        }
    }
}

/// Allow/deny outcome of one permission check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessDecision {
    Allow,
    Deny,
}

/// Append-only audit record; one per `check` call, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessLogEntry {
    pub timestamp: DateTime<Utc>,
    pub principal: String,
    pub permission: PermissionType,
    pub resource: ResourceType,
    pub scope: Option<String>,
    pub decision: AccessDecision,

    /// Source context, e.g. calling IP or session id
    pub context: Option<String>,
}

/// Filters for audit queries; all fields optional and AND-ed together.
#[derive(Debug, Clone, Default)]
pub struct AccessLogFilter {
    pub principal: Option<String>,
    pub decision: Option<AccessDecision>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl AccessLogFilter {
    pub fn matches(&self, entry: &AccessLogEntry) -> bool {
        if let Some(principal) = &self.principal {
            if &entry.principal != principal {
                return false;
            }
        }
        if let Some(decision) = self.decision {
            if entry.decision != decision {
                return false;
            }
        }
        if let Some(since) = self.since {
            if entry.timestamp < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if entry.timestamp > until {
                return false;
            }
        }
        true
    }
}
