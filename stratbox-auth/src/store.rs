//! Persistent store for principals, roles, grants, and the audit log.
//!
//! The store is injected into [`crate::PermissionService`] rather than being
//! a process-wide singleton. `MemoryStore` backs tests; `FileStore` adds a
//! JSON snapshot (written atomically on mutation) plus a JSON-lines audit
//! log appended before any check returns, so audit trails survive a crash.
//!
//! The in-memory grant index keyed on (principal, permission, resource)
//! stands in for the relational index used for fast `check` lookups.

use crate::model::{AccessLogEntry, AccessLogFilter, Grant, Principal, Role};
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use stratbox_common::{GrantId, PermissionType, ResourceType};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

#[async_trait]
pub trait PermissionStore: Send + Sync {
    async fn get_principal(&self, id: &str) -> Result<Option<Principal>>;
    async fn put_principal(&self, principal: Principal) -> Result<()>;

    async fn get_role(&self, name: &str) -> Result<Option<Role>>;

    async fn insert_grant(&self, grant: Grant) -> Result<()>;
    async fn get_grant(&self, id: GrantId) -> Result<Option<Grant>>;
    /// Replace a grant row (used to flip the revoked flag)
    async fn update_grant(&self, grant: Grant) -> Result<()>;
    /// Indexed lookup for `check`
    async fn grants_for(
        &self,
        principal: &str,
        permission: PermissionType,
        resource: ResourceType,
    ) -> Result<Vec<Grant>>;

    /// Must be durable (or durably queued) before returning.
    async fn append_access_log(&self, entry: AccessLogEntry) -> Result<()>;
    async fn query_access_log(&self, filter: &AccessLogFilter) -> Result<Vec<AccessLogEntry>>;
}

type GrantKey = (String, PermissionType, ResourceType);

#[derive(Default)]
struct Tables {
    principals: HashMap<String, Principal>,
    roles: HashMap<String, Role>,
    grants: HashMap<GrantId, Grant>,
    grant_index: HashMap<GrantKey, Vec<GrantId>>,
    access_log: Vec<AccessLogEntry>,
}

impl Tables {
    fn index_grant(&mut self, grant: &Grant) {
        let key = (grant.principal.clone(), grant.permission, grant.resource);
        self.grant_index.entry(key).or_default().push(grant.id);
    }
}

/// In-memory store; also the cache layer inside [`FileStore`].
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store pre-seeded with the built-in roles.
    pub fn with_builtin_roles() -> Self {
        let mut tables = Tables::default();
        for role in Role::builtins() {
            tables.roles.insert(role.name.clone(), role);
        }
        Self {
            tables: RwLock::new(tables),
        }
    }
}

#[async_trait]
impl PermissionStore for MemoryStore {
    async fn get_principal(&self, id: &str) -> Result<Option<Principal>> {
        Ok(self.tables.read().await.principals.get(id).cloned())
    }

    async fn put_principal(&self, principal: Principal) -> Result<()> {
        self.tables
            .write()
            .await
            .principals
            .insert(principal.id.clone(), principal);
        Ok(())
    }

    async fn get_role(&self, name: &str) -> Result<Option<Role>> {
        Ok(self.tables.read().await.roles.get(name).cloned())
    }

    async fn insert_grant(&self, grant: Grant) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.index_grant(&grant);
        tables.grants.insert(grant.id, grant);
        Ok(())
    }

    async fn get_grant(&self, id: GrantId) -> Result<Option<Grant>> {
        Ok(self.tables.read().await.grants.get(&id).cloned())
    }

    async fn update_grant(&self, grant: Grant) -> Result<()> {
        self.tables.write().await.grants.insert(grant.id, grant);
        Ok(())
    }

    async fn grants_for(
        &self,
        principal: &str,
        permission: PermissionType,
        resource: ResourceType,
    ) -> Result<Vec<Grant>> {
        let tables = self.tables.read().await;
        let key = (principal.to_string(), permission, resource);
        let ids = tables.grant_index.get(&key);
        Ok(ids
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| tables.grants.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn append_access_log(&self, entry: AccessLogEntry) -> Result<()> {
        self.tables.write().await.access_log.push(entry);
        Ok(())
    }

    async fn query_access_log(&self, filter: &AccessLogFilter) -> Result<Vec<AccessLogEntry>> {
        Ok(self
            .tables
            .read()
            .await
            .access_log
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect())
    }
}

/// Snapshot layout persisted by [`FileStore`]
#[derive(Serialize, Deserialize, Default)]
struct Snapshot {
    principals: Vec<Principal>,
    roles: Vec<Role>,
    grants: Vec<Grant>,
}

/// JSON-file-backed store.
///
/// Mutations rewrite the snapshot atomically (temp file + rename); the audit
/// log is appended to a separate JSON-lines file so appends never rewrite
/// history.
pub struct FileStore {
    cache: MemoryStore,
    snapshot_path: PathBuf,
    log_path: PathBuf,
    /// Serializes snapshot writes
    write_lock: tokio::sync::Mutex<()>,
}

impl FileStore {
    /// Open (or create) a store rooted at `dir`.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        tokio::fs::create_dir_all(dir).await?;
        let snapshot_path = dir.join("permissions.json");
        let log_path = dir.join("access_log.jsonl");

        let cache = MemoryStore::new();
        if snapshot_path.exists() {
            let text = tokio::fs::read_to_string(&snapshot_path).await?;
            let snapshot: Snapshot = serde_json::from_str(&text)?;
            let mut tables = cache.tables.write().await;
            for role in snapshot.roles {
                tables.roles.insert(role.name.clone(), role);
            }
            for principal in snapshot.principals {
                tables.principals.insert(principal.id.clone(), principal);
            }
            for grant in snapshot.grants {
                tables.index_grant(&grant);
                tables.grants.insert(grant.id, grant);
            }
        } else {
            let mut tables = cache.tables.write().await;
            for role in Role::builtins() {
                tables.roles.insert(role.name.clone(), role);
            }
        }

        if log_path.exists() {
            let text = tokio::fs::read_to_string(&log_path).await?;
            let mut tables = cache.tables.write().await;
            for line in text.lines().filter(|l| !l.trim().is_empty()) {
                let entry: AccessLogEntry = serde_json::from_str(line)?;
                tables.access_log.push(entry);
            }
        }

        Ok(Self {
            cache,
            snapshot_path,
            log_path,
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    async fn persist(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let snapshot = {
            let tables = self.cache.tables.read().await;
            Snapshot {
                principals: tables.principals.values().cloned().collect(),
                roles: tables.roles.values().cloned().collect(),
                grants: tables.grants.values().cloned().collect(),
            }
        };
        let json = serde_json::to_string_pretty(&snapshot)?;
        let tmp = self.snapshot_path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.snapshot_path).await?;
        Ok(())
    }
}

#[async_trait]
impl PermissionStore for FileStore {
    async fn get_principal(&self, id: &str) -> Result<Option<Principal>> {
        self.cache.get_principal(id).await
    }

    async fn put_principal(&self, principal: Principal) -> Result<()> {
        self.cache.put_principal(principal).await?;
        self.persist().await
    }

    async fn get_role(&self, name: &str) -> Result<Option<Role>> {
        self.cache.get_role(name).await
    }

    async fn insert_grant(&self, grant: Grant) -> Result<()> {
        self.cache.insert_grant(grant).await?;
        self.persist().await
    }

    async fn get_grant(&self, id: GrantId) -> Result<Option<Grant>> {
        self.cache.get_grant(id).await
    }

    async fn update_grant(&self, grant: Grant) -> Result<()> {
        self.cache.update_grant(grant).await?;
        self.persist().await
    }

    async fn grants_for(
        &self,
        principal: &str,
        permission: PermissionType,
        resource: ResourceType,
    ) -> Result<Vec<Grant>> {
        self.cache.grants_for(principal, permission, resource).await
    }

    async fn append_access_log(&self, entry: AccessLogEntry) -> Result<()> {
        // Durable append before the check returns
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        self.cache.append_access_log(entry).await
    }

    async fn query_access_log(&self, filter: &AccessLogFilter) -> Result<Vec<AccessLogEntry>> {
        self.cache.query_access_log(filter).await
    }
}
