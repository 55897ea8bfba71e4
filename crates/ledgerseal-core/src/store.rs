//! Durable state: the runtime registry list and admin role claims.
//!
//! File layout under the data directory:
//! ```text
//! registry.json    RuntimeRegistryState, rewritten atomically
//! roles.json       admin role claims, absent until the first grant
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::admin::{IdentityRecord, RoleLookup};
use crate::error::{TrustError, TrustResult};
use crate::types::RuntimeRegistryState;

/// Write `content` to `path` via a sibling temp file and rename.
pub(crate) async fn write_atomic(path: &Path, content: &str) -> TrustResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|e| {
            TrustError::storage(format!("failed to create {}: {}", parent.display(), e))
        })?;
    }

    let temp_path = path.with_extension("tmp");
    tokio::fs::write(&temp_path, content)
        .await
        .map_err(|e| TrustError::storage(format!("failed to write temp file: {}", e)))?;
    tokio::fs::rename(&temp_path, path)
        .await
        .map_err(|e| TrustError::storage(format!("failed to rename temp file: {}", e)))?;

    Ok(())
}

async fn read_optional(path: &Path) -> TrustResult<Option<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(TrustError::storage(format!(
            "failed to read {}: {}",
            path.display(),
            e
        ))),
    }
}

// ----------------------------------------------------------------------------
// Runtime registry
// ----------------------------------------------------------------------------

/// Latest-state storage for the runtime registry list.
#[async_trait]
pub trait RegistryStore: Send + Sync {
    /// `None` when nothing has been written yet.
    async fn load(&self) -> TrustResult<Option<RuntimeRegistryState>>;

    async fn save(&self, state: &RuntimeRegistryState) -> TrustResult<()>;
}

#[derive(Debug, Clone)]
pub struct FileRegistryStore {
    path: PathBuf,
}

impl FileRegistryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RegistryStore for FileRegistryStore {
    async fn load(&self) -> TrustResult<Option<RuntimeRegistryState>> {
        let Some(content) = read_optional(&self.path).await? else {
            return Ok(None);
        };
        let state = serde_json::from_str(&content).map_err(|e| {
            TrustError::storage(format!("corrupt registry file {}: {}", self.path.display(), e))
        })?;
        Ok(Some(state))
    }

    async fn save(&self, state: &RuntimeRegistryState) -> TrustResult<()> {
        let content = serde_json::to_string_pretty(state)
            .map_err(|e| TrustError::storage(format!("failed to encode registry: {}", e)))?;
        write_atomic(&self.path, &content).await
    }
}

#[derive(Debug, Default)]
pub struct MemoryRegistryStore {
    state: Mutex<Option<RuntimeRegistryState>>,
    fail_saves: AtomicBool,
}

impl MemoryRegistryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: RuntimeRegistryState) -> Self {
        Self {
            state: Mutex::new(Some(state)),
            fail_saves: AtomicBool::new(false),
        }
    }

    /// Make subsequent saves fail with a storage error.
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl RegistryStore for MemoryRegistryStore {
    async fn load(&self) -> TrustResult<Option<RuntimeRegistryState>> {
        Ok(self.state.lock().await.clone())
    }

    async fn save(&self, state: &RuntimeRegistryState) -> TrustResult<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(TrustError::storage("registry save failed"));
        }
        *self.state.lock().await = Some(state.clone());
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Role claims
// ----------------------------------------------------------------------------

/// Persisted admin role claims.
#[async_trait]
pub trait RoleStore: Send + Sync {
    /// Never fails: storage problems surface as [`RoleLookup::Unavailable`].
    async fn lookup(&self, actor_id: &str) -> RoleLookup;

    /// Current record for an actor, if one was ever written.
    async fn get(&self, actor_id: &str) -> TrustResult<Option<IdentityRecord>>;

    /// Set the admin flag and return the updated record.
    async fn set_admin(
        &self,
        actor_id: &str,
        is_admin: bool,
        granted_by: &str,
    ) -> TrustResult<IdentityRecord>;

    async fn list_admins(&self) -> TrustResult<Vec<IdentityRecord>>;

    /// Clear the admin flag unless `actor_id` holds the last admin claim.
    /// The check and the write happen under one lock.
    async fn revoke_admin_unless_last(
        &self,
        actor_id: &str,
        revoked_by: &str,
    ) -> TrustResult<RevokeOutcome>;

    async fn count_admins(&self) -> TrustResult<usize> {
        Ok(self.list_admins().await?.len())
    }
}

/// Result of [`RoleStore::revoke_admin_unless_last`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevokeOutcome {
    Revoked(IdentityRecord),
    /// Nothing to revoke. Carries the stored record, if any.
    NotAdmin(Option<IdentityRecord>),
    LastAdmin,
}

/// Claims are keyed case-insensitively, matching the admin allowlist.
fn role_key(actor_id: &str) -> String {
    actor_id.trim().to_ascii_lowercase()
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct RoleFile {
    #[serde(default)]
    actors: BTreeMap<String, IdentityRecord>,
}

impl RoleFile {
    /// Re-key claims written before keys were normalized.
    fn normalized(self) -> Self {
        let mut actors = BTreeMap::new();
        for (key, record) in self.actors {
            let key = role_key(&key);
            let newer = actors
                .get(&key)
                .map_or(true, |kept: &IdentityRecord| record.updated_at >= kept.updated_at);
            if newer {
                actors.insert(key, record);
            }
        }
        Self { actors }
    }

    fn get(&self, actor_id: &str) -> Option<&IdentityRecord> {
        self.actors.get(&role_key(actor_id))
    }

    fn lookup(&self, actor_id: &str) -> RoleLookup {
        match self.get(actor_id) {
            Some(record) if record.is_admin => RoleLookup::Admin,
            _ => RoleLookup::NotAdmin,
        }
    }

    fn set_admin(&mut self, actor_id: &str, is_admin: bool, granted_by: &str) -> IdentityRecord {
        let record = IdentityRecord {
            actor_id: actor_id.trim().to_string(),
            is_admin,
            granted_by: Some(granted_by.to_string()),
            updated_at: Utc::now(),
        };
        self.actors.insert(role_key(actor_id), record.clone());
        record
    }

    fn revoke_unless_last(&mut self, actor_id: &str, revoked_by: &str) -> RevokeOutcome {
        match self.get(actor_id) {
            Some(record) if record.is_admin => {}
            other => return RevokeOutcome::NotAdmin(other.cloned()),
        }
        if self.actors.values().filter(|r| r.is_admin).count() <= 1 {
            return RevokeOutcome::LastAdmin;
        }
        RevokeOutcome::Revoked(self.set_admin(actor_id, false, revoked_by))
    }

    fn admins(&self) -> Vec<IdentityRecord> {
        self.actors.values().filter(|r| r.is_admin).cloned().collect()
    }
}

/// `roles.json` backend.
#[derive(Debug)]
pub struct FileRoleStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileRoleStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    async fn read(&self) -> TrustResult<Option<RoleFile>> {
        let Some(content) = read_optional(&self.path).await? else {
            return Ok(None);
        };
        serde_json::from_str::<RoleFile>(&content)
            .map(|roles| Some(roles.normalized()))
            .map_err(|e| {
                TrustError::storage(format!("corrupt roles file {}: {}", self.path.display(), e))
            })
    }

    async fn write(&self, roles: &RoleFile) -> TrustResult<()> {
        let content = serde_json::to_string_pretty(roles)
            .map_err(|e| TrustError::storage(format!("failed to encode roles: {}", e)))?;
        write_atomic(&self.path, &content).await
    }
}

#[async_trait]
impl RoleStore for FileRoleStore {
    async fn lookup(&self, actor_id: &str) -> RoleLookup {
        let _guard = self.lock.lock().await;
        match self.read().await {
            Ok(Some(roles)) => roles.lookup(actor_id),
            Ok(None) => RoleLookup::Unavailable,
            Err(e) => {
                tracing::warn!(error = %e, "role lookup unavailable");
                RoleLookup::Unavailable
            }
        }
    }

    async fn get(&self, actor_id: &str) -> TrustResult<Option<IdentityRecord>> {
        let _guard = self.lock.lock().await;
        Ok(self
            .read()
            .await?
            .and_then(|roles| roles.get(actor_id).cloned()))
    }

    async fn set_admin(
        &self,
        actor_id: &str,
        is_admin: bool,
        granted_by: &str,
    ) -> TrustResult<IdentityRecord> {
        let _guard = self.lock.lock().await;
        let mut roles = self.read().await?.unwrap_or_default();
        let record = roles.set_admin(actor_id, is_admin, granted_by);
        self.write(&roles).await?;
        Ok(record)
    }

    async fn list_admins(&self) -> TrustResult<Vec<IdentityRecord>> {
        let _guard = self.lock.lock().await;
        Ok(self.read().await?.map(|r| r.admins()).unwrap_or_default())
    }

    async fn revoke_admin_unless_last(
        &self,
        actor_id: &str,
        revoked_by: &str,
    ) -> TrustResult<RevokeOutcome> {
        let _guard = self.lock.lock().await;
        let Some(mut roles) = self.read().await? else {
            return Ok(RevokeOutcome::NotAdmin(None));
        };
        let outcome = roles.revoke_unless_last(actor_id, revoked_by);
        if matches!(outcome, RevokeOutcome::Revoked(_)) {
            self.write(&roles).await?;
        }
        Ok(outcome)
    }
}

/// In-memory role store. An unavailable store refuses lookups until the
/// first grant, like an unprovisioned `roles.json`.
#[derive(Debug, Default)]
pub struct MemoryRoleStore {
    roles: Mutex<Option<RoleFile>>,
}

impl MemoryRoleStore {
    /// Provisioned, empty store.
    pub fn new() -> Self {
        Self {
            roles: Mutex::new(Some(RoleFile::default())),
        }
    }

    /// Store that reports [`RoleLookup::Unavailable`] until written.
    pub fn unavailable() -> Self {
        Self::default()
    }

    /// Provisioned store with the given admins.
    pub fn with_admins<I, S>(actors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut roles = RoleFile::default();
        for actor in actors {
            roles.set_admin(actor.as_ref(), true, "bootstrap");
        }
        Self {
            roles: Mutex::new(Some(roles)),
        }
    }
}

#[async_trait]
impl RoleStore for MemoryRoleStore {
    async fn lookup(&self, actor_id: &str) -> RoleLookup {
        match self.roles.lock().await.as_ref() {
            Some(roles) => roles.lookup(actor_id),
            None => RoleLookup::Unavailable,
        }
    }

    async fn get(&self, actor_id: &str) -> TrustResult<Option<IdentityRecord>> {
        Ok(self
            .roles
            .lock()
            .await
            .as_ref()
            .and_then(|roles| roles.get(actor_id).cloned()))
    }

    async fn set_admin(
        &self,
        actor_id: &str,
        is_admin: bool,
        granted_by: &str,
    ) -> TrustResult<IdentityRecord> {
        let mut guard = self.roles.lock().await;
        let roles = guard.get_or_insert_with(RoleFile::default);
        Ok(roles.set_admin(actor_id, is_admin, granted_by))
    }

    async fn list_admins(&self) -> TrustResult<Vec<IdentityRecord>> {
        Ok(self
            .roles
            .lock()
            .await
            .as_ref()
            .map(RoleFile::admins)
            .unwrap_or_default())
    }

    async fn revoke_admin_unless_last(
        &self,
        actor_id: &str,
        revoked_by: &str,
    ) -> TrustResult<RevokeOutcome> {
        Ok(match self.roles.lock().await.as_mut() {
            Some(roles) => roles.revoke_unless_last(actor_id, revoked_by),
            None => RevokeOutcome::NotAdmin(None),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TrustedSignerEntry;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_atomic_replaces_content() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("state.json");

        write_atomic(&path, "first").await.unwrap();
        write_atomic(&path, "second").await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "second");
        assert!(!path.with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn test_file_registry_store_roundtrip() {
        let temp = TempDir::new().unwrap();
        let store = FileRegistryStore::new(temp.path().join("registry.json"));
        assert!(store.load().await.unwrap().is_none());

        let state = RuntimeRegistryState {
            entries: vec![TrustedSignerEntry::for_key_id("k1")],
            updated_at: Some(Utc::now()),
            updated_by: Some("ops".into()),
            snapshot_id: Some("snap-1".into()),
            revision: 3,
        };
        store.save(&state).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(state));
    }

    #[tokio::test]
    async fn test_file_registry_store_corrupt_is_storage_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("registry.json");
        std::fs::write(&path, "{").unwrap();

        let err = FileRegistryStore::new(path).load().await.unwrap_err();
        assert!(matches!(err, TrustError::Storage { .. }));
    }

    #[tokio::test]
    async fn test_file_role_store_unavailable_until_first_grant() {
        let temp = TempDir::new().unwrap();
        let store = FileRoleStore::new(temp.path().join("roles.json"));

        assert_eq!(store.lookup("ops").await, RoleLookup::Unavailable);
        assert_eq!(store.count_admins().await.unwrap(), 0);

        let record = store.set_admin("ops", true, "bootstrap").await.unwrap();
        assert!(record.is_admin);
        assert_eq!(store.lookup("ops").await, RoleLookup::Admin);
        assert_eq!(store.lookup("dev").await, RoleLookup::NotAdmin);

        store.set_admin("ops", false, "ops").await.unwrap();
        assert_eq!(store.lookup("ops").await, RoleLookup::NotAdmin);
        assert_eq!(store.count_admins().await.unwrap(), 0);
        assert!(!store.get("ops").await.unwrap().unwrap().is_admin);
    }

    #[tokio::test]
    async fn test_corrupt_roles_file_reads_unavailable() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("roles.json");
        std::fs::write(&path, "not json").unwrap();

        let store = FileRoleStore::new(path);
        assert_eq!(store.lookup("ops").await, RoleLookup::Unavailable);
        assert!(store.list_admins().await.is_err());
    }

    #[tokio::test]
    async fn test_memory_role_store() {
        let store = MemoryRoleStore::with_admins(["a", "b"]);
        assert_eq!(store.count_admins().await.unwrap(), 2);

        let unavailable = MemoryRoleStore::unavailable();
        assert_eq!(unavailable.lookup("a").await, RoleLookup::Unavailable);
        unavailable.set_admin("a", true, "root").await.unwrap();
        assert_eq!(unavailable.lookup("a").await, RoleLookup::Admin);
    }

    #[tokio::test]
    async fn test_revoke_unless_last_keeps_one_admin() {
        let temp = TempDir::new().unwrap();
        let store = FileRoleStore::new(temp.path().join("roles.json"));
        assert_eq!(
            store.revoke_admin_unless_last("a", "root").await.unwrap(),
            RevokeOutcome::NotAdmin(None)
        );

        store.set_admin("a", true, "root").await.unwrap();
        store.set_admin("b", true, "root").await.unwrap();

        match store.revoke_admin_unless_last("a", "b").await.unwrap() {
            RevokeOutcome::Revoked(record) => {
                assert!(!record.is_admin);
                assert_eq!(record.granted_by.as_deref(), Some("b"));
            }
            other => panic!("expected revoke, got {:?}", other),
        }
        assert_eq!(
            store.revoke_admin_unless_last("b", "b").await.unwrap(),
            RevokeOutcome::LastAdmin
        );
        assert!(matches!(
            store.revoke_admin_unless_last("a", "b").await.unwrap(),
            RevokeOutcome::NotAdmin(Some(_))
        ));
        assert_eq!(store.count_admins().await.unwrap(), 1);

        let memory = MemoryRoleStore::with_admins(["a"]);
        assert_eq!(
            memory.revoke_admin_unless_last("a", "a").await.unwrap(),
            RevokeOutcome::LastAdmin
        );
        assert_eq!(
            MemoryRoleStore::unavailable()
                .revoke_admin_unless_last("a", "a")
                .await
                .unwrap(),
            RevokeOutcome::NotAdmin(None)
        );
    }

    #[tokio::test]
    async fn test_role_claims_ignore_case() {
        let temp = TempDir::new().unwrap();
        let store = FileRoleStore::new(temp.path().join("roles.json"));

        let record = store
            .set_admin(" Ops@Example.com ", true, "root")
            .await
            .unwrap();
        assert_eq!(record.actor_id, "Ops@Example.com");
        assert_eq!(store.lookup("ops@example.com").await, RoleLookup::Admin);
        assert_eq!(store.lookup("OPS@EXAMPLE.COM").await, RoleLookup::Admin);
        assert!(store.get("ops@example.com").await.unwrap().is_some());

        store.set_admin("ops@example.com", false, "root").await.unwrap();
        assert_eq!(store.count_admins().await.unwrap(), 0);

        let memory = MemoryRoleStore::with_admins(["Dev@Example.com"]);
        assert_eq!(memory.lookup("dev@example.com").await, RoleLookup::Admin);
    }

    #[tokio::test]
    async fn test_legacy_mixed_case_keys_are_normalized_on_read() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("roles.json");
        std::fs::write(
            &path,
            r#"{"actors": {"Ops@Example.com": {"actor_id": "Ops@Example.com", "is_admin": true, "granted_by": "root", "updated_at": "2026-01-01T00:00:00Z"}}}"#,
        )
        .unwrap();

        let store = FileRoleStore::new(path);
        assert_eq!(store.lookup("ops@example.com").await, RoleLookup::Admin);
    }
}
