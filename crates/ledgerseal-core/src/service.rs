//! Service facade over signing, verification and registry governance.
//!
//! Every mutating operation resolves admin access first and is rejected with
//! [`TrustError::Forbidden`] before any input is read or any state touched.
//! Registry writes follow one path: validate → snapshot current state →
//! persist next state → append an audit event.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::admin::{resolve_admin_access, AdminAccess, AdminAllowlist, Identity, IdentityRecord};
use crate::config::TrustConfig;
use crate::entry::{normalize_entries, revalidate_entries};
use crate::error::{TrustError, TrustResult};
use crate::governance::{
    build_digest, build_runbook, paginate, GovernanceDigest, HistoryQuery, Page, RotationRunbook,
    TrimReport,
};
use crate::journal::{Journal, MemoryJournal, NdjsonJournal};
use crate::policy::{resolve_signer_trust_status, SignerTrustStatus, TrustPolicy};
use crate::preflight::{evaluate_preflight, PreflightReport};
use crate::registry::{entry_status_at, RegistryStatus, TrustRegistry};
use crate::signer::{ArtifactSignature, ExportSigner, ReceiptRequest, ALGORITHM_ED25519};
use crate::store::{
    FileRegistryStore, FileRoleStore, MemoryRegistryStore, MemoryRoleStore, RegistryStore,
    RevokeOutcome, RoleStore,
};
use crate::types::{
    AuditAction, AuditEvent, RegistrySnapshot, RuntimeRegistryState, SignedReceipt,
    SnapshotSource, TrustPolicyMode, TrustedSignerEntry,
};
use crate::verify::{verify_manifest, Manifest, SignerBlock, VerificationReceipt};

pub const REGISTRY_FILE: &str = "registry.json";
pub const SNAPSHOTS_FILE: &str = "snapshots.ndjson";
pub const AUDIT_FILE: &str = "audit.ndjson";
pub const ROLES_FILE: &str = "roles.json";

/// Policy configuration as reported by [`TrustService::signing_status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicySummary {
    pub mode: TrustPolicyMode,
    pub trusted_key_ids_count: usize,
    pub trusted_fingerprints_count: usize,
    pub env_entries_count: usize,
    pub runtime_entries_count: usize,
    pub registry_configured: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningStatus {
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
    /// Base64 SPKI DER.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key_fingerprint: Option<String>,
    pub hmac_fallback_available: bool,
    pub policy: PolicySummary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryOrigin {
    Env,
    Runtime,
}

/// One registry entry with its status right now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryView {
    #[serde(flatten)]
    pub entry: TrustedSignerEntry,
    pub origin: EntryOrigin,
    pub status_now: RegistryStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryView {
    pub trust_policy_mode: TrustPolicyMode,
    pub env_entries: Vec<EntryView>,
    pub runtime_entries: Vec<EntryView>,
    pub runtime_state: RuntimeRegistryState,
    pub generated_at: DateTime<Utc>,
}

/// Outcome of a committed registry write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryChange {
    pub state: RuntimeRegistryState,
    /// Snapshot of the state that was replaced.
    pub snapshot_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preflight: Option<PreflightReport>,
    /// False when the audit append failed after the write succeeded.
    pub audit_recorded: bool,
}

/// Builder for [`TrustService`]. Unset backends default to files under the
/// configured data directory.
pub struct TrustServiceBuilder {
    config: TrustConfig,
    signer: Option<ExportSigner>,
    registry_store: Option<Arc<dyn RegistryStore>>,
    snapshots: Option<Arc<dyn Journal<RegistrySnapshot>>>,
    audit: Option<Arc<dyn Journal<AuditEvent>>>,
    roles: Option<Arc<dyn RoleStore>>,
}

impl TrustServiceBuilder {
    pub fn signer(mut self, signer: ExportSigner) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn registry_store(mut self, store: Arc<dyn RegistryStore>) -> Self {
        self.registry_store = Some(store);
        self
    }

    pub fn snapshot_journal(mut self, journal: Arc<dyn Journal<RegistrySnapshot>>) -> Self {
        self.snapshots = Some(journal);
        self
    }

    pub fn audit_journal(mut self, journal: Arc<dyn Journal<AuditEvent>>) -> Self {
        self.audit = Some(journal);
        self
    }

    pub fn role_store(mut self, store: Arc<dyn RoleStore>) -> Self {
        self.roles = Some(store);
        self
    }

    /// Fill every unset backend with an in-memory one.
    pub fn in_memory(mut self) -> Self {
        if self.registry_store.is_none() {
            self.registry_store = Some(Arc::new(MemoryRegistryStore::new()));
        }
        if self.snapshots.is_none() {
            self.snapshots = Some(Arc::new(MemoryJournal::<RegistrySnapshot>::new()));
        }
        if self.audit.is_none() {
            self.audit = Some(Arc::new(MemoryJournal::<AuditEvent>::new()));
        }
        if self.roles.is_none() {
            self.roles = Some(Arc::new(MemoryRoleStore::unavailable()));
        }
        self
    }

    pub fn build(self) -> TrustResult<TrustService> {
        let config = self.config;
        config.validate()?;

        let needs_dir = self.registry_store.is_none()
            || self.snapshots.is_none()
            || self.audit.is_none()
            || self.roles.is_none();
        let data_dir = if needs_dir {
            Some(config.data_dir()?)
        } else {
            None
        };
        let path = |name: &str| data_dir.as_ref().map(|d| d.join(name)).unwrap_or_default();
        let read_limit = config.journal_read_limit;

        let signer = match self.signer {
            Some(signer) => signer,
            None => config.load_signer()?,
        };

        let service = TrustService {
            policy: config.trust_policy()?,
            env_entries: config.env_entries()?,
            allowlist: config.admin_allowlist(),
            retention_days: config.audit_retention_days,
            keep_recent: config.audit_keep_recent,
            signer,
            registry_store: self.registry_store.unwrap_or_else(|| {
                Arc::new(FileRegistryStore::new(path(REGISTRY_FILE))) as Arc<dyn RegistryStore>
            }),
            snapshots: self.snapshots.unwrap_or_else(|| {
                Arc::new(NdjsonJournal::<RegistrySnapshot>::new(
                    path(SNAPSHOTS_FILE),
                    read_limit,
                )) as Arc<dyn Journal<RegistrySnapshot>>
            }),
            audit: self.audit.unwrap_or_else(|| {
                Arc::new(NdjsonJournal::<AuditEvent>::new(path(AUDIT_FILE), read_limit))
                    as Arc<dyn Journal<AuditEvent>>
            }),
            roles: self.roles.unwrap_or_else(|| {
                Arc::new(FileRoleStore::new(path(ROLES_FILE))) as Arc<dyn RoleStore>
            }),
        };

        tracing::debug!(
            mode = %service.policy.mode,
            env_entries = service.env_entries.len(),
            data_dir = ?data_dir,
            "trust service ready"
        );
        Ok(service)
    }
}

/// Signing, verification and registry governance.
pub struct TrustService {
    policy: TrustPolicy,
    env_entries: Vec<TrustedSignerEntry>,
    allowlist: AdminAllowlist,
    retention_days: u32,
    keep_recent: usize,
    signer: ExportSigner,
    registry_store: Arc<dyn RegistryStore>,
    snapshots: Arc<dyn Journal<RegistrySnapshot>>,
    audit: Arc<dyn Journal<AuditEvent>>,
    roles: Arc<dyn RoleStore>,
}

impl std::fmt::Debug for TrustService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustService")
            .field("policy", &self.policy)
            .field("env_entries", &self.env_entries.len())
            .field("signer", &self.signer)
            .finish_non_exhaustive()
    }
}

impl TrustService {
    pub fn builder(config: TrustConfig) -> TrustServiceBuilder {
        TrustServiceBuilder {
            config,
            signer: None,
            registry_store: None,
            snapshots: None,
            audit: None,
            roles: None,
        }
    }

    /// File-backed service under the configured data directory.
    pub fn open(config: TrustConfig) -> TrustResult<Self> {
        Self::builder(config).build()
    }

    pub fn policy(&self) -> &TrustPolicy {
        &self.policy
    }

    pub fn signer(&self) -> &ExportSigner {
        &self.signer
    }

    pub fn env_entries(&self) -> &[TrustedSignerEntry] {
        &self.env_entries
    }

    // ------------------------------------------------------------------
    // Signing
    // ------------------------------------------------------------------

    pub async fn signing_status(&self) -> TrustResult<SigningStatus> {
        let state = self.load_state().await?;
        let key = self.signer.signer();

        Ok(SigningStatus {
            enabled: key.is_some(),
            algorithm: key.map(|_| ALGORITHM_ED25519.to_string()),
            key_id: key.map(|k| k.key_id().to_string()),
            public_key: key.map(|k| k.public_key().to_string()),
            public_key_fingerprint: key.map(|k| k.fingerprint().to_string()),
            hmac_fallback_available: self.signer.hmac_available(),
            policy: PolicySummary {
                mode: self.policy.mode,
                trusted_key_ids_count: self.policy.trusted_key_ids.len(),
                trusted_fingerprints_count: self.policy.trusted_fingerprints.len(),
                env_entries_count: self.env_entries.len(),
                runtime_entries_count: state.entries.len(),
                registry_configured: !self.env_entries.is_empty() || !state.entries.is_empty(),
            },
        })
    }

    pub fn sign_receipt(&self, request: &ReceiptRequest) -> TrustResult<SignedReceipt> {
        let receipt = self.signer.build_receipt(request)?;
        tracing::info!(
            key_id = %receipt.key_id,
            export_type = %receipt.payload.export_type,
            manifest_hash = %receipt.payload.manifest_hash_sha256,
            "manifest receipt signed"
        );
        Ok(receipt)
    }

    pub fn sign_export_artifact(&self, payload: &Value) -> TrustResult<ArtifactSignature> {
        self.signer.build_export_artifact_signature(payload)
    }

    // ------------------------------------------------------------------
    // Verification
    // ------------------------------------------------------------------

    pub async fn resolve_signer_trust_status(
        &self,
        key_id: Option<&str>,
        fingerprint: Option<&str>,
        at: DateTime<Utc>,
    ) -> TrustResult<SignerTrustStatus> {
        let state = self.load_state().await?;
        let registry = TrustRegistry::new(&self.env_entries, &state.entries);
        Ok(resolve_signer_trust_status(
            &self.policy,
            &registry,
            key_id,
            fingerprint,
            at,
        ))
    }

    pub async fn verify_manifest(
        &self,
        manifest: &Manifest,
        signer: &SignerBlock,
        csv_content: Option<&[u8]>,
    ) -> TrustResult<VerificationReceipt> {
        self.verify_manifest_at(manifest, signer, csv_content, Utc::now())
            .await
    }

    pub async fn verify_manifest_at(
        &self,
        manifest: &Manifest,
        signer: &SignerBlock,
        csv_content: Option<&[u8]>,
        at: DateTime<Utc>,
    ) -> TrustResult<VerificationReceipt> {
        let state = self.load_state().await?;
        let registry = TrustRegistry::new(&self.env_entries, &state.entries);
        let receipt = verify_manifest(&self.policy, &registry, manifest, signer, csv_content, at)?;

        tracing::info!(
            receipt_id = %receipt.receipt_id,
            passed = receipt.checks.verification_passed,
            registry_status = %receipt.checks.signer_registry_status,
            "manifest verified"
        );
        Ok(receipt)
    }

    // ------------------------------------------------------------------
    // Admin access
    // ------------------------------------------------------------------

    pub async fn resolve_admin_access(&self, identity: &Identity) -> AdminAccess {
        let lookup = self.roles.lookup(&identity.actor_id).await;
        resolve_admin_access(identity, lookup, &self.allowlist)
    }

    async fn require_admin(&self, identity: &Identity, operation: &str) -> TrustResult<AdminAccess> {
        let access = self.resolve_admin_access(identity).await;
        if !access.is_admin {
            tracing::warn!(
                actor = %identity.actor_id,
                operation,
                source = %access.source,
                role_lookup_available = access.role_lookup_available,
                "admin access denied"
            );
            return Err(TrustError::Forbidden {
                admin_source: access.source,
            });
        }
        Ok(access)
    }

    pub async fn grant_admin(
        &self,
        identity: &Identity,
        target_actor_id: &str,
    ) -> TrustResult<IdentityRecord> {
        let access = self.require_admin(identity, "grant_admin").await?;
        let target = target_actor_id.trim();
        if target.is_empty() {
            return Err(TrustError::invalid("target actor id must not be empty"));
        }

        let record = self
            .roles
            .set_admin(target, true, &identity.actor_id)
            .await?;
        tracing::info!(
            actor = %identity.actor_id,
            target,
            source = %access.source,
            "trust admin granted"
        );

        let event = AuditEvent::new(AuditAction::TrustAdminGranted, &identity.actor_id, 0)
            .with_target(target);
        self.record_event(&event).await;
        Ok(record)
    }

    pub async fn revoke_admin(
        &self,
        identity: &Identity,
        target_actor_id: &str,
    ) -> TrustResult<IdentityRecord> {
        self.require_admin(identity, "revoke_admin").await?;
        let target = target_actor_id.trim();
        if target.is_empty() {
            return Err(TrustError::invalid("target actor id must not be empty"));
        }

        let record = match self
            .roles
            .revoke_admin_unless_last(target, &identity.actor_id)
            .await?
        {
            RevokeOutcome::Revoked(record) => record,
            RevokeOutcome::NotAdmin(record) => {
                tracing::debug!(target, "revoke skipped, actor holds no admin claim");
                return Ok(record.unwrap_or_else(|| IdentityRecord {
                    actor_id: target.to_string(),
                    is_admin: false,
                    granted_by: None,
                    updated_at: Utc::now(),
                }));
            }
            RevokeOutcome::LastAdmin => {
                tracing::warn!(actor = %identity.actor_id, target, "refusing to revoke last admin");
                return Err(TrustError::LastAdminStanding {
                    actor_id: target.to_string(),
                });
            }
        };
        tracing::info!(actor = %identity.actor_id, target, "trust admin revoked");

        let event = AuditEvent::new(AuditAction::TrustAdminRevoked, &identity.actor_id, 0)
            .with_target(target);
        self.record_event(&event).await;
        Ok(record)
    }

    // ------------------------------------------------------------------
    // Registry
    // ------------------------------------------------------------------

    pub async fn read_registry(&self, identity: &Identity) -> TrustResult<RegistryView> {
        self.require_admin(identity, "read_registry").await?;
        let state = self.load_state().await?;
        let now = Utc::now();

        let view = |entries: &[TrustedSignerEntry], origin: EntryOrigin| {
            entries
                .iter()
                .map(|entry| EntryView {
                    entry: entry.clone(),
                    origin,
                    status_now: entry_status_at(entry, now),
                })
                .collect::<Vec<_>>()
        };

        Ok(RegistryView {
            trust_policy_mode: self.policy.mode,
            env_entries: view(&self.env_entries, EntryOrigin::Env),
            runtime_entries: view(&state.entries, EntryOrigin::Runtime),
            runtime_state: state,
            generated_at: now,
        })
    }

    /// Replace the runtime list without the preflight gate.
    pub async fn update_registry(
        &self,
        identity: &Identity,
        entries: &[Value],
        note: Option<String>,
    ) -> TrustResult<RegistryChange> {
        self.require_admin(identity, "update_registry").await?;
        let entries = normalize_entries(entries, self.env_entries.len())?;

        self.commit(
            identity,
            entries,
            SnapshotSource::PreUpdate,
            AuditAction::TrustRegistryUpdated,
            note,
            None,
        )
        .await
    }

    /// Dry-run a rotation.
    pub async fn preflight_rotation(
        &self,
        identity: &Identity,
        entries: &[Value],
    ) -> TrustResult<PreflightReport> {
        self.require_admin(identity, "preflight_rotation").await?;
        let entries = normalize_entries(entries, self.env_entries.len())?;
        Ok(evaluate_preflight(&self.env_entries, &entries, Utc::now()))
    }

    /// Replace the runtime list, refusing changes that leave a trust gap.
    pub async fn rotate_registry(
        &self,
        identity: &Identity,
        entries: &[Value],
        note: Option<String>,
    ) -> TrustResult<RegistryChange> {
        self.require_admin(identity, "rotate_registry").await?;
        let entries = normalize_entries(entries, self.env_entries.len())?;

        let report = evaluate_preflight(&self.env_entries, &entries, Utc::now());
        if !report.valid {
            tracing::warn!(
                actor = %identity.actor_id,
                errors = ?report.errors,
                "rotation rejected by preflight"
            );
            return Err(TrustError::RotationPreflightFailed { report });
        }

        let mut change = self
            .commit(
                identity,
                entries,
                SnapshotSource::PreRotation,
                AuditAction::TrustRegistryRotated,
                note,
                None,
            )
            .await?;
        change.preflight = Some(report);
        Ok(change)
    }

    /// Restore the runtime list from a snapshot.
    pub async fn rollback_registry(
        &self,
        identity: &Identity,
        snapshot_id: &str,
        note: Option<String>,
    ) -> TrustResult<RegistryChange> {
        self.require_admin(identity, "rollback_registry").await?;

        let target = self
            .snapshots
            .read_all_bounded()
            .await?
            .into_iter()
            .rev()
            .find(|s| s.snapshot_id == snapshot_id)
            .ok_or_else(|| TrustError::SnapshotNotFound {
                snapshot_id: snapshot_id.to_string(),
            })?;
        let entries = revalidate_entries(&target.entries, self.env_entries.len())?;

        self.commit(
            identity,
            entries,
            SnapshotSource::PreRollback,
            AuditAction::TrustRegistryRolledBack,
            note,
            Some(target.snapshot_id),
        )
        .await
    }

    async fn load_state(&self) -> TrustResult<RuntimeRegistryState> {
        Ok(self.registry_store.load().await?.unwrap_or_default())
    }

    async fn commit(
        &self,
        identity: &Identity,
        entries: Vec<TrustedSignerEntry>,
        source: SnapshotSource,
        action: AuditAction,
        note: Option<String>,
        target_id: Option<String>,
    ) -> TrustResult<RegistryChange> {
        let current = self.load_state().await?;
        let now = Utc::now();
        let actor = identity.actor_id.as_str();

        let snapshot = RegistrySnapshot {
            snapshot_id: uuid::Uuid::new_v4().to_string(),
            created_at: now,
            actor_id: actor.to_string(),
            entries_count: current.entries.len(),
            source,
            note: note.clone(),
            entries: current.entries,
        };
        self.snapshots.append(&snapshot).await?;

        let next = RuntimeRegistryState {
            entries,
            updated_at: Some(now),
            updated_by: Some(actor.to_string()),
            snapshot_id: Some(snapshot.snapshot_id.clone()),
            revision: current.revision + 1,
        };
        if let Err(e) = self.registry_store.save(&next).await {
            tracing::error!(
                actor,
                snapshot_id = %snapshot.snapshot_id,
                error = %e,
                "registry write failed after snapshot"
            );
            return Err(e);
        }

        let mut event = AuditEvent::new(action, actor, next.entries.len())
            .with_note(note)
            .with_snapshot(&snapshot.snapshot_id);
        if let Some(target) = target_id {
            event = event.with_target(target);
        }
        let audit_recorded = self.record_event(&event).await;

        tracing::info!(
            actor,
            action = action.as_str(),
            snapshot_id = %snapshot.snapshot_id,
            entries = next.entries.len(),
            revision = next.revision,
            "trust registry changed"
        );

        Ok(RegistryChange {
            state: next,
            snapshot_id: snapshot.snapshot_id,
            preflight: None,
            audit_recorded,
        })
    }

    async fn record_event(&self, event: &AuditEvent) -> bool {
        match self.audit.append(event).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(
                    action = event.action.as_str(),
                    actor = %event.actor_id,
                    error = %e,
                    "audit append failed"
                );
                false
            }
        }
    }

    // ------------------------------------------------------------------
    // Governance
    // ------------------------------------------------------------------

    pub async fn audit_history(
        &self,
        identity: &Identity,
        query: &HistoryQuery,
    ) -> TrustResult<Page<AuditEvent>> {
        self.require_admin(identity, "audit_history").await?;
        Ok(paginate(self.audit.read_all_bounded().await?, query))
    }

    pub async fn snapshot_history(
        &self,
        identity: &Identity,
        query: &HistoryQuery,
    ) -> TrustResult<Page<RegistrySnapshot>> {
        self.require_admin(identity, "snapshot_history").await?;
        Ok(paginate(self.snapshots.read_all_bounded().await?, query))
    }

    pub async fn rotation_runbook(&self, identity: &Identity) -> TrustResult<RotationRunbook> {
        self.require_admin(identity, "rotation_runbook").await?;
        self.build_runbook(&self.audit.read_all_bounded().await?)
            .await
    }

    async fn build_runbook(&self, events: &[AuditEvent]) -> TrustResult<RotationRunbook> {
        let state = self.load_state().await?;
        let registry = TrustRegistry::new(&self.env_entries, &state.entries);
        Ok(build_runbook(self.policy.mode, &registry, events, Utc::now()))
    }

    pub async fn governance_digest(
        &self,
        identity: &Identity,
        window_days: u32,
    ) -> TrustResult<GovernanceDigest> {
        self.require_admin(identity, "governance_digest").await?;
        if window_days == 0 {
            return Err(TrustError::invalid("window_days must be at least 1"));
        }

        let events = self.audit.read_all_bounded().await?;
        let snapshots = self.snapshots.read_all_bounded().await?;
        let runbook = self.build_runbook(&events).await?;
        Ok(build_digest(
            window_days,
            &events,
            &snapshots,
            runbook,
            Utc::now(),
        ))
    }

    /// Delete audit events older than the retention window, always keeping
    /// the most recent `keep_recent` (never fewer than configured).
    pub async fn trim_audit_history(
        &self,
        identity: &Identity,
        retention_days: Option<u32>,
        keep_recent: Option<usize>,
    ) -> TrustResult<TrimReport> {
        self.require_admin(identity, "trim_audit_history").await?;

        let retention_days = retention_days.unwrap_or(self.retention_days);
        if retention_days == 0 {
            return Err(TrustError::invalid("retention_days must be at least 1"));
        }
        let keep_recent = keep_recent
            .unwrap_or(self.keep_recent)
            .max(self.keep_recent);
        let cutoff = Utc::now() - Duration::days(i64::from(retention_days));

        let removed = self
            .audit
            .prune(keep_recent, &move |e: &AuditEvent| e.created_at >= cutoff)
            .await?;

        tracing::info!(
            actor = %identity.actor_id,
            removed,
            retention_days,
            keep_recent,
            "audit history trimmed"
        );
        let event = AuditEvent::new(AuditAction::AuditHistoryTrimmed, &identity.actor_id, removed)
            .with_note(Some(format!(
                "removed {} events older than {}",
                removed,
                cutoff.to_rfc3339()
            )));
        self.record_event(&event).await;

        Ok(TrimReport {
            removed,
            retention_days,
            keep_recent,
            cutoff,
        })
    }
}
