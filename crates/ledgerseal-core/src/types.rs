//! Record types shared across the registry, journals and receipts.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Maximum number of signer entries across the env and runtime lists.
pub const MAX_REGISTRY_ENTRIES: usize = 200;

/// Bundle type stamped into every manifest receipt payload.
pub const BUNDLE_TYPE_MANIFEST_RECEIPT: &str = "audit_manifest_receipt";

/// Payload encoding of signed receipts.
pub const PAYLOAD_ENCODING_JCS: &str = "application/json+jcs";

/// Signer mode accepted by the verifier.
pub const SIGNER_MODE_SERVER_ATTESTED: &str = "server_attested";

/// Process-wide trust policy mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustPolicyMode {
    /// Trust checks are skipped.
    #[default]
    Off,
    /// Trust checks are computed but never block verification.
    Advisory,
    /// A failed trust check fails verification.
    Enforced,
}

impl TrustPolicyMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Advisory => "advisory",
            Self::Enforced => "enforced",
        }
    }
}

impl fmt::Display for TrustPolicyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TrustPolicyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "" => Ok(Self::Off),
            "advisory" => Ok(Self::Advisory),
            "enforced" => Ok(Self::Enforced),
            other => Err(format!("unknown trust policy mode: {}", other)),
        }
    }
}

/// Lifecycle status of a signer entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignerStatus {
    #[default]
    Active,
    Revoked,
    Disabled,
}

/// A declaration that a signing key is trusted within an optional window.
///
/// Only produced by [`crate::entry::normalize_entry`], so at least one of
/// `key_id` / `public_key_fingerprint` is set and the window is ordered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustedSignerEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,

    /// `sha256:<hex>` of the SPKI DER public key, lowercase.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key_fingerprint: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_before: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_after: Option<DateTime<Utc>>,

    #[serde(default)]
    pub status: SignerStatus,

    /// Free-form operator label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl TrustedSignerEntry {
    /// Entry matching a key id, active with no window.
    pub fn for_key_id(key_id: impl Into<String>) -> Self {
        Self {
            key_id: Some(key_id.into()),
            public_key_fingerprint: None,
            not_before: None,
            not_after: None,
            status: SignerStatus::Active,
            label: None,
        }
    }

    /// Whether this entry names the given key id or fingerprint.
    pub fn matches(&self, key_id: Option<&str>, fingerprint: Option<&str>) -> bool {
        let by_id = match (self.key_id.as_deref(), key_id) {
            (Some(ours), Some(theirs)) => ours == theirs,
            _ => false,
        };
        let by_fingerprint = match (self.public_key_fingerprint.as_deref(), fingerprint) {
            (Some(ours), Some(theirs)) => ours.eq_ignore_ascii_case(theirs),
            _ => false,
        };
        by_id || by_fingerprint
    }

    /// Short display name for logs.
    pub fn display_id(&self) -> &str {
        self.key_id
            .as_deref()
            .or(self.public_key_fingerprint.as_deref())
            .unwrap_or("<unnamed>")
    }
}

/// Payload certified by a manifest receipt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestReceiptPayload {
    pub bundle_type: String,
    pub export_type: String,
    /// 64 lowercase hex chars.
    pub manifest_hash_sha256: String,
    /// RFC 3339, UTC, millisecond precision.
    pub generated_at: String,
    pub row_count: u64,
    pub signed_at: String,
    pub signer_key_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<String>,
    #[serde(default)]
    pub context: Value,
}

/// A receipt persisted next to the export it certifies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedReceipt {
    pub algorithm: String,
    pub payload_encoding: String,
    pub key_id: String,
    /// Base64 SPKI DER.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    pub signed_at: String,
    /// Base64 Ed25519 signature over the canonical payload.
    pub signature: String,
    pub payload: ManifestReceiptPayload,
}

/// Reason a snapshot was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotSource {
    PreUpdate,
    PreRotation,
    PreRollback,
}

impl SnapshotSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PreUpdate => "pre_update",
            Self::PreRotation => "pre_rotation",
            Self::PreRollback => "pre_rollback",
        }
    }
}

/// Write-once copy of the runtime registry, taken before every mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub snapshot_id: String,
    pub created_at: DateTime<Utc>,
    pub actor_id: String,
    pub entries_count: usize,
    pub source: SnapshotSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub entries: Vec<TrustedSignerEntry>,
}

/// Privileged action recorded in the audit journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    TrustRegistryUpdated,
    TrustRegistryRotated,
    TrustRegistryRolledBack,
    TrustAdminGranted,
    TrustAdminRevoked,
    AuditHistoryTrimmed,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TrustRegistryUpdated => "trust_registry_updated",
            Self::TrustRegistryRotated => "trust_registry_rotated",
            Self::TrustRegistryRolledBack => "trust_registry_rolled_back",
            Self::TrustAdminGranted => "trust_admin_granted",
            Self::TrustAdminRevoked => "trust_admin_revoked",
            Self::AuditHistoryTrimmed => "audit_history_trimmed",
        }
    }
}

/// Append-only audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: String,
    pub action: AuditAction,
    pub actor_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    pub entries_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(action: AuditAction, actor_id: impl Into<String>, entries_count: usize) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            action,
            actor_id: actor_id.into(),
            target_id: None,
            entries_count,
            note: None,
            snapshot_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_target(mut self, target_id: impl Into<String>) -> Self {
        self.target_id = Some(target_id.into());
        self
    }

    pub fn with_note(mut self, note: Option<String>) -> Self {
        self.note = note;
        self
    }

    pub fn with_snapshot(mut self, snapshot_id: impl Into<String>) -> Self {
        self.snapshot_id = Some(snapshot_id.into());
        self
    }
}

/// Latest persisted state of the runtime registry list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeRegistryState {
    pub entries: Vec<TrustedSignerEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,
    /// Snapshot taken immediately before this state was written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_id: Option<String>,
    #[serde(default)]
    pub revision: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parse() {
        assert_eq!("ENFORCED".parse::<TrustPolicyMode>(), Ok(TrustPolicyMode::Enforced));
        assert_eq!("".parse::<TrustPolicyMode>(), Ok(TrustPolicyMode::Off));
        assert!("strict".parse::<TrustPolicyMode>().is_err());
    }

    #[test]
    fn test_entry_matches_by_id_or_fingerprint() {
        let mut entry = TrustedSignerEntry::for_key_id("k1");
        entry.public_key_fingerprint = Some("sha256:abcd".into());

        assert!(entry.matches(Some("k1"), None));
        assert!(entry.matches(Some("other"), Some("SHA256:ABCD")));
        assert!(!entry.matches(Some("k2"), Some("sha256:ffff")));
        assert!(!entry.matches(None, None));
    }

    #[test]
    fn test_action_wire_names() {
        let json = serde_json::to_string(&AuditAction::TrustRegistryRolledBack).unwrap();
        assert_eq!(json, "\"trust_registry_rolled_back\"");
        assert_eq!(
            AuditAction::TrustRegistryRolledBack.as_str(),
            "trust_registry_rolled_back"
        );
    }

    #[test]
    fn test_entry_omits_absent_fields() {
        let json = serde_json::to_string(&TrustedSignerEntry::for_key_id("k1")).unwrap();
        assert_eq!(json, r#"{"key_id":"k1","status":"active"}"#);
    }
}
