//! Signed audit manifests with a rotation-safe trusted signer registry.
//!
//! This crate provides:
//!
//! - Canonical (RFC 8785) encoding used as the exact signing input
//! - Ed25519 manifest receipts, with an HMAC fallback for export artifacts
//! - Manifest verification that reports every check individually
//! - A trusted signer registry with validity windows and a three-valued
//!   trust policy evaluator
//! - Rotation preflight, snapshots and rollback
//! - Admin-gated governance with an append-only audit journal
//!
//! # Quick Start
//!
//! ```no_run
//! use ledgerseal_core::{Manifest, ReceiptRequest, SignerBlock, TrustConfig, TrustService};
//!
//! # async fn example() -> ledgerseal_core::TrustResult<()> {
//! let service = TrustService::open(TrustConfig::load(None)?)?;
//!
//! let receipt = service.sign_receipt(&ReceiptRequest {
//!     manifest_hash: "a".repeat(64),
//!     export_type: "case_audit_timeline".into(),
//!     generated_at: "2026-04-02T10:15:00Z".into(),
//!     row_count: 12,
//!     context: serde_json::json!({}),
//!     actor_id: None,
//! })?;
//!
//! let block = SignerBlock::from_receipt(&receipt)?;
//! let result = service
//!     .verify_manifest(&Manifest::with_hash("a".repeat(64)), &block, None)
//!     .await?;
//! println!("passed: {}", result.checks.verification_passed);
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//!
//! | Environment Variable | Description |
//! |---------------------|-------------|
//! | `LEDGERSEAL_CONFIG` | YAML config file |
//! | `LEDGERSEAL_TRUST_POLICY_MODE` | `off`, `advisory` or `enforced` (default: `off`) |
//! | `LEDGERSEAL_TRUSTED_KEY_IDS` | Comma-separated key id allow-set |
//! | `LEDGERSEAL_TRUSTED_FINGERPRINTS` | Comma-separated fingerprint allow-set |
//! | `LEDGERSEAL_TRUSTED_SIGNERS_JSON` | Inline JSON array of signer entries |
//! | `LEDGERSEAL_SIGNING_KEY_PATH` | PKCS#8 PEM private key file |
//! | `LEDGERSEAL_SIGNING_KEY_PEM` | Inline PKCS#8 PEM private key |
//! | `LEDGERSEAL_SIGNING_KEY_ID` | Published key id (default: SPKI fingerprint) |
//! | `LEDGERSEAL_HMAC_SECRET` | Shared secret for artifact signatures |
//! | `LEDGERSEAL_DATA_DIR` | Storage root (default: `~/.ledgerseal`) |
//! | `LEDGERSEAL_ADMIN_ALLOWLIST` | Comma-separated bootstrap admins |
//! | `LEDGERSEAL_AUDIT_RETENTION_DAYS` | Default trim window (default: 365) |
//! | `LEDGERSEAL_AUDIT_KEEP_RECENT` | Events always kept by a trim (default: 100) |
//! | `LEDGERSEAL_JOURNAL_READ_LIMIT` | Journal tail-read bound (default: 1000) |

pub mod admin;
pub mod canonical;
pub mod config;
mod digest;
pub mod entry;
pub mod error;
pub mod governance;
pub mod journal;
pub mod policy;
pub mod preflight;
pub mod registry;
pub mod service;
pub mod signer;
pub mod store;
pub mod types;
pub mod verify;

// Re-export main types
pub use admin::{AdminAccess, AdminAllowlist, AdminSource, Identity, IdentityRecord, RoleLookup};
pub use canonical::{canonical_sha256, to_canonical_bytes, to_canonical_string};
pub use config::TrustConfig;
pub use digest::{fingerprint_spki, is_sha256_hex, sha256_hex};
pub use entry::{normalize_entries, normalize_entry, normalize_fingerprint, EntryRejection};
pub use error::{TrustError, TrustResult};
pub use governance::{
    GovernanceDigest, HistoryQuery, Page, RotationRunbook, SnapshotSummary, TrimReport,
};
pub use journal::{Journal, MemoryJournal, NdjsonJournal};
pub use policy::{resolve_signer_trust_status, SignerTrustStatus, TrustCheck, TrustPolicy};
pub use preflight::{evaluate_preflight, PreflightReport, PreflightSummary};
pub use registry::{RegistryStatus, TrustRegistry};
pub use service::{
    EntryOrigin, EntryView, PolicySummary, RegistryChange, RegistryView, SigningStatus,
    TrustService, TrustServiceBuilder,
};
pub use signer::{ArtifactSignature, ExportSigner, ManifestSigner, ReceiptRequest};
pub use store::{
    FileRegistryStore, FileRoleStore, MemoryRegistryStore, MemoryRoleStore, RegistryStore,
    RevokeOutcome, RoleStore,
};
pub use types::{
    AuditAction, AuditEvent, ManifestReceiptPayload, RegistrySnapshot, RuntimeRegistryState,
    SignedReceipt, SignerStatus, SnapshotSource, TrustPolicyMode, TrustedSignerEntry,
};
pub use verify::{verify_manifest, Manifest, SignerBlock, VerificationChecks, VerificationReceipt};
