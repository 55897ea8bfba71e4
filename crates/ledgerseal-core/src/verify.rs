//! Manifest verification.
//!
//! Verification never collapses to a single boolean: every check is
//! reported individually in [`VerificationChecks`], and the overall verdict
//! is derived from them.
//!
//! # Checks
//!
//! 1. `manifest.hash` is 64 lowercase hex chars (else `InvalidInput`)
//! 2. signer mode is `server_attested` (else `Unverifiable`)
//! 3. signature over the canonical payload bytes, with any block `key_id`
//!    equal to the signed `signer_key_id` → `signature_valid`
//! 4. payload hash equals manifest hash → `payload_binds_manifest_hash`
//! 5. optional CSV content hash → `csv_hash_matches_manifest`
//! 6. signer trust at verification time, keyed by the signed key id
//!
//! `verification_passed = signature_valid && payload_binds_manifest_hash
//!  && csv_hash_matches_manifest != Some(false)
//!  && (mode != enforced || trust_check_passed)`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::canonical::{canonical_sha256, to_canonical_bytes};
use crate::digest::{is_sha256_hex, sha256_hex_reader};
use crate::error::{TrustError, TrustResult};
use crate::policy::{resolve_signer_trust_status, TrustCheck, TrustPolicy};
use crate::registry::{RegistryStatus, TrustRegistry};
use crate::signer::{decode_public_key, verify_signature, ALGORITHM_ED25519};
use crate::types::{SignedReceipt, TrustPolicyMode, SIGNER_MODE_SERVER_ATTESTED};

/// Metadata summarizing an exported artifact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// SHA-256 of the export content, 64 lowercase hex.
    pub hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_at: Option<String>,
}

impl Manifest {
    pub fn with_hash(hash: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            ..Default::default()
        }
    }
}

/// Signature block shipped alongside a manifest.
///
/// `payload` stays an untyped JSON value: the verifier must recompute the
/// canonical bytes from exactly what was shipped, unknown fields included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignerBlock {
    pub mode: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
    /// Base64 SPKI DER (or raw 32-byte) Ed25519 public key.
    pub public_key: String,
    pub signature: String,
    pub payload: Value,
}

impl SignerBlock {
    /// Signer block for a receipt issued by this server.
    pub fn from_receipt(receipt: &SignedReceipt) -> TrustResult<Self> {
        let payload = serde_json::to_value(&receipt.payload)
            .map_err(|e| TrustError::invalid(format!("receipt payload cannot be encoded: {}", e)))?;
        let public_key = receipt
            .public_key
            .clone()
            .ok_or_else(|| TrustError::invalid("receipt does not embed a public key"))?;

        Ok(Self {
            mode: SIGNER_MODE_SERVER_ATTESTED.to_string(),
            algorithm: Some(receipt.algorithm.clone()),
            key_id: Some(receipt.key_id.clone()),
            public_key,
            signature: receipt.signature.clone(),
            payload,
        })
    }

    fn payload_str(&self, names: &[&str]) -> Option<&str> {
        names
            .iter()
            .find_map(|name| self.payload.get(*name).and_then(Value::as_str))
    }

    fn payload_manifest_hash(&self) -> Option<&str> {
        self.payload_str(&["manifest_hash_sha256", "manifestHashSha256"])
    }

    /// Key id covered by the signature. The block's own `key_id` is unsigned
    /// and never feeds the trust check.
    fn signed_key_id(&self) -> Option<&str> {
        self.payload_str(&["signer_key_id", "signerKeyId"])
    }

    /// False when the unsigned `key_id` names a different key than the payload.
    fn key_id_matches_payload(&self) -> bool {
        match (self.key_id.as_deref(), self.signed_key_id()) {
            (None, _) => true,
            (Some(claimed), Some(signed)) => claimed == signed,
            (Some(_), None) => false,
        }
    }
}

/// Every individual check, plus the derived verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationChecks {
    pub manifest_hash: String,
    pub signer_mode: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signer_key_id: Option<String>,
    /// The block's `key_id`, when present, equals the signed one.
    pub signer_key_id_matches_payload: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signer_public_key_fingerprint: Option<String>,
    pub signature_valid: bool,
    pub payload_binds_manifest_hash: bool,
    /// `None` when no CSV content was supplied.
    pub csv_hash_matches_manifest: Option<bool>,
    pub key_id_trusted: TrustCheck,
    pub public_key_trusted: TrustCheck,
    pub signer_registry_status: RegistryStatus,
    pub trust_policy_mode: TrustPolicyMode,
    pub trust_policy_applies: bool,
    pub trust_check_passed: bool,
    pub verification_passed: bool,
}

/// Result of [`verify_manifest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReceipt {
    /// SHA-256 of the canonical checks; stable across repeated verifications.
    pub receipt_id: String,
    pub verified_at: DateTime<Utc>,
    #[serde(flatten)]
    pub checks: VerificationChecks,
}

/// Verify a manifest against its signer block at time `at`.
pub fn verify_manifest(
    policy: &TrustPolicy,
    registry: &TrustRegistry<'_>,
    manifest: &Manifest,
    signer: &SignerBlock,
    csv_content: Option<&[u8]>,
    at: DateTime<Utc>,
) -> TrustResult<VerificationReceipt> {
    // 1. Manifest hash shape
    if !is_sha256_hex(&manifest.hash) {
        return Err(TrustError::invalid(
            "manifest.hash must be 64 lowercase hex characters",
        ));
    }

    // 2. Only server-attested blocks can be checked here
    if signer.mode != SIGNER_MODE_SERVER_ATTESTED {
        return Err(TrustError::Unverifiable {
            reason: format!(
                "signer mode {:?} is not {}",
                signer.mode, SIGNER_MODE_SERVER_ATTESTED
            ),
        });
    }

    // 3. Signature over canonical payload bytes
    let canonical = to_canonical_bytes(&signer.payload)?;
    let algorithm_ok = signer
        .algorithm
        .as_deref()
        .map_or(true, |alg| alg.eq_ignore_ascii_case(ALGORITHM_ED25519));
    let key_id_matches_payload = signer.key_id_matches_payload();
    if !key_id_matches_payload {
        tracing::warn!(
            claimed = ?signer.key_id,
            signed = ?signer.signed_key_id(),
            "signer block key_id disagrees with signed payload"
        );
    }
    let (signature_valid, fingerprint) = match decode_public_key(&signer.public_key) {
        Ok((key, fingerprint)) => (
            algorithm_ok
                && key_id_matches_payload
                && verify_signature(&key, &canonical, &signer.signature),
            Some(fingerprint),
        ),
        Err(e) => {
            tracing::debug!(error = %e, "signer public key does not decode");
            (false, None)
        }
    };

    // 4. Payload must bind this manifest (blocks replay onto another export)
    let payload_binds_manifest_hash = signer
        .payload_manifest_hash()
        .is_some_and(|h| h.to_ascii_lowercase() == manifest.hash);

    // 5. Optional content hash
    let csv_hash_matches_manifest = match csv_content {
        Some(bytes) => Some(sha256_hex_reader(bytes)? == manifest.hash),
        None => None,
    };

    // 6. Trust at verification time
    let key_id = signer.signed_key_id();
    let trust =
        resolve_signer_trust_status(policy, registry, key_id, fingerprint.as_deref(), at);

    let verification_passed = signature_valid
        && payload_binds_manifest_hash
        && csv_hash_matches_manifest != Some(false)
        && (policy.mode != TrustPolicyMode::Enforced || trust.trust_check_passed);

    let checks = VerificationChecks {
        manifest_hash: manifest.hash.clone(),
        signer_mode: signer.mode.clone(),
        signer_key_id: key_id.map(str::to_string),
        signer_key_id_matches_payload: key_id_matches_payload,
        signer_public_key_fingerprint: fingerprint,
        signature_valid,
        payload_binds_manifest_hash,
        csv_hash_matches_manifest,
        key_id_trusted: trust.key_id_trusted,
        public_key_trusted: trust.public_key_trusted,
        signer_registry_status: trust.registry_status,
        trust_policy_mode: policy.mode,
        trust_policy_applies: trust.trust_policy_applies,
        trust_check_passed: trust.trust_check_passed,
        verification_passed,
    };

    Ok(VerificationReceipt {
        receipt_id: canonical_sha256(&checks)?,
        verified_at: at,
        checks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signer::{ExportSigner, ManifestSigner, ReceiptRequest};
    use crate::types::{SignerStatus, TrustedSignerEntry};
    use serde_json::json;

    const CSV: &[u8] = b"case_id,event\nC-1,opened\n";

    fn hash_a() -> String {
        "a".repeat(64)
    }

    fn signed_block(manifest_hash: &str) -> SignerBlock {
        let signer = ExportSigner::new(
            Some(ManifestSigner::generate(Some("k1".into())).unwrap()),
            None,
        );
        let receipt = signer
            .build_receipt(&ReceiptRequest {
                manifest_hash: manifest_hash.to_string(),
                export_type: "case_audit_timeline".into(),
                generated_at: "2026-04-02T10:15:00Z".into(),
                row_count: 12,
                context: json!({}),
                actor_id: None,
            })
            .unwrap();
        SignerBlock::from_receipt(&receipt).unwrap()
    }

    fn verify(
        policy: &TrustPolicy,
        runtime: &[TrustedSignerEntry],
        manifest: &Manifest,
        block: &SignerBlock,
        csv: Option<&[u8]>,
    ) -> TrustResult<VerificationReceipt> {
        let registry = TrustRegistry::new(&[], runtime);
        verify_manifest(policy, &registry, manifest, block, csv, Utc::now())
    }

    #[test]
    fn test_valid_block_passes_with_policy_off() {
        let block = signed_block(&hash_a());
        let receipt = verify(
            &TrustPolicy::default(),
            &[],
            &Manifest::with_hash(hash_a()),
            &block,
            None,
        )
        .unwrap();

        assert!(receipt.checks.signature_valid);
        assert!(receipt.checks.payload_binds_manifest_hash);
        assert_eq!(receipt.checks.csv_hash_matches_manifest, None);
        assert!(receipt.checks.verification_passed);
        assert_eq!(receipt.receipt_id.len(), 64);
    }

    #[test]
    fn test_rejects_malformed_manifest_hash() {
        let block = signed_block(&hash_a());
        let result = verify(
            &TrustPolicy::default(),
            &[],
            &Manifest::with_hash("A".repeat(64)),
            &block,
            None,
        );
        assert!(matches!(result, Err(TrustError::InvalidInput { .. })));
    }

    #[test]
    fn test_rejects_non_server_mode() {
        let mut block = signed_block(&hash_a());
        block.mode = "client_attested".into();
        let result = verify(
            &TrustPolicy::default(),
            &[],
            &Manifest::with_hash(hash_a()),
            &block,
            None,
        );
        assert!(matches!(result, Err(TrustError::Unverifiable { .. })));
    }

    #[test]
    fn test_replay_against_other_manifest_is_detected() {
        let block = signed_block(&hash_a());
        let other = "b".repeat(64);
        let receipt = verify(
            &TrustPolicy::default(),
            &[],
            &Manifest::with_hash(other),
            &block,
            None,
        )
        .unwrap();

        assert!(receipt.checks.signature_valid);
        assert!(!receipt.checks.payload_binds_manifest_hash);
        assert!(!receipt.checks.verification_passed);
    }

    #[test]
    fn test_tampered_payload_fails_signature() {
        let mut block = signed_block(&hash_a());
        block.payload["row_count"] = json!(13);
        let receipt = verify(
            &TrustPolicy::default(),
            &[],
            &Manifest::with_hash(hash_a()),
            &block,
            None,
        )
        .unwrap();
        assert!(!receipt.checks.signature_valid);
        assert!(!receipt.checks.verification_passed);
    }

    #[test]
    fn test_foreign_public_key_fails_signature() {
        let mut block = signed_block(&hash_a());
        let other = ManifestSigner::generate(None).unwrap();
        block.public_key = other.public_key().to_string();
        let receipt = verify(
            &TrustPolicy::default(),
            &[],
            &Manifest::with_hash(hash_a()),
            &block,
            None,
        )
        .unwrap();
        assert!(!receipt.checks.signature_valid);
        assert_eq!(
            receipt.checks.signer_public_key_fingerprint.as_deref(),
            Some(other.fingerprint())
        );
    }

    #[test]
    fn test_garbage_public_key_is_reported_not_raised() {
        let mut block = signed_block(&hash_a());
        block.public_key = "%%%".into();
        let receipt = verify(
            &TrustPolicy::default(),
            &[],
            &Manifest::with_hash(hash_a()),
            &block,
            None,
        )
        .unwrap();
        assert!(!receipt.checks.signature_valid);
        assert!(receipt.checks.signer_public_key_fingerprint.is_none());
    }

    #[test]
    fn test_csv_hash_check() {
        let csv_hash = crate::digest::sha256_hex(CSV);
        let block = signed_block(&csv_hash);
        let manifest = Manifest::with_hash(csv_hash);

        let ok = verify(&TrustPolicy::default(), &[], &manifest, &block, Some(CSV)).unwrap();
        assert_eq!(ok.checks.csv_hash_matches_manifest, Some(true));
        assert!(ok.checks.verification_passed);

        let bad = verify(
            &TrustPolicy::default(),
            &[],
            &manifest,
            &block,
            Some(b"case_id,event\n"),
        )
        .unwrap();
        assert_eq!(bad.checks.csv_hash_matches_manifest, Some(false));
        assert!(!bad.checks.verification_passed);
    }

    #[test]
    fn test_advisory_mode_reports_but_does_not_block() {
        let block = signed_block(&hash_a());
        let runtime = vec![TrustedSignerEntry::for_key_id("someone-else")];
        let receipt = verify(
            &TrustPolicy::new(TrustPolicyMode::Advisory),
            &runtime,
            &Manifest::with_hash(hash_a()),
            &block,
            None,
        )
        .unwrap();

        assert_eq!(
            receipt.checks.signer_registry_status,
            RegistryStatus::NotListed
        );
        assert!(!receipt.checks.trust_check_passed);
        assert!(receipt.checks.verification_passed);
    }

    #[test]
    fn test_enforced_mode_blocks_revoked_signer() {
        let block = signed_block(&hash_a());
        let mut entry = TrustedSignerEntry::for_key_id("k1");
        entry.status = SignerStatus::Revoked;
        let receipt = verify(
            &TrustPolicy::new(TrustPolicyMode::Enforced),
            &[entry],
            &Manifest::with_hash(hash_a()),
            &block,
            None,
        )
        .unwrap();

        assert!(receipt.checks.signature_valid);
        assert_eq!(receipt.checks.signer_registry_status, RegistryStatus::Revoked);
        assert!(!receipt.checks.verification_passed);
    }

    #[test]
    fn test_unsigned_key_id_cannot_borrow_another_signers_trust() {
        let block = signed_block(&hash_a());
        let mut revoked = TrustedSignerEntry::for_key_id("k1");
        revoked.status = SignerStatus::Revoked;
        let runtime = vec![revoked, TrustedSignerEntry::for_key_id("k2")];
        let policy = TrustPolicy::new(TrustPolicyMode::Enforced);
        let manifest = Manifest::with_hash(hash_a());

        let mut relabeled = block.clone();
        relabeled.key_id = Some("k2".into());
        let receipt = verify(&policy, &runtime, &manifest, &relabeled, None).unwrap();

        assert!(!receipt.checks.signer_key_id_matches_payload);
        assert!(!receipt.checks.signature_valid);
        assert_eq!(receipt.checks.signer_key_id.as_deref(), Some("k1"));
        assert_eq!(receipt.checks.signer_registry_status, RegistryStatus::Revoked);
        assert!(!receipt.checks.verification_passed);

        // Dropping the unsigned label changes nothing: trust follows the payload
        let mut unlabeled = block;
        unlabeled.key_id = None;
        let receipt = verify(&policy, &runtime, &manifest, &unlabeled, None).unwrap();
        assert!(receipt.checks.signer_key_id_matches_payload);
        assert!(receipt.checks.signature_valid);
        assert_eq!(receipt.checks.signer_registry_status, RegistryStatus::Revoked);
        assert!(!receipt.checks.verification_passed);
    }

    #[test]
    fn test_receipt_id_is_stable_and_serialized_flat() {
        let block = signed_block(&hash_a());
        let manifest = Manifest::with_hash(hash_a());
        let first = verify(&TrustPolicy::default(), &[], &manifest, &block, None).unwrap();
        let second = verify(&TrustPolicy::default(), &[], &manifest, &block, None).unwrap();
        assert_eq!(first.receipt_id, second.receipt_id);

        let json = serde_json::to_value(&first).unwrap();
        assert_eq!(json["signer_registry_status"], "not_configured");
        assert_eq!(json["csv_hash_matches_manifest"], Value::Null);
        assert_eq!(json["key_id_trusted"], Value::Null);
    }
}
