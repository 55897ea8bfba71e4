//! Receipt signing.
//!
//! The process holds at most one Ed25519 signing key, loaded at startup and
//! never replaced. Signatures are computed over the canonical encoding of
//! the payload (see [`crate::canonical`]), base64-encoded.
//!
//! When no asymmetric key is provisioned, export artifacts can still be
//! signed with an HMAC-SHA256 keyed by a shared server secret
//! ([`HMAC_KEY_ID`]). Manifest receipts always require the asymmetric key.

use std::fmt;
use std::path::Path;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, SecondsFormat, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;

use crate::canonical::to_canonical_bytes;
use crate::digest::{fingerprint_spki, is_sha256_hex};
use crate::error::{TrustError, TrustResult};
use crate::types::{
    ManifestReceiptPayload, SignedReceipt, BUNDLE_TYPE_MANIFEST_RECEIPT, PAYLOAD_ENCODING_JCS,
};

/// Algorithm name for asymmetric signatures.
pub const ALGORITHM_ED25519: &str = "ed25519";

/// Algorithm name for the shared-secret fallback.
pub const ALGORITHM_HMAC_SHA256: &str = "hmac-sha256";

/// Key id reported for HMAC fallback signatures.
pub const HMAC_KEY_ID: &str = "server-hmac-v1";

/// Upper bound on `row_count` in a receipt.
pub const MAX_ROW_COUNT: i64 = 1_000_000;

type HmacSha256 = Hmac<Sha256>;

/// Format a timestamp the way receipts carry it.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// The process signing key.
pub struct ManifestSigner {
    signing_key: SigningKey,
    key_id: String,
    public_key: String,
    fingerprint: String,
}

impl fmt::Debug for ManifestSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManifestSigner")
            .field("key_id", &self.key_id)
            .field("fingerprint", &self.fingerprint)
            .finish_non_exhaustive()
    }
}

impl ManifestSigner {
    /// Wrap an Ed25519 key. `key_id` defaults to the SPKI fingerprint.
    pub fn new(signing_key: SigningKey, key_id: Option<String>) -> TrustResult<Self> {
        let spki = spki_der(&signing_key.verifying_key())?;
        let fingerprint = fingerprint_spki(&spki);
        let key_id = key_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| fingerprint.clone());

        Ok(Self {
            signing_key,
            key_id,
            public_key: BASE64.encode(&spki),
            fingerprint,
        })
    }

    /// Fresh random key (keygen and tests).
    pub fn generate(key_id: Option<String>) -> TrustResult<Self> {
        Self::new(SigningKey::generate(&mut rand::thread_rng()), key_id)
    }

    /// Load from a PKCS#8 PEM string.
    pub fn from_pkcs8_pem(pem: &str, key_id: Option<String>) -> TrustResult<Self> {
        use pkcs8::DecodePrivateKey;

        let signing_key = SigningKey::from_pkcs8_pem(pem).map_err(|e| TrustError::Config {
            message: format!("failed to parse signing key PEM: {}", e),
        })?;
        Self::new(signing_key, key_id)
    }

    /// Load from a PKCS#8 PEM file.
    pub fn from_pem_file(path: &Path, key_id: Option<String>) -> TrustResult<Self> {
        let pem = std::fs::read_to_string(path).map_err(|e| TrustError::Config {
            message: format!("failed to read signing key {}: {}", path.display(), e),
        })?;
        Self::from_pkcs8_pem(&pem, key_id)
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Base64 SPKI DER.
    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    /// `sha256:<hex>` of the SPKI DER public key.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// PKCS#8 PEM of the private key.
    pub fn to_pkcs8_pem(&self) -> TrustResult<String> {
        use pkcs8::{EncodePrivateKey, LineEnding};

        self.signing_key
            .to_pkcs8_pem(LineEnding::LF)
            .map(|pem| pem.to_string())
            .map_err(|e| TrustError::config(format!("failed to encode private key: {}", e)))
    }

    /// SPKI PEM of the public key.
    pub fn public_key_pem(&self) -> TrustResult<String> {
        use pkcs8::{EncodePublicKey, LineEnding};

        self.verifying_key()
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| TrustError::config(format!("failed to encode public key: {}", e)))
    }

    /// Base64 signature over the canonical bytes of `payload`.
    pub fn sign<T: Serialize + ?Sized>(&self, payload: &T) -> TrustResult<String> {
        let bytes = to_canonical_bytes(payload)?;
        Ok(self.sign_bytes(&bytes))
    }

    pub fn sign_bytes(&self, bytes: &[u8]) -> String {
        let signature: Signature = self.signing_key.sign(bytes);
        BASE64.encode(signature.to_bytes())
    }
}

fn spki_der(key: &VerifyingKey) -> TrustResult<Vec<u8>> {
    use pkcs8::EncodePublicKey;

    key.to_public_key_der()
        .map(|doc| doc.as_bytes().to_vec())
        .map_err(|e| TrustError::config(format!("failed to encode public key as SPKI DER: {}", e)))
}

/// Decode a base64 public key (SPKI DER, or raw 32 bytes) and its fingerprint.
pub fn decode_public_key(b64: &str) -> TrustResult<(VerifyingKey, String)> {
    use pkcs8::DecodePublicKey;

    let bytes = BASE64
        .decode(b64.trim())
        .map_err(|e| TrustError::invalid(format!("invalid base64 public key: {}", e)))?;

    let key = if bytes.len() == ed25519_dalek::PUBLIC_KEY_LENGTH {
        let mut raw = [0_u8; ed25519_dalek::PUBLIC_KEY_LENGTH];
        raw.copy_from_slice(&bytes);
        VerifyingKey::from_bytes(&raw)
            .map_err(|e| TrustError::invalid(format!("invalid ed25519 public key: {}", e)))?
    } else {
        VerifyingKey::from_public_key_der(&bytes)
            .map_err(|e| TrustError::invalid(format!("invalid SPKI public key: {}", e)))?
    };

    let fingerprint = fingerprint_spki(&spki_der(&key)?);
    Ok((key, fingerprint))
}

/// Check a base64 Ed25519 signature over `message`.
pub fn verify_signature(key: &VerifyingKey, message: &[u8], signature_b64: &str) -> bool {
    let Ok(bytes) = BASE64.decode(signature_b64.trim()) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(&bytes) else {
        return false;
    };
    key.verify(message, &signature).is_ok()
}

/// Inputs to [`ExportSigner::build_receipt`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiptRequest {
    pub manifest_hash: String,
    pub export_type: String,
    pub generated_at: String,
    pub row_count: i64,
    #[serde(default)]
    pub context: Value,
    #[serde(default)]
    pub actor_id: Option<String>,
}

/// Signature attached to an export artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactSignature {
    pub algorithm: String,
    pub key_id: String,
    pub signature: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
}

/// Signing facade: the optional asymmetric key plus the HMAC fallback.
#[derive(Default)]
pub struct ExportSigner {
    signer: Option<ManifestSigner>,
    hmac_secret: Option<Vec<u8>>,
}

impl fmt::Debug for ExportSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportSigner")
            .field("signer", &self.signer)
            .field("hmac_secret", &self.hmac_secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl ExportSigner {
    pub fn new(signer: Option<ManifestSigner>, hmac_secret: Option<Vec<u8>>) -> Self {
        Self {
            signer,
            hmac_secret: hmac_secret.filter(|s| !s.is_empty()),
        }
    }

    pub fn signer(&self) -> Option<&ManifestSigner> {
        self.signer.as_ref()
    }

    pub fn hmac_available(&self) -> bool {
        self.hmac_secret.is_some()
    }

    fn require_signer(&self) -> TrustResult<&ManifestSigner> {
        self.signer.as_ref().ok_or(TrustError::SigningUnavailable)
    }

    /// Sign `payload` with the process key.
    pub fn sign<T: Serialize + ?Sized>(&self, payload: &T) -> TrustResult<String> {
        self.require_signer()?.sign(payload)
    }

    /// Build a signed manifest receipt, timestamped now.
    pub fn build_receipt(&self, request: &ReceiptRequest) -> TrustResult<SignedReceipt> {
        self.build_receipt_at(request, Utc::now())
    }

    /// Build a signed manifest receipt with an explicit signing time.
    ///
    /// All input validation happens before the key is consulted, so a
    /// malformed request reports `InvalidInput` even on a keyless server.
    pub fn build_receipt_at(
        &self,
        request: &ReceiptRequest,
        signed_at: DateTime<Utc>,
    ) -> TrustResult<SignedReceipt> {
        if !is_sha256_hex(&request.manifest_hash) {
            return Err(TrustError::invalid(
                "manifest_hash must be 64 lowercase hex characters",
            ));
        }
        let export_type = request.export_type.trim();
        if export_type.is_empty() {
            return Err(TrustError::invalid("export_type must not be empty"));
        }
        let generated_at = DateTime::parse_from_rfc3339(request.generated_at.trim())
            .map_err(|e| TrustError::invalid(format!("generated_at is not a timestamp: {}", e)))?
            .with_timezone(&Utc);
        if !(0..=MAX_ROW_COUNT).contains(&request.row_count) {
            return Err(TrustError::invalid(format!(
                "row_count must be between 0 and {}",
                MAX_ROW_COUNT
            )));
        }

        let signer = self.require_signer()?;
        let signed_at = format_timestamp(signed_at);
        let payload = ManifestReceiptPayload {
            bundle_type: BUNDLE_TYPE_MANIFEST_RECEIPT.to_string(),
            export_type: export_type.to_string(),
            manifest_hash_sha256: request.manifest_hash.clone(),
            generated_at: format_timestamp(generated_at),
            row_count: request.row_count.unsigned_abs(),
            signed_at: signed_at.clone(),
            signer_key_id: signer.key_id().to_string(),
            actor_id: request.actor_id.clone(),
            context: request.context.clone(),
        };
        let signature = signer.sign(&payload)?;

        Ok(SignedReceipt {
            algorithm: ALGORITHM_ED25519.to_string(),
            payload_encoding: PAYLOAD_ENCODING_JCS.to_string(),
            key_id: signer.key_id().to_string(),
            public_key: Some(signer.public_key().to_string()),
            signed_at,
            signature,
            payload,
        })
    }

    /// Sign an arbitrary export artifact, falling back to HMAC when no key exists.
    pub fn build_export_artifact_signature<T: Serialize + ?Sized>(
        &self,
        payload: &T,
    ) -> TrustResult<ArtifactSignature> {
        if let Some(signer) = &self.signer {
            return Ok(ArtifactSignature {
                algorithm: ALGORITHM_ED25519.to_string(),
                key_id: signer.key_id().to_string(),
                signature: signer.sign(payload)?,
                public_key: Some(signer.public_key().to_string()),
            });
        }

        let secret = self
            .hmac_secret
            .as_deref()
            .ok_or(TrustError::SigningUnavailable)?;
        let bytes = to_canonical_bytes(payload)?;
        tracing::debug!("no signing key configured, using hmac fallback");

        Ok(ArtifactSignature {
            algorithm: ALGORITHM_HMAC_SHA256.to_string(),
            key_id: HMAC_KEY_ID.to_string(),
            signature: hex::encode(hmac_sha256(secret, &bytes)?),
            public_key: None,
        })
    }

    /// Check an artifact signature produced by this server.
    pub fn verify_export_artifact_signature<T: Serialize + ?Sized>(
        &self,
        payload: &T,
        signature: &ArtifactSignature,
    ) -> TrustResult<bool> {
        let bytes = to_canonical_bytes(payload)?;
        match signature.algorithm.as_str() {
            ALGORITHM_ED25519 => {
                let key = match &signature.public_key {
                    Some(b64) => decode_public_key(b64)?.0,
                    None => self.require_signer()?.verifying_key(),
                };
                Ok(verify_signature(&key, &bytes, &signature.signature))
            }
            ALGORITHM_HMAC_SHA256 => {
                let secret = self
                    .hmac_secret
                    .as_deref()
                    .ok_or(TrustError::SigningUnavailable)?;
                let Ok(expected) = hex::decode(&signature.signature) else {
                    return Ok(false);
                };
                let mut mac = HmacSha256::new_from_slice(secret)
                    .map_err(|e| TrustError::config(format!("invalid hmac secret: {}", e)))?;
                mac.update(&bytes);
                Ok(mac.verify_slice(&expected).is_ok())
            }
            other => Err(TrustError::invalid(format!(
                "unsupported signature algorithm: {}",
                other
            ))),
        }
    }
}

fn hmac_sha256(secret: &[u8], bytes: &[u8]) -> TrustResult<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| TrustError::config(format!("invalid hmac secret: {}", e)))?;
    mac.update(bytes);
    Ok(mac.finalize().into_bytes().to_vec())
}
