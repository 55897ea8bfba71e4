//! Canonical encoding of signing input.
//!
//! Every byte that is signed or hashed goes through [`to_canonical_bytes`],
//! which serializes with the JSON Canonicalization Scheme (RFC 8785):
//!
//! - object keys sorted lexicographically at every depth
//! - array order preserved
//! - no insignificant whitespace
//! - numbers in their shortest round-trip form
//!
//! "Absent" is not the same as `null`: struct fields declared
//! `#[serde(skip_serializing_if = "Option::is_none")]` disappear from the
//! output entirely, while an explicit `Value::Null` is encoded as `null`.
//! Producer and verifier must agree byte-for-byte, so nothing else in the
//! crate may serialize signing input another way.

use serde::Serialize;

use crate::digest::sha256_hex;
use crate::error::{TrustError, TrustResult};

/// Serialize `value` to canonical JSON bytes.
pub fn to_canonical_bytes<T: Serialize + ?Sized>(value: &T) -> TrustResult<Vec<u8>> {
    serde_jcs::to_vec(value).map_err(|e| TrustError::InvalidInput {
        reason: format!("value cannot be canonicalized: {}", e),
    })
}

/// Canonical JSON as a UTF-8 string.
pub fn to_canonical_string<T: Serialize + ?Sized>(value: &T) -> TrustResult<String> {
    serde_jcs::to_string(value).map_err(|e| TrustError::InvalidInput {
        reason: format!("value cannot be canonicalized: {}", e),
    })
}

/// SHA-256 (lowercase hex) of the canonical encoding.
pub fn canonical_sha256<T: Serialize + ?Sized>(value: &T) -> TrustResult<String> {
    Ok(sha256_hex(&to_canonical_bytes(value)?))
}
