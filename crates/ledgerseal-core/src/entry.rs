//! Normalization of loosely-structured signer entries.
//!
//! Registry entries arrive from env JSON, config files and admin requests in
//! whatever shape the caller produced. [`normalize_entry`] is the single
//! gate: it yields a fully-validated [`TrustedSignerEntry`] or an
//! [`EntryRejection`] naming what was wrong. Nothing partially validated is
//! passed downstream.
//!
//! Accepted field spellings (snake_case or camelCase):
//!
//! | Field | Aliases |
//! |-------|---------|
//! | `key_id` | `keyId`, `kid` |
//! | `public_key_fingerprint` | `publicKeyFingerprint`, `fingerprint` |
//! | `not_before` | `notBefore` |
//! | `not_after` | `notAfter` |
//! | `status` | none (defaults to `active`) |
//! | `label` | none |

use std::fmt;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::digest::is_sha256_hex;
use crate::error::{TrustError, TrustResult};
use crate::types::{SignerStatus, TrustedSignerEntry, MAX_REGISTRY_ENTRIES};

/// Why a raw entry was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryRejection {
    /// Entry is not a JSON object.
    NotAnObject,
    /// Neither key id nor fingerprint is set.
    MissingIdentifier,
    /// Fingerprint is not `sha256:<64 hex>` (or bare 64 hex).
    InvalidFingerprint { value: String },
    /// Timestamp field does not parse as RFC 3339.
    InvalidTimestamp { field: &'static str, value: String },
    /// `not_before` is after `not_after`.
    InvertedWindow,
    /// Status is not one of active / revoked / disabled.
    UnknownStatus { status: String },
    /// A field has the wrong JSON type.
    WrongType { field: &'static str },
}

impl fmt::Display for EntryRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAnObject => write!(f, "entry must be an object"),
            Self::MissingIdentifier => {
                write!(f, "entry needs a key_id or a public_key_fingerprint")
            }
            Self::InvalidFingerprint { value } => write!(f, "invalid fingerprint: {}", value),
            Self::InvalidTimestamp { field, value } => {
                write!(f, "{} is not an RFC 3339 timestamp: {}", field, value)
            }
            Self::InvertedWindow => write!(f, "not_before is after not_after"),
            Self::UnknownStatus { status } => write!(f, "unknown status: {}", status),
            Self::WrongType { field } => write!(f, "{} has the wrong type", field),
        }
    }
}

impl std::error::Error for EntryRejection {}

fn field<'a>(obj: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    names
        .iter()
        .filter_map(|name| obj.get(*name))
        .find(|v| !v.is_null())
}

fn string_field(
    obj: &Map<String, Value>,
    names: &[&str],
    canonical: &'static str,
) -> Result<Option<String>, EntryRejection> {
    match field(obj, names) {
        None => Ok(None),
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                Ok(None)
            } else {
                Ok(Some(trimmed.to_string()))
            }
        }
        Some(_) => Err(EntryRejection::WrongType { field: canonical }),
    }
}

fn timestamp_field(
    obj: &Map<String, Value>,
    names: &[&str],
    canonical: &'static str,
) -> Result<Option<DateTime<Utc>>, EntryRejection> {
    match string_field(obj, names, canonical)? {
        None => Ok(None),
        Some(raw) => DateTime::parse_from_rfc3339(&raw)
            .map(|t| Some(t.with_timezone(&Utc)))
            .map_err(|_| EntryRejection::InvalidTimestamp {
                field: canonical,
                value: raw,
            }),
    }
}

/// Normalize a fingerprint to `sha256:<lowercase-hex>`.
pub fn normalize_fingerprint(raw: &str) -> Result<String, EntryRejection> {
    let lower = raw.trim().to_ascii_lowercase();
    let hex = lower.strip_prefix("sha256:").unwrap_or(&lower);
    if is_sha256_hex(hex) {
        Ok(format!("sha256:{}", hex))
    } else {
        Err(EntryRejection::InvalidFingerprint {
            value: raw.to_string(),
        })
    }
}

/// Validate one raw entry.
pub fn normalize_entry(raw: &Value) -> Result<TrustedSignerEntry, EntryRejection> {
    let obj = raw.as_object().ok_or(EntryRejection::NotAnObject)?;

    let key_id = string_field(obj, &["key_id", "keyId", "kid"], "key_id")?;
    let public_key_fingerprint = string_field(
        obj,
        &["public_key_fingerprint", "publicKeyFingerprint", "fingerprint"],
        "public_key_fingerprint",
    )?
    .map(|fp| normalize_fingerprint(&fp))
    .transpose()?;

    if key_id.is_none() && public_key_fingerprint.is_none() {
        return Err(EntryRejection::MissingIdentifier);
    }

    let not_before = timestamp_field(obj, &["not_before", "notBefore"], "not_before")?;
    let not_after = timestamp_field(obj, &["not_after", "notAfter"], "not_after")?;
    if let (Some(nb), Some(na)) = (not_before, not_after) {
        if nb > na {
            return Err(EntryRejection::InvertedWindow);
        }
    }

    let status = match string_field(obj, &["status"], "status")? {
        None => SignerStatus::Active,
        Some(s) => match s.to_ascii_lowercase().as_str() {
            "active" => SignerStatus::Active,
            "revoked" => SignerStatus::Revoked,
            "disabled" => SignerStatus::Disabled,
            _ => return Err(EntryRejection::UnknownStatus { status: s }),
        },
    };

    let label = string_field(obj, &["label"], "label")?;

    Ok(TrustedSignerEntry {
        key_id,
        public_key_fingerprint,
        not_before,
        not_after,
        status,
        label,
    })
}

/// Validate a proposed runtime list against the combined-size cap.
///
/// `env_count` is the number of immutable env entries that will sit in
/// front of the list.
pub fn normalize_entries(raw: &[Value], env_count: usize) -> TrustResult<Vec<TrustedSignerEntry>> {
    let total = env_count.saturating_add(raw.len());
    if total > MAX_REGISTRY_ENTRIES {
        return Err(TrustError::invalid(format!(
            "registry would hold {} entries, limit is {}",
            total, MAX_REGISTRY_ENTRIES
        )));
    }

    raw.iter()
        .enumerate()
        .map(|(index, value)| {
            normalize_entry(value)
                .map_err(|rejection| TrustError::invalid(format!("entry {}: {}", index, rejection)))
        })
        .collect()
}

/// Re-validate already-typed entries (e.g. deserialized from a file).
pub fn revalidate_entries(
    entries: &[TrustedSignerEntry],
    env_count: usize,
) -> TrustResult<Vec<TrustedSignerEntry>> {
    let raw = entries
        .iter()
        .map(serde_json::to_value)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TrustError::invalid(format!("entry cannot be encoded: {}", e)))?;
    normalize_entries(&raw, env_count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_accepts_camel_case() {
        let entry = normalize_entry(&json!({
            "keyId": "k1",
            "notBefore": "2026-01-01T00:00:00Z",
            "notAfter": "2026-12-31T23:59:59+02:00",
            "status": "Revoked"
        }))
        .unwrap();

        assert_eq!(entry.key_id.as_deref(), Some("k1"));
        assert_eq!(entry.status, SignerStatus::Revoked);
        assert_eq!(
            entry.not_after.unwrap().to_rfc3339(),
            "2026-12-31T21:59:59+00:00"
        );
    }

    #[test]
    fn test_defaults_to_active() {
        let entry = normalize_entry(&json!({"key_id": "k1"})).unwrap();
        assert_eq!(entry.status, SignerStatus::Active);
        assert!(entry.not_before.is_none());
    }

    #[test]
    fn test_requires_identifier() {
        assert_eq!(
            normalize_entry(&json!({"status": "active"})),
            Err(EntryRejection::MissingIdentifier)
        );
        assert_eq!(
            normalize_entry(&json!({"key_id": "   "})),
            Err(EntryRejection::MissingIdentifier)
        );
    }

    #[test]
    fn test_rejects_non_object() {
        assert_eq!(normalize_entry(&json!("k1")), Err(EntryRejection::NotAnObject));
    }

    #[test]
    fn test_rejects_inverted_window() {
        let result = normalize_entry(&json!({
            "key_id": "k1",
            "not_before": "2026-06-01T00:00:00Z",
            "not_after": "2026-01-01T00:00:00Z"
        }));
        assert_eq!(result, Err(EntryRejection::InvertedWindow));
    }

    #[test]
    fn test_equal_window_bounds_allowed() {
        let entry = normalize_entry(&json!({
            "key_id": "k1",
            "not_before": "2026-06-01T00:00:00Z",
            "not_after": "2026-06-01T00:00:00Z"
        }));
        assert!(entry.is_ok());
    }

    #[test]
    fn test_rejects_bad_timestamp() {
        let result = normalize_entry(&json!({"key_id": "k1", "not_after": "tomorrow"}));
        assert!(matches!(
            result,
            Err(EntryRejection::InvalidTimestamp {
                field: "not_after",
                ..
            })
        ));
    }

    #[test]
    fn test_rejects_unknown_status() {
        let result = normalize_entry(&json!({"key_id": "k1", "status": "paused"}));
        assert!(matches!(result, Err(EntryRejection::UnknownStatus { .. })));
    }

    #[test]
    fn test_rejects_wrong_type() {
        let result = normalize_entry(&json!({"key_id": 7}));
        assert_eq!(result, Err(EntryRejection::WrongType { field: "key_id" }));
    }

    #[test]
    fn test_fingerprint_normalized() {
        let raw = format!("SHA256:{}", "AB".repeat(32));
        let entry = normalize_entry(&json!({"fingerprint": raw})).unwrap();
        assert_eq!(
            entry.public_key_fingerprint,
            Some(format!("sha256:{}", "ab".repeat(32)))
        );

        let bare = normalize_fingerprint(&"cd".repeat(32)).unwrap();
        assert!(bare.starts_with("sha256:cdcd"));
        assert!(normalize_fingerprint("sha256:1234").is_err());
    }

    #[test]
    fn test_entry_cap_counts_env_entries() {
        let raw: Vec<Value> = (0..150).map(|i| json!({"key_id": format!("k{}", i)})).collect();
        assert!(normalize_entries(&raw, 50).is_ok());
        let err = normalize_entries(&raw, 51).unwrap_err();
        assert!(matches!(err, TrustError::InvalidInput { .. }));
    }

    #[test]
    fn test_rejection_carries_index() {
        let raw = vec![json!({"key_id": "k1"}), json!({"status": "active"})];
        let err = normalize_entries(&raw, 0).unwrap_err();
        assert!(err.to_string().contains("entry 1"));
    }
}
