//! Trust policy evaluation.
//!
//! Three independent checks can be configured: a key-id allow-set, a
//! fingerprint allow-set, and the signer registry. An unconfigured check has
//! no opinion ([`TrustCheck::NotConfigured`]) and never fails verification;
//! only an explicit [`TrustCheck::Untrusted`] from a configured check does.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};

use crate::registry::{RegistryStatus, TrustRegistry};
use crate::types::TrustPolicyMode;

/// Outcome of a single trust check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustCheck {
    Trusted,
    Untrusted,
    NotConfigured,
}

impl TrustCheck {
    fn from_membership(configured: bool, member: bool) -> Self {
        match (configured, member) {
            (false, _) => Self::NotConfigured,
            (true, true) => Self::Trusted,
            (true, false) => Self::Untrusted,
        }
    }

    /// `Some(bool)` when configured, `None` when the check has no opinion.
    pub fn as_option(self) -> Option<bool> {
        match self {
            Self::Trusted => Some(true),
            Self::Untrusted => Some(false),
            Self::NotConfigured => None,
        }
    }

    pub fn is_configured(self) -> bool {
        self != Self::NotConfigured
    }

    pub fn is_untrusted(self) -> bool {
        self == Self::Untrusted
    }
}

impl Serialize for TrustCheck {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.as_option().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for TrustCheck {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match Option::<bool>::deserialize(deserializer)? {
            Some(true) => Self::Trusted,
            Some(false) => Self::Untrusted,
            None => Self::NotConfigured,
        })
    }
}

/// Static allow-sets and mode, fixed at startup.
#[derive(Debug, Clone, Default)]
pub struct TrustPolicy {
    pub mode: TrustPolicyMode,
    pub trusted_key_ids: BTreeSet<String>,
    /// Lowercase `sha256:<hex>` fingerprints.
    pub trusted_fingerprints: BTreeSet<String>,
}

impl TrustPolicy {
    pub fn new(mode: TrustPolicyMode) -> Self {
        Self {
            mode,
            ..Default::default()
        }
    }

    pub fn with_key_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.trusted_key_ids.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn with_fingerprints<I, S>(mut self, fingerprints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.trusted_fingerprints.extend(
            fingerprints
                .into_iter()
                .map(|fp| fp.into().to_ascii_lowercase()),
        );
        self
    }

    fn key_id_check(&self, key_id: Option<&str>) -> TrustCheck {
        TrustCheck::from_membership(
            !self.trusted_key_ids.is_empty(),
            key_id.is_some_and(|id| self.trusted_key_ids.contains(id)),
        )
    }

    fn fingerprint_check(&self, fingerprint: Option<&str>) -> TrustCheck {
        TrustCheck::from_membership(
            !self.trusted_fingerprints.is_empty(),
            fingerprint.is_some_and(|fp| {
                self.trusted_fingerprints
                    .contains(&fp.to_ascii_lowercase())
            }),
        )
    }
}

/// Trust resolution for one signer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignerTrustStatus {
    pub key_id_trusted: TrustCheck,
    pub public_key_trusted: TrustCheck,
    pub registry_status: RegistryStatus,
    pub trust_policy_applies: bool,
    pub trust_check_passed: bool,
}

impl SignerTrustStatus {
    /// Registry check expressed in the same three-valued form.
    pub fn registry_check(&self) -> TrustCheck {
        match self.registry_status {
            RegistryStatus::NotConfigured => TrustCheck::NotConfigured,
            RegistryStatus::Active => TrustCheck::Trusted,
            _ => TrustCheck::Untrusted,
        }
    }
}

/// Resolve whether a signer is trusted at `at`.
pub fn resolve_signer_trust_status(
    policy: &TrustPolicy,
    registry: &TrustRegistry<'_>,
    key_id: Option<&str>,
    fingerprint: Option<&str>,
    at: DateTime<Utc>,
) -> SignerTrustStatus {
    let key_id_trusted = policy.key_id_check(key_id);
    let public_key_trusted = policy.fingerprint_check(fingerprint);
    let registry_status = registry.status_of(key_id, fingerprint, at);

    let mut status = SignerTrustStatus {
        key_id_trusted,
        public_key_trusted,
        registry_status,
        trust_policy_applies: false,
        trust_check_passed: true,
    };

    let checks = [key_id_trusted, public_key_trusted, status.registry_check()];
    let any_configured = checks.iter().any(|c| c.is_configured());
    status.trust_policy_applies = policy.mode != TrustPolicyMode::Off && any_configured;
    status.trust_check_passed =
        !status.trust_policy_applies || !checks.iter().any(|c| c.is_untrusted());

    status
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SignerStatus, TrustedSignerEntry};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 9, 30, 0).unwrap()
    }

    #[test]
    fn test_unconfigured_checks_have_no_opinion() {
        let policy = TrustPolicy::new(TrustPolicyMode::Enforced);
        let registry = TrustRegistry::new(&[], &[]);
        let status = resolve_signer_trust_status(&policy, &registry, Some("k1"), None, now());

        assert_eq!(status.key_id_trusted, TrustCheck::NotConfigured);
        assert_eq!(status.public_key_trusted, TrustCheck::NotConfigured);
        assert_eq!(status.registry_status, RegistryStatus::NotConfigured);
        assert!(!status.trust_policy_applies);
        assert!(status.trust_check_passed);
    }

    #[test]
    fn test_mode_off_always_passes() {
        let policy = TrustPolicy::new(TrustPolicyMode::Off).with_key_ids(["k1"]);
        let runtime = vec![TrustedSignerEntry::for_key_id("k1")];
        let registry = TrustRegistry::new(&[], &runtime);

        let status = resolve_signer_trust_status(&policy, &registry, Some("evil"), None, now());
        assert_eq!(status.key_id_trusted, TrustCheck::Untrusted);
        assert_eq!(status.registry_status, RegistryStatus::NotListed);
        assert!(!status.trust_policy_applies);
        assert!(status.trust_check_passed);
    }

    #[test]
    fn test_enforced_unlisted_signer_fails() {
        let policy = TrustPolicy::new(TrustPolicyMode::Enforced);
        let runtime = vec![TrustedSignerEntry::for_key_id("k1")];
        let registry = TrustRegistry::new(&[], &runtime);

        let status = resolve_signer_trust_status(&policy, &registry, Some("k2"), None, now());
        assert!(status.trust_policy_applies);
        assert!(!status.trust_check_passed);
    }

    #[test]
    fn test_only_configured_checks_count() {
        // Fingerprint allow-set configured, key-id allow-set not: unknown key id is fine.
        let fp = format!("sha256:{}", "b".repeat(64));
        let policy = TrustPolicy::new(TrustPolicyMode::Advisory).with_fingerprints([fp.clone()]);
        let registry = TrustRegistry::new(&[], &[]);

        let status =
            resolve_signer_trust_status(&policy, &registry, Some("anything"), Some(&fp), now());
        assert_eq!(status.key_id_trusted, TrustCheck::NotConfigured);
        assert_eq!(status.public_key_trusted, TrustCheck::Trusted);
        assert!(status.trust_policy_applies);
        assert!(status.trust_check_passed);
    }

    #[test]
    fn test_revoked_registry_entry_fails_even_if_allowlisted() {
        let policy = TrustPolicy::new(TrustPolicyMode::Enforced).with_key_ids(["k1"]);
        let mut entry = TrustedSignerEntry::for_key_id("k1");
        entry.status = SignerStatus::Revoked;
        let runtime = vec![entry];
        let registry = TrustRegistry::new(&[], &runtime);

        let status = resolve_signer_trust_status(&policy, &registry, Some("k1"), None, now());
        assert_eq!(status.key_id_trusted, TrustCheck::Trusted);
        assert_eq!(status.registry_status, RegistryStatus::Revoked);
        assert!(!status.trust_check_passed);
    }

    #[test]
    fn test_trust_check_serializes_as_nullable_bool() {
        let json = serde_json::to_string(&[
            TrustCheck::Trusted,
            TrustCheck::Untrusted,
            TrustCheck::NotConfigured,
        ])
        .unwrap();
        assert_eq!(json, "[true,false,null]");
    }
}
