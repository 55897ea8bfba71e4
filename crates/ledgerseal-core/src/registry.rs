//! Combined trusted signer registry.
//!
//! The registry is the ordered union of the immutable env list (from
//! startup configuration) and the mutable runtime list (persisted by the
//! [`crate::store::RegistryStore`]). Lookups are first-match, env first.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{SignerStatus, TrustedSignerEntry};

/// Resolved status of a signer against the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistryStatus {
    Active,
    Revoked,
    NotYetValid,
    Expired,
    /// Registry is non-empty but has no entry for this signer.
    NotListed,
    /// Registry is empty, so it has no opinion.
    NotConfigured,
}

impl RegistryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Revoked => "revoked",
            Self::NotYetValid => "not_yet_valid",
            Self::Expired => "expired",
            Self::NotListed => "not_listed",
            Self::NotConfigured => "not_configured",
        }
    }
}

impl fmt::Display for RegistryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a single entry at `at`.
///
/// Revoked/disabled wins over the window; window bounds are inclusive.
pub fn entry_status_at(entry: &TrustedSignerEntry, at: DateTime<Utc>) -> RegistryStatus {
    match entry.status {
        SignerStatus::Revoked | SignerStatus::Disabled => return RegistryStatus::Revoked,
        SignerStatus::Active => {}
    }
    if let Some(not_before) = entry.not_before {
        if at < not_before {
            return RegistryStatus::NotYetValid;
        }
    }
    if let Some(not_after) = entry.not_after {
        if at > not_after {
            return RegistryStatus::Expired;
        }
    }
    RegistryStatus::Active
}

/// Read-only view over env + runtime entries.
#[derive(Debug, Clone, Copy)]
pub struct TrustRegistry<'a> {
    env_entries: &'a [TrustedSignerEntry],
    runtime_entries: &'a [TrustedSignerEntry],
}

impl<'a> TrustRegistry<'a> {
    pub fn new(
        env_entries: &'a [TrustedSignerEntry],
        runtime_entries: &'a [TrustedSignerEntry],
    ) -> Self {
        Self {
            env_entries,
            runtime_entries,
        }
    }

    pub fn env_entries(&self) -> &'a [TrustedSignerEntry] {
        self.env_entries
    }

    pub fn runtime_entries(&self) -> &'a [TrustedSignerEntry] {
        self.runtime_entries
    }

    /// All entries, env first.
    pub fn iter(&self) -> impl Iterator<Item = &'a TrustedSignerEntry> + 'a {
        self.env_entries.iter().chain(self.runtime_entries.iter())
    }

    pub fn len(&self) -> usize {
        self.env_entries.len() + self.runtime_entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// First entry matching the key id or fingerprint.
    pub fn find(
        &self,
        key_id: Option<&str>,
        fingerprint: Option<&str>,
    ) -> Option<&'a TrustedSignerEntry> {
        self.iter().find(|entry| entry.matches(key_id, fingerprint))
    }

    /// Registry status of a signer at `at`.
    pub fn status_of(
        &self,
        key_id: Option<&str>,
        fingerprint: Option<&str>,
        at: DateTime<Utc>,
    ) -> RegistryStatus {
        match self.find(key_id, fingerprint) {
            Some(entry) => entry_status_at(entry, at),
            None if self.is_empty() => RegistryStatus::NotConfigured,
            None => RegistryStatus::NotListed,
        }
    }

    /// Number of entries whose window logic resolves to active at `at`.
    pub fn count_active_at(&self, at: DateTime<Utc>) -> usize {
        self.iter()
            .filter(|entry| entry_status_at(entry, at) == RegistryStatus::Active)
            .count()
    }
}
