//! Admin access resolution.
//!
//! An actor is an admin when the role store holds a profile claim for it, or
//! when it is named in the static env allowlist. The allowlist keeps a fresh
//! deployment operable before any claim has been persisted; the reported
//! [`AdminSource`] says which of the two granted access.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where an admin decision came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdminSource {
    ProfileClaim,
    EnvAllowlist,
    None,
}

impl AdminSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ProfileClaim => "profile_claim",
            Self::EnvAllowlist => "env_allowlist",
            Self::None => "none",
        }
    }
}

impl fmt::Display for AdminSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of asking the role store about one actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleLookup {
    Admin,
    NotAdmin,
    /// Role storage is not provisioned (or unreadable).
    Unavailable,
}

/// Authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub actor_id: String,
}

impl Identity {
    pub fn new(actor_id: impl Into<String>) -> Self {
        Self {
            actor_id: actor_id.into().trim().to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminAccess {
    pub is_admin: bool,
    pub source: AdminSource,
    pub role_lookup_available: bool,
}

/// Persisted admin claim for one actor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub actor_id: String,
    pub is_admin: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub granted_by: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Case-insensitive set of allowlisted actor ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdminAllowlist(BTreeSet<String>);

impl AdminAllowlist {
    pub fn new<I, S>(actors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            actors
                .into_iter()
                .map(|a| a.as_ref().trim().to_ascii_lowercase())
                .filter(|a| !a.is_empty())
                .collect(),
        )
    }

    /// Parse a comma-separated list.
    pub fn parse(raw: &str) -> Self {
        Self::new(raw.split(','))
    }

    pub fn contains(&self, actor_id: &str) -> bool {
        self.0.contains(&actor_id.trim().to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

/// Combine a role lookup with the allowlist.
pub fn resolve_admin_access(
    identity: &Identity,
    lookup: RoleLookup,
    allowlist: &AdminAllowlist,
) -> AdminAccess {
    let role_lookup_available = lookup != RoleLookup::Unavailable;

    let source = if identity.actor_id.is_empty() {
        AdminSource::None
    } else if lookup == RoleLookup::Admin {
        AdminSource::ProfileClaim
    } else if allowlist.contains(&identity.actor_id) {
        AdminSource::EnvAllowlist
    } else {
        AdminSource::None
    };

    AdminAccess {
        is_admin: source != AdminSource::None,
        source,
        role_lookup_available,
    }
}
