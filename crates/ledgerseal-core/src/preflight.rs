//! Rotation preflight.
//!
//! Evaluates a proposed runtime list together with the env list before a
//! rotation is committed. The report never mutates anything; a rotation is
//! refused when [`PreflightReport::valid`] is false.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::registry::TrustRegistry;
use crate::types::{SignerStatus, TrustedSignerEntry};

/// Blocking: nothing will be trusted within the next day.
pub const ERR_NO_ACTIVE_SIGNER_IN_24H: &str = "no_active_signer_in_24h";

pub const WARN_NO_ACTIVE_SIGNER_NOW: &str = "no_active_signer_now";
pub const WARN_RUNTIME_ENTRIES_EMPTY: &str = "runtime_entries_empty";
pub const WARN_NO_STAGED_ENTRIES: &str = "no_staged_entries";

/// Horizon used for the forward-looking active check.
pub fn preflight_horizon() -> Duration {
    Duration::hours(24)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreflightSummary {
    pub total_entries: usize,
    pub active_now_count: usize,
    pub active_in_24h_count: usize,
    /// Active entries whose window has not opened yet.
    pub staged_count: usize,
    pub revoked_count: usize,
    pub disabled_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreflightReport {
    pub valid: bool,
    pub summary: PreflightSummary,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

/// Evaluate env + proposed runtime entries at `now`.
pub fn evaluate_preflight(
    env_entries: &[TrustedSignerEntry],
    proposed: &[TrustedSignerEntry],
    now: DateTime<Utc>,
) -> PreflightReport {
    let registry = TrustRegistry::new(env_entries, proposed);

    let mut summary = PreflightSummary {
        total_entries: registry.len(),
        active_now_count: registry.count_active_at(now),
        active_in_24h_count: registry.count_active_at(now + preflight_horizon()),
        ..Default::default()
    };
    for entry in registry.iter() {
        match entry.status {
            SignerStatus::Revoked => summary.revoked_count += 1,
            SignerStatus::Disabled => summary.disabled_count += 1,
            SignerStatus::Active if entry.not_before.is_some_and(|nb| nb > now) => {
                summary.staged_count += 1;
            }
            SignerStatus::Active => {}
        }
    }

    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if summary.active_in_24h_count == 0 {
        errors.push(ERR_NO_ACTIVE_SIGNER_IN_24H.to_string());
    }
    if summary.active_now_count == 0 {
        warnings.push(WARN_NO_ACTIVE_SIGNER_NOW.to_string());
    }
    if proposed.is_empty() {
        warnings.push(WARN_RUNTIME_ENTRIES_EMPTY.to_string());
    }
    if summary.staged_count == 0 {
        warnings.push(WARN_NO_STAGED_ENTRIES.to_string());
    }

    PreflightReport {
        valid: errors.is_empty(),
        summary,
        warnings,
        errors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 8, 0, 0).unwrap()
    }

    fn entry(key_id: &str, from_h: Option<i64>, until_h: Option<i64>) -> TrustedSignerEntry {
        TrustedSignerEntry {
            not_before: from_h.map(|h| now() + Duration::hours(h)),
            not_after: until_h.map(|h| now() + Duration::hours(h)),
            ..TrustedSignerEntry::for_key_id(key_id)
        }
    }

    #[test]
    fn test_overlapping_rotation_is_valid() {
        // k1 expires in 12h, k2 already active and staying active
        let proposed = vec![entry("k1", None, Some(12)), entry("k2", Some(-1), None)];
        let report = evaluate_preflight(&[], &proposed, now());

        assert!(report.valid);
        assert_eq!(report.summary.active_now_count, 2);
        assert_eq!(report.summary.active_in_24h_count, 1);
        assert!(report.errors.is_empty());
        assert_eq!(report.warnings, vec![WARN_NO_STAGED_ENTRIES.to_string()]);
    }

    #[test]
    fn test_gap_in_coverage_is_blocking() {
        let proposed = vec![entry("k1", None, Some(12))];
        let report = evaluate_preflight(&[], &proposed, now());

        assert!(!report.valid);
        assert_eq!(report.errors, vec![ERR_NO_ACTIVE_SIGNER_IN_24H.to_string()]);
    }

    #[test]
    fn test_staged_only_warns_but_passes() {
        let proposed = vec![entry("k2", Some(6), None)];
        let report = evaluate_preflight(&[], &proposed, now());

        assert!(report.valid);
        assert_eq!(report.summary.staged_count, 1);
        assert!(report
            .warnings
            .contains(&WARN_NO_ACTIVE_SIGNER_NOW.to_string()));
        assert!(!report.warnings.contains(&WARN_NO_STAGED_ENTRIES.to_string()));
    }

    #[test]
    fn test_env_entries_count_toward_coverage() {
        let env = vec![entry("env-key", None, None)];
        let report = evaluate_preflight(&env, &[], now());

        assert!(report.valid);
        assert_eq!(report.summary.total_entries, 1);
        assert!(report
            .warnings
            .contains(&WARN_RUNTIME_ENTRIES_EMPTY.to_string()));
    }

    #[test]
    fn test_revoked_and_disabled_counted() {
        let mut revoked = entry("k1", None, None);
        revoked.status = SignerStatus::Revoked;
        let mut disabled = entry("k2", None, None);
        disabled.status = SignerStatus::Disabled;
        let report = evaluate_preflight(&[], &[revoked, disabled], now());

        assert!(!report.valid);
        assert_eq!(report.summary.revoked_count, 1);
        assert_eq!(report.summary.disabled_count, 1);
        assert_eq!(report.summary.active_now_count, 0);
    }

    #[test]
    fn test_horizon_boundary_is_inclusive() {
        let proposed = vec![entry("k1", None, Some(24))];
        let report = evaluate_preflight(&[], &proposed, now());
        assert!(report.valid);
    }
}
