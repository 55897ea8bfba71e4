//! Read-side views over the audit and snapshot journals.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::preflight::preflight_horizon;
use crate::registry::TrustRegistry;
use crate::types::{AuditAction, AuditEvent, RegistrySnapshot, TrustPolicyMode};

/// Upper bound on a page size.
pub const MAX_PAGE_LIMIT: usize = 200;

pub const DEFAULT_PAGE_LIMIT: usize = 50;

/// Number of recent events and snapshots included in a digest.
pub const DIGEST_RECENT_COUNT: usize = 10;

/// Time-bounded, paginated history query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub offset: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl HistoryQuery {
    /// Effective limit, clamped to `1..=MAX_PAGE_LIMIT`.
    pub fn effective_limit(&self) -> usize {
        self.limit
            .unwrap_or(DEFAULT_PAGE_LIMIT)
            .clamp(1, MAX_PAGE_LIMIT)
    }

    fn contains(&self, at: DateTime<Utc>) -> bool {
        self.since.map_or(true, |since| at >= since) && self.until.map_or(true, |until| at <= until)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
    pub has_more: bool,
}

/// Anything with a creation time.
pub trait Timestamped {
    fn created_at(&self) -> DateTime<Utc>;
}

impl Timestamped for AuditEvent {
    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl Timestamped for RegistrySnapshot {
    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Filter and page journal-ordered `records` newest first.
pub fn paginate<T: Timestamped>(records: Vec<T>, query: &HistoryQuery) -> Page<T> {
    // Reverse first so equal timestamps keep newest-appended first
    let mut matching: Vec<T> = records
        .into_iter()
        .rev()
        .filter(|r| query.contains(r.created_at()))
        .collect();
    matching.sort_by_key(|r| std::cmp::Reverse(r.created_at()));

    let total = matching.len();
    let limit = query.effective_limit();
    let items: Vec<T> = matching.into_iter().skip(query.offset).take(limit).collect();
    let has_more = query.offset.saturating_add(items.len()) < total;

    Page {
        items,
        total,
        offset: query.offset,
        limit,
        has_more,
    }
}

/// Who did something and when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionMarker {
    pub at: DateTime<Utc>,
    pub actor_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_id: Option<String>,
}

impl ActionMarker {
    fn latest(events: &[AuditEvent], action: AuditAction) -> Option<Self> {
        events
            .iter()
            .filter(|e| e.action == action)
            .max_by_key(|e| e.created_at)
            .map(|e| Self {
                at: e.created_at,
                actor_id: e.actor_id.clone(),
                snapshot_id: e.snapshot_id.clone(),
            })
    }
}

/// Operator view of rotation readiness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationRunbook {
    pub trust_policy_mode: TrustPolicyMode,
    pub env_entries_count: usize,
    pub runtime_entries_count: usize,
    pub active_now_count: usize,
    pub active_in_24h_count: usize,
    pub last_update: Option<ActionMarker>,
    pub last_rotation: Option<ActionMarker>,
    pub last_rollback: Option<ActionMarker>,
    pub generated_at: DateTime<Utc>,
}

pub fn build_runbook(
    mode: TrustPolicyMode,
    registry: &TrustRegistry<'_>,
    events: &[AuditEvent],
    now: DateTime<Utc>,
) -> RotationRunbook {
    RotationRunbook {
        trust_policy_mode: mode,
        env_entries_count: registry.env_entries().len(),
        runtime_entries_count: registry.runtime_entries().len(),
        active_now_count: registry.count_active_at(now),
        active_in_24h_count: registry.count_active_at(now + preflight_horizon()),
        last_update: ActionMarker::latest(events, AuditAction::TrustRegistryUpdated),
        last_rotation: ActionMarker::latest(events, AuditAction::TrustRegistryRotated),
        last_rollback: ActionMarker::latest(events, AuditAction::TrustRegistryRolledBack),
        generated_at: now,
    }
}

/// Summary of governance activity over a trailing window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GovernanceDigest {
    pub window_days: u32,
    pub window_start: DateTime<Utc>,
    pub generated_at: DateTime<Utc>,
    /// Event count per action name within the window.
    pub action_counts: BTreeMap<String, usize>,
    pub total_events: usize,
    pub snapshots_in_window: usize,
    pub recent_events: Vec<AuditEvent>,
    pub recent_snapshots: Vec<SnapshotSummary>,
    pub runbook: RotationRunbook,
}

/// Snapshot metadata without the entry list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotSummary {
    pub snapshot_id: String,
    pub created_at: DateTime<Utc>,
    pub actor_id: String,
    pub entries_count: usize,
    pub source: crate::types::SnapshotSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl From<&RegistrySnapshot> for SnapshotSummary {
    fn from(snapshot: &RegistrySnapshot) -> Self {
        Self {
            snapshot_id: snapshot.snapshot_id.clone(),
            created_at: snapshot.created_at,
            actor_id: snapshot.actor_id.clone(),
            entries_count: snapshot.entries_count,
            source: snapshot.source,
            note: snapshot.note.clone(),
        }
    }
}

pub fn build_digest(
    window_days: u32,
    events: &[AuditEvent],
    snapshots: &[RegistrySnapshot],
    runbook: RotationRunbook,
    now: DateTime<Utc>,
) -> GovernanceDigest {
    let window_start = now - Duration::days(i64::from(window_days));
    let query = HistoryQuery {
        since: Some(window_start),
        until: Some(now),
        offset: 0,
        limit: Some(DIGEST_RECENT_COUNT),
    };

    let mut action_counts = BTreeMap::new();
    let mut total_events = 0;
    for event in events.iter().filter(|e| query.contains(e.created_at)) {
        *action_counts
            .entry(event.action.as_str().to_string())
            .or_insert(0) += 1;
        total_events += 1;
    }

    let recent_events = paginate(events.to_vec(), &query).items;
    let snapshot_page = paginate(snapshots.to_vec(), &query);

    GovernanceDigest {
        window_days,
        window_start,
        generated_at: now,
        action_counts,
        total_events,
        snapshots_in_window: snapshot_page.total,
        recent_events,
        recent_snapshots: snapshot_page.items.iter().map(SnapshotSummary::from).collect(),
        runbook,
    }
}

/// Outcome of an audit history trim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrimReport {
    pub removed: usize,
    pub retention_days: u32,
    pub keep_recent: usize,
    pub cutoff: DateTime<Utc>,
}
