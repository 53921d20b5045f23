//! Request and response shapes for graph-actor operations

use serde::{Deserialize, Serialize};

use calmesh_types::{
    AccountId, Candidate, CanonicalEvent, CanonicalEventId, Hold, Mirror, MirrorState,
    SchedulingSession, SessionId,
};

/// Outcome of one `apply_provider_delta` batch
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyDeltaReport {
    pub created: u64,
    pub updated: u64,
    pub deleted: u64,
    pub mirrors_enqueued: u64,
    /// Per-item failures; the batch never aborts
    pub errors: Vec<String>,
}

/// A canonical event with its mirror rows
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventWithMirrors {
    pub event: CanonicalEvent,
    pub mirrors: Vec<Mirror>,
}

/// Query for `list_canonical_events`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListEventsQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_min: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_max: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin_account_id: Option<AccountId>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

fn default_limit() -> i64 {
    100
}

/// One page of canonical events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPage {
    pub events: Vec<CanonicalEvent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Partial mirror-state update
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MirrorStateUpdate {
    pub state: MirrorState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_event_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_write_ts: Option<i64>,
}

/// Parameters for `create_session`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionParams {
    pub title: String,
    pub window_start: i64,
    pub window_end: i64,
    pub duration_minutes: i64,
    pub required_account_ids: Vec<AccountId>,
    #[serde(default)]
    pub participant_hashes: Vec<String>,
    #[serde(default)]
    pub create_holds: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hold_minutes: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_candidates: Option<usize>,
}

/// Result of `create_session`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionResult {
    pub session: SchedulingSession,
    pub candidates: Vec<Candidate>,
    pub holds: Vec<Hold>,
}

/// Result of `commit_candidate`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitResult {
    pub session_id: SessionId,
    pub event_id: CanonicalEventId,
    pub released_holds: u64,
    pub mirrors_enqueued: u64,
}

/// Query for `compute_availability`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityQuery {
    pub start: i64,
    pub end: i64,
    /// Defaults to every account with canonical events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accounts: Option<Vec<AccountId>>,
}

/// Query for `query_journal`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub canonical_event_id: Option<CanonicalEventId>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

/// Counts from an `unlink_account` cascade
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnlinkReport {
    pub canonical_events_deleted: u64,
    pub origin_mirrors_deleted: u64,
    pub target_mirrors_deleted: u64,
    pub policy_edges_removed: u64,
    pub calendars_removed: u64,
}

/// One reconcile discrepancy to journal
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscrepancyRecord {
    pub kind: calmesh_types::DiscrepancyKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub canonical_event_id: Option<CanonicalEventId>,
    pub account_id: AccountId,
    pub details: serde_json::Value,
}
