//! Event journal types
//!
//! Append-only log of every canonical-event change and every reconcile
//! discrepancy. Used for audit, debugging, and cursor-style queries.

use serde::{Deserialize, Serialize};

use crate::identity::{CanonicalEventId, JournalId, UserId};

/// One append-only journal row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub journal_id: JournalId,
    pub user_id: UserId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub canonical_event_id: Option<CanonicalEventId>,
    pub ts: i64,
    /// Who made the change: "sync", "write", "reconcile", "scheduler", "api"
    pub actor: String,
    /// "created" | "updated" | "deleted" | "reconcile:<discrepancy>"
    pub change_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patch: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Reconcile discrepancy categories, journalled as `reconcile:<type>`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscrepancyKind {
    MissingCanonical,
    MissingMirror,
    OrphanedMirror,
    HashMismatch,
    StaleMirror,
}

impl DiscrepancyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingCanonical => "missing_canonical",
            Self::MissingMirror => "missing_mirror",
            Self::OrphanedMirror => "orphaned_mirror",
            Self::HashMismatch => "hash_mismatch",
            Self::StaleMirror => "stale_mirror",
        }
    }

    /// The journal `change_type` value for this discrepancy
    pub fn change_type(&self) -> String {
        format!("reconcile:{}", self.as_str())
    }
}

/// Sync-health snapshot returned by the UserGraphActor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncHealth {
    pub total_events: i64,
    pub total_mirrors: i64,
    pub total_journal_entries: i64,
    pub pending_mirrors: i64,
    pub error_mirrors: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_journal_ts: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discrepancy_change_type() {
        assert_eq!(
            DiscrepancyKind::OrphanedMirror.change_type(),
            "reconcile:orphaned_mirror"
        );
    }
}
