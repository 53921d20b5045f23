//! Scheduling sessions, candidates, holds, constraints, and VIP policies

use serde::{Deserialize, Serialize};

use crate::identity::{
    AccountId, CandidateId, CanonicalEventId, ConstraintId, HoldId, SessionId, UserId, VipId,
};

/// Scheduling session state machine: `open -> candidates_ready -> committed`
/// or `-> cancelled`. Terminal states reject further mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Open,
    CandidatesReady,
    Committed,
    Cancelled,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::CandidatesReady => "candidates_ready",
            Self::Committed => "committed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(Self::Open),
            "candidates_ready" => Some(Self::CandidatesReady),
            "committed" => Some(Self::Committed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Committed | Self::Cancelled)
    }
}

/// A scheduling session and its outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulingSession {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub status: SessionStatus,
    pub objective: serde_json::Value,
    pub created_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub committed_candidate_id: Option<CandidateId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub committed_event_id: Option<CanonicalEventId>,
}

/// Candidate status; at most one candidate per session reaches `committed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateStatus {
    Proposed,
    Committed,
}

impl CandidateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Proposed => "proposed",
            Self::Committed => "committed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "proposed" => Some(Self::Proposed),
            "committed" => Some(Self::Committed),
            _ => None,
        }
    }
}

/// A scored candidate slot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub candidate_id: CandidateId,
    pub session_id: SessionId,
    pub start: i64,
    pub end: i64,
    pub score: i64,
    pub explanation: String,
    pub status: CandidateStatus,
}

/// Hold state machine: `held -> released | expired | committed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HoldStatus {
    Held,
    Released,
    Expired,
    Committed,
}

impl HoldStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Held => "held",
            Self::Released => "released",
            Self::Expired => "expired",
            Self::Committed => "committed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "held" => Some(Self::Held),
            "released" => Some(Self::Released),
            "expired" => Some(Self::Expired),
            "committed" => Some(Self::Committed),
            _ => None,
        }
    }

    /// Valid transitions out of `held` only
    pub fn can_transition_to(&self, next: HoldStatus) -> bool {
        matches!(
            (self, next),
            (Self::Held, Self::Released)
                | (Self::Held, Self::Expired)
                | (Self::Held, Self::Committed)
        )
    }
}

/// A tentative hold placed on a candidate slot during scheduling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hold {
    pub hold_id: HoldId,
    pub session_id: SessionId,
    pub account_id: AccountId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_event_id: Option<String>,
    pub expires_at: i64,
    pub status: HoldStatus,
}

/// Kind of a scheduling constraint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    WorkingHours,
    Trip,
    Buffer,
    NoMeetingsAfter,
    VipOverride,
}

impl ConstraintKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WorkingHours => "working_hours",
            Self::Trip => "trip",
            Self::Buffer => "buffer",
            Self::NoMeetingsAfter => "no_meetings_after",
            Self::VipOverride => "vip_override",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "working_hours" => Some(Self::WorkingHours),
            "trip" => Some(Self::Trip),
            "buffer" => Some(Self::Buffer),
            "no_meetings_after" => Some(Self::NoMeetingsAfter),
            "vip_override" => Some(Self::VipOverride),
            _ => None,
        }
    }
}

/// A scheduling constraint with a kind-specific config
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Constraint {
    pub constraint_id: ConstraintId,
    pub user_id: UserId,
    pub kind: ConstraintKind,
    pub config: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_from: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_to: Option<i64>,
}

impl Constraint {
    /// Whether the constraint is active at the given instant
    pub fn active_at(&self, ts: i64) -> bool {
        self.active_from.map_or(true, |from| ts >= from)
            && self.active_to.map_or(true, |to| ts <= to)
    }

    /// Whether the constraint's active window overlaps `[start, end)`
    pub fn active_in(&self, start: i64, end: i64) -> bool {
        self.active_from.map_or(true, |from| from < end)
            && self.active_to.map_or(true, |to| to > start)
    }
}

/// A VIP participant policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VipPolicy {
    pub vip_id: VipId,
    pub user_id: UserId,
    pub participant_hash: String,
    pub display_name: String,
    /// `>= 1.0`
    pub priority_weight: f64,
    pub conditions: serde_json::Value,
}

/// One scheduling-history row, recorded on session commit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulingHistoryEntry {
    pub session_id: SessionId,
    pub participant_hash: String,
    pub got_preferred: bool,
    pub scheduled_ts: i64,
}

/// Aggregated history per participant, queried for fairness
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantStats {
    pub participant_hash: String,
    pub sessions_participated: i64,
    pub sessions_preferred: i64,
    pub last_session_ts: i64,
}

/// A half-open time interval `[start, end)`, epoch millis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    pub start: i64,
    pub end: i64,
}

impl Interval {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    pub fn overlaps(&self, other: &Interval) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Merged busy intervals and their complement over a query window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Availability {
    pub busy_intervals: Vec<Interval>,
    pub free_intervals: Vec<Interval>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hold_transitions() {
        assert!(HoldStatus::Held.can_transition_to(HoldStatus::Released));
        assert!(HoldStatus::Held.can_transition_to(HoldStatus::Expired));
        assert!(!HoldStatus::Expired.can_transition_to(HoldStatus::Held));
        assert!(!HoldStatus::Released.can_transition_to(HoldStatus::Committed));
    }

    #[test]
    fn test_terminal_sessions() {
        assert!(SessionStatus::Committed.is_terminal());
        assert!(SessionStatus::Cancelled.is_terminal());
        assert!(!SessionStatus::CandidatesReady.is_terminal());
    }

    #[test]
    fn test_constraint_window() {
        let c = Constraint {
            constraint_id: ConstraintId::new(),
            user_id: UserId::new(),
            kind: ConstraintKind::Trip,
            config: serde_json::json!({}),
            active_from: Some(100),
            active_to: Some(200),
        };
        assert!(c.active_at(150));
        assert!(!c.active_at(250));
        assert!(c.active_in(150, 300));
        assert!(!c.active_in(200, 300));
        assert!(!c.active_in(0, 100));
    }

    #[test]
    fn test_interval_overlap() {
        assert!(Interval::new(0, 10).overlaps(&Interval::new(5, 15)));
        assert!(!Interval::new(0, 10).overlaps(&Interval::new(10, 20)));
    }
}
