//! Solver input and output

use serde::{Deserialize, Serialize};

use calmesh_types::{AccountId, Constraint, Interval, ParticipantStats, VipPolicy};

/// Everything the solver needs; also the wire shape POSTed to an external
/// solver.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SolverInput {
    /// Epoch millis
    pub window_start: i64,
    /// Epoch millis
    pub window_end: i64,
    pub duration_minutes: i64,
    /// Merged busy intervals across all required accounts
    pub busy_intervals: Vec<Interval>,
    pub required_account_ids: Vec<AccountId>,
    pub constraints: Vec<Constraint>,
    #[serde(default)]
    pub participant_hashes: Vec<String>,
    #[serde(default)]
    pub vip_policies: Vec<VipPolicy>,
    /// Scheduling-history aggregates for the participants, for fairness
    #[serde(default)]
    pub participant_stats: Vec<ParticipantStats>,
}

impl SolverInput {
    pub fn duration_millis(&self) -> i64 {
        self.duration_minutes * 60 * 1000
    }
}

/// One proposed slot
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredCandidate {
    /// Epoch millis
    pub start: i64,
    /// Epoch millis; always `start + duration`
    pub end: i64,
    pub score: i64,
    pub explanation: String,
}
