//! Fairness adjustment from scheduling history
//!
//! Participants who have been getting their preferred slot less often than
//! the group average get a boost, and vice versa. The adjustment is clamped
//! to `[0.5, 1.5]` and only the most-affected participant's adjustment is
//! applied.

use calmesh_types::ParticipantStats;

pub const FAIRNESS_MIN: f64 = 0.5;
pub const FAIRNESS_MAX: f64 = 1.5;

fn preference_rate(stats: &ParticipantStats) -> Option<f64> {
    if stats.sessions_participated == 0 {
        return None;
    }
    Some(stats.sessions_preferred as f64 / stats.sessions_participated as f64)
}

/// Compute the applied fairness adjustment for a candidate set.
///
/// Returns `(adjustment, participant_hash)` for the most-affected
/// participant, or `(1.0, None)` when no participant has history.
pub fn fairness_adjustment(stats: &[ParticipantStats]) -> (f64, Option<String>) {
    let rates: Vec<(&ParticipantStats, f64)> = stats
        .iter()
        .filter_map(|s| preference_rate(s).map(|r| (s, r)))
        .collect();
    if rates.is_empty() {
        return (1.0, None);
    }

    let group_average = rates.iter().map(|(_, r)| r).sum::<f64>() / rates.len() as f64;

    let mut applied: f64 = 1.0;
    let mut applied_hash = None;
    for (participant, rate) in rates {
        let adjustment = (1.0 + (group_average - rate)).clamp(FAIRNESS_MIN, FAIRNESS_MAX);
        if (adjustment - 1.0).abs() > (applied - 1.0).abs() {
            applied = adjustment;
            applied_hash = Some(participant.participant_hash.clone());
        }
    }
    (applied, applied_hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(hash: &str, participated: i64, preferred: i64) -> ParticipantStats {
        ParticipantStats {
            participant_hash: hash.to_string(),
            sessions_participated: participated,
            sessions_preferred: preferred,
            last_session_ts: 0,
        }
    }

    #[test]
    fn test_no_history_is_neutral() {
        assert_eq!(fairness_adjustment(&[]).0, 1.0);
        assert_eq!(fairness_adjustment(&[stats("a", 0, 0)]).0, 1.0);
    }

    #[test]
    fn test_underserved_participant_boosted() {
        // a: 0/4 preferred, b: 4/4 preferred; group average 0.5
        let (adjustment, hash) = fairness_adjustment(&[stats("a", 4, 0), stats("b", 4, 4)]);
        assert!(adjustment > 1.0);
        assert_eq!(hash.as_deref(), Some("a"));
    }

    #[test]
    fn test_adjustment_clamped() {
        let many = vec![
            stats("a", 10, 0),
            stats("b", 10, 10),
            stats("c", 10, 10),
            stats("d", 10, 10),
        ];
        let (adjustment, _) = fairness_adjustment(&many);
        assert!(adjustment <= FAIRNESS_MAX);
        assert!(adjustment >= FAIRNESS_MIN);
    }

    #[test]
    fn test_balanced_history_is_neutral() {
        let (adjustment, _) = fairness_adjustment(&[stats("a", 4, 2), stats("b", 4, 2)]);
        assert!((adjustment - 1.0).abs() < 1e-9);
    }
}
