//! Solver selection and fallback

use tracing::{debug, warn};

use crate::external::ExternalSolver;
use crate::greedy::greedy_solver;
use crate::types::{ScoredCandidate, SolverInput};

/// Requests with more participants than this prefer the external solver
const EXTERNAL_PARTICIPANT_THRESHOLD: usize = 3;
/// Requests with more constraints than this prefer the external solver
const EXTERNAL_CONSTRAINT_THRESHOLD: usize = 5;

/// Chooses between the greedy and external solvers per request
pub struct SolverService {
    external: Option<ExternalSolver>,
}

impl SolverService {
    pub fn new(external_endpoint: Option<String>) -> Self {
        Self {
            external: external_endpoint.map(ExternalSolver::new),
        }
    }

    pub fn greedy_only() -> Self {
        Self { external: None }
    }

    fn wants_external(&self, input: &SolverInput) -> bool {
        self.external.is_some()
            && (input.participant_hashes.len() > EXTERNAL_PARTICIPANT_THRESHOLD
                || input.constraints.len() > EXTERNAL_CONSTRAINT_THRESHOLD)
    }

    /// Solve, falling back to greedy on any external failure
    pub async fn solve(&self, input: &SolverInput, max_candidates: usize) -> Vec<ScoredCandidate> {
        if let Some(external) = self.external.as_ref().filter(|_| self.wants_external(input)) {
            match external.solve(input, max_candidates).await {
                Ok(candidates) => {
                    debug!(count = candidates.len(), "External solver succeeded");
                    return candidates;
                }
                Err(e) => {
                    warn!(error = %e, "External solver failed; falling back to greedy");
                }
            }
        }
        greedy_solver(input, max_candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use calmesh_types::time;

    fn input(participants: usize) -> SolverInput {
        SolverInput {
            window_start: time::parse_rfc3339("2026-03-02T08:00:00Z").unwrap(),
            window_end: time::parse_rfc3339("2026-03-02T18:00:00Z").unwrap(),
            duration_minutes: 60,
            busy_intervals: Vec::new(),
            required_account_ids: Vec::new(),
            constraints: Vec::new(),
            participant_hashes: (0..participants).map(|i| format!("p{i}")).collect(),
            vip_policies: Vec::new(),
            participant_stats: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_greedy_only_service() {
        let service = SolverService::greedy_only();
        let candidates = service.solve(&input(1), 5).await;
        assert_eq!(candidates.len(), 5);
    }

    #[tokio::test]
    async fn test_unreachable_external_falls_back_to_greedy() {
        // Nothing listens on this port; the external call errors and the
        // greedy result comes back instead
        let service = SolverService::new(Some("http://127.0.0.1:9/solve".to_string()));
        let candidates = service.solve(&input(5), 5).await;
        assert_eq!(candidates.len(), 5);
    }

    #[tokio::test]
    async fn test_small_requests_skip_external() {
        let service = SolverService::new(Some("http://127.0.0.1:9/solve".to_string()));
        assert!(!service.wants_external(&input(2)));
        assert!(service.wants_external(&input(4)));
    }
}
