//! External constraint solver over HTTP
//!
//! POSTs the solver input to a configured endpoint with a hard deadline.
//! Any failure (timeout, non-2xx, malformed body) is reported to the
//! caller, which falls back to the greedy solver.

use std::time::Duration;

use tracing::warn;

use calmesh_types::{CalError, Result};

use crate::types::{ScoredCandidate, SolverInput};
use crate::EXTERNAL_SOLVER_TIMEOUT_SECS;

pub struct ExternalSolver {
    endpoint: String,
    http: reqwest::Client,
}

impl ExternalSolver {
    pub fn new(endpoint: String) -> Self {
        Self {
            endpoint,
            http: reqwest::Client::new(),
        }
    }

    pub async fn solve(
        &self,
        input: &SolverInput,
        max_candidates: usize,
    ) -> Result<Vec<ScoredCandidate>> {
        let response = self
            .http
            .post(&self.endpoint)
            .timeout(Duration::from_secs(EXTERNAL_SOLVER_TIMEOUT_SECS))
            .json(input)
            .send()
            .await
            .map_err(|e| CalError::Provider {
                status: 599,
                body: format!("external solver: {e}"),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CalError::Provider {
                status: status.as_u16(),
                body,
            });
        }

        let mut candidates: Vec<ScoredCandidate> =
            response.json().await.map_err(|e| CalError::Serialization(e.to_string()))?;

        // Enforce output invariants regardless of what the solver returned
        let duration = input.duration_millis();
        let before = candidates.len();
        candidates.retain(|c| {
            c.end - c.start == duration
                && c.start >= input.window_start
                && c.end <= input.window_end
        });
        if candidates.len() != before {
            warn!(
                dropped = before - candidates.len(),
                "External solver returned out-of-contract candidates"
            );
        }
        candidates.sort_by(|a, b| b.score.cmp(&a.score).then(a.start.cmp(&b.start)));
        candidates.truncate(max_candidates);
        Ok(candidates)
    }
}
