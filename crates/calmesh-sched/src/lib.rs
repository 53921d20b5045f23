//! CalMesh Scheduler - Meeting time proposal
//!
//! The solver is a pure function over an explicit input: a time window,
//! merged busy intervals of the required accounts, the user's constraints,
//! participant hashes, VIP policies, and fairness history. Two
//! implementations sit behind [`SolverService`]:
//!
//! - **Greedy**: in-process, always available
//! - **External**: an HTTP constraint solver with a 30 s timeout; any
//!   failure falls back to greedy
//!
//! Selection per request: more than 3 participants or more than 5
//! constraints, with an endpoint configured, tries external first.

pub mod configs;
pub mod external;
pub mod fairness;
pub mod greedy;
pub mod service;
pub mod types;

pub use external::ExternalSolver;
pub use greedy::greedy_solver;
pub use service::SolverService;
pub use types::{ScoredCandidate, SolverInput};

/// Candidate slots align to this grid
pub const SLOT_STEP_MILLIS: i64 = 30 * 60 * 1000;

/// Default number of candidates returned
pub const DEFAULT_MAX_CANDIDATES: usize = 5;

/// External solver deadline
pub const EXTERNAL_SOLVER_TIMEOUT_SECS: u64 = 30;
