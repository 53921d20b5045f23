//! CalMesh User Graph Actor
//!
//! Single-writer gateway for everything scoped to one user: the canonical
//! event store, the mirror store, the policy graph, scheduling sessions
//! with candidates and holds, constraints, VIP policies, scheduling
//! history, the event journal, and the unlink cascade. Exactly one actor
//! runs per `user_id`; every write is serialised through its mailbox.
//!
//! Mirror fan-out happens here: each canonical change is compiled per
//! outgoing policy edge into a projected payload, content-hashed, and
//! enqueued as an `UPSERT_MIRROR` with a hash-derived idempotency key. A
//! matching hash on the mirror row short-circuits the write entirely.

mod actor;
mod availability;
mod canonical;
mod dto;
mod policy;
mod projection;
mod sessions;


pub use actor::{CreateVipParams, GraphContext, UserGraphHandle};
pub use dto::*;
pub use projection::{compile_projection, idempotency_key, projection_hash};

/// Default hold lifetime when a session asks for holds
pub const DEFAULT_HOLD_MINUTES: i64 = 30;
