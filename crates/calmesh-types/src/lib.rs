//! CalMesh Types - Canonical domain types for calendar federation
//!
//! This crate contains all foundational types for CalMesh with zero
//! dependencies on other calmesh crates. It defines the complete type system
//! for:
//!
//! - Identity types (AccountId, UserId, CanonicalEventId, etc.)
//! - Canonical events, mirrors, and projection payloads
//! - Policy graph types (edges, detail levels, calendar kinds)
//! - Scheduling sessions, candidates, holds, constraints, VIP policies
//! - The event journal and queue message envelopes
//!
//! # Architectural invariants
//!
//! These types support the core CalMesh invariants:
//!
//! 1. Refresh tokens NEVER leave the AccountActor boundary
//! 2. Canonical event versions strictly increase on every update
//! 3. `(origin_account_id, origin_event_id)` is unique among provider events
//! 4. Every mirror write is idempotent via a content-derived key

pub mod account;
pub mod error;
pub mod event;
pub mod identity;
pub mod journal;
pub mod messages;
pub mod policy;
pub mod scheduling;
pub mod time;

pub use account::*;
pub use error::*;
pub use event::*;
pub use identity::*;
pub use journal::*;
pub use messages::*;
pub use policy::*;
pub use scheduling::*;

/// Version of the CalMesh types schema
pub const TYPES_VERSION: &str = "0.1.0";
