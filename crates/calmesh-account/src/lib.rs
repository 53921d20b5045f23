//! CalMesh Account Actor
//!
//! Single-writer gateway for everything scoped to one external account:
//! encrypted credentials, the provider sync cursor, watch channels, Graph
//! subscriptions, and the encryption monitor. Exactly one actor runs per
//! `account_id`; every public operation is serialised through its mailbox
//! and processed to completion before the next begins.
//!
//! **Security invariant: the refresh token never leaves this crate.**

mod actor;
mod channels;
mod tokens;

#[cfg(test)]
mod tests;

pub use actor::{AccountActorHandle, AccountContext};

/// Access tokens within this margin of expiry are refreshed before use
pub const REFRESH_BUFFER_MILLIS: i64 = 5 * 60 * 1000;

/// Channels and subscriptions are renewed this far before expiry
pub const RENEWAL_MARGIN_MILLIS: i64 = 12 * 3600 * 1000;
