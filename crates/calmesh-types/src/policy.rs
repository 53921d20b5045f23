//! Policy graph types
//!
//! A policy is a directed graph of projection rules per user. Each edge says:
//! events originating in `from_account_id` are projected into
//! `to_account_id` at the stated detail level, into a calendar of the stated
//! kind.

use serde::{Deserialize, Serialize};

use crate::identity::{AccountId, PolicyId, UserId};

/// How much of an event survives projection along an edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DetailLevel {
    /// Title becomes "Busy"; description, location, attendees stripped;
    /// transparency forced opaque
    Busy,
    /// Title, description, location preserved
    Full,
}

impl DetailLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Busy => "BUSY",
            Self::Full => "FULL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "BUSY" => Some(Self::Busy),
            "FULL" => Some(Self::Full),
            _ => None,
        }
    }
}

/// Which calendar in the target account receives the projection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CalendarKind {
    /// A dedicated overlay calendar, created on first write
    BusyOverlay,
    /// The account's primary calendar
    Primary,
}

impl CalendarKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BusyOverlay => "BUSY_OVERLAY",
            Self::Primary => "PRIMARY",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "BUSY_OVERLAY" => Some(Self::BusyOverlay),
            "PRIMARY" => Some(Self::Primary),
            _ => None,
        }
    }
}

/// A projection policy; only one is active per user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub policy_id: PolicyId,
    pub user_id: UserId,
    pub name: String,
    /// Default edges are applied automatically to newly-linked accounts
    pub is_default: bool,
    pub created_at: i64,
}

/// One directed projection rule; `from != to`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyEdge {
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub detail_level: DetailLevel,
    pub calendar_kind: CalendarKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detail_level_wire_format() {
        assert_eq!(serde_json::to_string(&DetailLevel::Busy).unwrap(), "\"BUSY\"");
        assert_eq!(
            serde_json::to_string(&CalendarKind::BusyOverlay).unwrap(),
            "\"BUSY_OVERLAY\""
        );
        assert_eq!(DetailLevel::parse("FULL"), Some(DetailLevel::Full));
    }
}
