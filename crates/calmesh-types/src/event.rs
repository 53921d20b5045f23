//! Canonical events, mirrors, and projection payloads

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::identity::{AccountId, CanonicalEventId, UserId};

/// `target_calendar_id` sentinel resolved to a real overlay calendar id on
/// first mirror write
pub const OVERLAY_CALENDAR_SENTINEL: &str = "calmesh:overlay";

/// Status of a canonical event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Confirmed,
    Tentative,
    Cancelled,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Confirmed => "confirmed",
            Self::Tentative => "tentative",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "confirmed" => Some(Self::Confirmed),
            "tentative" => Some(Self::Tentative),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// Whether an event blocks availability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transparency {
    Opaque,
    Transparent,
}

impl Transparency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Opaque => "opaque",
            Self::Transparent => "transparent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "opaque" => Some(Self::Opaque),
            "transparent" => Some(Self::Transparent),
            _ => None,
        }
    }
}

/// Where a canonical event came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSource {
    /// Ingested from a provider account
    Provider,
    /// Created by the scheduler on commit
    System,
}

impl EventSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Provider => "provider",
            Self::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "provider" => Some(Self::Provider),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

/// The user's authoritative view of a single event
///
/// `(origin_account_id, origin_event_id)` is unique among canonical events
/// where `source = provider`. `version` strictly increases on every update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalEvent {
    pub canonical_event_id: CanonicalEventId,
    pub user_id: UserId,
    pub origin_account_id: AccountId,
    pub origin_event_id: String,
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    /// Epoch millis
    pub start: i64,
    /// Epoch millis; `end >= start`
    pub end: i64,
    pub all_day: bool,
    pub status: EventStatus,
    pub visibility: Option<String>,
    pub transparency: Transparency,
    pub recurrence_rule: Option<String>,
    pub source: EventSource,
    /// Monotonic per event
    pub version: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// State of a mirror projection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MirrorState {
    Pending,
    Active,
    Error,
    Tombstoned,
}

impl MirrorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Active => "ACTIVE",
            Self::Error => "ERROR",
            Self::Tombstoned => "TOMBSTONED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "ACTIVE" => Some(Self::Active),
            "ERROR" => Some(Self::Error),
            "TOMBSTONED" => Some(Self::Tombstoned),
            _ => None,
        }
    }
}

/// A projection of a canonical event into another account's calendar
///
/// `(canonical_event_id, target_account_id)` is unique; the target is never
/// the canonical event's origin account. `ACTIVE` implies a non-null
/// `provider_event_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mirror {
    pub canonical_event_id: CanonicalEventId,
    pub target_account_id: AccountId,
    pub target_calendar_id: String,
    pub provider_event_id: Option<String>,
    pub last_projected_hash: Option<String>,
    pub last_write_ts: Option<i64>,
    pub state: MirrorState,
    pub error_message: Option<String>,
}

/// Extended-property marker carried on every projected provider event
///
/// A typed struct with the small set of known keys plus an opaque
/// pass-through map for anything else a provider round-trips.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtendedProperties {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub managed: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub canonical_event_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin_account_id: Option<String>,
    #[serde(flatten)]
    pub other: BTreeMap<String, String>,
}

impl ExtendedProperties {
    /// The marker written onto every projected mirror event
    pub fn marker(canonical_event_id: CanonicalEventId, origin_account_id: AccountId) -> Self {
        Self {
            managed: Some("true".to_string()),
            canonical_event_id: Some(canonical_event_id.to_string()),
            origin_account_id: Some(origin_account_id.to_string()),
            other: BTreeMap::new(),
        }
    }

    /// Whether these properties mark one of our own mirror writes
    pub fn is_managed_mirror(&self) -> bool {
        self.managed.as_deref() == Some("true")
    }
}

/// Normalised event content, independent of provider wire format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventContent {
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start: i64,
    pub end: i64,
    pub all_day: bool,
    pub status: EventStatus,
    pub visibility: Option<String>,
    pub transparency: Transparency,
    pub recurrence_rule: Option<String>,
}

/// Kind of change observed in a provider delta batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeltaKind {
    Created,
    Updated,
    Deleted,
}

/// One item of a provider delta batch handed to the UserGraphActor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderDelta {
    #[serde(rename = "type")]
    pub kind: DeltaKind,
    pub origin_event_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<EventContent>,
}

/// The payload written into a target calendar for one mirror
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectedPayload {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub start: i64,
    pub end: i64,
    pub all_day: bool,
    pub transparency: Transparency,
    pub extended_properties: ExtendedProperties,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_classification() {
        let props = ExtendedProperties::marker(CanonicalEventId::new(), AccountId::new());
        assert!(props.is_managed_mirror());
        assert!(!ExtendedProperties::default().is_managed_mirror());
    }

    #[test]
    fn test_marker_passthrough_keys_survive() {
        let mut props = ExtendedProperties::default();
        props.other.insert("vendorKey".into(), "x".into());
        let json = serde_json::to_string(&props).unwrap();
        let back: ExtendedProperties = serde_json::from_str(&json).unwrap();
        assert_eq!(back.other.get("vendorKey").map(String::as_str), Some("x"));
    }

    #[test]
    fn test_delta_wire_shape() {
        let json = r#"{"type":"deleted","origin_event_id":"g1"}"#;
        let delta: ProviderDelta = serde_json::from_str(json).unwrap();
        assert_eq!(delta.kind, DeltaKind::Deleted);
        assert!(delta.event.is_none());
    }

    #[test]
    fn test_mirror_state_strings() {
        assert_eq!(MirrorState::parse("TOMBSTONED"), Some(MirrorState::Tombstoned));
        assert_eq!(MirrorState::Active.as_str(), "ACTIVE");
    }
}
