//! Provider-neutral wire types

use serde::{Deserialize, Serialize};

use calmesh_types::ExtendedProperties;

pub use calmesh_types::OVERLAY_CALENDAR_SENTINEL;

/// Display name of the overlay calendar created in target accounts
pub const OVERLAY_CALENDAR_NAME: &str = "CalMesh Busy";

/// Result of a token refresh
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    /// Seconds until expiry
    pub expires_in: i64,
}

/// A start or end moment as providers represent it: either a timed instant
/// or an all-day date.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventTime {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
}

/// One event as fetched from a provider, normalised across Google and
/// Microsoft wire formats.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderEvent {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<EventTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<EventTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transparency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visibility: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recurrence: Vec<String>,
    #[serde(default)]
    pub extended_properties: ExtendedProperties,
}

impl ProviderEvent {
    /// Whether this event carries our managed-mirror marker
    pub fn is_managed_mirror(&self) -> bool {
        self.extended_properties.is_managed_mirror()
    }
}

/// One page of an events listing
#[derive(Debug, Clone, Default)]
pub struct EventsPage {
    pub events: Vec<ProviderEvent>,
    pub next_page_token: Option<String>,
    pub next_sync_token: Option<String>,
}

/// Result of registering a watch channel
#[derive(Debug, Clone)]
pub struct WatchInfo {
    pub resource_id: String,
    /// Epoch millis
    pub expiry: i64,
}

/// Result of creating or renewing a Graph subscription
#[derive(Debug, Clone)]
pub struct SubscriptionInfo {
    pub subscription_id: String,
    /// Epoch millis
    pub expiry: i64,
}
