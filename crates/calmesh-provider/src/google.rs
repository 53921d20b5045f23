//! Google Calendar wire types and mapping

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::json;

use calmesh_types::{time, ExtendedProperties, ProjectedPayload, Transparency};

use crate::types::{EventTime, EventsPage, ProviderEvent};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleEventTime {
    pub date_time: Option<String>,
    pub date: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleExtendedProperties {
    pub private: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleEvent {
    pub id: String,
    pub status: Option<String>,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start: Option<GoogleEventTime>,
    pub end: Option<GoogleEventTime>,
    pub transparency: Option<String>,
    pub visibility: Option<String>,
    #[serde(default)]
    pub recurrence: Vec<String>,
    pub extended_properties: Option<GoogleExtendedProperties>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleEventsResponse {
    #[serde(default)]
    pub items: Vec<GoogleEvent>,
    pub next_page_token: Option<String>,
    pub next_sync_token: Option<String>,
}

fn extended_from_private(private: Option<BTreeMap<String, String>>) -> ExtendedProperties {
    let mut map = private.unwrap_or_default();
    ExtendedProperties {
        managed: map.remove("managed"),
        canonical_event_id: map.remove("canonical_event_id"),
        origin_account_id: map.remove("origin_account_id"),
        other: map,
    }
}

impl From<GoogleEvent> for ProviderEvent {
    fn from(event: GoogleEvent) -> Self {
        ProviderEvent {
            id: event.id,
            status: event.status,
            summary: event.summary,
            description: event.description,
            location: event.location,
            start: event.start.map(|t| EventTime {
                date_time: t.date_time,
                date: t.date,
            }),
            end: event.end.map(|t| EventTime {
                date_time: t.date_time,
                date: t.date,
            }),
            transparency: event.transparency,
            visibility: event.visibility,
            recurrence: event.recurrence,
            extended_properties: extended_from_private(
                event.extended_properties.and_then(|e| e.private),
            ),
        }
    }
}

impl GoogleEventsResponse {
    pub fn into_page(self) -> EventsPage {
        EventsPage {
            events: self.items.into_iter().map(ProviderEvent::from).collect(),
            next_page_token: self.next_page_token,
            next_sync_token: self.next_sync_token,
        }
    }
}

fn time_json(ts: i64, all_day: bool) -> serde_json::Value {
    if all_day {
        json!({ "date": &time::to_rfc3339(ts)[..10] })
    } else {
        json!({ "dateTime": time::to_rfc3339(ts) })
    }
}

/// Render a projected payload as a Google event body
pub fn payload_to_google(payload: &ProjectedPayload) -> serde_json::Value {
    let mut private = BTreeMap::new();
    if let Some(managed) = &payload.extended_properties.managed {
        private.insert("managed".to_string(), managed.clone());
    }
    if let Some(id) = &payload.extended_properties.canonical_event_id {
        private.insert("canonical_event_id".to_string(), id.clone());
    }
    if let Some(id) = &payload.extended_properties.origin_account_id {
        private.insert("origin_account_id".to_string(), id.clone());
    }
    for (k, v) in &payload.extended_properties.other {
        private.insert(k.clone(), v.clone());
    }

    let mut body = json!({
        "summary": payload.title,
        "start": time_json(payload.start, payload.all_day),
        "end": time_json(payload.end, payload.all_day),
        "transparency": match payload.transparency {
            Transparency::Opaque => "opaque",
            Transparency::Transparent => "transparent",
        },
        "extendedProperties": { "private": private },
    });
    if let Some(description) = &payload.description {
        body["description"] = json!(description);
    }
    if let Some(location) = &payload.location {
        body["location"] = json!(location);
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_event_with_marker() {
        let raw = serde_json::json!({
            "id": "g1",
            "status": "confirmed",
            "summary": "Standup",
            "start": { "dateTime": "2026-02-20T10:00:00Z" },
            "end": { "dateTime": "2026-02-20T11:00:00Z" },
            "extendedProperties": {
                "private": {
                    "managed": "true",
                    "canonical_event_id": "evt_01HZZZZZZZZZZZZZZZZZZZZZZZ",
                    "origin_account_id": "acc_01HZZZZZZZZZZZZZZZZZZZZZZZ",
                    "vendorKey": "x"
                }
            }
        });
        let event: GoogleEvent = serde_json::from_value(raw).unwrap();
        let provider_event = ProviderEvent::from(event);
        assert!(provider_event.is_managed_mirror());
        assert_eq!(
            provider_event.extended_properties.other.get("vendorKey"),
            Some(&"x".to_string())
        );
    }

    #[test]
    fn test_payload_round_trip_marker() {
        let payload = ProjectedPayload {
            title: "Busy".into(),
            description: None,
            location: None,
            start: 1_771_581_600_000,
            end: 1_771_585_200_000,
            all_day: false,
            transparency: Transparency::Opaque,
            extended_properties: ExtendedProperties::marker(
                calmesh_types::CanonicalEventId::new(),
                calmesh_types::AccountId::new(),
            ),
        };
        let body = payload_to_google(&payload);
        assert_eq!(body["summary"], "Busy");
        assert_eq!(body["transparency"], "opaque");
        assert_eq!(body["extendedProperties"]["private"]["managed"], "true");
        assert_eq!(body["start"]["dateTime"], "2026-02-20T10:00:00.000Z");
    }

    #[test]
    fn test_all_day_uses_date() {
        let payload = ProjectedPayload {
            title: "Busy".into(),
            description: None,
            location: None,
            start: 1_771_545_600_000,
            end: 1_771_632_000_000,
            all_day: true,
            transparency: Transparency::Opaque,
            extended_properties: ExtendedProperties::default(),
        };
        let body = payload_to_google(&payload);
        assert_eq!(body["start"]["date"], "2026-02-20");
        assert!(body["start"].get("dateTime").is_none());
    }
}
