//! Microsoft Graph wire types and mapping
//!
//! Graph carries the mirror marker as an open extension named
//! `com.calmesh.mirror`; delta listings flag removals with an `@removed`
//! annotation, which we normalise to a `cancelled` status.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::json;

use calmesh_types::{time, ExtendedProperties, ProjectedPayload, Transparency};

use crate::types::{EventTime, EventsPage, ProviderEvent};

pub const MIRROR_EXTENSION_NAME: &str = "com.calmesh.mirror";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphDateTime {
    pub date_time: String,
    pub time_zone: Option<String>,
}

impl GraphDateTime {
    /// Graph datetimes carry no offset; the `timeZone` field qualifies
    /// them. Only UTC is produced by our writes, so the fraction is dropped
    /// and a `Z` suffix appended.
    fn to_rfc3339(&self) -> String {
        let whole = match self.date_time.split_once('.') {
            Some((whole, _)) => whole,
            None => self.date_time.as_str(),
        };
        format!("{whole}Z")
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphLocation {
    pub display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphEvent {
    pub id: String,
    pub subject: Option<String>,
    pub body_preview: Option<String>,
    pub location: Option<GraphLocation>,
    pub start: Option<GraphDateTime>,
    pub end: Option<GraphDateTime>,
    pub is_all_day: Option<bool>,
    pub show_as: Option<String>,
    pub sensitivity: Option<String>,
    pub extensions: Option<Vec<serde_json::Value>>,
    #[serde(rename = "@removed")]
    pub removed: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct GraphEventsResponse {
    #[serde(default)]
    pub value: Vec<GraphEvent>,
    #[serde(rename = "@odata.nextLink")]
    pub next_link: Option<String>,
    #[serde(rename = "@odata.deltaLink")]
    pub delta_link: Option<String>,
}

fn extended_from_extensions(extensions: Option<Vec<serde_json::Value>>) -> ExtendedProperties {
    let Some(extensions) = extensions else {
        return ExtendedProperties::default();
    };
    for ext in extensions {
        let name = ext
            .get("extensionName")
            .or_else(|| ext.get("id"))
            .and_then(|v| v.as_str());
        if name != Some(MIRROR_EXTENSION_NAME) {
            continue;
        }
        let get = |key: &str| ext.get(key).and_then(|v| v.as_str()).map(str::to_string);
        let mut other = BTreeMap::new();
        if let Some(map) = ext.as_object() {
            for (k, v) in map {
                if matches!(
                    k.as_str(),
                    "@odata.type"
                        | "extensionName"
                        | "id"
                        | "managed"
                        | "canonical_event_id"
                        | "origin_account_id"
                ) {
                    continue;
                }
                if let Some(s) = v.as_str() {
                    other.insert(k.clone(), s.to_string());
                }
            }
        }
        return ExtendedProperties {
            managed: get("managed"),
            canonical_event_id: get("canonical_event_id"),
            origin_account_id: get("origin_account_id"),
            other,
        };
    }
    ExtendedProperties::default()
}

impl From<GraphEvent> for ProviderEvent {
    fn from(event: GraphEvent) -> Self {
        let status = if event.removed.is_some() {
            Some("cancelled".to_string())
        } else {
            Some("confirmed".to_string())
        };
        let transparency = event.show_as.as_deref().map(|s| {
            if s == "free" {
                "transparent".to_string()
            } else {
                "opaque".to_string()
            }
        });
        ProviderEvent {
            id: event.id,
            status,
            summary: event.subject,
            description: event.body_preview,
            location: event.location.and_then(|l| l.display_name),
            start: event.start.map(|t| EventTime {
                date_time: Some(t.to_rfc3339()),
                date: None,
            }),
            end: event.end.map(|t| EventTime {
                date_time: Some(t.to_rfc3339()),
                date: None,
            }),
            transparency,
            visibility: event.sensitivity,
            recurrence: Vec::new(),
            extended_properties: extended_from_extensions(event.extensions),
        }
    }
}

impl GraphEventsResponse {
    pub fn into_page(self) -> EventsPage {
        EventsPage {
            events: self.value.into_iter().map(ProviderEvent::from).collect(),
            next_page_token: self.next_link,
            next_sync_token: self.delta_link,
        }
    }
}

fn graph_time(ts: i64) -> serde_json::Value {
    json!({ "dateTime": time::to_rfc3339(ts).trim_end_matches('Z'), "timeZone": "UTC" })
}

/// Render a projected payload as a Graph event body
pub fn payload_to_graph(payload: &ProjectedPayload) -> serde_json::Value {
    let mut extension = json!({
        "@odata.type": "microsoft.graph.openTypeExtension",
        "extensionName": MIRROR_EXTENSION_NAME,
    });
    if let Some(managed) = &payload.extended_properties.managed {
        extension["managed"] = json!(managed);
    }
    if let Some(id) = &payload.extended_properties.canonical_event_id {
        extension["canonical_event_id"] = json!(id);
    }
    if let Some(id) = &payload.extended_properties.origin_account_id {
        extension["origin_account_id"] = json!(id);
    }

    let mut body = json!({
        "subject": payload.title,
        "start": graph_time(payload.start),
        "end": graph_time(payload.end),
        "isAllDay": payload.all_day,
        "showAs": match payload.transparency {
            Transparency::Opaque => "busy",
            Transparency::Transparent => "free",
        },
        "extensions": [extension],
    });
    if let Some(description) = &payload.description {
        body["body"] = json!({ "contentType": "text", "content": description });
    }
    if let Some(location) = &payload.location {
        body["location"] = json!({ "displayName": location });
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_graph_event() {
        let raw = json!({
            "id": "m1",
            "subject": "Standup",
            "start": { "dateTime": "2026-02-20T10:00:00.0000000", "timeZone": "UTC" },
            "end": { "dateTime": "2026-02-20T11:00:00.0000000", "timeZone": "UTC" },
            "showAs": "busy",
            "extensions": [{
                "@odata.type": "microsoft.graph.openTypeExtension",
                "extensionName": "com.calmesh.mirror",
                "managed": "true",
                "canonical_event_id": "evt_x",
                "origin_account_id": "acc_x"
            }]
        });
        let event: GraphEvent = serde_json::from_value(raw).unwrap();
        let provider_event = ProviderEvent::from(event);
        assert!(provider_event.is_managed_mirror());
        assert_eq!(
            provider_event.start.unwrap().date_time.as_deref(),
            Some("2026-02-20T10:00:00Z")
        );
        assert_eq!(provider_event.transparency.as_deref(), Some("opaque"));
    }

    #[test]
    fn test_removed_becomes_cancelled() {
        let raw = json!({ "id": "m2", "@removed": { "reason": "deleted" } });
        let event: GraphEvent = serde_json::from_value(raw).unwrap();
        let provider_event = ProviderEvent::from(event);
        assert_eq!(provider_event.status.as_deref(), Some("cancelled"));
    }

    #[test]
    fn test_payload_to_graph_shape() {
        let payload = ProjectedPayload {
            title: "Busy".into(),
            description: None,
            location: None,
            start: 1_771_581_600_000,
            end: 1_771_585_200_000,
            all_day: false,
            transparency: Transparency::Opaque,
            extended_properties: ExtendedProperties::default(),
        };
        let body = payload_to_graph(&payload);
        assert_eq!(body["showAs"], "busy");
        assert_eq!(body["start"]["timeZone"], "UTC");
    }
}
