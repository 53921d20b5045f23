//! Normalisation of provider events into canonical deltas

use tracing::warn;

use calmesh_types::{
    time, DeltaKind, EventContent, EventStatus, ProviderDelta, Result, Transparency,
};

use crate::types::{EventTime, ProviderEvent};

fn parse_moment(moment: &EventTime) -> Result<(i64, bool)> {
    if let Some(date_time) = &moment.date_time {
        return Ok((time::parse_rfc3339(date_time)?, false));
    }
    if let Some(date) = &moment.date {
        return Ok((time::parse_date(date)?, true));
    }
    Err(calmesh_types::CalError::validation(
        "event moment carries neither dateTime nor date",
    ))
}

/// Normalise one origin event into canonical content. Returns an error for
/// events the canonical model cannot hold (missing times, end before start).
pub fn normalize_event(event: &ProviderEvent) -> Result<EventContent> {
    let (start, start_all_day) = parse_moment(event.start.as_ref().ok_or_else(|| {
        calmesh_types::CalError::validation(format!("event {} has no start", event.id))
    })?)?;
    let (end, _) = parse_moment(event.end.as_ref().ok_or_else(|| {
        calmesh_types::CalError::validation(format!("event {} has no end", event.id))
    })?)?;
    if end < start {
        return Err(calmesh_types::CalError::validation(format!(
            "event {} ends before it starts",
            event.id
        )));
    }

    let status = event
        .status
        .as_deref()
        .and_then(EventStatus::parse)
        .unwrap_or(EventStatus::Confirmed);
    let transparency = event
        .transparency
        .as_deref()
        .and_then(Transparency::parse)
        .unwrap_or(Transparency::Opaque);

    Ok(EventContent {
        title: event
            .summary
            .clone()
            .unwrap_or_else(|| "(untitled)".to_string()),
        description: event.description.clone(),
        location: event.location.clone(),
        start,
        end,
        all_day: start_all_day,
        status,
        visibility: event.visibility.clone(),
        transparency,
        recurrence_rule: event.recurrence.first().cloned(),
    })
}

/// Build a delta batch from fetched origin events.
///
/// Managed mirrors are the caller's own writes and must be filtered out
/// before calling. Cancelled events become deletions; multiple observations
/// of the same `origin_event_id` coalesce to the last state observed.
pub fn build_deltas(events: &[ProviderEvent]) -> Vec<ProviderDelta> {
    let mut by_origin: Vec<ProviderDelta> = Vec::with_capacity(events.len());
    for event in events {
        let delta = if event.status.as_deref() == Some("cancelled") {
            ProviderDelta {
                kind: DeltaKind::Deleted,
                origin_event_id: event.id.clone(),
                event: None,
            }
        } else {
            match normalize_event(event) {
                Ok(content) => ProviderDelta {
                    kind: DeltaKind::Updated,
                    origin_event_id: event.id.clone(),
                    event: Some(content),
                },
                Err(e) => {
                    warn!(event_id = %event.id, error = %e, "Skipping unnormalisable event");
                    continue;
                }
            }
        };

        match by_origin
            .iter()
            .position(|d| d.origin_event_id == delta.origin_event_id)
        {
            // Last observation wins
            Some(index) => by_origin[index] = delta,
            None => by_origin.push(delta),
        }
    }
    by_origin
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timed(id: &str, start: &str, end: &str) -> ProviderEvent {
        ProviderEvent {
            id: id.to_string(),
            status: Some("confirmed".to_string()),
            summary: Some("Standup".to_string()),
            start: Some(EventTime {
                date_time: Some(start.to_string()),
                date: None,
            }),
            end: Some(EventTime {
                date_time: Some(end.to_string()),
                date: None,
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_normalize_timed_event() {
        let event = timed("g1", "2026-02-20T10:00:00Z", "2026-02-20T11:00:00Z");
        let content = normalize_event(&event).unwrap();
        assert_eq!(content.title, "Standup");
        assert!(!content.all_day);
        assert_eq!(content.end - content.start, 3_600_000);
        assert_eq!(content.transparency, Transparency::Opaque);
    }

    #[test]
    fn test_normalize_all_day() {
        let mut event = timed("g1", "", "");
        event.start = Some(EventTime {
            date_time: None,
            date: Some("2026-02-20".to_string()),
        });
        event.end = Some(EventTime {
            date_time: None,
            date: Some("2026-02-21".to_string()),
        });
        let content = normalize_event(&event).unwrap();
        assert!(content.all_day);
    }

    #[test]
    fn test_cancelled_becomes_delete() {
        let mut event = timed("g1", "2026-02-20T10:00:00Z", "2026-02-20T11:00:00Z");
        event.status = Some("cancelled".to_string());
        let deltas = build_deltas(&[event]);
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].kind, DeltaKind::Deleted);
    }

    #[test]
    fn test_coalesce_last_state_wins() {
        let cancelled = {
            let mut e = timed("g1", "2026-02-20T10:00:00Z", "2026-02-20T11:00:00Z");
            e.status = Some("cancelled".to_string());
            e
        };
        let updated = timed("g1", "2026-02-20T12:00:00Z", "2026-02-20T13:00:00Z");
        let deltas = build_deltas(&[cancelled, updated]);
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].kind, DeltaKind::Updated);
    }

    #[test]
    fn test_unnormalisable_skipped() {
        let mut broken = timed("g2", "2026-02-20T10:00:00Z", "2026-02-20T11:00:00Z");
        broken.end = None;
        let ok = timed("g1", "2026-02-20T10:00:00Z", "2026-02-20T11:00:00Z");
        let deltas = build_deltas(&[broken, ok]);
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].origin_event_id, "g1");
    }
}
