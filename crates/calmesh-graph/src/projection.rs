//! Projection compilation and mirror fan-out

use sha2::{Digest, Sha256};
use tracing::debug;

use calmesh_types::{
    AccountId, CalError, CalendarKind, CanonicalEvent, CanonicalEventId, DetailLevel,
    EventStatus, ExtendedProperties, Mirror, MirrorState, PolicyEdge, ProjectedPayload, Result,
    Transparency, WriteMessage, OVERLAY_CALENDAR_SENTINEL,
};

use crate::actor::UserGraph;
use crate::dto::MirrorStateUpdate;

/// Compile a canonical event into the payload for one policy edge
pub fn compile_projection(event: &CanonicalEvent, edge: &PolicyEdge) -> ProjectedPayload {
    let marker = ExtendedProperties::marker(event.canonical_event_id, event.origin_account_id);
    match edge.detail_level {
        DetailLevel::Busy => ProjectedPayload {
            title: "Busy".to_string(),
            description: None,
            location: None,
            start: event.start,
            end: event.end,
            all_day: event.all_day,
            transparency: Transparency::Opaque,
            extended_properties: marker,
        },
        DetailLevel::Full => ProjectedPayload {
            title: event.title.clone(),
            description: event.description.clone(),
            location: event.location.clone(),
            start: event.start,
            end: event.end,
            all_day: event.all_day,
            transparency: event.transparency,
            extended_properties: marker,
        },
    }
}

/// Deterministic content hash over the projection tuple
pub fn projection_hash(
    canonical_event_id: CanonicalEventId,
    detail_level: DetailLevel,
    calendar_kind: CalendarKind,
    payload: &ProjectedPayload,
) -> Result<String> {
    let payload_json = serde_json::to_string(payload)?;
    let mut hasher = Sha256::new();
    hasher.update(canonical_event_id.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(detail_level.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(calendar_kind.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(payload_json.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Stable write idempotency key: the projection hash bound to its target
pub fn idempotency_key(
    canonical_event_id: CanonicalEventId,
    target_account_id: AccountId,
    projection_hash: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_event_id.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(target_account_id.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(projection_hash.as_bytes());
    hex::encode(hasher.finalize())
}

impl UserGraph {
    /// Fan a canonical change out to every outgoing policy edge.
    ///
    /// Per edge: compile, hash, skip when the mirror already carries that
    /// hash (unless `force`), otherwise upsert the mirror `PENDING` and
    /// enqueue an `UPSERT_MIRROR`. Returns the number of writes enqueued.
    pub(crate) async fn project_event(
        &self,
        event: &CanonicalEvent,
        force: bool,
    ) -> Result<u64> {
        if event.status == EventStatus::Cancelled {
            return Ok(0);
        }
        let edges = self.outgoing_edges(event.origin_account_id).await?;
        let mut enqueued = 0;

        for edge in edges {
            if edge.to_account_id == event.origin_account_id {
                continue;
            }
            let payload = compile_projection(event, &edge);
            let hash = projection_hash(
                event.canonical_event_id,
                edge.detail_level,
                edge.calendar_kind,
                &payload,
            )?;

            let existing = self
                .ctx
                .store
                .mirrors()
                .get(event.canonical_event_id, edge.to_account_id)
                .await?;
            if !force {
                if let Some(mirror) = &existing {
                    if mirror.last_projected_hash.as_deref() == Some(hash.as_str())
                        && mirror.state != MirrorState::Error
                    {
                        continue;
                    }
                }
            }

            let target_calendar_id = existing
                .as_ref()
                .map(|m| m.target_calendar_id.clone())
                .filter(|c| !c.is_empty())
                .unwrap_or_else(|| match edge.calendar_kind {
                    CalendarKind::BusyOverlay => OVERLAY_CALENDAR_SENTINEL.to_string(),
                    CalendarKind::Primary => "primary".to_string(),
                });

            let mirror = Mirror {
                canonical_event_id: event.canonical_event_id,
                target_account_id: edge.to_account_id,
                target_calendar_id: target_calendar_id.clone(),
                provider_event_id: existing.as_ref().and_then(|m| m.provider_event_id.clone()),
                last_projected_hash: Some(hash.clone()),
                last_write_ts: existing.as_ref().and_then(|m| m.last_write_ts),
                state: MirrorState::Pending,
                error_message: None,
            };
            self.ctx.store.mirrors().upsert(&mirror).await?;

            self.ctx.write_queue.enqueue(WriteMessage::UpsertMirror {
                canonical_event_id: event.canonical_event_id,
                target_account_id: edge.to_account_id,
                target_calendar_id,
                projected_payload: payload,
                idempotency_key: idempotency_key(
                    event.canonical_event_id,
                    edge.to_account_id,
                    &hash,
                ),
            })?;
            enqueued += 1;
        }
        Ok(enqueued)
    }

    /// Enqueue deletes for every live mirror of a canonical event
    pub(crate) async fn enqueue_mirror_deletes(&self, event_id: CanonicalEventId) -> Result<u64> {
        let mirrors = self.ctx.store.mirrors().live_by_canonical(event_id).await?;
        let mut enqueued = 0;
        for mirror in mirrors {
            enqueued += self.enqueue_mirror_delete_for(event_id, &mirror).await?;
        }
        Ok(enqueued)
    }

    /// Enqueue the teardown of one mirror. A mirror that was never written
    /// to the provider is tombstoned directly.
    pub(crate) async fn enqueue_mirror_delete_for(
        &self,
        event_id: CanonicalEventId,
        mirror: &Mirror,
    ) -> Result<u64> {
        match &mirror.provider_event_id {
            Some(provider_event_id) => {
                let key_hash = mirror.last_projected_hash.clone().unwrap_or_default();
                self.ctx.write_queue.enqueue(WriteMessage::DeleteMirror {
                    canonical_event_id: event_id,
                    target_account_id: mirror.target_account_id,
                    provider_event_id: provider_event_id.clone(),
                    idempotency_key: idempotency_key(
                        event_id,
                        mirror.target_account_id,
                        &format!("delete|{key_hash}"),
                    ),
                })?;
                Ok(1)
            }
            None => {
                self.ctx
                    .store
                    .mirrors()
                    .update_state(
                        event_id,
                        mirror.target_account_id,
                        MirrorState::Tombstoned,
                        None,
                        None,
                        None,
                    )
                    .await?;
                Ok(0)
            }
        }
    }

    pub(crate) async fn get_mirror(
        &self,
        canonical_event_id: CanonicalEventId,
        target_account_id: AccountId,
    ) -> Result<Option<Mirror>> {
        self.ctx
            .store
            .mirrors()
            .get(canonical_event_id, target_account_id)
            .await
    }

    pub(crate) async fn update_mirror_state(
        &self,
        canonical_event_id: CanonicalEventId,
        target_account_id: AccountId,
        update: MirrorStateUpdate,
    ) -> Result<()> {
        let existing = self
            .ctx
            .store
            .mirrors()
            .get(canonical_event_id, target_account_id)
            .await?
            .ok_or_else(|| {
                CalError::not_found("mirror", format!("{canonical_event_id}/{target_account_id}"))
            })?;

        if update.state == MirrorState::Active
            && update.provider_event_id.is_none()
            && existing.provider_event_id.is_none()
        {
            return Err(CalError::invalid_transition(
                "mirror cannot become ACTIVE without a provider event id",
            ));
        }

        self.ctx
            .store
            .mirrors()
            .update_state(
                canonical_event_id,
                target_account_id,
                update.state,
                update.provider_event_id.as_deref(),
                update.error.as_deref(),
                update.last_write_ts,
            )
            .await?;
        debug!(
            user_id = %self.ctx.user_id,
            canonical_event_id = %canonical_event_id,
            target_account_id = %target_account_id,
            state = update.state.as_str(),
            "Mirror state updated"
        );
        Ok(())
    }

    /// Cache the resolved overlay calendar id on the mirror row
    pub(crate) async fn set_mirror_calendar(
        &self,
        canonical_event_id: CanonicalEventId,
        target_account_id: AccountId,
        target_calendar_id: &str,
    ) -> Result<()> {
        self.ctx
            .store
            .mirrors()
            .set_target_calendar(canonical_event_id, target_account_id, target_calendar_id)
            .await
    }

    /// Force re-projection of one canonical event, or of every event the
    /// user owns when no id is given. Used by reconcile.
    pub(crate) async fn recompute_projections(
        &self,
        canonical_event_id: Option<CanonicalEventId>,
    ) -> Result<u64> {
        match canonical_event_id {
            Some(id) => {
                let event = self
                    .ctx
                    .store
                    .events()
                    .get(id)
                    .await?
                    .ok_or_else(|| CalError::not_found("canonical event", id.to_string()))?;
                self.project_event(&event, true).await
            }
            None => {
                let mut enqueued = 0;
                let mut cursor = None;
                loop {
                    let page = self
                        .ctx
                        .store
                        .events()
                        .list(self.ctx.user_id, None, None, None, 200, cursor.as_deref())
                        .await?;
                    for event in &page.events {
                        enqueued += self.project_event(event, false).await?;
                    }
                    match page.next_cursor {
                        Some(next) => cursor = Some(next),
                        None => break,
                    }
                }
                Ok(enqueued)
            }
        }
    }
}
