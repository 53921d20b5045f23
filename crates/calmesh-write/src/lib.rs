//! CalMesh Write Consumer
//!
//! Lands mirror projections in target calendars. Idempotency rests on the
//! content-derived `idempotency_key` plus a 409-duplicate fallback: when a
//! provider rejects an insert as a duplicate, the existing managed event is
//! located by its marker and patched instead. The overlay-calendar sentinel
//! is resolved (creating the calendar on first write) and the real id is
//! cached back onto the mirror row.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use calmesh_graph::MirrorStateUpdate;
use calmesh_provider::CalendarApi;
use calmesh_queue::{Consumer, Outcome};
use calmesh_registry::ActorRouter;
use calmesh_types::{
    time, AccountId, CalError, CanonicalEventId, MirrorState, ProjectedPayload, Result,
    WriteMessage, OVERLAY_CALENDAR_SENTINEL,
};

pub struct WriteConsumer {
    router: Arc<ActorRouter>,
    calendar: Arc<dyn CalendarApi>,
}

impl WriteConsumer {
    pub fn new(router: Arc<ActorRouter>, calendar: Arc<dyn CalendarApi>) -> Self {
        Self { router, calendar }
    }

    async fn upsert(
        &self,
        canonical_event_id: CanonicalEventId,
        target_account_id: AccountId,
        target_calendar_id: &str,
        payload: &ProjectedPayload,
        message_key: &str,
    ) -> Result<()> {
        let Some((record, graph)) = self.router.user_for_account(target_account_id).await? else {
            debug!(target_account_id = %target_account_id, "Write for unknown account; dropping");
            return Ok(());
        };

        // Stale-delivery guard: the mirror row carries the hash of the
        // latest projection; a message keyed off an older hash lost the
        // race to a newer one and must not overwrite it
        if let Some(current) = graph
            .get_mirror(canonical_event_id, target_account_id)
            .await?
            .and_then(|m| m.last_projected_hash)
        {
            let expected = calmesh_graph::idempotency_key(
                canonical_event_id,
                target_account_id,
                &current,
            );
            if expected != message_key {
                debug!(
                    canonical_event_id = %canonical_event_id,
                    target_account_id = %target_account_id,
                    "Stale mirror write superseded; dropping"
                );
                return Ok(());
            }
        }

        let actor = self.router.account(target_account_id).await?;
        let access_token = actor.get_access_token().await?;

        // Resolve the overlay sentinel once and cache the real id
        let calendar_id = if target_calendar_id == OVERLAY_CALENDAR_SENTINEL {
            let resolved = self
                .calendar
                .ensure_overlay_calendar(record.provider, &access_token)
                .await?;
            graph
                .set_mirror_calendar(canonical_event_id, target_account_id, resolved.clone())
                .await?;
            resolved
        } else {
            target_calendar_id.to_string()
        };

        let mirror = graph
            .get_mirror(canonical_event_id, target_account_id)
            .await?;
        let provider_event_id = match mirror.as_ref().and_then(|m| m.provider_event_id.clone()) {
            Some(existing) => {
                self.calendar
                    .patch_event(
                        record.provider,
                        &access_token,
                        &calendar_id,
                        &existing,
                        payload,
                    )
                    .await?;
                existing
            }
            None => {
                match self
                    .calendar
                    .insert_event(record.provider, &access_token, &calendar_id, payload)
                    .await
                {
                    Ok(created) => created,
                    // Duplicate insert on redelivery: adopt the existing
                    // managed event and patch it
                    Err(CalError::Provider { status: 409, .. }) => {
                        let existing = self
                            .calendar
                            .find_managed_event(
                                record.provider,
                                &access_token,
                                &calendar_id,
                                &canonical_event_id.to_string(),
                            )
                            .await?
                            .ok_or(CalError::Provider {
                                status: 409,
                                body: "duplicate insert but managed event not found".to_string(),
                            })?;
                        self.calendar
                            .patch_event(
                                record.provider,
                                &access_token,
                                &calendar_id,
                                &existing,
                                payload,
                            )
                            .await?;
                        existing
                    }
                    Err(e) => return Err(e),
                }
            }
        };

        graph
            .update_mirror_state(
                canonical_event_id,
                target_account_id,
                MirrorStateUpdate {
                    state: MirrorState::Active,
                    provider_event_id: Some(provider_event_id),
                    error: None,
                    last_write_ts: Some(time::now_millis()),
                },
            )
            .await?;
        Ok(())
    }

    async fn delete(
        &self,
        canonical_event_id: CanonicalEventId,
        target_account_id: AccountId,
        provider_event_id: &str,
    ) -> Result<()> {
        let Some((record, graph)) = self.router.user_for_account(target_account_id).await? else {
            return Ok(());
        };
        let actor = self.router.account(target_account_id).await?;
        let access_token = actor.get_access_token().await?;

        let mirror = graph
            .get_mirror(canonical_event_id, target_account_id)
            .await?;
        let calendar_id = mirror
            .as_ref()
            .map(|m| m.target_calendar_id.clone())
            .filter(|c| c != OVERLAY_CALENDAR_SENTINEL)
            .unwrap_or_else(|| "primary".to_string());

        match self
            .calendar
            .delete_event(
                record.provider,
                &access_token,
                &calendar_id,
                provider_event_id,
            )
            .await
        {
            Ok(()) => {}
            // Already gone upstream counts as success
            Err(CalError::Provider { status: 404, .. }) => {}
            Err(e) => return Err(e),
        }

        if mirror.is_some() {
            graph
                .update_mirror_state(
                    canonical_event_id,
                    target_account_id,
                    MirrorStateUpdate {
                        state: MirrorState::Tombstoned,
                        provider_event_id: None,
                        error: None,
                        last_write_ts: Some(time::now_millis()),
                    },
                )
                .await?;
        }
        Ok(())
    }

    async fn process(&self, message: &WriteMessage) -> Result<()> {
        match message {
            WriteMessage::UpsertMirror {
                canonical_event_id,
                target_account_id,
                target_calendar_id,
                projected_payload,
                idempotency_key,
            } => {
                self.upsert(
                    *canonical_event_id,
                    *target_account_id,
                    target_calendar_id,
                    projected_payload,
                    idempotency_key,
                )
                .await
            }
            WriteMessage::DeleteMirror {
                canonical_event_id,
                target_account_id,
                provider_event_id,
                idempotency_key: _,
            } => {
                self.delete(*canonical_event_id, *target_account_id, provider_event_id)
                    .await
            }
        }
    }

    /// Record a permanent write failure on the mirror row
    async fn mark_error(&self, message: &WriteMessage, error: &CalError) {
        let (canonical_event_id, target_account_id) = match message {
            WriteMessage::UpsertMirror {
                canonical_event_id,
                target_account_id,
                ..
            }
            | WriteMessage::DeleteMirror {
                canonical_event_id,
                target_account_id,
                ..
            } => (*canonical_event_id, *target_account_id),
        };
        let Ok(Some((_, graph))) = self.router.user_for_account(target_account_id).await else {
            return;
        };
        let update = MirrorStateUpdate {
            state: MirrorState::Error,
            provider_event_id: None,
            error: Some(error.to_string()),
            last_write_ts: None,
        };
        if let Err(e) = graph
            .update_mirror_state(canonical_event_id, target_account_id, update)
            .await
        {
            // Hold teardown messages have no mirror row to mark
            debug!(error = %e, "No mirror row to mark ERROR");
        }
    }
}

#[async_trait]
impl Consumer<WriteMessage> for WriteConsumer {
    async fn handle(&self, message: &WriteMessage) -> Outcome {
        match self.process(message).await {
            Ok(()) => Outcome::Ack,
            Err(e) => {
                warn!(
                    idempotency_key = message.idempotency_key(),
                    error = %e,
                    error_code = e.error_code(),
                    "Mirror write failed"
                );
                let outcome = Outcome::from_error(&e);
                if outcome == Outcome::Ack {
                    // Permanent: park the mirror in ERROR for reconcile
                    self.mark_error(message, &e).await;
                }
                outcome
            }
        }
    }
}

#[cfg(test)]
mod tests;
