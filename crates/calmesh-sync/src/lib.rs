//! CalMesh Sync Consumer
//!
//! Transforms provider webhook pings into canonical-store deltas while
//! keeping cursor discipline: a missing cursor enqueues a full sync, an
//! expired cursor (`410 Gone`) rebuilds it, and the new cursor is only
//! stored after the whole listing lands in the canonical store. Managed
//! mirrors (our own writes) are classified out before normalisation so
//! they are never ingested as origin events.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use calmesh_provider::normalize::build_deltas;
use calmesh_provider::{CalendarApi, ProviderEvent};
use calmesh_queue::{Consumer, Outcome, Queue};
use calmesh_registry::ActorRouter;
use calmesh_types::{time, CalError, Result, SyncMessage, SyncReason};

pub struct SyncConsumer {
    router: Arc<ActorRouter>,
    calendar: Arc<dyn CalendarApi>,
    /// Self-enqueue target for `SYNC_FULL` follow-ups
    sync_queue: Queue<SyncMessage>,
}

impl SyncConsumer {
    pub fn new(
        router: Arc<ActorRouter>,
        calendar: Arc<dyn CalendarApi>,
        sync_queue: Queue<SyncMessage>,
    ) -> Self {
        Self {
            router,
            calendar,
            sync_queue,
        }
    }

    /// Page one calendar to exhaustion, filter managed mirrors, apply the
    /// coalesced deltas, then persist the fresh cursor.
    async fn run_listing(
        &self,
        record: &calmesh_types::AccountRecord,
        graph: &calmesh_graph::UserGraphHandle,
        actor: &calmesh_account::AccountActorHandle,
        access_token: &str,
        calendar_id: &str,
        sync_token: Option<&str>,
    ) -> Result<()> {
        let mut origin_events: Vec<ProviderEvent> = Vec::new();
        let mut managed_skipped = 0usize;
        let mut page_token: Option<String> = None;
        let mut new_sync_token: Option<String> = None;

        loop {
            let page = self
                .calendar
                .list_events(
                    record.provider,
                    access_token,
                    calendar_id,
                    sync_token,
                    page_token.as_deref(),
                )
                .await?;
            for event in page.events {
                if event.is_managed_mirror() {
                    managed_skipped += 1;
                } else {
                    origin_events.push(event);
                }
            }
            if let Some(token) = page.next_sync_token {
                new_sync_token = Some(token);
            }
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        let deltas = build_deltas(&origin_events);
        let report = graph
            .apply_provider_delta(record.account_id, deltas)
            .await?;
        for error in &report.errors {
            warn!(account_id = %record.account_id, error, "Delta item failed");
        }

        if let Some(token) = new_sync_token {
            actor.set_sync_token(Some(token)).await?;
        }
        actor.mark_sync_success(time::now_millis()).await?;
        debug!(
            account_id = %record.account_id,
            calendar_id,
            origin = origin_events.len(),
            managed_skipped,
            created = report.created,
            updated = report.updated,
            deleted = report.deleted,
            "Listing applied"
        );
        Ok(())
    }

    async fn process(&self, message: &SyncMessage) -> Result<()> {
        let account_id = message.account_id();
        // Unknown account is permanent: the ping raced an unlink
        let Some((record, graph)) = self.router.user_for_account(account_id).await? else {
            debug!(account_id = %account_id, "Ping for unknown account; dropping");
            return Ok(());
        };
        let actor = self.router.account(account_id).await?;

        let access_token = match actor.get_access_token().await {
            Ok(token) => token,
            // A 4xx refresh means the grant is gone; record and stop
            Err(CalError::RefreshFailed { status, body }) if status < 500 => {
                actor
                    .mark_sync_failure(format!("refresh rejected ({status}): {body}"))
                    .await?;
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        match message {
            SyncMessage::Incremental { calendar_id, .. } => {
                let calendar_id = calendar_id.as_deref().unwrap_or("primary");
                let Some(sync_token) = actor.get_sync_token().await? else {
                    info!(account_id = %account_id, "No cursor yet; scheduling full sync");
                    self.sync_queue.enqueue(SyncMessage::Full {
                        account_id,
                        reason: SyncReason::Onboarding,
                    })?;
                    return Ok(());
                };

                match self
                    .run_listing(
                        &record,
                        &graph,
                        &actor,
                        &access_token,
                        calendar_id,
                        Some(&sync_token),
                    )
                    .await
                {
                    Ok(()) => Ok(()),
                    Err(CalError::Provider { status: 410, .. }) => {
                        info!(account_id = %account_id, "Cursor expired; scheduling full sync");
                        actor
                            .mark_sync_failure("sync token expired (410)".to_string())
                            .await?;
                        self.sync_queue.enqueue(SyncMessage::Full {
                            account_id,
                            reason: SyncReason::Token410,
                        })?;
                        Ok(())
                    }
                    // Likely a permission change; do not hammer the provider
                    Err(CalError::Provider { status: 403, body }) => {
                        warn!(account_id = %account_id, "Listing forbidden; marking failure");
                        actor
                            .mark_sync_failure(format!("listing forbidden (403): {body}"))
                            .await?;
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            }
            SyncMessage::Full { reason, .. } => {
                info!(account_id = %account_id, reason = reason.as_str(), "Full sync");
                for calendar_id in actor.list_enabled_calendars().await? {
                    self.run_listing(&record, &graph, &actor, &access_token, &calendar_id, None)
                        .await?;
                }
                Ok(())
            }
        }
    }
}

#[async_trait]
impl Consumer<SyncMessage> for SyncConsumer {
    async fn handle(&self, message: &SyncMessage) -> Outcome {
        match self.process(message).await {
            Ok(()) => Outcome::Ack,
            Err(e) => {
                warn!(
                    account_id = %message.account_id(),
                    error = %e,
                    error_code = e.error_code(),
                    "Sync failed"
                );
                Outcome::from_error(&e)
            }
        }
    }
}

#[cfg(test)]
mod tests;
