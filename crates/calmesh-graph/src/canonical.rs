//! Canonical store operations

use serde_json::json;
use tracing::debug;

use calmesh_types::{
    time, AccountId, CalError, CanonicalEvent, CanonicalEventId, DeltaKind, EventContent,
    EventSource, EventStatus, JournalEntry, JournalId, ProviderDelta, Result, SyncHealth,
};

use crate::actor::UserGraph;
use crate::dto::{ApplyDeltaReport, EventPage, EventWithMirrors, ListEventsQuery, UnlinkReport};

impl UserGraph {
    pub(crate) async fn journal(
        &self,
        canonical_event_id: Option<CanonicalEventId>,
        actor: &str,
        change_type: &str,
        patch: Option<serde_json::Value>,
        reason: Option<String>,
    ) -> Result<()> {
        self.ctx
            .store
            .journal()
            .append(&JournalEntry {
                journal_id: JournalId::new(),
                user_id: self.ctx.user_id,
                canonical_event_id,
                ts: time::now_millis(),
                actor: actor.to_string(),
                change_type: change_type.to_string(),
                patch,
                reason,
            })
            .await
    }

    fn apply_content(event: &mut CanonicalEvent, content: &EventContent) {
        event.title = content.title.clone();
        event.description = content.description.clone();
        event.location = content.location.clone();
        event.start = content.start;
        event.end = content.end;
        event.all_day = content.all_day;
        event.status = content.status;
        event.visibility = content.visibility.clone();
        event.transparency = content.transparency;
        event.recurrence_rule = content.recurrence_rule.clone();
    }

    async fn apply_one_delta(
        &self,
        origin_account_id: AccountId,
        delta: &ProviderDelta,
        report: &mut ApplyDeltaReport,
    ) -> Result<()> {
        let existing = self
            .ctx
            .store
            .events()
            .find_by_origin(origin_account_id, &delta.origin_event_id)
            .await?;

        match delta.kind {
            DeltaKind::Created | DeltaKind::Updated => {
                let content = delta.event.as_ref().ok_or_else(|| {
                    CalError::validation(format!(
                        "delta for {} carries no event content",
                        delta.origin_event_id
                    ))
                })?;
                if content.end < content.start {
                    return Err(CalError::validation(format!(
                        "event {} ends before it starts",
                        delta.origin_event_id
                    )));
                }

                let now = time::now_millis();
                let (event, change_type) = match existing {
                    Some(mut event) => {
                        Self::apply_content(&mut event, content);
                        event.version += 1;
                        event.updated_at = now;
                        (event, "updated")
                    }
                    None => (
                        CanonicalEvent {
                            canonical_event_id: CanonicalEventId::new(),
                            user_id: self.ctx.user_id,
                            origin_account_id,
                            origin_event_id: delta.origin_event_id.clone(),
                            title: content.title.clone(),
                            description: content.description.clone(),
                            location: content.location.clone(),
                            start: content.start,
                            end: content.end,
                            all_day: content.all_day,
                            status: content.status,
                            visibility: content.visibility.clone(),
                            transparency: content.transparency,
                            recurrence_rule: content.recurrence_rule.clone(),
                            source: EventSource::Provider,
                            version: 1,
                            created_at: now,
                            updated_at: now,
                        },
                        "created",
                    ),
                };
                self.ctx.store.events().upsert(&event).await?;
                self.journal(
                    Some(event.canonical_event_id),
                    "sync",
                    change_type,
                    Some(serde_json::to_value(content)?),
                    None,
                )
                .await?;
                if change_type == "created" {
                    report.created += 1;
                } else {
                    report.updated += 1;
                }

                // Cancelled upstream content tears mirrors down instead
                if event.status == EventStatus::Cancelled {
                    report.mirrors_enqueued +=
                        self.enqueue_mirror_deletes(event.canonical_event_id).await?;
                } else {
                    report.mirrors_enqueued += self.project_event(&event, false).await?;
                }
            }
            DeltaKind::Deleted => {
                let Some(mut event) = existing else {
                    // Unknown origin event; nothing to delete
                    return Ok(());
                };
                if event.status == EventStatus::Cancelled {
                    return Ok(());
                }
                event.status = EventStatus::Cancelled;
                event.version += 1;
                event.updated_at = time::now_millis();
                self.ctx.store.events().upsert(&event).await?;
                self.journal(
                    Some(event.canonical_event_id),
                    "sync",
                    "deleted",
                    None,
                    None,
                )
                .await?;
                report.deleted += 1;
                report.mirrors_enqueued +=
                    self.enqueue_mirror_deletes(event.canonical_event_id).await?;
            }
        }
        Ok(())
    }

    /// Apply a batch of provider deltas. Item failures are collected, the
    /// batch never aborts, and every applied change appends exactly one
    /// journal row and bumps the event version.
    pub(crate) async fn apply_provider_delta(
        &self,
        origin_account_id: AccountId,
        deltas: Vec<ProviderDelta>,
    ) -> Result<ApplyDeltaReport> {
        let mut report = ApplyDeltaReport::default();
        for delta in &deltas {
            if let Err(e) = self.apply_one_delta(origin_account_id, delta, &mut report).await {
                report
                    .errors
                    .push(format!("{}: {e}", delta.origin_event_id));
            }
        }
        debug!(
            user_id = %self.ctx.user_id,
            origin_account_id = %origin_account_id,
            created = report.created,
            updated = report.updated,
            deleted = report.deleted,
            mirrors = report.mirrors_enqueued,
            errors = report.errors.len(),
            "Provider delta batch applied"
        );
        Ok(report)
    }

    pub(crate) async fn find_canonical_by_origin(
        &self,
        origin_account_id: AccountId,
        origin_event_id: &str,
    ) -> Result<Option<CanonicalEvent>> {
        self.ctx
            .store
            .events()
            .find_by_origin(origin_account_id, origin_event_id)
            .await
    }

    pub(crate) async fn get_canonical_event(
        &self,
        id: CanonicalEventId,
    ) -> Result<EventWithMirrors> {
        let event = self
            .ctx
            .store
            .events()
            .get(id)
            .await?
            .ok_or_else(|| CalError::not_found("canonical event", id.to_string()))?;
        let mirrors = self.ctx.store.mirrors().list_by_canonical(id).await?;
        Ok(EventWithMirrors { event, mirrors })
    }

    pub(crate) async fn list_canonical_events(&self, query: ListEventsQuery) -> Result<EventPage> {
        let page = self
            .ctx
            .store
            .events()
            .list(
                self.ctx.user_id,
                query.time_min,
                query.time_max,
                query.origin_account_id,
                query.limit.clamp(1, 500),
                query.cursor.as_deref(),
            )
            .await?;
        Ok(EventPage {
            events: page.events,
            next_cursor: page.next_cursor,
        })
    }

    /// Accounts that currently originate canonical events for this user
    pub(crate) async fn known_origin_accounts(&self) -> Result<Vec<AccountId>> {
        let accounts = self
            .ctx
            .store
            .registry()
            .list_by_user(self.ctx.user_id)
            .await?;
        Ok(accounts.into_iter().map(|a| a.account_id).collect())
    }

    pub(crate) async fn get_sync_health(&self) -> Result<SyncHealth> {
        let total_events = self.ctx.store.events().count(self.ctx.user_id).await?;
        let mirrors = self.ctx.store.mirrors().counts(self.ctx.user_id).await?;
        let total_journal_entries = self.ctx.store.journal().count(self.ctx.user_id).await?;
        let last_journal_ts = self.ctx.store.journal().last_ts(self.ctx.user_id).await?;
        Ok(SyncHealth {
            total_events,
            total_mirrors: mirrors.total,
            total_journal_entries,
            pending_mirrors: mirrors.pending,
            error_mirrors: mirrors.error,
            last_journal_ts,
        })
    }

    /// Cascade removal of everything tied to an account. Mirrors go before
    /// their canonical rows so the join still resolves.
    pub(crate) async fn unlink_account(&self, account_id: AccountId) -> Result<UnlinkReport> {
        let origin_mirrors_deleted = self
            .ctx
            .store
            .mirrors()
            .delete_by_origin_account(account_id)
            .await?;
        let target_mirrors_deleted =
            self.ctx.store.mirrors().delete_by_target(account_id).await?;
        let canonical_events_deleted = self
            .ctx
            .store
            .events()
            .delete_by_origin_account(account_id)
            .await?;
        let policy_edges_removed = self
            .ctx
            .store
            .policies()
            .remove_edges_referencing(self.ctx.user_id, account_id)
            .await?;
        let calendars_removed = self
            .ctx
            .store
            .sync_state()
            .delete_calendars(account_id)
            .await?;

        let report = UnlinkReport {
            canonical_events_deleted,
            origin_mirrors_deleted,
            target_mirrors_deleted,
            policy_edges_removed,
            calendars_removed,
        };
        self.journal(
            None,
            "api",
            "account_unlinked",
            Some(json!({
                "account_id": account_id,
                "canonical_events_deleted": canonical_events_deleted,
                "mirrors_deleted": origin_mirrors_deleted + target_mirrors_deleted,
            })),
            None,
        )
        .await?;
        Ok(report)
    }
}
