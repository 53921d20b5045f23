//! CalMesh Reconcile Worker
//!
//! Daily (or on-demand) cross-check between the canonical store and one
//! account's provider calendars. Five discrepancy classes are detected and
//! repaired, each journalled as `reconcile:<type>`:
//!
//! - **missing canonical**: an origin event the store never saw
//! - **missing mirror**: a policy edge with no mirror row for an event
//! - **orphaned mirror**: a managed event upstream with no mirror row
//! - **hash mismatch**: a mirror whose stored projection hash diverged
//! - **stale mirror**: an ACTIVE mirror whose provider event vanished
//!
//! Single repair failures are logged and skipped; the cron retries the
//! whole account on its next schedule.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use calmesh_graph::{
    compile_projection, idempotency_key, projection_hash, DiscrepancyRecord, MirrorStateUpdate,
    UserGraphHandle,
};
use calmesh_provider::normalize::normalize_event;
use calmesh_provider::{CalendarApi, ProviderEvent};
use calmesh_queue::Queue;
use calmesh_registry::ActorRouter;
use calmesh_types::{
    time, AccountId, CanonicalEventId, DeltaKind, DiscrepancyKind, MirrorState, ProviderDelta,
    Result, WriteMessage,
};

/// Why this reconcile run was started
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileReason {
    Scheduled,
    Manual,
    DriftDetected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileRequest {
    pub account_id: AccountId,
    pub reason: ReconcileReason,
    /// Restrict to one calendar; defaults to the account's enabled scopes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

/// Per-run repair counters. A drift-free run is all zeros.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub events_scanned: u64,
    pub missing_canonicals_created: u64,
    pub missing_mirrors_enqueued: u64,
    pub orphaned_mirrors_enqueued: u64,
    pub hash_mismatches_corrected: u64,
    pub stale_mirrors_tombstoned: u64,
    pub repair_failures: u64,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.missing_canonicals_created == 0
            && self.missing_mirrors_enqueued == 0
            && self.orphaned_mirrors_enqueued == 0
            && self.hash_mismatches_corrected == 0
            && self.stale_mirrors_tombstoned == 0
    }
}

pub struct ReconcileWorker {
    router: Arc<ActorRouter>,
    calendar: Arc<dyn CalendarApi>,
    write_queue: Queue<WriteMessage>,
}

impl ReconcileWorker {
    pub fn new(
        router: Arc<ActorRouter>,
        calendar: Arc<dyn CalendarApi>,
        write_queue: Queue<WriteMessage>,
    ) -> Self {
        Self {
            router,
            calendar,
            write_queue,
        }
    }

    pub async fn run(&self, request: &ReconcileRequest) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();
        let account_id = request.account_id;
        let Some((record, graph)) = self.router.user_for_account(account_id).await? else {
            warn!(account_id = %account_id, "Reconcile for unknown account; skipping");
            return Ok(report);
        };
        let actor = self.router.account(account_id).await?;
        let access_token = actor.get_access_token().await?;

        let scopes = match &request.scope {
            Some(scope) => vec![scope.clone()],
            None => actor.list_enabled_calendars().await?,
        };

        // Full-list each scope to exhaustion, deduplicating across scopes
        let mut fetched: HashMap<String, ProviderEvent> = HashMap::new();
        let mut last_sync_token = None;
        for calendar_id in &scopes {
            let mut page_token: Option<String> = None;
            loop {
                let page = self
                    .calendar
                    .list_events(
                        record.provider,
                        &access_token,
                        calendar_id,
                        None,
                        page_token.as_deref(),
                    )
                    .await?;
                for event in page.events {
                    fetched.entry(event.id.clone()).or_insert(event);
                }
                if let Some(token) = page.next_sync_token {
                    last_sync_token = Some(token);
                }
                match page.next_page_token {
                    Some(token) => page_token = Some(token),
                    None => break,
                }
            }
        }
        report.events_scanned = fetched.len() as u64;

        let (managed, origin): (Vec<_>, Vec<_>) = fetched
            .into_values()
            .partition(ProviderEvent::is_managed_mirror);

        let edges = graph.get_policy_edges(Some(account_id)).await?;
        for event in &origin {
            if let Err(e) = self
                .reconcile_origin_event(account_id, &graph, &edges, event, &mut report)
                .await
            {
                report.repair_failures += 1;
                warn!(account_id = %account_id, event_id = %event.id, error = %e, "Origin repair failed");
            }
        }

        let observed_managed: HashSet<String> = managed.iter().map(|e| e.id.clone()).collect();
        for event in &managed {
            if let Err(e) = self
                .reconcile_managed_event(account_id, &graph, event, &mut report)
                .await
            {
                report.repair_failures += 1;
                warn!(account_id = %account_id, event_id = %event.id, error = %e, "Mirror repair failed");
            }
        }

        // ACTIVE mirrors whose provider event disappeared upstream
        for mirror in graph.get_active_mirrors(account_id).await? {
            let present = mirror
                .provider_event_id
                .as_ref()
                .is_some_and(|id| observed_managed.contains(id));
            if present {
                continue;
            }
            let result = graph
                .update_mirror_state(
                    mirror.canonical_event_id,
                    account_id,
                    MirrorStateUpdate {
                        state: MirrorState::Tombstoned,
                        provider_event_id: None,
                        error: None,
                        last_write_ts: None,
                    },
                )
                .await;
            match result {
                Ok(()) => {
                    report.stale_mirrors_tombstoned += 1;
                    graph
                        .log_reconcile_discrepancy(DiscrepancyRecord {
                            kind: DiscrepancyKind::StaleMirror,
                            canonical_event_id: Some(mirror.canonical_event_id),
                            account_id,
                            details: json!({
                                "provider_event_id": mirror.provider_event_id,
                            }),
                        })
                        .await?;
                }
                Err(e) => {
                    report.repair_failures += 1;
                    warn!(account_id = %account_id, error = %e, "Stale-mirror repair failed");
                }
            }
        }

        if let Some(token) = last_sync_token {
            actor.set_sync_token(Some(token)).await?;
        }
        actor.mark_sync_success(time::now_millis()).await?;

        info!(
            account_id = %account_id,
            reason = ?request.reason,
            scanned = report.events_scanned,
            missing_canonicals = report.missing_canonicals_created,
            missing_mirrors = report.missing_mirrors_enqueued,
            orphans = report.orphaned_mirrors_enqueued,
            hash_mismatches = report.hash_mismatches_corrected,
            stale = report.stale_mirrors_tombstoned,
            failures = report.repair_failures,
            "Reconcile finished"
        );
        Ok(report)
    }

    async fn reconcile_origin_event(
        &self,
        account_id: AccountId,
        graph: &UserGraphHandle,
        edges: &[calmesh_types::PolicyEdge],
        event: &ProviderEvent,
        report: &mut ReconcileReport,
    ) -> Result<()> {
        let canonical = graph
            .find_canonical_by_origin(account_id, event.id.clone())
            .await?;

        let Some(canonical) = canonical else {
            // Missing canonical: ingest through the normal delta path
            let content = normalize_event(event)?;
            graph
                .apply_provider_delta(
                    account_id,
                    vec![ProviderDelta {
                        kind: DeltaKind::Updated,
                        origin_event_id: event.id.clone(),
                        event: Some(content),
                    }],
                )
                .await?;
            report.missing_canonicals_created += 1;
            graph
                .log_reconcile_discrepancy(DiscrepancyRecord {
                    kind: DiscrepancyKind::MissingCanonical,
                    canonical_event_id: None,
                    account_id,
                    details: json!({ "origin_event_id": event.id }),
                })
                .await?;
            return Ok(());
        };

        // Every outgoing edge should have a mirror row
        let mut recompute_needed = false;
        for edge in edges {
            if graph
                .get_mirror(canonical.canonical_event_id, edge.to_account_id)
                .await?
                .is_none()
            {
                recompute_needed = true;
                report.missing_mirrors_enqueued += 1;
                graph
                    .log_reconcile_discrepancy(DiscrepancyRecord {
                        kind: DiscrepancyKind::MissingMirror,
                        canonical_event_id: Some(canonical.canonical_event_id),
                        account_id,
                        details: json!({ "target_account_id": edge.to_account_id }),
                    })
                    .await?;
            }
        }
        if recompute_needed {
            graph
                .recompute_projections(Some(canonical.canonical_event_id))
                .await?;
        }
        Ok(())
    }

    async fn reconcile_managed_event(
        &self,
        account_id: AccountId,
        graph: &UserGraphHandle,
        event: &ProviderEvent,
        report: &mut ReconcileReport,
    ) -> Result<()> {
        let marked_canonical = event
            .extended_properties
            .canonical_event_id
            .as_deref()
            .and_then(|id| CanonicalEventId::parse(id).ok());

        let mirror = match marked_canonical {
            Some(canonical_id) => graph.get_mirror(canonical_id, account_id).await?,
            None => None,
        };

        let Some(mirror) = mirror else {
            // Orphaned mirror: a managed event we no longer track
            let key_source = marked_canonical.unwrap_or_else(CanonicalEventId::new);
            self.write_queue.enqueue(WriteMessage::DeleteMirror {
                canonical_event_id: key_source,
                target_account_id: account_id,
                provider_event_id: event.id.clone(),
                idempotency_key: idempotency_key(
                    key_source,
                    account_id,
                    &format!("reconcile-orphan|{}", event.id),
                ),
            })?;
            report.orphaned_mirrors_enqueued += 1;
            graph
                .log_reconcile_discrepancy(DiscrepancyRecord {
                    kind: DiscrepancyKind::OrphanedMirror,
                    canonical_event_id: marked_canonical,
                    account_id,
                    details: json!({ "provider_event_id": event.id }),
                })
                .await?;
            return Ok(());
        };

        // Hash check: recompute the expected projection for this edge
        let canonical = graph
            .get_canonical_event(mirror.canonical_event_id)
            .await?
            .event;
        let Some(edge) = graph
            .get_policy_edges(Some(canonical.origin_account_id))
            .await?
            .into_iter()
            .find(|e| e.to_account_id == account_id)
        else {
            // Edge gone; the policy path owns this teardown
            return Ok(());
        };
        let expected_payload = compile_projection(&canonical, &edge);
        let expected_hash = projection_hash(
            canonical.canonical_event_id,
            edge.detail_level,
            edge.calendar_kind,
            &expected_payload,
        )?;

        if mirror.last_projected_hash.as_deref() != Some(expected_hash.as_str()) {
            graph
                .recompute_projections(Some(canonical.canonical_event_id))
                .await?;
            report.hash_mismatches_corrected += 1;
            graph
                .log_reconcile_discrepancy(DiscrepancyRecord {
                    kind: DiscrepancyKind::HashMismatch,
                    canonical_event_id: Some(canonical.canonical_event_id),
                    account_id,
                    details: json!({
                        "expected_hash": expected_hash,
                        "stored_hash": mirror.last_projected_hash,
                    }),
                })
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests;
