use std::sync::Arc;

use tokio::sync::mpsc;

use calmesh_crypto::{MasterKey, TokenSet};
use calmesh_provider::testing::FakeProvider;
use calmesh_provider::{EventTime, EventsPage, ProviderEvent};
use calmesh_queue::{Consumer, Outcome, Queue, RetryPolicy};
use calmesh_registry::{ActorRouter, RouterDeps};
use calmesh_sched::SolverService;
use calmesh_store::Store;
use calmesh_types::*;

use crate::{ReconcileReason, ReconcileRequest, ReconcileWorker};

struct Forward {
    tx: mpsc::UnboundedSender<WriteMessage>,
}

#[async_trait::async_trait]
impl Consumer<WriteMessage> for Forward {
    async fn handle(&self, message: &WriteMessage) -> Outcome {
        let _ = self.tx.send(message.clone());
        Outcome::Ack
    }
}

struct Harness {
    worker: ReconcileWorker,
    router: Arc<ActorRouter>,
    fake: Arc<FakeProvider>,
    graph: calmesh_graph::UserGraphHandle,
    store: Store,
    account_a: AccountId,
    account_b: AccountId,
    writes: mpsc::UnboundedReceiver<WriteMessage>,
}

async fn harness() -> Harness {
    let store = Store::connect_memory().await.unwrap();
    let fake = Arc::new(FakeProvider::new());
    let (write_queue, runner) = Queue::new();
    let (tx, writes) = mpsc::unbounded_channel();
    runner.spawn("writes", Arc::new(Forward { tx }), RetryPolicy::fast());

    let router = Arc::new(ActorRouter::new(RouterDeps {
        store: store.clone(),
        master_key: MasterKey::from_secret("reconcile-test"),
        tokens: fake.clone(),
        calendar: fake.clone(),
        webhook_url: "https://hooks.example.test".to_string(),
        write_queue: write_queue.clone(),
        solver: Arc::new(SolverService::greedy_only()),
    }));

    let user_id = UserId::new();
    let account_a = router
        .link_account(user_id, Provider::Google, "a".into(), "a@example.com".into())
        .await
        .unwrap()
        .account_id;
    let account_b = router
        .link_account(user_id, Provider::Google, "b".into(), "b@example.com".into())
        .await
        .unwrap()
        .account_id;
    for account_id in [account_a, account_b] {
        router
            .account(account_id)
            .await
            .unwrap()
            .initialize(
                TokenSet {
                    access_token: "ya29.X".to_string(),
                    refresh_token: "1//X".to_string(),
                    expiry: time::now_millis() + 3_600_000,
                },
                "calendar".to_string(),
            )
            .await
            .unwrap();
    }

    let graph = router.user(user_id);
    let worker = ReconcileWorker::new(router.clone(), fake.clone(), write_queue);
    Harness {
        worker,
        router,
        fake,
        graph,
        store,
        account_a,
        account_b,
        writes,
    }
}

fn origin_event(id: &str, summary: &str) -> ProviderEvent {
    ProviderEvent {
        id: id.to_string(),
        status: Some("confirmed".to_string()),
        summary: Some(summary.to_string()),
        start: Some(EventTime {
            date_time: Some("2026-02-20T10:00:00Z".to_string()),
            date: None,
        }),
        end: Some(EventTime {
            date_time: Some("2026-02-20T11:00:00Z".to_string()),
            date: None,
        }),
        ..Default::default()
    }
}

fn page(events: Vec<ProviderEvent>) -> EventsPage {
    EventsPage {
        events,
        next_page_token: None,
        next_sync_token: Some("sync-reconcile".to_string()),
    }
}

fn request(account_id: AccountId) -> ReconcileRequest {
    ReconcileRequest {
        account_id,
        reason: ReconcileReason::Scheduled,
        scope: None,
    }
}

/// Ingest one event on A and land its mirror on B
async fn seed_mirrored_event(h: &mut Harness) -> CanonicalEvent {
    h.graph
        .apply_provider_delta(
            h.account_a,
            vec![ProviderDelta {
                kind: DeltaKind::Created,
                origin_event_id: "g1".to_string(),
                event: Some(EventContent {
                    title: "Standup".to_string(),
                    description: None,
                    location: None,
                    start: time::parse_rfc3339("2026-02-20T10:00:00Z").unwrap(),
                    end: time::parse_rfc3339("2026-02-20T11:00:00Z").unwrap(),
                    all_day: false,
                    status: EventStatus::Confirmed,
                    visibility: None,
                    transparency: Transparency::Opaque,
                    recurrence_rule: None,
                }),
            }],
        )
        .await
        .unwrap();
    // Drain the projection upsert from the queue capture
    let _ = h.writes.recv().await;

    let event = h
        .graph
        .find_canonical_by_origin(h.account_a, "g1".to_string())
        .await
        .unwrap()
        .unwrap();
    h.graph
        .update_mirror_state(
            event.canonical_event_id,
            h.account_b,
            calmesh_graph::MirrorStateUpdate {
                state: MirrorState::Active,
                provider_event_id: Some("gB1".to_string()),
                error: None,
                last_write_ts: Some(time::now_millis()),
            },
        )
        .await
        .unwrap();
    event
}

fn managed_event_for(event: &CanonicalEvent, provider_event_id: &str) -> ProviderEvent {
    let mut managed = origin_event(provider_event_id, "Busy");
    managed.extended_properties =
        ExtendedProperties::marker(event.canonical_event_id, event.origin_account_id);
    managed
}

#[tokio::test]
async fn test_drift_free_run_is_all_zeros() {
    let mut h = harness().await;
    let event = seed_mirrored_event(&mut h).await;

    // Origin side: A lists its own event
    h.fake.script_list(Ok(page(vec![origin_event("g1", "Standup")])));
    let report = h.worker.run(&request(h.account_a)).await.unwrap();
    assert!(report.is_clean(), "origin side: {report:?}");

    // Target side: B lists the managed mirror we know about
    h.fake
        .script_list(Ok(page(vec![managed_event_for(&event, "gB1")])));
    let report = h.worker.run(&request(h.account_b)).await.unwrap();
    assert!(report.is_clean(), "target side: {report:?}");
    assert_eq!(report.repair_failures, 0);

    // Cursor advanced and success marked
    let actor = h.router.account(h.account_b).await.unwrap();
    assert_eq!(
        actor.get_sync_token().await.unwrap().as_deref(),
        Some("sync-reconcile")
    );
}

#[tokio::test]
async fn test_missing_canonical_is_created() {
    let h = harness().await;
    h.fake
        .script_list(Ok(page(vec![origin_event("g-new", "Surprise")])));

    let report = h.worker.run(&request(h.account_a)).await.unwrap();
    assert_eq!(report.missing_canonicals_created, 1);

    let created = h
        .graph
        .find_canonical_by_origin(h.account_a, "g-new".to_string())
        .await
        .unwrap();
    assert!(created.is_some());

    let journal = h
        .graph
        .query_journal(calmesh_graph::JournalQuery::default())
        .await
        .unwrap();
    assert!(journal
        .iter()
        .any(|j| j.change_type == "reconcile:missing_canonical"));
}

#[tokio::test]
async fn test_missing_mirror_triggers_recompute() {
    let mut h = harness().await;
    let event = seed_mirrored_event(&mut h).await;

    // Drop the mirror row behind the actor's back
    h.store
        .mirrors()
        .delete_by_target(h.account_b)
        .await
        .unwrap();

    h.fake.script_list(Ok(page(vec![origin_event("g1", "Standup")])));
    let report = h.worker.run(&request(h.account_a)).await.unwrap();
    assert_eq!(report.missing_mirrors_enqueued, 1);

    // Recompute recreated the mirror PENDING
    let mirror = h
        .graph
        .get_mirror(event.canonical_event_id, h.account_b)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(mirror.state, MirrorState::Pending);
}

#[tokio::test]
async fn test_orphaned_mirror_enqueues_delete() {
    let mut h = harness().await;

    // A managed event upstream referencing a canonical we never tracked
    let orphan_canonical = CanonicalEventId::new();
    let mut managed = origin_event("g-orphan", "Busy");
    managed.extended_properties =
        ExtendedProperties::marker(orphan_canonical, h.account_a);

    h.fake.script_list(Ok(page(vec![managed])));
    let report = h.worker.run(&request(h.account_b)).await.unwrap();
    assert_eq!(report.orphaned_mirrors_enqueued, 1);

    match h.writes.recv().await.unwrap() {
        WriteMessage::DeleteMirror {
            provider_event_id,
            target_account_id,
            idempotency_key,
            ..
        } => {
            assert_eq!(provider_event_id, "g-orphan");
            assert_eq!(target_account_id, h.account_b);
            assert!(!idempotency_key.is_empty());
        }
        other => panic!("expected DELETE_MIRROR, got {other:?}"),
    }

    let journal = h
        .graph
        .query_journal(calmesh_graph::JournalQuery::default())
        .await
        .unwrap();
    assert!(journal
        .iter()
        .any(|j| j.change_type == "reconcile:orphaned_mirror"));
}

#[tokio::test]
async fn test_hash_mismatch_recomputes_projection() {
    let mut h = harness().await;
    let event = seed_mirrored_event(&mut h).await;

    // Corrupt the stored hash
    let mut mirror = h
        .graph
        .get_mirror(event.canonical_event_id, h.account_b)
        .await
        .unwrap()
        .unwrap();
    mirror.last_projected_hash = Some("stale-hash".to_string());
    h.store.mirrors().upsert(&mirror).await.unwrap();

    h.fake
        .script_list(Ok(page(vec![managed_event_for(&event, "gB1")])));
    let report = h.worker.run(&request(h.account_b)).await.unwrap();
    assert_eq!(report.hash_mismatches_corrected, 1);

    // The recompute re-enqueued an upsert with the corrected hash
    match h.writes.recv().await.unwrap() {
        WriteMessage::UpsertMirror { projected_payload, .. } => {
            assert_eq!(projected_payload.title, "Busy");
        }
        other => panic!("expected UPSERT_MIRROR, got {other:?}"),
    }
}

#[tokio::test]
async fn test_stale_active_mirror_is_tombstoned() {
    let mut h = harness().await;
    let event = seed_mirrored_event(&mut h).await;

    // B's listing no longer contains gB1
    h.fake.script_list(Ok(page(vec![])));
    let report = h.worker.run(&request(h.account_b)).await.unwrap();
    assert_eq!(report.stale_mirrors_tombstoned, 1);

    let mirror = h
        .graph
        .get_mirror(event.canonical_event_id, h.account_b)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(mirror.state, MirrorState::Tombstoned);
}

#[tokio::test]
async fn test_unknown_account_is_a_noop() {
    let h = harness().await;
    let report = h.worker.run(&request(AccountId::new())).await.unwrap();
    assert!(report.is_clean());
    assert_eq!(report.events_scanned, 0);
}
