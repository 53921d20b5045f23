use std::sync::Arc;

use calmesh_crypto::{MasterKey, TokenSet};
use calmesh_provider::testing::FakeProvider;
use calmesh_queue::{Consumer, Outcome, Queue, RetryPolicy};
use calmesh_registry::{ActorRouter, RouterDeps};
use calmesh_sched::SolverService;
use calmesh_store::Store;
use calmesh_types::*;

use crate::WriteConsumer;

struct Sink;

#[async_trait::async_trait]
impl Consumer<WriteMessage> for Sink {
    async fn handle(&self, _message: &WriteMessage) -> Outcome {
        Outcome::Ack
    }
}

struct Harness {
    consumer: WriteConsumer,
    fake: Arc<FakeProvider>,
    origin: AccountId,
    target: AccountId,
    graph: calmesh_graph::UserGraphHandle,
}

async fn harness() -> Harness {
    let store = Store::connect_memory().await.unwrap();
    let fake = Arc::new(FakeProvider::new());
    let (write_queue, runner) = Queue::new();
    runner.spawn("writes", Arc::new(Sink), RetryPolicy::fast());

    let router = Arc::new(ActorRouter::new(RouterDeps {
        store,
        master_key: MasterKey::from_secret("write-test"),
        tokens: fake.clone(),
        calendar: fake.clone(),
        webhook_url: "https://hooks.example.test".to_string(),
        write_queue,
        solver: Arc::new(SolverService::greedy_only()),
    }));

    let user_id = UserId::new();
    let origin = router
        .link_account(user_id, Provider::Google, "a".into(), "a@example.com".into())
        .await
        .unwrap()
        .account_id;
    let target = router
        .link_account(user_id, Provider::Google, "b".into(), "b@example.com".into())
        .await
        .unwrap()
        .account_id;
    router
        .account(target)
        .await
        .unwrap()
        .initialize(
            TokenSet {
                access_token: "ya29.T".to_string(),
                refresh_token: "1//T".to_string(),
                expiry: time::now_millis() + 3_600_000,
            },
            "calendar".to_string(),
        )
        .await
        .unwrap();

    let graph = router.user(user_id);
    let consumer = WriteConsumer::new(router, fake.clone());
    Harness {
        consumer,
        fake,
        origin,
        target,
        graph,
    }
}

/// Ingest one origin event and return it with its pending upsert message
async fn pending_mirror(h: &Harness) -> (CanonicalEventId, WriteMessage) {
    let report = h
        .graph
        .apply_provider_delta(
            h.origin,
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
    assert_eq!(report.mirrors_enqueued, 1);

    let event = h
        .graph
        .find_canonical_by_origin(h.origin, "g1".to_string())
        .await
        .unwrap()
        .unwrap();
    let mirror = h
        .graph
        .get_mirror(event.canonical_event_id, h.target)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(mirror.state, MirrorState::Pending);

    let payload = calmesh_graph::compile_projection(
        &event,
        &PolicyEdge {
            from_account_id: h.origin,
            to_account_id: h.target,
            detail_level: DetailLevel::Busy,
            calendar_kind: CalendarKind::BusyOverlay,
        },
    );
    let hash = calmesh_graph::projection_hash(
        event.canonical_event_id,
        DetailLevel::Busy,
        CalendarKind::BusyOverlay,
        &payload,
    )
    .unwrap();
    let message = WriteMessage::UpsertMirror {
        canonical_event_id: event.canonical_event_id,
        target_account_id: h.target,
        target_calendar_id: OVERLAY_CALENDAR_SENTINEL.to_string(),
        projected_payload: payload,
        idempotency_key: calmesh_graph::idempotency_key(event.canonical_event_id, h.target, &hash),
    };
    (event.canonical_event_id, message)
}

#[tokio::test]
async fn test_upsert_lands_and_activates() {
    let h = harness().await;
    let (event_id, message) = pending_mirror(&h).await;
    h.fake.script_insert(Ok("gB1".to_string()));

    assert_eq!(h.consumer.handle(&message).await, Outcome::Ack);

    let mirror = h.graph.get_mirror(event_id, h.target).await.unwrap().unwrap();
    assert_eq!(mirror.state, MirrorState::Active);
    assert_eq!(mirror.provider_event_id.as_deref(), Some("gB1"));
    assert!(mirror.last_write_ts.is_some());
    // Sentinel resolved and cached
    assert_eq!(mirror.target_calendar_id, "overlay-cal-1");

    h.fake.with_calls(|calls| {
        assert_eq!(calls.inserted.len(), 1);
        let (calendar_id, payload) = &calls.inserted[0];
        assert_eq!(calendar_id, "overlay-cal-1");
        assert_eq!(payload.title, "Busy");
        assert!(payload.extended_properties.is_managed_mirror());
    });
}

#[tokio::test]
async fn test_existing_mirror_is_patched() {
    let h = harness().await;
    let (_event_id, message) = pending_mirror(&h).await;
    h.fake.script_insert(Ok("gB1".to_string()));
    assert_eq!(h.consumer.handle(&message).await, Outcome::Ack);

    // Redelivery of the same message patches instead of inserting
    assert_eq!(h.consumer.handle(&message).await, Outcome::Ack);
    h.fake.with_calls(|calls| {
        assert_eq!(calls.inserted.len(), 1);
        assert_eq!(calls.patched.len(), 1);
        assert_eq!(calls.patched[0].1, "gB1");
    });
}

#[tokio::test]
async fn test_duplicate_insert_adopts_existing_event() {
    let h = harness().await;
    let (event_id, message) = pending_mirror(&h).await;
    h.fake.script_insert(Err(CalError::Provider {
        status: 409,
        body: "duplicate".to_string(),
    }));

    assert_eq!(h.consumer.handle(&message).await, Outcome::Ack);

    let mirror = h.graph.get_mirror(event_id, h.target).await.unwrap().unwrap();
    assert_eq!(mirror.state, MirrorState::Active);
    // The fake reports the managed event as existing-<canonical id>
    assert_eq!(
        mirror.provider_event_id.as_deref(),
        Some(format!("existing-{event_id}").as_str())
    );
    h.fake.with_calls(|calls| assert_eq!(calls.patched.len(), 1));
}

#[tokio::test]
async fn test_permanent_failure_parks_error() {
    let h = harness().await;
    let (event_id, message) = pending_mirror(&h).await;
    h.fake.script_insert(Err(CalError::Provider {
        status: 400,
        body: "bad payload".to_string(),
    }));

    assert_eq!(h.consumer.handle(&message).await, Outcome::Ack);
    let mirror = h.graph.get_mirror(event_id, h.target).await.unwrap().unwrap();
    assert_eq!(mirror.state, MirrorState::Error);
    assert!(mirror.error_message.as_deref().unwrap().contains("400"));
}

#[tokio::test]
async fn test_transient_failures_retry() {
    let h = harness().await;
    let (event_id, message) = pending_mirror(&h).await;

    h.fake.script_insert(Err(CalError::Provider {
        status: 503,
        body: "unavailable".to_string(),
    }));
    assert!(matches!(
        h.consumer.handle(&message).await,
        Outcome::Retry(_)
    ));

    h.fake.script_insert(Err(CalError::Provider {
        status: 429,
        body: "quota".to_string(),
    }));
    assert!(matches!(
        h.consumer.handle(&message).await,
        Outcome::Retry(_)
    ));

    // Still pending, not parked in ERROR
    let mirror = h.graph.get_mirror(event_id, h.target).await.unwrap().unwrap();
    assert_eq!(mirror.state, MirrorState::Pending);
}

#[tokio::test]
async fn test_delete_tombstones_and_tolerates_404() {
    let h = harness().await;
    let (event_id, message) = pending_mirror(&h).await;
    h.fake.script_insert(Ok("gB1".to_string()));
    assert_eq!(h.consumer.handle(&message).await, Outcome::Ack);

    h.fake.script_delete(Err(CalError::Provider {
        status: 404,
        body: "gone already".to_string(),
    }));
    let delete = WriteMessage::DeleteMirror {
        canonical_event_id: event_id,
        target_account_id: h.target,
        provider_event_id: "gB1".to_string(),
        idempotency_key: "k".to_string(),
    };
    assert_eq!(h.consumer.handle(&delete).await, Outcome::Ack);

    let mirror = h.graph.get_mirror(event_id, h.target).await.unwrap().unwrap();
    assert_eq!(mirror.state, MirrorState::Tombstoned);
}

#[tokio::test]
async fn test_stale_message_is_dropped() {
    let h = harness().await;
    let (event_id, message) = pending_mirror(&h).await;

    // A message keyed off an outdated projection hash
    let stale = match message.clone() {
        WriteMessage::UpsertMirror {
            canonical_event_id,
            target_account_id,
            target_calendar_id,
            projected_payload,
            ..
        } => WriteMessage::UpsertMirror {
            canonical_event_id,
            target_account_id,
            target_calendar_id,
            projected_payload,
            idempotency_key: calmesh_graph::idempotency_key(event_id, h.target, "old-hash"),
        },
        _ => unreachable!(),
    };
    assert_eq!(h.consumer.handle(&stale).await, Outcome::Ack);
    h.fake.with_calls(|calls| assert!(calls.inserted.is_empty()));

    // The current message still lands
    h.fake.script_insert(Ok("gB1".to_string()));
    assert_eq!(h.consumer.handle(&message).await, Outcome::Ack);
    let mirror = h.graph.get_mirror(event_id, h.target).await.unwrap().unwrap();
    assert_eq!(mirror.state, MirrorState::Active);
}

#[tokio::test]
async fn test_unknown_target_acks() {
    let h = harness().await;
    let (_, message) = pending_mirror(&h).await;
    let unknown = match message {
        WriteMessage::UpsertMirror {
            canonical_event_id,
            target_calendar_id,
            projected_payload,
            idempotency_key,
            ..
        } => WriteMessage::UpsertMirror {
            canonical_event_id,
            target_account_id: AccountId::new(),
            target_calendar_id,
            projected_payload,
            idempotency_key,
        },
        _ => unreachable!(),
    };
    assert_eq!(h.consumer.handle(&unknown).await, Outcome::Ack);
}
