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

use crate::SyncConsumer;

struct Forward<M: Send + Sync + Clone> {
    tx: mpsc::UnboundedSender<M>,
}

#[async_trait::async_trait]
impl<M: Send + Sync + Clone + 'static> Consumer<M> for Forward<M> {
    async fn handle(&self, message: &M) -> Outcome {
        let _ = self.tx.send(message.clone());
        Outcome::Ack
    }
}

struct Harness {
    consumer: SyncConsumer,
    router: Arc<ActorRouter>,
    fake: Arc<FakeProvider>,
    account_id: AccountId,
    sync_messages: mpsc::UnboundedReceiver<SyncMessage>,
}

async fn harness() -> Harness {
    let store = Store::connect_memory().await.unwrap();
    let fake = Arc::new(FakeProvider::new());

    let (write_queue, write_runner) = Queue::new();
    let (write_tx, _write_rx) = mpsc::unbounded_channel::<WriteMessage>();
    write_runner.spawn("writes", Arc::new(Forward { tx: write_tx }), RetryPolicy::fast());

    let router = Arc::new(ActorRouter::new(RouterDeps {
        store,
        master_key: MasterKey::from_secret("sync-test"),
        tokens: fake.clone(),
        calendar: fake.clone(),
        webhook_url: "https://hooks.example.test".to_string(),
        write_queue,
        solver: Arc::new(SolverService::greedy_only()),
    }));

    let record = router
        .link_account(
            UserId::new(),
            Provider::Google,
            "sub".to_string(),
            "a@example.com".to_string(),
        )
        .await
        .unwrap();
    router
        .account(record.account_id)
        .await
        .unwrap()
        .initialize(
            TokenSet {
                access_token: "ya29.A".to_string(),
                refresh_token: "1//R".to_string(),
                expiry: time::now_millis() + 3_600_000,
            },
            "calendar".to_string(),
        )
        .await
        .unwrap();

    let (sync_queue, sync_runner) = Queue::new();
    let (sync_tx, sync_messages) = mpsc::unbounded_channel::<SyncMessage>();
    sync_runner.spawn("sync", Arc::new(Forward { tx: sync_tx }), RetryPolicy::fast());

    let consumer = SyncConsumer::new(router.clone(), fake.clone(), sync_queue);
    Harness {
        consumer,
        router,
        fake,
        account_id: record.account_id,
        sync_messages,
    }
}

fn ping(account_id: AccountId) -> SyncMessage {
    SyncMessage::Incremental {
        account_id,
        channel_id: Some("chn_1".to_string()),
        resource_id: Some("res_1".to_string()),
        ping_ts: time::now_millis(),
        calendar_id: None,
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

fn managed_event(id: &str) -> ProviderEvent {
    let mut event = origin_event(id, "Busy");
    event.extended_properties =
        ExtendedProperties::marker(CanonicalEventId::new(), AccountId::new());
    event
}

async fn prime_cursor(h: &Harness) {
    let actor = h.router.account(h.account_id).await.unwrap();
    actor.set_sync_token(Some("sync-0".to_string())).await.unwrap();
}

#[tokio::test]
async fn test_incremental_ingests_origin_events() {
    let h = harness().await;
    prime_cursor(&h).await;
    h.fake.script_list(Ok(EventsPage {
        events: vec![origin_event("g1", "Standup"), managed_event("gB9")],
        next_page_token: None,
        next_sync_token: Some("sync-1".to_string()),
    }));

    assert_eq!(h.consumer.handle(&ping(h.account_id)).await, Outcome::Ack);

    // Origin event ingested; managed mirror classified out
    let graph = h.router.user_for_account(h.account_id).await.unwrap().unwrap().1;
    let event = graph
        .find_canonical_by_origin(h.account_id, "g1".to_string())
        .await
        .unwrap()
        .expect("canonical created");
    assert_eq!(event.title, "Standup");
    assert!(graph
        .find_canonical_by_origin(h.account_id, "gB9".to_string())
        .await
        .unwrap()
        .is_none());

    // Cursor advanced, success marked
    let actor = h.router.account(h.account_id).await.unwrap();
    assert_eq!(actor.get_sync_token().await.unwrap().as_deref(), Some("sync-1"));
    let health = actor.get_health().await.unwrap();
    assert!(health.sync.last_success_ts.is_some());
}

#[tokio::test]
async fn test_missing_cursor_schedules_full_sync() {
    let mut h = harness().await;
    assert_eq!(h.consumer.handle(&ping(h.account_id)).await, Outcome::Ack);

    match h.sync_messages.recv().await.unwrap() {
        SyncMessage::Full { account_id, reason } => {
            assert_eq!(account_id, h.account_id);
            assert_eq!(reason, SyncReason::Onboarding);
        }
        other => panic!("expected SYNC_FULL, got {other:?}"),
    }
    // No listing happened
    assert_eq!(h.fake.with_calls(|c| c.lists), 0);
}

#[tokio::test]
async fn test_gone_cursor_triggers_full_sync() {
    let mut h = harness().await;
    prime_cursor(&h).await;
    h.fake.script_list(Err(CalError::Provider {
        status: 410,
        body: "Gone".to_string(),
    }));

    assert_eq!(h.consumer.handle(&ping(h.account_id)).await, Outcome::Ack);

    match h.sync_messages.recv().await.unwrap() {
        SyncMessage::Full { reason, .. } => assert_eq!(reason, SyncReason::Token410),
        other => panic!("expected SYNC_FULL, got {other:?}"),
    }

    // Failure recorded without touching the success timestamp
    let actor = h.router.account(h.account_id).await.unwrap();
    let health = actor.get_health().await.unwrap();
    assert!(health.sync.last_success_ts.is_none());
    assert!(health.sync.last_sync_ts.is_some());
    assert!(health
        .sync
        .last_failure_reason
        .as_deref()
        .unwrap()
        .contains("410"));
}

#[tokio::test]
async fn test_forbidden_marks_failure_and_acks() {
    let h = harness().await;
    prime_cursor(&h).await;
    h.fake.script_list(Err(CalError::Provider {
        status: 403,
        body: "insufficient permissions".to_string(),
    }));

    assert_eq!(h.consumer.handle(&ping(h.account_id)).await, Outcome::Ack);
    let actor = h.router.account(h.account_id).await.unwrap();
    let health = actor.get_health().await.unwrap();
    assert!(health
        .sync
        .last_failure_reason
        .as_deref()
        .unwrap()
        .contains("403"));
}

#[tokio::test]
async fn test_server_error_retries() {
    let h = harness().await;
    prime_cursor(&h).await;
    h.fake.script_list(Err(CalError::Provider {
        status: 503,
        body: "unavailable".to_string(),
    }));
    assert!(matches!(
        h.consumer.handle(&ping(h.account_id)).await,
        Outcome::Retry(_)
    ));
}

#[tokio::test]
async fn test_unknown_account_acks() {
    let h = harness().await;
    assert_eq!(h.consumer.handle(&ping(AccountId::new())).await, Outcome::Ack);
}

#[tokio::test]
async fn test_invalid_grant_marks_failure_and_acks() {
    let h = harness().await;
    prime_cursor(&h).await;
    // Force a refresh by expiring the stored token, then reject it
    let actor = h.router.account(h.account_id).await.unwrap();
    actor
        .initialize(
            TokenSet {
                access_token: "ya29.A".to_string(),
                refresh_token: "1//R".to_string(),
                expiry: time::now_millis() - 1000,
            },
            "calendar".to_string(),
        )
        .await
        .unwrap();
    h.fake.script_refresh(Err(CalError::RefreshFailed {
        status: 400,
        body: "invalid_grant".to_string(),
    }));

    assert_eq!(h.consumer.handle(&ping(h.account_id)).await, Outcome::Ack);
    let health = actor.get_health().await.unwrap();
    assert!(health
        .sync
        .last_failure_reason
        .as_deref()
        .unwrap()
        .contains("refresh rejected"));
}

#[tokio::test]
async fn test_full_sync_pages_to_exhaustion() {
    let h = harness().await;
    h.fake.script_list(Ok(EventsPage {
        events: vec![origin_event("g1", "One")],
        next_page_token: Some("page-2".to_string()),
        next_sync_token: None,
    }));
    h.fake.script_list(Ok(EventsPage {
        events: vec![origin_event("g2", "Two")],
        next_page_token: None,
        next_sync_token: Some("sync-full-1".to_string()),
    }));

    let message = SyncMessage::Full {
        account_id: h.account_id,
        reason: SyncReason::Manual,
    };
    assert_eq!(h.consumer.handle(&message).await, Outcome::Ack);
    assert_eq!(h.fake.with_calls(|c| c.lists), 2);

    let graph = h.router.user_for_account(h.account_id).await.unwrap().unwrap().1;
    assert!(graph
        .find_canonical_by_origin(h.account_id, "g2".to_string())
        .await
        .unwrap()
        .is_some());
    let actor = h.router.account(h.account_id).await.unwrap();
    assert_eq!(
        actor.get_sync_token().await.unwrap().as_deref(),
        Some("sync-full-1")
    );
}
