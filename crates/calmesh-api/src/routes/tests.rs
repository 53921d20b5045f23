use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use tower::util::ServiceExt;

use calmesh_crypto::MasterKey;
use calmesh_provider::testing::FakeProvider;
use calmesh_queue::{Consumer, Outcome, Queue, RetryPolicy};
use calmesh_reconcile::ReconcileWorker;
use calmesh_registry::{ActorRouter, RouterDeps};
use calmesh_sched::SolverService;
use calmesh_store::Store;
use calmesh_types::*;

use crate::{api_router, AppState};

struct Sink;

#[async_trait::async_trait]
impl<M: Send + Sync + 'static> Consumer<M> for Sink {
    async fn handle(&self, _message: &M) -> Outcome {
        Outcome::Ack
    }
}

async fn app() -> axum::Router {
    let store = Store::connect_memory().await.unwrap();
    let fake = Arc::new(FakeProvider::new());

    let (write_queue, write_runner) = Queue::<WriteMessage>::new();
    write_runner.spawn("writes", Arc::new(Sink), RetryPolicy::fast());
    let (sync_queue, sync_runner) = Queue::<SyncMessage>::new();
    sync_runner.spawn("sync", Arc::new(Sink), RetryPolicy::fast());

    let router = Arc::new(ActorRouter::new(RouterDeps {
        store,
        master_key: MasterKey::from_secret("api-test"),
        tokens: fake.clone(),
        calendar: fake.clone(),
        webhook_url: "https://hooks.example.test".to_string(),
        write_queue: write_queue.clone(),
        solver: Arc::new(SolverService::greedy_only()),
    }));
    let reconcile = Arc::new(ReconcileWorker::new(router.clone(), fake, write_queue));

    api_router(Arc::new(AppState {
        router,
        sync_queue,
        reconcile,
    }))
}

fn post(path: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), 1 << 20).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_healthz() {
    let app = app().await;
    let response = app
        .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_unknown_pathname_is_plain_404() {
    let app = app().await;
    let response = app
        .oneshot(post("/definitely/not/a/route", serde_json::json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let bytes = to_bytes(response.into_body(), 1 << 20).await.unwrap();
    assert_eq!(&bytes[..], b"not found");
}

#[tokio::test]
async fn test_link_then_token_round_trip() {
    let app = app().await;

    let response = app
        .clone()
        .oneshot(post(
            "/accounts/link",
            serde_json::json!({
                "userId": UserId::new(),
                "provider": "google",
                "providerSubject": "sub-1",
                "email": "a@example.com",
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let record = json_body(response).await;
    let account_id = record["account_id"].as_str().unwrap().to_string();
    assert!(account_id.starts_with("acc_"));

    let response = app
        .clone()
        .oneshot(post(
            &format!("/accounts/{account_id}/initialize"),
            serde_json::json!({
                "accessToken": "ya29.A",
                "refreshToken": "1//R",
                "expiry": time::now_millis() + 3_600_000,
                "scopes": "calendar",
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(post(
            &format!("/accounts/{account_id}/getAccessToken"),
            serde_json::json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["accessToken"], "ya29.A");

    let response = app
        .oneshot(post(
            &format!("/accounts/{account_id}/getProvider"),
            serde_json::json!({}),
        ))
        .await
        .unwrap();
    let body = json_body(response).await;
    assert_eq!(body["provider"], "google");
}

#[tokio::test]
async fn test_errors_surface_as_500_json() {
    let app = app().await;
    let response = app
        .oneshot(post(
            &format!("/accounts/{}/getAccessToken", AccountId::new()),
            serde_json::json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = json_body(response).await;
    assert!(body["error"].as_str().unwrap().contains("not found"));
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_session_validation_error() {
    let app = app().await;
    let response = app
        .oneshot(post(
            &format!("/users/{}/createSession", UserId::new()),
            serde_json::json!({
                "title": "",
                "windowStart": 0,
                "windowEnd": 1,
                "durationMinutes": 60,
                "requiredAccountIds": [AccountId::new()],
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = json_body(response).await;
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_user_surface_round_trip() {
    let app = app().await;
    let user_id = UserId::new();
    let origin = AccountId::new();

    let response = app
        .clone()
        .oneshot(post(
            &format!("/users/{user_id}/applyProviderDelta"),
            serde_json::json!({
                "originAccountId": origin,
                "deltas": [{
                    "type": "created",
                    "origin_event_id": "g1",
                    "event": {
                        "title": "Standup",
                        "description": null,
                        "location": null,
                        "start": 1_771_581_600_000i64,
                        "end": 1_771_585_200_000i64,
                        "all_day": false,
                        "status": "confirmed",
                        "visibility": null,
                        "transparency": "opaque",
                        "recurrence_rule": null
                    }
                }],
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let report = json_body(response).await;
    assert_eq!(report["created"], 1);

    let response = app
        .oneshot(post(
            &format!("/users/{user_id}/getSyncHealth"),
            serde_json::json!({}),
        ))
        .await
        .unwrap();
    let health = json_body(response).await;
    assert_eq!(health["total_events"], 1);
}
