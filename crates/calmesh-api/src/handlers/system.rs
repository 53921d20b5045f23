//! Onboarding, sync, and reconcile glue

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;

use calmesh_reconcile::{ReconcileReason, ReconcileReport, ReconcileRequest};
use calmesh_types::{time, AccountId, AccountRecord, SyncMessage, SyncReason};

use crate::dto::*;
use crate::error::ApiResult;
use crate::state::AppState;

pub async fn healthz(State(state): State<Arc<AppState>>) -> ApiResult<Json<serde_json::Value>> {
    state.router.store().health_check().await?;
    Ok(Json(serde_json::json!({ "status": "healthy" })))
}

pub async fn link_account(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LinkAccountRequest>,
) -> ApiResult<Json<AccountRecord>> {
    let record = state
        .router
        .link_account(req.user_id, req.provider, req.provider_subject, req.email)
        .await?;
    Ok(Json(record))
}

/// Manual sync trigger; webhooks land on the same queue
pub async fn trigger_sync(
    State(state): State<Arc<AppState>>,
    Path(account_id): Path<AccountId>,
    Json(req): Json<TriggerSyncRequest>,
) -> ApiResult<Json<OkResponse>> {
    let message = if req.full {
        SyncMessage::Full {
            account_id,
            reason: SyncReason::Manual,
        }
    } else {
        SyncMessage::Incremental {
            account_id,
            channel_id: None,
            resource_id: None,
            ping_ts: time::now_millis(),
            calendar_id: req.calendar_id,
        }
    };
    state.sync_queue.enqueue(message)?;
    Ok(Json(OkResponse::ok()))
}

pub async fn trigger_reconcile(
    State(state): State<Arc<AppState>>,
    Path(account_id): Path<AccountId>,
) -> ApiResult<Json<ReconcileReport>> {
    let report = state
        .reconcile
        .run(&ReconcileRequest {
            account_id,
            reason: ReconcileReason::Manual,
            scope: None,
        })
        .await?;
    Ok(Json(report))
}
