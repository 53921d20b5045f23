//! AccountActor RPC handlers

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;

use calmesh_crypto::{DekBackup, MasterKey, TokenSet};
use calmesh_types::{AccountHealth, AccountId, EncryptionHealth, MsSubscription, WatchChannel};

use crate::dto::*;
use crate::error::ApiResult;
use crate::state::AppState;

pub async fn initialize(
    State(state): State<Arc<AppState>>,
    Path(account_id): Path<AccountId>,
    Json(req): Json<InitializeRequest>,
) -> ApiResult<Json<OkResponse>> {
    let actor = state.router.account(account_id).await?;
    actor
        .initialize(
            TokenSet {
                access_token: req.access_token,
                refresh_token: req.refresh_token,
                expiry: req.expiry,
            },
            req.scopes,
        )
        .await?;
    Ok(Json(OkResponse::ok()))
}

pub async fn get_access_token(
    State(state): State<Arc<AppState>>,
    Path(account_id): Path<AccountId>,
) -> ApiResult<Json<AccessTokenResponse>> {
    let actor = state.router.account(account_id).await?;
    let access_token = actor.get_access_token().await?;
    Ok(Json(AccessTokenResponse { access_token }))
}

pub async fn revoke_tokens(
    State(state): State<Arc<AppState>>,
    Path(account_id): Path<AccountId>,
) -> ApiResult<Json<RevokeResponse>> {
    let actor = state.router.account(account_id).await?;
    let revoked = actor.revoke_tokens().await?;
    Ok(Json(RevokeResponse { revoked }))
}

pub async fn rotate_key(
    State(state): State<Arc<AppState>>,
    Path(account_id): Path<AccountId>,
    Json(req): Json<RotateKeyRequest>,
) -> ApiResult<Json<OkResponse>> {
    let actor = state.router.account(account_id).await?;
    actor
        .rotate_key(
            MasterKey::from_secret(&req.old_master_key),
            MasterKey::from_secret(&req.new_master_key),
        )
        .await?;
    Ok(Json(OkResponse::ok()))
}

pub async fn get_encrypted_dek_for_backup(
    State(state): State<Arc<AppState>>,
    Path(account_id): Path<AccountId>,
) -> ApiResult<Json<DekBackup>> {
    let actor = state.router.account(account_id).await?;
    Ok(Json(actor.get_encrypted_dek_for_backup().await?))
}

pub async fn restore_dek_from_backup(
    State(state): State<Arc<AppState>>,
    Path(account_id): Path<AccountId>,
    Json(backup): Json<DekBackup>,
) -> ApiResult<Json<OkResponse>> {
    let actor = state.router.account(account_id).await?;
    actor.restore_dek_from_backup(backup).await?;
    Ok(Json(OkResponse::ok()))
}

pub async fn get_sync_token(
    State(state): State<Arc<AppState>>,
    Path(account_id): Path<AccountId>,
) -> ApiResult<Json<SyncTokenResponse>> {
    let actor = state.router.account(account_id).await?;
    Ok(Json(SyncTokenResponse {
        sync_token: actor.get_sync_token().await?,
    }))
}

pub async fn set_sync_token(
    State(state): State<Arc<AppState>>,
    Path(account_id): Path<AccountId>,
    Json(req): Json<SetSyncTokenRequest>,
) -> ApiResult<Json<OkResponse>> {
    let actor = state.router.account(account_id).await?;
    actor.set_sync_token(req.sync_token).await?;
    Ok(Json(OkResponse::ok()))
}

pub async fn mark_sync_success(
    State(state): State<Arc<AppState>>,
    Path(account_id): Path<AccountId>,
    Json(req): Json<MarkSyncSuccessRequest>,
) -> ApiResult<Json<OkResponse>> {
    let actor = state.router.account(account_id).await?;
    actor.mark_sync_success(req.ts).await?;
    Ok(Json(OkResponse::ok()))
}

pub async fn mark_sync_failure(
    State(state): State<Arc<AppState>>,
    Path(account_id): Path<AccountId>,
    Json(req): Json<MarkSyncFailureRequest>,
) -> ApiResult<Json<OkResponse>> {
    let actor = state.router.account(account_id).await?;
    actor.mark_sync_failure(req.reason).await?;
    Ok(Json(OkResponse::ok()))
}

pub async fn register_channel(
    State(state): State<Arc<AppState>>,
    Path(account_id): Path<AccountId>,
    Json(req): Json<RegisterChannelRequest>,
) -> ApiResult<Json<WatchChannel>> {
    let actor = state.router.account(account_id).await?;
    Ok(Json(actor.register_channel(req.calendar_id).await?))
}

pub async fn renew_channel(
    State(state): State<Arc<AppState>>,
    Path(account_id): Path<AccountId>,
    Json(req): Json<ChannelIdRequest>,
) -> ApiResult<Json<WatchChannel>> {
    let actor = state.router.account(account_id).await?;
    Ok(Json(actor.renew_channel(req.channel_id).await?))
}

pub async fn get_channel_status(
    State(state): State<Arc<AppState>>,
    Path(account_id): Path<AccountId>,
) -> ApiResult<Json<Vec<WatchChannel>>> {
    let actor = state.router.account(account_id).await?;
    Ok(Json(actor.get_channel_status().await?))
}

pub async fn stop_watch_channels(
    State(state): State<Arc<AppState>>,
    Path(account_id): Path<AccountId>,
) -> ApiResult<Json<CountResponse>> {
    let actor = state.router.account(account_id).await?;
    Ok(Json(CountResponse {
        count: actor.stop_watch_channels().await?,
    }))
}

pub async fn create_ms_subscription(
    State(state): State<Arc<AppState>>,
    Path(account_id): Path<AccountId>,
    Json(req): Json<CreateSubscriptionRequest>,
) -> ApiResult<Json<MsSubscription>> {
    let actor = state.router.account(account_id).await?;
    Ok(Json(
        actor
            .create_ms_subscription(req.resource, req.client_state)
            .await?,
    ))
}

pub async fn renew_ms_subscription(
    State(state): State<Arc<AppState>>,
    Path(account_id): Path<AccountId>,
    Json(req): Json<SubscriptionIdRequest>,
) -> ApiResult<Json<MsSubscription>> {
    let actor = state.router.account(account_id).await?;
    Ok(Json(actor.renew_ms_subscription(req.subscription_id).await?))
}

pub async fn delete_ms_subscription(
    State(state): State<Arc<AppState>>,
    Path(account_id): Path<AccountId>,
    Json(req): Json<SubscriptionIdRequest>,
) -> ApiResult<Json<OkResponse>> {
    let actor = state.router.account(account_id).await?;
    actor.delete_ms_subscription(req.subscription_id).await?;
    Ok(Json(OkResponse::ok()))
}

pub async fn get_ms_subscriptions(
    State(state): State<Arc<AppState>>,
    Path(account_id): Path<AccountId>,
) -> ApiResult<Json<Vec<MsSubscription>>> {
    let actor = state.router.account(account_id).await?;
    Ok(Json(actor.get_ms_subscriptions().await?))
}

pub async fn validate_ms_client_state(
    State(state): State<Arc<AppState>>,
    Path(account_id): Path<AccountId>,
    Json(req): Json<ValidateClientStateRequest>,
) -> ApiResult<Json<ValidResponse>> {
    let actor = state.router.account(account_id).await?;
    Ok(Json(ValidResponse {
        valid: actor
            .validate_ms_client_state(req.subscription_id, req.client_state)
            .await?,
    }))
}

pub async fn get_health(
    State(state): State<Arc<AppState>>,
    Path(account_id): Path<AccountId>,
) -> ApiResult<Json<AccountHealth>> {
    let actor = state.router.account(account_id).await?;
    Ok(Json(actor.get_health().await?))
}

pub async fn get_encryption_health(
    State(state): State<Arc<AppState>>,
    Path(account_id): Path<AccountId>,
) -> ApiResult<Json<EncryptionHealth>> {
    let actor = state.router.account(account_id).await?;
    Ok(Json(actor.get_encryption_health().await?))
}

pub async fn get_provider(
    State(state): State<Arc<AppState>>,
    Path(account_id): Path<AccountId>,
) -> ApiResult<Json<ProviderResponse>> {
    let actor = state.router.account(account_id).await?;
    Ok(Json(ProviderResponse {
        provider: actor.provider(),
    }))
}
