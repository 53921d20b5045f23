//! Route definitions
//!
//! Every actor operation is pathname-dispatched JSON; unknown pathnames
//! fall through to a plain-text 404.

use std::sync::Arc;

use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{accounts, system, users};
use crate::state::AppState;

/// Assemble the full RPC surface
pub fn api_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(system::healthz))
        .route("/accounts/link", post(system::link_account))
        .nest("/accounts/:account_id", account_routes())
        .nest("/users/:user_id", user_routes())
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "not found")
}

fn account_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/initialize", post(accounts::initialize))
        .route("/getAccessToken", post(accounts::get_access_token))
        .route("/revokeTokens", post(accounts::revoke_tokens))
        .route("/getSyncToken", post(accounts::get_sync_token))
        .route("/setSyncToken", post(accounts::set_sync_token))
        .route("/markSyncSuccess", post(accounts::mark_sync_success))
        .route("/markSyncFailure", post(accounts::mark_sync_failure))
        .route("/registerChannel", post(accounts::register_channel))
        .route("/renewChannel", post(accounts::renew_channel))
        .route("/getChannelStatus", post(accounts::get_channel_status))
        .route("/stopWatchChannels", post(accounts::stop_watch_channels))
        .route("/createMsSubscription", post(accounts::create_ms_subscription))
        .route("/renewMsSubscription", post(accounts::renew_ms_subscription))
        .route("/deleteMsSubscription", post(accounts::delete_ms_subscription))
        .route("/getMsSubscriptions", post(accounts::get_ms_subscriptions))
        .route("/validateMsClientState", post(accounts::validate_ms_client_state))
        .route("/getHealth", post(accounts::get_health))
        .route("/rotateKey", post(accounts::rotate_key))
        .route(
            "/getEncryptedDekForBackup",
            post(accounts::get_encrypted_dek_for_backup),
        )
        .route(
            "/restoreDekFromBackup",
            post(accounts::restore_dek_from_backup),
        )
        .route("/getEncryptionHealth", post(accounts::get_encryption_health))
        .route("/getProvider", post(accounts::get_provider))
        // Pipeline glue
        .route("/sync", post(system::trigger_sync))
        .route("/reconcile", post(system::trigger_reconcile))
}

fn user_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/applyProviderDelta", post(users::apply_provider_delta))
        .route("/findCanonicalByOrigin", post(users::find_canonical_by_origin))
        .route("/getCanonicalEvent", post(users::get_canonical_event))
        .route("/listCanonicalEvents", post(users::list_canonical_events))
        .route("/getMirror", post(users::get_mirror))
        .route("/getActiveMirrors", post(users::get_active_mirrors))
        .route("/updateMirrorState", post(users::update_mirror_state))
        .route("/recomputeProjections", post(users::recompute_projections))
        .route("/createPolicy", post(users::create_policy))
        .route("/setPolicyEdges", post(users::set_policy_edges))
        .route("/ensureDefaultPolicy", post(users::ensure_default_policy))
        .route("/getPolicyEdges", post(users::get_policy_edges))
        .route("/addConstraint", post(users::add_constraint))
        .route("/listConstraints", post(users::list_constraints))
        .route("/removeConstraint", post(users::remove_constraint))
        .route("/createVipPolicy", post(users::create_vip_policy))
        .route("/listVipPolicies", post(users::list_vip_policies))
        .route("/deleteVipPolicy", post(users::delete_vip_policy))
        .route(
            "/recordSchedulingHistory",
            post(users::record_scheduling_history),
        )
        .route("/getSchedulingHistory", post(users::get_scheduling_history))
        .route("/createSession", post(users::create_session))
        .route("/getSession", post(users::get_session))
        .route("/listSchedulingSessions", post(users::list_scheduling_sessions))
        .route("/commitCandidate", post(users::commit_candidate))
        .route(
            "/cancelSchedulingSession",
            post(users::cancel_scheduling_session),
        )
        .route("/getHoldsBySession", post(users::get_holds_by_session))
        .route("/getExpiredHolds", post(users::get_expired_holds))
        .route("/updateHoldStatus", post(users::update_hold_status))
        .route("/computeAvailability", post(users::compute_availability))
        .route("/queryJournal", post(users::query_journal))
        .route("/getSyncHealth", post(users::get_sync_health))
        .route("/unlinkAccount", post(users::unlink_account))
        .route(
            "/logReconcileDiscrepancy",
            post(users::log_reconcile_discrepancy),
        )
}

#[cfg(test)]
mod tests;
