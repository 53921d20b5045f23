//! UserGraphActor RPC handlers

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;

use calmesh_graph::{
    ApplyDeltaReport, AvailabilityQuery, CommitResult, CreateSessionParams, CreateSessionResult,
    CreateVipParams, DiscrepancyRecord, EventPage, EventWithMirrors, JournalQuery,
    ListEventsQuery, MirrorStateUpdate, UnlinkReport,
};
use calmesh_types::{
    time, Availability, CanonicalEvent, Constraint, Hold, JournalEntry, Mirror, ParticipantStats,
    Policy, PolicyEdge, SchedulingSession, SyncHealth, UserId, VipPolicy,
};

use crate::dto::*;
use crate::error::ApiResult;
use crate::state::AppState;

pub async fn apply_provider_delta(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<UserId>,
    Json(req): Json<ApplyDeltaRequest>,
) -> ApiResult<Json<ApplyDeltaReport>> {
    let graph = state.router.user(user_id);
    Ok(Json(
        graph
            .apply_provider_delta(req.origin_account_id, req.deltas)
            .await?,
    ))
}

pub async fn find_canonical_by_origin(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<UserId>,
    Json(req): Json<FindByOriginRequest>,
) -> ApiResult<Json<Option<CanonicalEvent>>> {
    let graph = state.router.user(user_id);
    Ok(Json(
        graph
            .find_canonical_by_origin(req.origin_account_id, req.origin_event_id)
            .await?,
    ))
}

pub async fn get_canonical_event(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<UserId>,
    Json(req): Json<EventIdRequest>,
) -> ApiResult<Json<EventWithMirrors>> {
    let graph = state.router.user(user_id);
    Ok(Json(graph.get_canonical_event(req.canonical_event_id).await?))
}

pub async fn list_canonical_events(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<UserId>,
    Json(query): Json<ListEventsQuery>,
) -> ApiResult<Json<EventPage>> {
    let graph = state.router.user(user_id);
    Ok(Json(graph.list_canonical_events(query).await?))
}

pub async fn get_mirror(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<UserId>,
    Json(req): Json<MirrorKeyRequest>,
) -> ApiResult<Json<Option<Mirror>>> {
    let graph = state.router.user(user_id);
    Ok(Json(
        graph
            .get_mirror(req.canonical_event_id, req.target_account_id)
            .await?,
    ))
}

pub async fn get_active_mirrors(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<UserId>,
    Json(req): Json<TargetAccountRequest>,
) -> ApiResult<Json<Vec<Mirror>>> {
    let graph = state.router.user(user_id);
    Ok(Json(graph.get_active_mirrors(req.target_account_id).await?))
}

pub async fn update_mirror_state(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<UserId>,
    Json(req): Json<UpdateMirrorStateRequest>,
) -> ApiResult<Json<OkResponse>> {
    let graph = state.router.user(user_id);
    graph
        .update_mirror_state(
            req.canonical_event_id,
            req.target_account_id,
            MirrorStateUpdate {
                state: req.state,
                provider_event_id: req.provider_event_id,
                error: req.error,
                last_write_ts: req.last_write_ts,
            },
        )
        .await?;
    Ok(Json(OkResponse::ok()))
}

pub async fn recompute_projections(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<UserId>,
    Json(req): Json<RecomputeProjectionsRequest>,
) -> ApiResult<Json<CountResponse>> {
    let graph = state.router.user(user_id);
    Ok(Json(CountResponse {
        count: graph.recompute_projections(req.canonical_event_id).await?,
    }))
}

pub async fn create_policy(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<UserId>,
    Json(req): Json<CreatePolicyRequest>,
) -> ApiResult<Json<Policy>> {
    let graph = state.router.user(user_id);
    Ok(Json(graph.create_policy(req.name).await?))
}

pub async fn set_policy_edges(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<UserId>,
    Json(req): Json<SetPolicyEdgesRequest>,
) -> ApiResult<Json<CountResponse>> {
    let graph = state.router.user(user_id);
    Ok(Json(CountResponse {
        count: graph.set_policy_edges(req.policy_id, req.edges).await?,
    }))
}

pub async fn ensure_default_policy(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<UserId>,
    Json(req): Json<EnsureDefaultPolicyRequest>,
) -> ApiResult<Json<Policy>> {
    let graph = state.router.user(user_id);
    Ok(Json(graph.ensure_default_policy(req.accounts).await?))
}

pub async fn get_policy_edges(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<UserId>,
    Json(req): Json<GetPolicyEdgesRequest>,
) -> ApiResult<Json<Vec<PolicyEdge>>> {
    let graph = state.router.user(user_id);
    Ok(Json(graph.get_policy_edges(req.from_account_id).await?))
}

pub async fn add_constraint(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<UserId>,
    Json(req): Json<AddConstraintRequest>,
) -> ApiResult<Json<Constraint>> {
    let graph = state.router.user(user_id);
    Ok(Json(
        graph
            .add_constraint(req.kind, req.config, req.active_from, req.active_to)
            .await?,
    ))
}

pub async fn list_constraints(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<UserId>,
    Json(req): Json<ListConstraintsRequest>,
) -> ApiResult<Json<Vec<Constraint>>> {
    let graph = state.router.user(user_id);
    Ok(Json(graph.list_constraints(req.active_at).await?))
}

pub async fn remove_constraint(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<UserId>,
    Json(req): Json<ConstraintIdRequest>,
) -> ApiResult<Json<OkResponse>> {
    let graph = state.router.user(user_id);
    graph.remove_constraint(req.constraint_id).await?;
    Ok(Json(OkResponse::ok()))
}

pub async fn create_vip_policy(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<UserId>,
    Json(params): Json<CreateVipParams>,
) -> ApiResult<Json<VipPolicy>> {
    let graph = state.router.user(user_id);
    Ok(Json(graph.create_vip_policy(params).await?))
}

pub async fn list_vip_policies(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<UserId>,
) -> ApiResult<Json<Vec<VipPolicy>>> {
    let graph = state.router.user(user_id);
    Ok(Json(graph.list_vip_policies().await?))
}

pub async fn delete_vip_policy(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<UserId>,
    Json(req): Json<VipIdRequest>,
) -> ApiResult<Json<OkResponse>> {
    let graph = state.router.user(user_id);
    graph.delete_vip_policy(req.vip_id).await?;
    Ok(Json(OkResponse::ok()))
}

pub async fn record_scheduling_history(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<UserId>,
    Json(req): Json<RecordHistoryRequest>,
) -> ApiResult<Json<CountResponse>> {
    let graph = state.router.user(user_id);
    Ok(Json(CountResponse {
        count: graph.record_scheduling_history(req.entries).await?,
    }))
}

pub async fn get_scheduling_history(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<UserId>,
    Json(req): Json<GetHistoryRequest>,
) -> ApiResult<Json<Vec<ParticipantStats>>> {
    let graph = state.router.user(user_id);
    Ok(Json(
        graph.get_scheduling_history(req.participant_hashes).await?,
    ))
}

pub async fn create_session(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<UserId>,
    Json(params): Json<CreateSessionParams>,
) -> ApiResult<Json<CreateSessionResult>> {
    let graph = state.router.user(user_id);
    Ok(Json(graph.create_session(params).await?))
}

pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<UserId>,
    Json(req): Json<SessionIdRequest>,
) -> ApiResult<Json<CreateSessionResult>> {
    let graph = state.router.user(user_id);
    Ok(Json(graph.get_session(req.session_id).await?))
}

pub async fn list_scheduling_sessions(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<UserId>,
    Json(req): Json<ListSessionsRequest>,
) -> ApiResult<Json<Vec<SchedulingSession>>> {
    let graph = state.router.user(user_id);
    Ok(Json(graph.list_sessions(req.status, req.limit).await?))
}

pub async fn commit_candidate(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<UserId>,
    Json(req): Json<CommitCandidateRequest>,
) -> ApiResult<Json<CommitResult>> {
    let graph = state.router.user(user_id);
    Ok(Json(
        graph.commit_candidate(req.session_id, req.candidate_id).await?,
    ))
}

pub async fn cancel_scheduling_session(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<UserId>,
    Json(req): Json<SessionIdRequest>,
) -> ApiResult<Json<SchedulingSession>> {
    let graph = state.router.user(user_id);
    Ok(Json(graph.cancel_session(req.session_id).await?))
}

pub async fn get_holds_by_session(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<UserId>,
    Json(req): Json<SessionIdRequest>,
) -> ApiResult<Json<Vec<Hold>>> {
    let graph = state.router.user(user_id);
    Ok(Json(graph.get_holds_by_session(req.session_id).await?))
}

pub async fn get_expired_holds(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<UserId>,
    Json(req): Json<ExpiredHoldsRequest>,
) -> ApiResult<Json<Vec<Hold>>> {
    let graph = state.router.user(user_id);
    let now = req.now.unwrap_or_else(time::now_millis);
    Ok(Json(graph.get_expired_holds(now).await?))
}

pub async fn update_hold_status(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<UserId>,
    Json(req): Json<UpdateHoldStatusRequest>,
) -> ApiResult<Json<Hold>> {
    let graph = state.router.user(user_id);
    Ok(Json(graph.update_hold_status(req.hold_id, req.status).await?))
}

pub async fn compute_availability(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<UserId>,
    Json(query): Json<AvailabilityQuery>,
) -> ApiResult<Json<Availability>> {
    let graph = state.router.user(user_id);
    Ok(Json(graph.compute_availability(query).await?))
}

pub async fn query_journal(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<UserId>,
    Json(query): Json<JournalQuery>,
) -> ApiResult<Json<Vec<JournalEntry>>> {
    let graph = state.router.user(user_id);
    Ok(Json(graph.query_journal(query).await?))
}

pub async fn get_sync_health(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<UserId>,
) -> ApiResult<Json<SyncHealth>> {
    let graph = state.router.user(user_id);
    Ok(Json(graph.get_sync_health().await?))
}

pub async fn unlink_account(
    State(state): State<Arc<AppState>>,
    Path(_user_id): Path<UserId>,
    Json(req): Json<UnlinkAccountRequest>,
) -> ApiResult<Json<UnlinkReport>> {
    Ok(Json(state.router.unlink_account(req.account_id).await?))
}

pub async fn log_reconcile_discrepancy(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<UserId>,
    Json(record): Json<DiscrepancyRecord>,
) -> ApiResult<Json<OkResponse>> {
    let graph = state.router.user(user_id);
    graph.log_reconcile_discrepancy(record).await?;
    Ok(Json(OkResponse::ok()))
}
