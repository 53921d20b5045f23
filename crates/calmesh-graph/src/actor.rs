//! The user-graph actor mailbox

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use calmesh_queue::Queue;
use calmesh_sched::SolverService;
use calmesh_store::Store;
use calmesh_types::{
    AccountId, Availability, CalError, CandidateId, CanonicalEvent, CanonicalEventId, Constraint,
    ConstraintId, ConstraintKind, Hold, HoldId, HoldStatus, JournalEntry, Mirror,
    ParticipantStats, Policy, PolicyEdge, PolicyId, ProviderDelta, Result, SchedulingHistoryEntry,
    SchedulingSession, SessionId, SessionStatus, SyncHealth, UserId, VipId, VipPolicy,
    WriteMessage,
};

use crate::dto::*;

type Reply<T> = oneshot::Sender<Result<T>>;

const MAILBOX_DEPTH: usize = 128;

/// Everything a user-graph actor needs at spawn time
#[derive(Clone)]
pub struct GraphContext {
    pub user_id: UserId,
    pub store: Store,
    pub write_queue: Queue<WriteMessage>,
    pub solver: Arc<SolverService>,
}

pub(crate) struct UserGraph {
    pub ctx: GraphContext,
}

pub(crate) enum GraphCommand {
    ApplyProviderDelta {
        origin_account_id: AccountId,
        deltas: Vec<ProviderDelta>,
        reply: Reply<ApplyDeltaReport>,
    },
    FindCanonicalByOrigin {
        origin_account_id: AccountId,
        origin_event_id: String,
        reply: Reply<Option<CanonicalEvent>>,
    },
    GetCanonicalEvent {
        id: CanonicalEventId,
        reply: Reply<EventWithMirrors>,
    },
    ListCanonicalEvents {
        query: ListEventsQuery,
        reply: Reply<EventPage>,
    },
    GetMirror {
        canonical_event_id: CanonicalEventId,
        target_account_id: AccountId,
        reply: Reply<Option<Mirror>>,
    },
    GetActiveMirrors {
        target_account_id: AccountId,
        reply: Reply<Vec<Mirror>>,
    },
    UpdateMirrorState {
        canonical_event_id: CanonicalEventId,
        target_account_id: AccountId,
        update: MirrorStateUpdate,
        reply: Reply<()>,
    },
    SetMirrorCalendar {
        canonical_event_id: CanonicalEventId,
        target_account_id: AccountId,
        target_calendar_id: String,
        reply: Reply<()>,
    },
    RecomputeProjections {
        canonical_event_id: Option<CanonicalEventId>,
        reply: Reply<u64>,
    },
    CreatePolicy {
        name: String,
        reply: Reply<Policy>,
    },
    SetPolicyEdges {
        policy_id: PolicyId,
        edges: Vec<PolicyEdge>,
        reply: Reply<u64>,
    },
    EnsureDefaultPolicy {
        accounts: Vec<AccountId>,
        reply: Reply<Policy>,
    },
    GetPolicyEdges {
        from_account_id: Option<AccountId>,
        reply: Reply<Vec<PolicyEdge>>,
    },
    AddConstraint {
        kind: ConstraintKind,
        config: serde_json::Value,
        active_from: Option<i64>,
        active_to: Option<i64>,
        reply: Reply<Constraint>,
    },
    ListConstraints {
        active_at: Option<i64>,
        reply: Reply<Vec<Constraint>>,
    },
    RemoveConstraint {
        constraint_id: ConstraintId,
        reply: Reply<bool>,
    },
    CreateVipPolicy {
        params: CreateVipParams,
        reply: Reply<VipPolicy>,
    },
    ListVipPolicies {
        reply: Reply<Vec<VipPolicy>>,
    },
    DeleteVipPolicy {
        vip_id: VipId,
        reply: Reply<bool>,
    },
    RecordSchedulingHistory {
        entries: Vec<SchedulingHistoryEntry>,
        reply: Reply<u64>,
    },
    GetSchedulingHistory {
        participant_hashes: Vec<String>,
        reply: Reply<Vec<ParticipantStats>>,
    },
    CreateSession {
        params: CreateSessionParams,
        reply: Reply<CreateSessionResult>,
    },
    GetSession {
        session_id: SessionId,
        reply: Reply<CreateSessionResult>,
    },
    ListSessions {
        status: Option<SessionStatus>,
        limit: i64,
        reply: Reply<Vec<SchedulingSession>>,
    },
    CancelSession {
        session_id: SessionId,
        reply: Reply<SchedulingSession>,
    },
    CommitCandidate {
        session_id: SessionId,
        candidate_id: CandidateId,
        reply: Reply<CommitResult>,
    },
    GetHoldsBySession {
        session_id: SessionId,
        reply: Reply<Vec<Hold>>,
    },
    GetExpiredHolds {
        now: i64,
        reply: Reply<Vec<Hold>>,
    },
    UpdateHoldStatus {
        hold_id: HoldId,
        status: HoldStatus,
        reply: Reply<Hold>,
    },
    ExpireOverdueHolds {
        now: i64,
        reply: Reply<u64>,
    },
    ComputeAvailability {
        query: AvailabilityQuery,
        reply: Reply<Availability>,
    },
    QueryJournal {
        query: JournalQuery,
        reply: Reply<Vec<JournalEntry>>,
    },
    GetSyncHealth {
        reply: Reply<SyncHealth>,
    },
    UnlinkAccount {
        account_id: AccountId,
        reply: Reply<UnlinkReport>,
    },
    LogReconcileDiscrepancy {
        record: DiscrepancyRecord,
        reply: Reply<()>,
    },
}

/// Parameters for `create_vip_policy`
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateVipParams {
    pub participant_hash: String,
    pub display_name: String,
    pub priority_weight: f64,
    #[serde(default)]
    pub conditions: serde_json::Value,
}

/// Cloneable handle to one user's mailbox
#[derive(Clone)]
pub struct UserGraphHandle {
    tx: mpsc::Sender<GraphCommand>,
    user_id: UserId,
}

impl UserGraphHandle {
    pub fn spawn(ctx: GraphContext) -> Self {
        let (tx, rx) = mpsc::channel(MAILBOX_DEPTH);
        let handle = Self {
            tx,
            user_id: ctx.user_id,
        };
        tokio::spawn(run(ctx, rx));
        handle
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    async fn call<T>(&self, build: impl FnOnce(Reply<T>) -> GraphCommand) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| CalError::Storage("user graph actor mailbox closed".to_string()))?;
        rx.await
            .map_err(|_| CalError::Storage("user graph actor dropped request".to_string()))?
    }

    pub async fn apply_provider_delta(
        &self,
        origin_account_id: AccountId,
        deltas: Vec<ProviderDelta>,
    ) -> Result<ApplyDeltaReport> {
        self.call(|reply| GraphCommand::ApplyProviderDelta {
            origin_account_id,
            deltas,
            reply,
        })
        .await
    }

    pub async fn find_canonical_by_origin(
        &self,
        origin_account_id: AccountId,
        origin_event_id: String,
    ) -> Result<Option<CanonicalEvent>> {
        self.call(|reply| GraphCommand::FindCanonicalByOrigin {
            origin_account_id,
            origin_event_id,
            reply,
        })
        .await
    }

    pub async fn get_canonical_event(&self, id: CanonicalEventId) -> Result<EventWithMirrors> {
        self.call(|reply| GraphCommand::GetCanonicalEvent { id, reply }).await
    }

    pub async fn list_canonical_events(&self, query: ListEventsQuery) -> Result<EventPage> {
        self.call(|reply| GraphCommand::ListCanonicalEvents { query, reply }).await
    }

    pub async fn get_mirror(
        &self,
        canonical_event_id: CanonicalEventId,
        target_account_id: AccountId,
    ) -> Result<Option<Mirror>> {
        self.call(|reply| GraphCommand::GetMirror {
            canonical_event_id,
            target_account_id,
            reply,
        })
        .await
    }

    pub async fn get_active_mirrors(&self, target_account_id: AccountId) -> Result<Vec<Mirror>> {
        self.call(|reply| GraphCommand::GetActiveMirrors {
            target_account_id,
            reply,
        })
        .await
    }

    pub async fn update_mirror_state(
        &self,
        canonical_event_id: CanonicalEventId,
        target_account_id: AccountId,
        update: MirrorStateUpdate,
    ) -> Result<()> {
        self.call(|reply| GraphCommand::UpdateMirrorState {
            canonical_event_id,
            target_account_id,
            update,
            reply,
        })
        .await
    }

    pub async fn set_mirror_calendar(
        &self,
        canonical_event_id: CanonicalEventId,
        target_account_id: AccountId,
        target_calendar_id: String,
    ) -> Result<()> {
        self.call(|reply| GraphCommand::SetMirrorCalendar {
            canonical_event_id,
            target_account_id,
            target_calendar_id,
            reply,
        })
        .await
    }

    pub async fn recompute_projections(
        &self,
        canonical_event_id: Option<CanonicalEventId>,
    ) -> Result<u64> {
        self.call(|reply| GraphCommand::RecomputeProjections {
            canonical_event_id,
            reply,
        })
        .await
    }

    pub async fn create_policy(&self, name: String) -> Result<Policy> {
        self.call(|reply| GraphCommand::CreatePolicy { name, reply }).await
    }

    pub async fn set_policy_edges(
        &self,
        policy_id: PolicyId,
        edges: Vec<PolicyEdge>,
    ) -> Result<u64> {
        self.call(|reply| GraphCommand::SetPolicyEdges {
            policy_id,
            edges,
            reply,
        })
        .await
    }

    pub async fn ensure_default_policy(&self, accounts: Vec<AccountId>) -> Result<Policy> {
        self.call(|reply| GraphCommand::EnsureDefaultPolicy { accounts, reply }).await
    }

    pub async fn get_policy_edges(
        &self,
        from_account_id: Option<AccountId>,
    ) -> Result<Vec<PolicyEdge>> {
        self.call(|reply| GraphCommand::GetPolicyEdges {
            from_account_id,
            reply,
        })
        .await
    }

    pub async fn add_constraint(
        &self,
        kind: ConstraintKind,
        config: serde_json::Value,
        active_from: Option<i64>,
        active_to: Option<i64>,
    ) -> Result<Constraint> {
        self.call(|reply| GraphCommand::AddConstraint {
            kind,
            config,
            active_from,
            active_to,
            reply,
        })
        .await
    }

    pub async fn list_constraints(&self, active_at: Option<i64>) -> Result<Vec<Constraint>> {
        self.call(|reply| GraphCommand::ListConstraints { active_at, reply }).await
    }

    pub async fn remove_constraint(&self, constraint_id: ConstraintId) -> Result<bool> {
        self.call(|reply| GraphCommand::RemoveConstraint {
            constraint_id,
            reply,
        })
        .await
    }

    pub async fn create_vip_policy(&self, params: CreateVipParams) -> Result<VipPolicy> {
        self.call(|reply| GraphCommand::CreateVipPolicy { params, reply }).await
    }

    pub async fn list_vip_policies(&self) -> Result<Vec<VipPolicy>> {
        self.call(|reply| GraphCommand::ListVipPolicies { reply }).await
    }

    pub async fn delete_vip_policy(&self, vip_id: VipId) -> Result<bool> {
        self.call(|reply| GraphCommand::DeleteVipPolicy { vip_id, reply }).await
    }

    pub async fn record_scheduling_history(
        &self,
        entries: Vec<SchedulingHistoryEntry>,
    ) -> Result<u64> {
        self.call(|reply| GraphCommand::RecordSchedulingHistory { entries, reply }).await
    }

    pub async fn get_scheduling_history(
        &self,
        participant_hashes: Vec<String>,
    ) -> Result<Vec<ParticipantStats>> {
        self.call(|reply| GraphCommand::GetSchedulingHistory {
            participant_hashes,
            reply,
        })
        .await
    }

    pub async fn create_session(&self, params: CreateSessionParams) -> Result<CreateSessionResult> {
        self.call(|reply| GraphCommand::CreateSession { params, reply }).await
    }

    pub async fn get_session(&self, session_id: SessionId) -> Result<CreateSessionResult> {
        self.call(|reply| GraphCommand::GetSession { session_id, reply }).await
    }

    pub async fn list_sessions(
        &self,
        status: Option<SessionStatus>,
        limit: i64,
    ) -> Result<Vec<SchedulingSession>> {
        self.call(|reply| GraphCommand::ListSessions {
            status,
            limit,
            reply,
        })
        .await
    }

    pub async fn cancel_session(&self, session_id: SessionId) -> Result<SchedulingSession> {
        self.call(|reply| GraphCommand::CancelSession { session_id, reply }).await
    }

    pub async fn commit_candidate(
        &self,
        session_id: SessionId,
        candidate_id: CandidateId,
    ) -> Result<CommitResult> {
        self.call(|reply| GraphCommand::CommitCandidate {
            session_id,
            candidate_id,
            reply,
        })
        .await
    }

    pub async fn get_holds_by_session(&self, session_id: SessionId) -> Result<Vec<Hold>> {
        self.call(|reply| GraphCommand::GetHoldsBySession { session_id, reply }).await
    }

    pub async fn get_expired_holds(&self, now: i64) -> Result<Vec<Hold>> {
        self.call(|reply| GraphCommand::GetExpiredHolds { now, reply }).await
    }

    pub async fn update_hold_status(&self, hold_id: HoldId, status: HoldStatus) -> Result<Hold> {
        self.call(|reply| GraphCommand::UpdateHoldStatus {
            hold_id,
            status,
            reply,
        })
        .await
    }

    pub async fn expire_overdue_holds(&self, now: i64) -> Result<u64> {
        self.call(|reply| GraphCommand::ExpireOverdueHolds { now, reply }).await
    }

    pub async fn compute_availability(&self, query: AvailabilityQuery) -> Result<Availability> {
        self.call(|reply| GraphCommand::ComputeAvailability { query, reply }).await
    }

    pub async fn query_journal(&self, query: JournalQuery) -> Result<Vec<JournalEntry>> {
        self.call(|reply| GraphCommand::QueryJournal { query, reply }).await
    }

    pub async fn get_sync_health(&self) -> Result<SyncHealth> {
        self.call(|reply| GraphCommand::GetSyncHealth { reply }).await
    }

    pub async fn unlink_account(&self, account_id: AccountId) -> Result<UnlinkReport> {
        self.call(|reply| GraphCommand::UnlinkAccount { account_id, reply }).await
    }

    pub async fn log_reconcile_discrepancy(&self, record: DiscrepancyRecord) -> Result<()> {
        self.call(|reply| GraphCommand::LogReconcileDiscrepancy { record, reply }).await
    }
}

async fn run(ctx: GraphContext, mut rx: mpsc::Receiver<GraphCommand>) {
    let user_id = ctx.user_id;
    debug!(user_id = %user_id, "User graph actor started");
    let graph = UserGraph { ctx };

    // One command at a time, to completion: this loop IS the serialisation
    while let Some(command) = rx.recv().await {
        graph.dispatch(command).await;
    }
    debug!(user_id = %user_id, "User graph actor stopped");
}

impl UserGraph {
    async fn dispatch(&self, command: GraphCommand) {
        match command {
            GraphCommand::ApplyProviderDelta {
                origin_account_id,
                deltas,
                reply,
            } => {
                let _ = reply.send(self.apply_provider_delta(origin_account_id, deltas).await);
            }
            GraphCommand::FindCanonicalByOrigin {
                origin_account_id,
                origin_event_id,
                reply,
            } => {
                let _ = reply.send(
                    self.find_canonical_by_origin(origin_account_id, &origin_event_id)
                        .await,
                );
            }
            GraphCommand::GetCanonicalEvent { id, reply } => {
                let _ = reply.send(self.get_canonical_event(id).await);
            }
            GraphCommand::ListCanonicalEvents { query, reply } => {
                let _ = reply.send(self.list_canonical_events(query).await);
            }
            GraphCommand::GetMirror {
                canonical_event_id,
                target_account_id,
                reply,
            } => {
                let _ = reply.send(self.get_mirror(canonical_event_id, target_account_id).await);
            }
            GraphCommand::GetActiveMirrors {
                target_account_id,
                reply,
            } => {
                let _ = reply.send(self.ctx.store.mirrors().active_by_target(target_account_id).await);
            }
            GraphCommand::UpdateMirrorState {
                canonical_event_id,
                target_account_id,
                update,
                reply,
            } => {
                let _ = reply.send(
                    self.update_mirror_state(canonical_event_id, target_account_id, update)
                        .await,
                );
            }
            GraphCommand::SetMirrorCalendar {
                canonical_event_id,
                target_account_id,
                target_calendar_id,
                reply,
            } => {
                let _ = reply.send(
                    self.set_mirror_calendar(
                        canonical_event_id,
                        target_account_id,
                        &target_calendar_id,
                    )
                    .await,
                );
            }
            GraphCommand::RecomputeProjections {
                canonical_event_id,
                reply,
            } => {
                let _ = reply.send(self.recompute_projections(canonical_event_id).await);
            }
            GraphCommand::CreatePolicy { name, reply } => {
                let _ = reply.send(self.create_policy(&name, false).await);
            }
            GraphCommand::SetPolicyEdges {
                policy_id,
                edges,
                reply,
            } => {
                let _ = reply.send(self.set_policy_edges(policy_id, edges).await);
            }
            GraphCommand::EnsureDefaultPolicy { accounts, reply } => {
                let _ = reply.send(self.ensure_default_policy(accounts).await);
            }
            GraphCommand::GetPolicyEdges {
                from_account_id,
                reply,
            } => {
                let _ = reply.send(self.get_policy_edges(from_account_id).await);
            }
            GraphCommand::AddConstraint {
                kind,
                config,
                active_from,
                active_to,
                reply,
            } => {
                let _ = reply.send(self.add_constraint(kind, config, active_from, active_to).await);
            }
            GraphCommand::ListConstraints { active_at, reply } => {
                let _ = reply.send(self.ctx.store.constraints().list(self.ctx.user_id, active_at).await);
            }
            GraphCommand::RemoveConstraint {
                constraint_id,
                reply,
            } => {
                let _ = reply.send(self.ctx.store.constraints().delete(constraint_id).await);
            }
            GraphCommand::CreateVipPolicy { params, reply } => {
                let _ = reply.send(self.create_vip_policy(params).await);
            }
            GraphCommand::ListVipPolicies { reply } => {
                let _ = reply.send(self.ctx.store.constraints().list_vips(self.ctx.user_id).await);
            }
            GraphCommand::DeleteVipPolicy { vip_id, reply } => {
                let _ = reply.send(self.ctx.store.constraints().delete_vip(vip_id).await);
            }
            GraphCommand::RecordSchedulingHistory { entries, reply } => {
                let _ = reply.send(self.record_scheduling_history(entries).await);
            }
            GraphCommand::GetSchedulingHistory {
                participant_hashes,
                reply,
            } => {
                let _ = reply.send(
                    self.ctx
                        .store
                        .history()
                        .stats_for(self.ctx.user_id, &participant_hashes)
                        .await,
                );
            }
            GraphCommand::CreateSession { params, reply } => {
                let _ = reply.send(self.create_session(params).await);
            }
            GraphCommand::GetSession { session_id, reply } => {
                let _ = reply.send(self.get_session(session_id).await);
            }
            GraphCommand::ListSessions {
                status,
                limit,
                reply,
            } => {
                let _ = reply.send(self.list_sessions(status, limit).await);
            }
            GraphCommand::CancelSession { session_id, reply } => {
                let _ = reply.send(self.cancel_session(session_id).await);
            }
            GraphCommand::CommitCandidate {
                session_id,
                candidate_id,
                reply,
            } => {
                let _ = reply.send(self.commit_candidate(session_id, candidate_id).await);
            }
            GraphCommand::GetHoldsBySession { session_id, reply } => {
                let _ = reply.send(self.get_holds_by_session(session_id).await);
            }
            GraphCommand::GetExpiredHolds { now, reply } => {
                let _ = reply.send(self.get_expired_holds(now).await);
            }
            GraphCommand::UpdateHoldStatus {
                hold_id,
                status,
                reply,
            } => {
                let _ = reply.send(self.update_hold_status(hold_id, status).await);
            }
            GraphCommand::ExpireOverdueHolds { now, reply } => {
                let _ = reply.send(self.expire_overdue_holds(now).await);
            }
            GraphCommand::ComputeAvailability { query, reply } => {
                let _ = reply.send(self.compute_availability(query).await);
            }
            GraphCommand::QueryJournal { query, reply } => {
                let _ = reply.send(
                    self.ctx
                        .store
                        .journal()
                        .query(
                            self.ctx.user_id,
                            query.canonical_event_id,
                            query.limit.clamp(1, 500),
                            query.cursor.as_deref(),
                        )
                        .await,
                );
            }
            GraphCommand::GetSyncHealth { reply } => {
                let _ = reply.send(self.get_sync_health().await);
            }
            GraphCommand::UnlinkAccount { account_id, reply } => {
                let _ = reply.send(self.unlink_account(account_id).await);
            }
            GraphCommand::LogReconcileDiscrepancy { record, reply } => {
                let _ = reply.send(self.log_reconcile_discrepancy(record).await);
            }
        }
    }

    async fn add_constraint(
        &self,
        kind: ConstraintKind,
        config: serde_json::Value,
        active_from: Option<i64>,
        active_to: Option<i64>,
    ) -> Result<Constraint> {
        if let (Some(from), Some(to)) = (active_from, active_to) {
            if from >= to {
                return Err(CalError::validation("activeFrom must precede activeTo"));
            }
        }
        let constraint = Constraint {
            constraint_id: ConstraintId::new(),
            user_id: self.ctx.user_id,
            kind,
            config,
            active_from,
            active_to,
        };
        self.ctx.store.constraints().insert(&constraint).await?;
        Ok(constraint)
    }

    async fn create_vip_policy(&self, params: CreateVipParams) -> Result<VipPolicy> {
        if params.priority_weight < 1.0 {
            return Err(CalError::validation("priorityWeight must be >= 1.0"));
        }
        if params.participant_hash.trim().is_empty() {
            return Err(CalError::validation("participantHash is required"));
        }
        let vip = VipPolicy {
            vip_id: VipId::new(),
            user_id: self.ctx.user_id,
            participant_hash: params.participant_hash,
            display_name: params.display_name,
            priority_weight: params.priority_weight,
            conditions: params.conditions,
        };
        self.ctx.store.constraints().insert_vip(&vip).await?;
        Ok(vip)
    }

    async fn record_scheduling_history(
        &self,
        entries: Vec<SchedulingHistoryEntry>,
    ) -> Result<u64> {
        let mut recorded = 0;
        for entry in &entries {
            self.ctx.store.history().insert(self.ctx.user_id, entry).await?;
            recorded += 1;
        }
        Ok(recorded)
    }

    async fn log_reconcile_discrepancy(&self, record: DiscrepancyRecord) -> Result<()> {
        self.journal(
            record.canonical_event_id,
            "reconcile",
            &record.kind.change_type(),
            Some(record.details),
            Some(format!("account {}", record.account_id)),
        )
        .await
    }
}
