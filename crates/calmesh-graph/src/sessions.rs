//! Scheduling sessions, candidates, and holds

use std::collections::HashSet;

use serde_json::json;
use tracing::{debug, info};

use calmesh_sched::SolverInput;
use calmesh_types::{
    time, CalError, Candidate, CandidateId, CandidateStatus, CanonicalEvent, CanonicalEventId,
    Constraint, EventSource, EventStatus, Hold, HoldId, HoldStatus, Result, SchedulingHistoryEntry,
    SchedulingSession, SessionId, SessionStatus, Transparency, VipPolicy,
};

use crate::actor::UserGraph;
use crate::availability::merge_busy;
use crate::dto::{CommitResult, CreateSessionParams, CreateSessionResult};
use crate::DEFAULT_HOLD_MINUTES;

const MIN_DURATION_MINUTES: i64 = 15;
const MAX_DURATION_MINUTES: i64 = 480;

fn validate(params: &CreateSessionParams) -> Result<()> {
    if params.title.trim().is_empty() {
        return Err(CalError::validation("title is required"));
    }
    if !(MIN_DURATION_MINUTES..=MAX_DURATION_MINUTES).contains(&params.duration_minutes) {
        return Err(CalError::validation(format!(
            "durationMinutes must be between {MIN_DURATION_MINUTES} and {MAX_DURATION_MINUTES}"
        )));
    }
    if params.window_start >= params.window_end {
        return Err(CalError::validation("windowStart must precede windowEnd"));
    }
    if params.required_account_ids.is_empty() {
        return Err(CalError::validation("requiredAccountIds must not be empty"));
    }
    Ok(())
}

impl UserGraph {
    pub(crate) async fn create_session(
        &self,
        params: CreateSessionParams,
    ) -> Result<CreateSessionResult> {
        validate(&params)?;

        let busy_raw = self
            .ctx
            .store
            .events()
            .busy_intervals(
                self.ctx.user_id,
                &params.required_account_ids,
                params.window_start,
                params.window_end,
            )
            .await?;
        let busy_intervals = merge_busy(busy_raw, params.window_start, params.window_end);

        let constraints: Vec<Constraint> = self
            .ctx
            .store
            .constraints()
            .list(self.ctx.user_id, None)
            .await?
            .into_iter()
            .filter(|c| c.active_in(params.window_start, params.window_end))
            .collect();
        let vip_policies: Vec<VipPolicy> =
            self.ctx.store.constraints().list_vips(self.ctx.user_id).await?;
        let participant_stats = self
            .ctx
            .store
            .history()
            .stats_for(self.ctx.user_id, &params.participant_hashes)
            .await?;

        let input = SolverInput {
            window_start: params.window_start,
            window_end: params.window_end,
            duration_minutes: params.duration_minutes,
            busy_intervals,
            required_account_ids: params.required_account_ids.clone(),
            constraints,
            participant_hashes: params.participant_hashes.clone(),
            vip_policies,
            participant_stats,
        };
        let max_candidates = params
            .max_candidates
            .unwrap_or(calmesh_sched::DEFAULT_MAX_CANDIDATES);
        let scored = self.ctx.solver.solve(&input, max_candidates).await;

        let session = SchedulingSession {
            session_id: SessionId::new(),
            user_id: self.ctx.user_id,
            status: SessionStatus::CandidatesReady,
            objective: serde_json::to_value(&params)?,
            created_at: time::now_millis(),
            committed_candidate_id: None,
            committed_event_id: None,
        };
        self.ctx.store.sessions().insert(&session).await?;

        let mut candidates = Vec::with_capacity(scored.len());
        for scored_candidate in scored {
            let candidate = Candidate {
                candidate_id: CandidateId::new(),
                session_id: session.session_id,
                start: scored_candidate.start,
                end: scored_candidate.end,
                score: scored_candidate.score,
                explanation: scored_candidate.explanation,
                status: CandidateStatus::Proposed,
            };
            self.ctx.store.sessions().insert_candidate(&candidate).await?;
            candidates.push(candidate);
        }

        // Tentative holds on the top candidate, one per required account
        let mut holds = Vec::new();
        if params.create_holds && !candidates.is_empty() {
            let ttl = params.hold_minutes.unwrap_or(DEFAULT_HOLD_MINUTES);
            let expires_at = time::now_millis() + ttl * 60 * 1000;
            for account_id in &params.required_account_ids {
                let hold = Hold {
                    hold_id: HoldId::new(),
                    session_id: session.session_id,
                    account_id: *account_id,
                    provider_event_id: None,
                    expires_at,
                    status: HoldStatus::Held,
                };
                self.ctx.store.sessions().insert_hold(&hold).await?;
                holds.push(hold);
            }
        }

        info!(
            user_id = %self.ctx.user_id,
            session_id = %session.session_id,
            candidates = candidates.len(),
            holds = holds.len(),
            "Scheduling session created"
        );
        Ok(CreateSessionResult {
            session,
            candidates,
            holds,
        })
    }

    pub(crate) async fn get_session(&self, session_id: SessionId) -> Result<CreateSessionResult> {
        let session = self.owned_session(session_id).await?;
        let candidates = self.ctx.store.sessions().candidates_by_session(session_id).await?;
        let holds = self.ctx.store.sessions().holds_by_session(session_id).await?;
        Ok(CreateSessionResult {
            session,
            candidates,
            holds,
        })
    }

    async fn owned_session(&self, session_id: SessionId) -> Result<SchedulingSession> {
        self.ctx
            .store
            .sessions()
            .get(session_id)
            .await?
            .filter(|s| s.user_id == self.ctx.user_id)
            .ok_or_else(|| CalError::not_found("session", session_id.to_string()))
    }

    pub(crate) async fn list_sessions(
        &self,
        status: Option<SessionStatus>,
        limit: i64,
    ) -> Result<Vec<SchedulingSession>> {
        self.ctx
            .store
            .sessions()
            .list(self.ctx.user_id, status, limit.clamp(1, 200))
            .await
    }

    /// Release every hold still `held`; returns the count released
    async fn release_holds(&self, session_id: SessionId) -> Result<u64> {
        let holds = self.ctx.store.sessions().holds_by_session(session_id).await?;
        let mut released = 0;
        for hold in holds {
            if hold.status != HoldStatus::Held {
                continue;
            }
            self.ctx
                .store
                .sessions()
                .set_hold_status(hold.hold_id, HoldStatus::Released)
                .await?;
            released += 1;
            // A hold that made it to the provider gets its tentative event
            // removed through the write path
            if let Some(provider_event_id) = &hold.provider_event_id {
                self.enqueue_hold_delete(&hold.hold_id, hold.account_id, provider_event_id)?;
            }
        }
        Ok(released)
    }

    fn enqueue_hold_delete(
        &self,
        hold_id: &HoldId,
        account_id: calmesh_types::AccountId,
        provider_event_id: &str,
    ) -> Result<()> {
        // Holds have no canonical event; reuse the mirror-delete path with
        // a hold-scoped idempotency key
        self.ctx
            .write_queue
            .enqueue(calmesh_types::WriteMessage::DeleteMirror {
                canonical_event_id: CanonicalEventId::new(),
                target_account_id: account_id,
                provider_event_id: provider_event_id.to_string(),
                idempotency_key: format!("hold|{hold_id}|{provider_event_id}"),
            })
    }

    pub(crate) async fn cancel_session(&self, session_id: SessionId) -> Result<SchedulingSession> {
        let mut session = self.owned_session(session_id).await?;
        if session.status.is_terminal() {
            return Err(CalError::invalid_transition(format!(
                "session {session_id} is already {}",
                session.status.as_str()
            )));
        }
        self.ctx
            .store
            .sessions()
            .update_status(session_id, SessionStatus::Cancelled)
            .await?;
        let released = self.release_holds(session_id).await?;
        session.status = SessionStatus::Cancelled;
        debug!(session_id = %session_id, released, "Session cancelled");
        Ok(session)
    }

    /// Commit one candidate: create the canonical event (`source=system`),
    /// fan out its mirrors, release holds, and record history. The first
    /// participant is credited with the preferred slot.
    pub(crate) async fn commit_candidate(
        &self,
        session_id: SessionId,
        candidate_id: CandidateId,
    ) -> Result<CommitResult> {
        let session = self.owned_session(session_id).await?;
        if session.status != SessionStatus::CandidatesReady {
            return Err(CalError::invalid_transition(format!(
                "session {session_id} is {}; only candidates_ready sessions commit",
                session.status.as_str()
            )));
        }
        let candidate = self
            .ctx
            .store
            .sessions()
            .get_candidate(candidate_id)
            .await?
            .filter(|c| c.session_id == session_id)
            .ok_or_else(|| CalError::not_found("candidate", candidate_id.to_string()))?;

        let params: CreateSessionParams = serde_json::from_value(session.objective.clone())?;
        let organizer = params
            .required_account_ids
            .first()
            .copied()
            .ok_or_else(|| CalError::validation("session objective lost its accounts"))?;

        let now = time::now_millis();
        let event_id = CanonicalEventId::new();
        let event = CanonicalEvent {
            canonical_event_id: event_id,
            user_id: self.ctx.user_id,
            origin_account_id: organizer,
            // System events reuse their canonical id as the origin key;
            // the provider-uniqueness index only covers provider rows
            origin_event_id: event_id.to_string(),
            title: params.title.clone(),
            description: None,
            location: None,
            start: candidate.start,
            end: candidate.end,
            all_day: false,
            status: EventStatus::Confirmed,
            visibility: None,
            transparency: Transparency::Opaque,
            recurrence_rule: None,
            source: EventSource::System,
            version: 1,
            created_at: now,
            updated_at: now,
        };
        self.ctx.store.events().upsert(&event).await?;
        self.journal(
            Some(event_id),
            "scheduler",
            "created",
            Some(json!({
                "session_id": session_id,
                "candidate_id": candidate_id,
                "title": params.title,
            })),
            None,
        )
        .await?;
        let mirrors_enqueued = self.project_event(&event, false).await?;

        self.ctx
            .store
            .sessions()
            .set_candidate_status(candidate_id, CandidateStatus::Committed)
            .await?;
        self.ctx
            .store
            .sessions()
            .mark_committed(session_id, candidate_id, event_id)
            .await?;
        let released_holds = self.release_holds(session_id).await?;

        // One history row per participant; the first is the preferred one
        let mut seen = HashSet::new();
        for (index, participant_hash) in params.participant_hashes.iter().enumerate() {
            if !seen.insert(participant_hash.clone()) {
                continue;
            }
            self.ctx
                .store
                .history()
                .insert(
                    self.ctx.user_id,
                    &SchedulingHistoryEntry {
                        session_id,
                        participant_hash: participant_hash.clone(),
                        got_preferred: index == 0,
                        scheduled_ts: now,
                    },
                )
                .await?;
        }

        info!(
            user_id = %self.ctx.user_id,
            session_id = %session_id,
            event_id = %event_id,
            released_holds,
            "Candidate committed"
        );
        Ok(CommitResult {
            session_id,
            event_id,
            released_holds,
            mirrors_enqueued,
        })
    }

    pub(crate) async fn get_holds_by_session(&self, session_id: SessionId) -> Result<Vec<Hold>> {
        self.owned_session(session_id).await?;
        self.ctx.store.sessions().holds_by_session(session_id).await
    }

    pub(crate) async fn get_expired_holds(&self, now: i64) -> Result<Vec<Hold>> {
        self.ctx.store.sessions().expired_holds(self.ctx.user_id, now).await
    }

    /// Transition one hold, enforcing the `held -> {released, expired,
    /// committed}` machine. Expired holds with tentative provider events
    /// get those events deleted through the write path.
    pub(crate) async fn update_hold_status(
        &self,
        hold_id: HoldId,
        next: HoldStatus,
    ) -> Result<Hold> {
        let mut hold = self
            .ctx
            .store
            .sessions()
            .get_hold(hold_id)
            .await?
            .ok_or_else(|| CalError::not_found("hold", hold_id.to_string()))?;
        if !hold.status.can_transition_to(next) {
            return Err(CalError::invalid_transition(format!(
                "hold {hold_id}: {} -> {}",
                hold.status.as_str(),
                next.as_str()
            )));
        }
        self.ctx.store.sessions().set_hold_status(hold_id, next).await?;
        if next == HoldStatus::Expired {
            if let Some(provider_event_id) = &hold.provider_event_id {
                self.enqueue_hold_delete(&hold.hold_id, hold.account_id, provider_event_id)?;
            }
        }
        hold.status = next;
        Ok(hold)
    }

    /// Sweep: expire overdue holds. Idempotent; a cancelled sweep reruns
    /// on the next tick.
    pub(crate) async fn expire_overdue_holds(&self, now: i64) -> Result<u64> {
        let overdue = self.get_expired_holds(now).await?;
        let mut expired = 0;
        for hold in overdue {
            self.update_hold_status(hold.hold_id, HoldStatus::Expired).await?;
            expired += 1;
        }
        Ok(expired)
    }
}
