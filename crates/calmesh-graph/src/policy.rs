//! Policy graph operations
//!
//! Edge changes always trigger a re-projection pass: added edges project
//! every canonical event of their `from` account, removed edges tear their
//! mirrors down.

use tracing::{debug, info};

use calmesh_types::{
    time, AccountId, CalError, CalendarKind, DetailLevel, Policy, PolicyEdge, PolicyId, Result,
};

use crate::actor::UserGraph;

impl UserGraph {
    pub(crate) async fn create_policy(&self, name: &str, is_default: bool) -> Result<Policy> {
        let policy = Policy {
            policy_id: PolicyId::new(),
            user_id: self.ctx.user_id,
            name: name.to_string(),
            is_default,
            created_at: time::now_millis(),
        };
        self.ctx.store.policies().insert(&policy).await?;
        info!(user_id = %self.ctx.user_id, policy_id = %policy.policy_id, name, "Policy created");
        Ok(policy)
    }

    /// Outgoing edges of the user's single active policy
    pub(crate) async fn outgoing_edges(&self, from: AccountId) -> Result<Vec<PolicyEdge>> {
        match self.ctx.store.policies().active_for_user(self.ctx.user_id).await? {
            Some(policy) => self.ctx.store.policies().edges_from(policy.policy_id, from).await,
            None => Ok(Vec::new()),
        }
    }

    pub(crate) async fn get_policy_edges(
        &self,
        from_account_id: Option<AccountId>,
    ) -> Result<Vec<PolicyEdge>> {
        let Some(policy) = self.ctx.store.policies().active_for_user(self.ctx.user_id).await?
        else {
            return Ok(Vec::new());
        };
        match from_account_id {
            Some(from) => self.ctx.store.policies().edges_from(policy.policy_id, from).await,
            None => self.ctx.store.policies().edges(policy.policy_id).await,
        }
    }

    /// Atomically replace a policy's edge set, then reconcile mirrors with
    /// the diff: new edges enqueue upserts for all canonical events of
    /// `from`, removed edges enqueue deletes and tombstone.
    pub(crate) async fn set_policy_edges(
        &self,
        policy_id: PolicyId,
        edges: Vec<PolicyEdge>,
    ) -> Result<u64> {
        for edge in &edges {
            if edge.from_account_id == edge.to_account_id {
                return Err(CalError::validation(format!(
                    "policy edge cannot loop: {}",
                    edge.from_account_id
                )));
            }
        }
        let policy = self
            .ctx
            .store
            .policies()
            .get(policy_id)
            .await?
            .filter(|p| p.user_id == self.ctx.user_id)
            .ok_or_else(|| CalError::not_found("policy", policy_id.to_string()))?;

        let before = self.ctx.store.policies().edges(policy.policy_id).await?;
        self.ctx
            .store
            .policies()
            .replace_edges(policy.policy_id, &edges)
            .await?;

        let added: Vec<&PolicyEdge> = edges
            .iter()
            .filter(|e| !before.iter().any(|b| b == *e))
            .collect();
        let removed: Vec<&PolicyEdge> = before
            .iter()
            .filter(|b| {
                !edges.iter().any(|e| {
                    e.from_account_id == b.from_account_id && e.to_account_id == b.to_account_id
                })
            })
            .collect();

        let mut enqueued = 0;
        for edge in added {
            let events = self
                .ctx
                .store
                .events()
                .list_by_origin_account(edge.from_account_id)
                .await?;
            for event in &events {
                enqueued += self.project_event(event, false).await?;
            }
        }
        for edge in removed {
            let events = self
                .ctx
                .store
                .events()
                .list_by_origin_account(edge.from_account_id)
                .await?;
            for event in &events {
                if let Some(mirror) = self
                    .ctx
                    .store
                    .mirrors()
                    .get(event.canonical_event_id, edge.to_account_id)
                    .await?
                {
                    if mirror.state != calmesh_types::MirrorState::Tombstoned {
                        enqueued += self
                            .enqueue_mirror_delete_for(event.canonical_event_id, &mirror)
                            .await?;
                    }
                }
            }
        }
        debug!(
            user_id = %self.ctx.user_id,
            policy_id = %policy_id,
            edges = edges.len(),
            writes_enqueued = enqueued,
            "Policy edges replaced"
        );
        Ok(enqueued)
    }

    /// Create the full-mesh BUSY overlay policy if the user has none, so
    /// the first connected accounts federate immediately. With an existing
    /// default policy, newly-linked accounts are folded into the mesh.
    pub(crate) async fn ensure_default_policy(
        &self,
        accounts: Vec<AccountId>,
    ) -> Result<Policy> {
        let mesh: Vec<PolicyEdge> = accounts
            .iter()
            .flat_map(|from| {
                accounts
                    .iter()
                    .filter(move |to| *to != from)
                    .map(move |to| PolicyEdge {
                        from_account_id: *from,
                        to_account_id: *to,
                        detail_level: DetailLevel::Busy,
                        calendar_kind: CalendarKind::BusyOverlay,
                    })
            })
            .collect();

        match self.ctx.store.policies().active_for_user(self.ctx.user_id).await? {
            Some(policy) if policy.is_default => {
                self.set_policy_edges(policy.policy_id, mesh).await?;
                Ok(policy)
            }
            // A custom policy stays authoritative
            Some(policy) => Ok(policy),
            None => {
                let policy = self.create_policy("Default federation", true).await?;
                self.set_policy_edges(policy.policy_id, mesh).await?;
                Ok(policy)
            }
        }
    }
}
