//! CalMesh Registry - Account routing and actor supervision
//!
//! The registry table maps each linked account to its user and provider;
//! the [`ActorRouter`] on top of it owns the id -> mailbox tables, spawning
//! each AccountActor and UserGraphActor on first use and keeping it
//! resident. Readers tolerate stale registry data: a stale mapping costs at
//! most one wasted routing hop.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;

use calmesh_account::{AccountActorHandle, AccountContext};
use calmesh_crypto::MasterKey;
use calmesh_graph::{GraphContext, UserGraphHandle};
use calmesh_provider::{CalendarApi, TokenClient};
use calmesh_queue::Queue;
use calmesh_sched::SolverService;
use calmesh_store::Store;
use calmesh_types::{
    time, AccountId, AccountRecord, AccountStatus, CalError, Provider, Result, UserId,
    WriteMessage,
};

/// Shared dependencies handed to every spawned actor
#[derive(Clone)]
pub struct RouterDeps {
    pub store: Store,
    pub master_key: MasterKey,
    pub tokens: Arc<dyn TokenClient>,
    pub calendar: Arc<dyn CalendarApi>,
    pub webhook_url: String,
    pub write_queue: Queue<WriteMessage>,
    pub solver: Arc<SolverService>,
}

/// Maps entity ids to resident actor handles
pub struct ActorRouter {
    deps: RouterDeps,
    accounts: DashMap<AccountId, AccountActorHandle>,
    users: DashMap<UserId, UserGraphHandle>,
}

impl ActorRouter {
    pub fn new(deps: RouterDeps) -> Self {
        Self {
            deps,
            accounts: DashMap::new(),
            users: DashMap::new(),
        }
    }

    pub fn store(&self) -> &Store {
        &self.deps.store
    }

    /// Registry lookup; `None` means the account is unknown (permanent for
    /// queue consumers).
    pub async fn lookup(&self, account_id: AccountId) -> Result<Option<AccountRecord>> {
        self.deps.store.registry().get(account_id).await
    }

    /// The account's actor, spawned on first use. Fails with `NotFound`
    /// for accounts absent from the registry.
    pub async fn account(&self, account_id: AccountId) -> Result<AccountActorHandle> {
        if let Some(handle) = self.accounts.get(&account_id) {
            return Ok(handle.clone());
        }
        let record = self
            .lookup(account_id)
            .await?
            .ok_or_else(|| CalError::not_found("account", account_id.to_string()))?;
        Ok(self.spawn_account(account_id, record.provider))
    }

    fn spawn_account(&self, account_id: AccountId, provider: Provider) -> AccountActorHandle {
        self.accounts
            .entry(account_id)
            .or_insert_with(|| {
                AccountActorHandle::spawn(AccountContext {
                    account_id,
                    provider,
                    store: self.deps.store.clone(),
                    tokens: self.deps.tokens.clone(),
                    calendar: self.deps.calendar.clone(),
                    master_key: self.deps.master_key.clone(),
                    webhook_url: self.deps.webhook_url.clone(),
                })
            })
            .clone()
    }

    /// The user's graph actor, spawned on first use
    pub fn user(&self, user_id: UserId) -> UserGraphHandle {
        self.users
            .entry(user_id)
            .or_insert_with(|| {
                UserGraphHandle::spawn(GraphContext {
                    user_id,
                    store: self.deps.store.clone(),
                    write_queue: self.deps.write_queue.clone(),
                    solver: self.deps.solver.clone(),
                })
            })
            .clone()
    }

    /// Route an account to its user's graph actor
    pub async fn user_for_account(
        &self,
        account_id: AccountId,
    ) -> Result<Option<(AccountRecord, UserGraphHandle)>> {
        match self.lookup(account_id).await? {
            Some(record) => {
                let graph = self.user(record.user_id);
                Ok(Some((record, graph)))
            }
            None => Ok(None),
        }
    }

    /// All active accounts, for cron fan-out
    pub async fn active_accounts(&self) -> Result<Vec<AccountRecord>> {
        self.deps.store.registry().list_active().await
    }

    /// Onboard a linked account: registry row, actor spawn, and the default
    /// federation policy over the user's accounts.
    pub async fn link_account(
        &self,
        user_id: UserId,
        provider: Provider,
        provider_subject: String,
        email: String,
    ) -> Result<AccountRecord> {
        let record = AccountRecord {
            account_id: AccountId::new(),
            user_id,
            provider,
            provider_subject,
            email,
            status: AccountStatus::Active,
            created_at: time::now_millis(),
        };
        self.deps.store.registry().insert(&record).await?;
        self.spawn_account(record.account_id, provider);

        let accounts: Vec<AccountId> = self
            .deps
            .store
            .registry()
            .list_by_user(user_id)
            .await?
            .into_iter()
            .filter(|a| a.status == AccountStatus::Active)
            .map(|a| a.account_id)
            .collect();
        if accounts.len() >= 2 {
            self.user(user_id).ensure_default_policy(accounts).await?;
        }
        info!(
            account_id = %record.account_id,
            user_id = %user_id,
            provider = %provider,
            "Account linked"
        );
        Ok(record)
    }

    /// Full unlink cascade: provider teardown via the account actor, graph
    /// cascade via the user actor, then the registry row itself.
    pub async fn unlink_account(&self, account_id: AccountId) -> Result<calmesh_graph::UnlinkReport> {
        let record = self
            .lookup(account_id)
            .await?
            .ok_or_else(|| CalError::not_found("account", account_id.to_string()))?;

        let actor = self.spawn_account(account_id, record.provider);
        actor.stop_watch_channels().await?;
        for subscription in actor.get_ms_subscriptions().await? {
            actor
                .delete_ms_subscription(subscription.subscription_id)
                .await?;
        }
        actor.revoke_tokens().await?;

        let report = self.user(record.user_id).unlink_account(account_id).await?;
        self.deps.store.sync_state().delete(account_id).await?;
        self.deps.store.auth().delete_monitor(account_id).await?;
        self.deps.store.registry().delete(account_id).await?;
        self.accounts.remove(&account_id);
        info!(account_id = %account_id, "Account unlinked");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use calmesh_provider::testing::FakeProvider;
    use calmesh_queue::RetryPolicy;

    async fn router() -> ActorRouter {
        let store = Store::connect_memory().await.unwrap();
        let fake = Arc::new(FakeProvider::new());
        let (write_queue, runner) = Queue::new();
        struct Sink;
        #[async_trait::async_trait]
        impl calmesh_queue::Consumer<WriteMessage> for Sink {
            async fn handle(&self, _message: &WriteMessage) -> calmesh_queue::Outcome {
                calmesh_queue::Outcome::Ack
            }
        }
        runner.spawn("writes", Arc::new(Sink), RetryPolicy::fast());

        ActorRouter::new(RouterDeps {
            store,
            master_key: MasterKey::from_secret("router-test"),
            tokens: fake.clone(),
            calendar: fake,
            webhook_url: "https://hooks.example.test/calmesh".to_string(),
            write_queue,
            solver: Arc::new(SolverService::greedy_only()),
        })
    }

    #[tokio::test]
    async fn test_unknown_account_is_not_found() {
        let router = router().await;
        assert!(matches!(
            router.account(AccountId::new()).await,
            Err(CalError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_link_two_accounts_federates() {
        let router = router().await;
        let user_id = UserId::new();
        let a = router
            .link_account(user_id, Provider::Google, "sub-a".into(), "a@example.com".into())
            .await
            .unwrap();
        let b = router
            .link_account(user_id, Provider::Microsoft, "sub-b".into(), "b@example.com".into())
            .await
            .unwrap();

        // Default full-mesh policy exists after the second link
        let edges = router.user(user_id).get_policy_edges(None).await.unwrap();
        assert_eq!(edges.len(), 2);

        // Routing resolves both directions
        let (record, _) = router.user_for_account(a.account_id).await.unwrap().unwrap();
        assert_eq!(record.user_id, user_id);
        assert!(router.account(b.account_id).await.is_ok());
    }

    #[tokio::test]
    async fn test_actor_handles_are_resident() {
        let router = router().await;
        let user_id = UserId::new();
        let record = router
            .link_account(user_id, Provider::Google, "sub".into(), "a@example.com".into())
            .await
            .unwrap();
        let h1 = router.account(record.account_id).await.unwrap();
        let h2 = router.account(record.account_id).await.unwrap();
        assert_eq!(h1.account_id(), h2.account_id());
        assert_eq!(router.accounts.len(), 1);
        assert_eq!(router.users.len(), 1);
    }

    #[tokio::test]
    async fn test_unlink_removes_registry_row() {
        let router = router().await;
        let user_id = UserId::new();
        let record = router
            .link_account(user_id, Provider::Google, "sub".into(), "a@example.com".into())
            .await
            .unwrap();
        router.unlink_account(record.account_id).await.unwrap();
        assert!(router.lookup(record.account_id).await.unwrap().is_none());
        assert!(matches!(
            router.unlink_account(record.account_id).await,
            Err(CalError::NotFound { .. })
        ));
    }
}
