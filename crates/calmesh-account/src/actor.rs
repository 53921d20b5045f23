//! The account actor mailbox

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use calmesh_crypto::{DekBackup, MasterKey, TokenSet};
use calmesh_provider::{CalendarApi, TokenClient};
use calmesh_store::Store;
use calmesh_types::{
    time, AccountHealth, AccountId, CalError, EncryptionHealth, MsSubscription, Provider, Result,
    SyncState, WatchChannel,
};

type Reply<T> = oneshot::Sender<Result<T>>;

const MAILBOX_DEPTH: usize = 64;

/// Everything an account actor needs at spawn time
#[derive(Clone)]
pub struct AccountContext {
    pub account_id: AccountId,
    pub provider: Provider,
    pub store: Store,
    pub tokens: Arc<dyn TokenClient>,
    pub calendar: Arc<dyn CalendarApi>,
    pub master_key: MasterKey,
    /// Public webhook endpoint registered with providers
    pub webhook_url: String,
}

pub(crate) enum AccountCommand {
    Initialize {
        tokens: TokenSet,
        scopes: String,
        reply: Reply<()>,
    },
    GetAccessToken {
        reply: Reply<String>,
    },
    RevokeTokens {
        reply: Reply<bool>,
    },
    RotateKey {
        old_master: MasterKey,
        new_master: MasterKey,
        reply: Reply<()>,
    },
    GetDekBackup {
        reply: Reply<DekBackup>,
    },
    RestoreDekBackup {
        backup: DekBackup,
        reply: Reply<()>,
    },
    GetSyncToken {
        reply: Reply<Option<String>>,
    },
    SetSyncToken {
        token: Option<String>,
        reply: Reply<()>,
    },
    MarkSyncSuccess {
        ts: i64,
        reply: Reply<()>,
    },
    MarkSyncFailure {
        reason: String,
        reply: Reply<()>,
    },
    RegisterChannel {
        calendar_id: String,
        reply: Reply<WatchChannel>,
    },
    RenewChannel {
        channel_id: String,
        reply: Reply<WatchChannel>,
    },
    GetChannelStatus {
        reply: Reply<Vec<WatchChannel>>,
    },
    StopWatchChannels {
        reply: Reply<u64>,
    },
    CreateMsSubscription {
        resource: String,
        client_state: String,
        reply: Reply<MsSubscription>,
    },
    RenewMsSubscription {
        subscription_id: String,
        reply: Reply<MsSubscription>,
    },
    DeleteMsSubscription {
        subscription_id: String,
        reply: Reply<bool>,
    },
    GetMsSubscriptions {
        reply: Reply<Vec<MsSubscription>>,
    },
    ValidateMsClientState {
        subscription_id: String,
        client_state: String,
        reply: Reply<bool>,
    },
    ListEnabledCalendars {
        reply: Reply<Vec<String>>,
    },
    GetHealth {
        reply: Reply<AccountHealth>,
    },
    GetEncryptionHealth {
        reply: Reply<EncryptionHealth>,
    },
}

/// Cloneable handle to one account's mailbox
#[derive(Clone)]
pub struct AccountActorHandle {
    tx: mpsc::Sender<AccountCommand>,
    account_id: AccountId,
    provider: Provider,
}

impl AccountActorHandle {
    /// Spawn the actor task and return its handle
    pub fn spawn(ctx: AccountContext) -> Self {
        let (tx, rx) = mpsc::channel(MAILBOX_DEPTH);
        let handle = Self {
            tx,
            account_id: ctx.account_id,
            provider: ctx.provider,
        };
        tokio::spawn(run(ctx, rx));
        handle
    }

    pub fn account_id(&self) -> AccountId {
        self.account_id
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    async fn call<T>(&self, build: impl FnOnce(Reply<T>) -> AccountCommand) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| CalError::Storage("account actor mailbox closed".to_string()))?;
        rx.await
            .map_err(|_| CalError::Storage("account actor dropped request".to_string()))?
    }

    /// Store credentials, replacing any prior envelope. Idempotent.
    pub async fn initialize(&self, tokens: TokenSet, scopes: String) -> Result<()> {
        self.call(|reply| AccountCommand::Initialize {
            tokens,
            scopes,
            reply,
        })
        .await
    }

    /// Mint an access token just-in-time. The refresh token is never
    /// returned.
    pub async fn get_access_token(&self) -> Result<String> {
        self.call(|reply| AccountCommand::GetAccessToken { reply }).await
    }

    /// Best-effort server revoke, then unconditional local deletion
    pub async fn revoke_tokens(&self) -> Result<bool> {
        self.call(|reply| AccountCommand::RevokeTokens { reply }).await
    }

    /// Re-wrap the DEK under a new master key, atomically
    pub async fn rotate_key(&self, old_master: MasterKey, new_master: MasterKey) -> Result<()> {
        self.call(|reply| AccountCommand::RotateKey {
            old_master,
            new_master,
            reply,
        })
        .await
    }

    pub async fn get_encrypted_dek_for_backup(&self) -> Result<DekBackup> {
        self.call(|reply| AccountCommand::GetDekBackup { reply }).await
    }

    pub async fn restore_dek_from_backup(&self, backup: DekBackup) -> Result<()> {
        self.call(|reply| AccountCommand::RestoreDekBackup { backup, reply })
            .await
    }

    pub async fn get_sync_token(&self) -> Result<Option<String>> {
        self.call(|reply| AccountCommand::GetSyncToken { reply }).await
    }

    pub async fn set_sync_token(&self, token: Option<String>) -> Result<()> {
        self.call(|reply| AccountCommand::SetSyncToken { token, reply })
            .await
    }

    pub async fn mark_sync_success(&self, ts: i64) -> Result<()> {
        self.call(|reply| AccountCommand::MarkSyncSuccess { ts, reply })
            .await
    }

    pub async fn mark_sync_failure(&self, reason: String) -> Result<()> {
        self.call(|reply| AccountCommand::MarkSyncFailure { reason, reply })
            .await
    }

    pub async fn register_channel(&self, calendar_id: String) -> Result<WatchChannel> {
        self.call(|reply| AccountCommand::RegisterChannel { calendar_id, reply })
            .await
    }

    pub async fn renew_channel(&self, channel_id: String) -> Result<WatchChannel> {
        self.call(|reply| AccountCommand::RenewChannel { channel_id, reply })
            .await
    }

    pub async fn get_channel_status(&self) -> Result<Vec<WatchChannel>> {
        self.call(|reply| AccountCommand::GetChannelStatus { reply }).await
    }

    pub async fn stop_watch_channels(&self) -> Result<u64> {
        self.call(|reply| AccountCommand::StopWatchChannels { reply }).await
    }

    pub async fn create_ms_subscription(
        &self,
        resource: String,
        client_state: String,
    ) -> Result<MsSubscription> {
        self.call(|reply| AccountCommand::CreateMsSubscription {
            resource,
            client_state,
            reply,
        })
        .await
    }

    pub async fn renew_ms_subscription(&self, subscription_id: String) -> Result<MsSubscription> {
        self.call(|reply| AccountCommand::RenewMsSubscription {
            subscription_id,
            reply,
        })
        .await
    }

    pub async fn delete_ms_subscription(&self, subscription_id: String) -> Result<bool> {
        self.call(|reply| AccountCommand::DeleteMsSubscription {
            subscription_id,
            reply,
        })
        .await
    }

    pub async fn get_ms_subscriptions(&self) -> Result<Vec<MsSubscription>> {
        self.call(|reply| AccountCommand::GetMsSubscriptions { reply }).await
    }

    pub async fn validate_ms_client_state(
        &self,
        subscription_id: String,
        client_state: String,
    ) -> Result<bool> {
        self.call(|reply| AccountCommand::ValidateMsClientState {
            subscription_id,
            client_state,
            reply,
        })
        .await
    }

    pub async fn list_enabled_calendars(&self) -> Result<Vec<String>> {
        self.call(|reply| AccountCommand::ListEnabledCalendars { reply })
            .await
    }

    pub async fn get_health(&self) -> Result<AccountHealth> {
        self.call(|reply| AccountCommand::GetHealth { reply }).await
    }

    pub async fn get_encryption_health(&self) -> Result<EncryptionHealth> {
        self.call(|reply| AccountCommand::GetEncryptionHealth { reply })
            .await
    }
}

pub(crate) struct AccountActor {
    pub ctx: AccountContext,
}

async fn run(ctx: AccountContext, mut rx: mpsc::Receiver<AccountCommand>) {
    let account_id = ctx.account_id;
    debug!(account_id = %account_id, "Account actor started");
    let actor = AccountActor { ctx };

    // One command at a time, to completion: this loop IS the serialisation
    while let Some(command) = rx.recv().await {
        actor.dispatch(command).await;
    }
    debug!(account_id = %account_id, "Account actor stopped");
}

impl AccountActor {
    async fn dispatch(&self, command: AccountCommand) {
        match command {
            AccountCommand::Initialize {
                tokens,
                scopes,
                reply,
            } => {
                let _ = reply.send(self.initialize(tokens, &scopes).await);
            }
            AccountCommand::GetAccessToken { reply } => {
                let _ = reply.send(self.get_access_token().await);
            }
            AccountCommand::RevokeTokens { reply } => {
                let _ = reply.send(self.revoke_tokens().await);
            }
            AccountCommand::RotateKey {
                old_master,
                new_master,
                reply,
            } => {
                let _ = reply.send(self.rotate_key(&old_master, &new_master).await);
            }
            AccountCommand::GetDekBackup { reply } => {
                let _ = reply.send(self.get_dek_backup().await);
            }
            AccountCommand::RestoreDekBackup { backup, reply } => {
                let _ = reply.send(self.restore_dek_backup(&backup).await);
            }
            AccountCommand::GetSyncToken { reply } => {
                let _ = reply.send(self.get_sync_token().await);
            }
            AccountCommand::SetSyncToken { token, reply } => {
                let _ = reply.send(self.set_sync_token(token.as_deref()).await);
            }
            AccountCommand::MarkSyncSuccess { ts, reply } => {
                let _ = reply.send(
                    self.ctx
                        .store
                        .sync_state()
                        .mark_success(self.ctx.account_id, ts)
                        .await,
                );
            }
            AccountCommand::MarkSyncFailure { reason, reply } => {
                let _ = reply.send(
                    self.ctx
                        .store
                        .sync_state()
                        .mark_failure(self.ctx.account_id, time::now_millis(), &reason)
                        .await,
                );
            }
            AccountCommand::RegisterChannel { calendar_id, reply } => {
                let _ = reply.send(self.register_channel(&calendar_id).await);
            }
            AccountCommand::RenewChannel { channel_id, reply } => {
                let _ = reply.send(self.renew_channel(&channel_id).await);
            }
            AccountCommand::GetChannelStatus { reply } => {
                let _ = reply.send(
                    self.ctx
                        .store
                        .channels()
                        .channels_by_account(self.ctx.account_id)
                        .await,
                );
            }
            AccountCommand::StopWatchChannels { reply } => {
                let _ = reply.send(self.stop_watch_channels().await);
            }
            AccountCommand::CreateMsSubscription {
                resource,
                client_state,
                reply,
            } => {
                let _ = reply.send(self.create_ms_subscription(&resource, &client_state).await);
            }
            AccountCommand::RenewMsSubscription {
                subscription_id,
                reply,
            } => {
                let _ = reply.send(self.renew_ms_subscription(&subscription_id).await);
            }
            AccountCommand::DeleteMsSubscription {
                subscription_id,
                reply,
            } => {
                let _ = reply.send(self.delete_ms_subscription(&subscription_id).await);
            }
            AccountCommand::GetMsSubscriptions { reply } => {
                let _ = reply.send(
                    self.ctx
                        .store
                        .channels()
                        .subscriptions_by_account(self.ctx.account_id)
                        .await,
                );
            }
            AccountCommand::ValidateMsClientState {
                subscription_id,
                client_state,
                reply,
            } => {
                let _ = reply.send(self.validate_ms_client_state(&subscription_id, &client_state).await);
            }
            AccountCommand::ListEnabledCalendars { reply } => {
                let _ = reply.send(
                    self.ctx
                        .store
                        .sync_state()
                        .enabled_calendars(self.ctx.account_id)
                        .await,
                );
            }
            AccountCommand::GetHealth { reply } => {
                let _ = reply.send(self.get_health().await);
            }
            AccountCommand::GetEncryptionHealth { reply } => {
                let _ = reply.send(
                    self.ctx
                        .store
                        .auth()
                        .get_monitor(self.ctx.account_id)
                        .await,
                );
            }
        }
    }

    async fn get_sync_token(&self) -> Result<Option<String>> {
        Ok(self
            .ctx
            .store
            .sync_state()
            .get(self.ctx.account_id)
            .await?
            .sync_token)
    }

    async fn set_sync_token(&self, token: Option<&str>) -> Result<()> {
        self.ctx
            .store
            .sync_state()
            .set_token(self.ctx.account_id, token)
            .await
    }

    async fn get_health(&self) -> Result<AccountHealth> {
        let account_id = self.ctx.account_id;
        let has_tokens = self.ctx.store.auth().get_envelope(account_id).await?.is_some();
        let sync: SyncState = self.ctx.store.sync_state().get(account_id).await?;
        let channels = self.ctx.store.channels().channels_by_account(account_id).await?;
        let subscriptions = self
            .ctx
            .store
            .channels()
            .subscriptions_by_account(account_id)
            .await?;
        let encryption = self.ctx.store.auth().get_monitor(account_id).await?;
        Ok(AccountHealth {
            account_id,
            provider: self.ctx.provider,
            has_tokens,
            sync,
            watch_channels: channels.len(),
            ms_subscriptions: subscriptions.len(),
            encryption,
        })
    }

    async fn validate_ms_client_state(
        &self,
        subscription_id: &str,
        client_state: &str,
    ) -> Result<bool> {
        let subscription = self
            .ctx
            .store
            .channels()
            .get_subscription(subscription_id)
            .await?
            .ok_or_else(|| CalError::SubscriptionNotFound {
                subscription_id: subscription_id.to_string(),
            })?;
        if subscription.account_id != self.ctx.account_id {
            warn!(
                account_id = %self.ctx.account_id,
                subscription_id,
                "Client-state validation against foreign subscription"
            );
            return Ok(false);
        }
        Ok(subscription.client_state == client_state)
    }
}
