//! Watch-channel and Graph-subscription lifecycle
//!
//! Stop and delete swallow provider errors: the local row is always
//! removed so a half-dead channel cannot wedge an unlink.

use tracing::{debug, warn};

use calmesh_types::{CalError, ChannelId, MsSubscription, Provider, Result, WatchChannel};

use crate::actor::AccountActor;

impl AccountActor {
    pub(crate) async fn register_channel(&self, calendar_id: &str) -> Result<WatchChannel> {
        if self.ctx.provider != Provider::Google {
            return Err(CalError::validation(
                "watch channels exist only on Google accounts",
            ));
        }
        let access_token = self.get_access_token().await?;
        let channel_id = ChannelId::new().to_string();
        let info = self
            .ctx
            .calendar
            .watch_calendar(&access_token, calendar_id, &channel_id, &self.ctx.webhook_url)
            .await?;

        let channel = WatchChannel {
            channel_id,
            account_id: self.ctx.account_id,
            calendar_id: calendar_id.to_string(),
            resource_id: info.resource_id,
            expiry: info.expiry,
            status: "active".to_string(),
        };
        self.ctx.store.channels().insert_channel(&channel).await?;
        self.ctx
            .store
            .sync_state()
            .enable_calendar(self.ctx.account_id, calendar_id)
            .await?;
        debug!(account_id = %self.ctx.account_id, channel_id = %channel.channel_id, "Watch channel registered");
        Ok(channel)
    }

    /// Re-arm a channel before it expires. Google has no renew verb, so the
    /// watch is re-registered under the same channel id.
    pub(crate) async fn renew_channel(&self, channel_id: &str) -> Result<WatchChannel> {
        let mut channel = self
            .ctx
            .store
            .channels()
            .get_channel(channel_id)
            .await?
            .filter(|c| c.account_id == self.ctx.account_id)
            .ok_or_else(|| CalError::ChannelNotFound {
                channel_id: channel_id.to_string(),
            })?;

        let access_token = self.get_access_token().await?;
        let info = self
            .ctx
            .calendar
            .watch_calendar(
                &access_token,
                &channel.calendar_id,
                &channel.channel_id,
                &self.ctx.webhook_url,
            )
            .await?;
        channel.resource_id = info.resource_id;
        channel.expiry = info.expiry;
        self.ctx.store.channels().insert_channel(&channel).await?;
        Ok(channel)
    }

    pub(crate) async fn stop_watch_channels(&self) -> Result<u64> {
        let channels = self
            .ctx
            .store
            .channels()
            .channels_by_account(self.ctx.account_id)
            .await?;

        // Best effort against the provider; local rows always go
        if !channels.is_empty() {
            match self.get_access_token().await {
                Ok(access_token) => {
                    for channel in &channels {
                        if let Err(e) = self
                            .ctx
                            .calendar
                            .stop_channel(&access_token, &channel.channel_id, &channel.resource_id)
                            .await
                        {
                            warn!(
                                account_id = %self.ctx.account_id,
                                channel_id = %channel.channel_id,
                                error = %e,
                                "channels.stop failed; deleting local row anyway"
                            );
                        }
                    }
                }
                Err(e) => {
                    warn!(
                        account_id = %self.ctx.account_id,
                        error = %e,
                        "No access token for channels.stop; deleting local rows anyway"
                    );
                }
            }
        }

        self.ctx
            .store
            .channels()
            .delete_channels_by_account(self.ctx.account_id)
            .await
    }

    pub(crate) async fn create_ms_subscription(
        &self,
        resource: &str,
        client_state: &str,
    ) -> Result<MsSubscription> {
        if self.ctx.provider != Provider::Microsoft {
            return Err(CalError::validation(
                "Graph subscriptions exist only on Microsoft accounts",
            ));
        }
        let access_token = self.get_access_token().await?;
        let info = self
            .ctx
            .calendar
            .create_subscription(&access_token, &self.ctx.webhook_url, resource, client_state)
            .await?;

        let subscription = MsSubscription {
            subscription_id: info.subscription_id,
            account_id: self.ctx.account_id,
            resource: resource.to_string(),
            client_state: client_state.to_string(),
            expiry: info.expiry,
            status: "active".to_string(),
        };
        self.ctx
            .store
            .channels()
            .insert_subscription(&subscription)
            .await?;
        debug!(
            account_id = %self.ctx.account_id,
            subscription_id = %subscription.subscription_id,
            "Graph subscription created"
        );
        Ok(subscription)
    }

    pub(crate) async fn renew_ms_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<MsSubscription> {
        let mut subscription = self
            .ctx
            .store
            .channels()
            .get_subscription(subscription_id)
            .await?
            .filter(|s| s.account_id == self.ctx.account_id)
            .ok_or_else(|| CalError::SubscriptionNotFound {
                subscription_id: subscription_id.to_string(),
            })?;

        let access_token = self.get_access_token().await?;
        let expiry = self
            .ctx
            .calendar
            .renew_subscription(&access_token, subscription_id)
            .await?;
        subscription.expiry = expiry;
        self.ctx
            .store
            .channels()
            .update_subscription_expiry(subscription_id, expiry)
            .await?;
        Ok(subscription)
    }

    pub(crate) async fn delete_ms_subscription(&self, subscription_id: &str) -> Result<bool> {
        // Best effort against Graph; the local row always goes
        if let Ok(access_token) = self.get_access_token().await {
            if let Err(e) = self
                .ctx
                .calendar
                .delete_subscription(&access_token, subscription_id)
                .await
            {
                warn!(
                    account_id = %self.ctx.account_id,
                    subscription_id,
                    error = %e,
                    "Subscription delete failed; deleting local row anyway"
                );
            }
        }
        self.ctx
            .store
            .channels()
            .delete_subscription(subscription_id)
            .await
    }
}
