//! Watch-channel and Microsoft-subscription repository

use sqlx::SqlitePool;

use calmesh_types::{AccountId, MsSubscription, Result, WatchChannel};

use crate::db_err;
use crate::models::{MsSubscriptionRow, WatchChannelRow};

pub struct ChannelRepo {
    pool: SqlitePool,
}

impl ChannelRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // Google watch channels

    pub async fn insert_channel(&self, channel: &WatchChannel) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO watch_channels (channel_id, account_id, calendar_id, resource_id, expiry, status)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(channel_id) DO UPDATE SET
                resource_id = excluded.resource_id,
                expiry = excluded.expiry,
                status = excluded.status
            "#,
        )
        .bind(&channel.channel_id)
        .bind(channel.account_id.to_string())
        .bind(&channel.calendar_id)
        .bind(&channel.resource_id)
        .bind(channel.expiry)
        .bind(&channel.status)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn get_channel(&self, channel_id: &str) -> Result<Option<WatchChannel>> {
        let row = sqlx::query_as::<_, WatchChannelRow>(
            "SELECT * FROM watch_channels WHERE channel_id = ?",
        )
        .bind(channel_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.map(WatchChannel::try_from).transpose()
    }

    pub async fn channels_by_account(&self, account_id: AccountId) -> Result<Vec<WatchChannel>> {
        let rows = sqlx::query_as::<_, WatchChannelRow>(
            "SELECT * FROM watch_channels WHERE account_id = ? ORDER BY channel_id",
        )
        .bind(account_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.into_iter().map(WatchChannel::try_from).collect()
    }

    pub async fn update_channel_expiry(&self, channel_id: &str, expiry: i64) -> Result<()> {
        sqlx::query("UPDATE watch_channels SET expiry = ? WHERE channel_id = ?")
            .bind(expiry)
            .bind(channel_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    pub async fn delete_channels_by_account(&self, account_id: AccountId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM watch_channels WHERE account_id = ?")
            .bind(account_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected())
    }

    /// Channels whose expiry falls before the given instant, across all
    /// accounts. Used by the renewal sweep.
    pub async fn channels_expiring_before(&self, ts: i64) -> Result<Vec<WatchChannel>> {
        let rows = sqlx::query_as::<_, WatchChannelRow>(
            "SELECT * FROM watch_channels WHERE expiry < ? AND status = 'active'",
        )
        .bind(ts)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.into_iter().map(WatchChannel::try_from).collect()
    }

    // Microsoft Graph subscriptions

    pub async fn insert_subscription(&self, sub: &MsSubscription) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO ms_subscriptions (subscription_id, account_id, resource, client_state, expiry, status)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(subscription_id) DO UPDATE SET
                expiry = excluded.expiry,
                status = excluded.status
            "#,
        )
        .bind(&sub.subscription_id)
        .bind(sub.account_id.to_string())
        .bind(&sub.resource)
        .bind(&sub.client_state)
        .bind(sub.expiry)
        .bind(&sub.status)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn get_subscription(&self, subscription_id: &str) -> Result<Option<MsSubscription>> {
        let row = sqlx::query_as::<_, MsSubscriptionRow>(
            "SELECT * FROM ms_subscriptions WHERE subscription_id = ?",
        )
        .bind(subscription_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.map(MsSubscription::try_from).transpose()
    }

    pub async fn subscriptions_by_account(
        &self,
        account_id: AccountId,
    ) -> Result<Vec<MsSubscription>> {
        let rows = sqlx::query_as::<_, MsSubscriptionRow>(
            "SELECT * FROM ms_subscriptions WHERE account_id = ? ORDER BY subscription_id",
        )
        .bind(account_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.into_iter().map(MsSubscription::try_from).collect()
    }

    pub async fn update_subscription_expiry(&self, subscription_id: &str, expiry: i64) -> Result<()> {
        sqlx::query("UPDATE ms_subscriptions SET expiry = ? WHERE subscription_id = ?")
            .bind(expiry)
            .bind(subscription_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    pub async fn delete_subscription(&self, subscription_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM ms_subscriptions WHERE subscription_id = ?")
            .bind(subscription_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete_subscriptions_by_account(&self, account_id: AccountId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM ms_subscriptions WHERE account_id = ?")
            .bind(account_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected())
    }

    pub async fn subscriptions_expiring_before(&self, ts: i64) -> Result<Vec<MsSubscription>> {
        let rows = sqlx::query_as::<_, MsSubscriptionRow>(
            "SELECT * FROM ms_subscriptions WHERE expiry < ? AND status = 'active'",
        )
        .bind(ts)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.into_iter().map(MsSubscription::try_from).collect()
    }
}
