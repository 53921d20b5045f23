//! Sync cursor and calendar-scope repository

use sqlx::SqlitePool;

use calmesh_types::{AccountId, Result, SyncState};

use crate::db_err;
use crate::models::SyncStateRow;

pub struct SyncStateRepo {
    pool: SqlitePool,
}

impl SyncStateRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, account_id: AccountId) -> Result<SyncState> {
        let row = sqlx::query_as::<_, SyncStateRow>(
            r#"
            SELECT sync_token, last_success_ts, last_sync_ts, last_failure_reason
            FROM account_sync WHERE account_id = ?
            "#,
        )
        .bind(account_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.map(SyncState::from).unwrap_or_default())
    }

    pub async fn set_token(&self, account_id: AccountId, token: Option<&str>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO account_sync (account_id, sync_token) VALUES (?, ?)
            ON CONFLICT(account_id) DO UPDATE SET sync_token = excluded.sync_token
            "#,
        )
        .bind(account_id.to_string())
        .bind(token)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn mark_success(&self, account_id: AccountId, ts: i64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO account_sync (account_id, last_success_ts, last_sync_ts, last_failure_reason)
            VALUES (?, ?, ?, NULL)
            ON CONFLICT(account_id) DO UPDATE SET
                last_success_ts = excluded.last_success_ts,
                last_sync_ts = excluded.last_sync_ts,
                last_failure_reason = NULL
            "#,
        )
        .bind(account_id.to_string())
        .bind(ts)
        .bind(ts)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn mark_failure(&self, account_id: AccountId, ts: i64, reason: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO account_sync (account_id, last_sync_ts, last_failure_reason)
            VALUES (?, ?, ?)
            ON CONFLICT(account_id) DO UPDATE SET
                last_sync_ts = excluded.last_sync_ts,
                last_failure_reason = excluded.last_failure_reason
            "#,
        )
        .bind(account_id.to_string())
        .bind(ts)
        .bind(reason)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn delete(&self, account_id: AccountId) -> Result<()> {
        sqlx::query("DELETE FROM account_sync WHERE account_id = ?")
            .bind(account_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Enabled provider calendars for an account; defaults to `primary`
    /// when none are recorded.
    pub async fn enabled_calendars(&self, account_id: AccountId) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT calendar_id FROM calendar_scopes WHERE account_id = ? AND enabled = 1 ORDER BY calendar_id",
        )
        .bind(account_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        if rows.is_empty() {
            return Ok(vec!["primary".to_string()]);
        }
        Ok(rows.into_iter().map(|(c,)| c).collect())
    }

    pub async fn enable_calendar(&self, account_id: AccountId, calendar_id: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO calendar_scopes (account_id, calendar_id, enabled) VALUES (?, ?, 1)
            ON CONFLICT(account_id, calendar_id) DO UPDATE SET enabled = 1
            "#,
        )
        .bind(account_id.to_string())
        .bind(calendar_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn delete_calendars(&self, account_id: AccountId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM calendar_scopes WHERE account_id = ?")
            .bind(account_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected())
    }
}
