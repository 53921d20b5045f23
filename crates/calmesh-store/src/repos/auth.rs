//! Token envelope and encryption-monitor repository
//!
//! The envelope column holds the persisted 4-field JSON verbatim; this repo
//! never sees plaintext tokens.

use sqlx::SqlitePool;

use calmesh_types::{AccountId, EncryptionHealth, Result};

use crate::db_err;
use crate::models::EncryptionMonitorRow;

pub struct AuthRepo {
    pool: SqlitePool,
}

impl AuthRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn upsert_envelope(
        &self,
        account_id: AccountId,
        envelope_json: &str,
        scopes: &str,
        now: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO account_auth (account_id, envelope, scopes, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(account_id) DO UPDATE SET
                envelope = excluded.envelope,
                scopes = excluded.scopes,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(account_id.to_string())
        .bind(envelope_json)
        .bind(scopes)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    /// Replace only the envelope, keeping scopes. Used by refresh and key
    /// rotation.
    pub async fn replace_envelope(
        &self,
        account_id: AccountId,
        envelope_json: &str,
        now: i64,
    ) -> Result<()> {
        sqlx::query("UPDATE account_auth SET envelope = ?, updated_at = ? WHERE account_id = ?")
            .bind(envelope_json)
            .bind(now)
            .bind(account_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Returns `(envelope_json, scopes)` if credentials are stored
    pub async fn get_envelope(&self, account_id: AccountId) -> Result<Option<(String, String)>> {
        let row: Option<(String, String)> =
            sqlx::query_as("SELECT envelope, scopes FROM account_auth WHERE account_id = ?")
                .bind(account_id.to_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;
        Ok(row)
    }

    pub async fn delete(&self, account_id: AccountId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM account_auth WHERE account_id = ?")
            .bind(account_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn record_decrypt_success(&self, account_id: AccountId, now: i64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO encryption_monitor (account_id, failure_count, last_success_ts)
            VALUES (?, 0, ?)
            ON CONFLICT(account_id) DO UPDATE SET last_success_ts = excluded.last_success_ts
            "#,
        )
        .bind(account_id.to_string())
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn record_decrypt_failure(
        &self,
        account_id: AccountId,
        now: i64,
        error: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO encryption_monitor
                (account_id, failure_count, last_failure_ts, last_failure_error)
            VALUES (?, 1, ?, ?)
            ON CONFLICT(account_id) DO UPDATE SET
                failure_count = encryption_monitor.failure_count + 1,
                last_failure_ts = excluded.last_failure_ts,
                last_failure_error = excluded.last_failure_error
            "#,
        )
        .bind(account_id.to_string())
        .bind(now)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn get_monitor(&self, account_id: AccountId) -> Result<EncryptionHealth> {
        let row = sqlx::query_as::<_, EncryptionMonitorRow>(
            r#"
            SELECT failure_count, last_success_ts, last_failure_ts, last_failure_error
            FROM encryption_monitor WHERE account_id = ?
            "#,
        )
        .bind(account_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.map(EncryptionHealth::from).unwrap_or_default())
    }

    pub async fn delete_monitor(&self, account_id: AccountId) -> Result<()> {
        sqlx::query("DELETE FROM encryption_monitor WHERE account_id = ?")
            .bind(account_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}
