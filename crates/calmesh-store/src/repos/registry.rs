//! Account registry repository
//!
//! The registry maps accounts to users and providers. It is read-mostly;
//! writes happen only during onboarding and unlink, and readers tolerate
//! stale data.

use sqlx::SqlitePool;

use calmesh_types::{AccountId, AccountRecord, AccountStatus, Result, UserId};

use crate::db_err;
use crate::models::AccountRow;

pub struct RegistryRepo {
    pool: SqlitePool,
}

impl RegistryRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, account: &AccountRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO accounts (account_id, user_id, provider, provider_subject, email, status, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(account_id) DO UPDATE SET
                user_id = excluded.user_id,
                provider = excluded.provider,
                provider_subject = excluded.provider_subject,
                email = excluded.email,
                status = excluded.status
            "#,
        )
        .bind(account.account_id.to_string())
        .bind(account.user_id.to_string())
        .bind(account.provider.as_str())
        .bind(&account.provider_subject)
        .bind(&account.email)
        .bind(account.status.as_str())
        .bind(account.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn get(&self, account_id: AccountId) -> Result<Option<AccountRecord>> {
        let row = sqlx::query_as::<_, AccountRow>("SELECT * FROM accounts WHERE account_id = ?")
            .bind(account_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(AccountRecord::try_from).transpose()
    }

    pub async fn list_by_user(&self, user_id: UserId) -> Result<Vec<AccountRecord>> {
        let rows = sqlx::query_as::<_, AccountRow>(
            "SELECT * FROM accounts WHERE user_id = ? ORDER BY account_id",
        )
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.into_iter().map(AccountRecord::try_from).collect()
    }

    pub async fn list_active(&self) -> Result<Vec<AccountRecord>> {
        let rows = sqlx::query_as::<_, AccountRow>(
            "SELECT * FROM accounts WHERE status = 'active' ORDER BY account_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.into_iter().map(AccountRecord::try_from).collect()
    }

    pub async fn update_status(&self, account_id: AccountId, status: AccountStatus) -> Result<()> {
        sqlx::query("UPDATE accounts SET status = ? WHERE account_id = ?")
            .bind(status.as_str())
            .bind(account_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    pub async fn delete(&self, account_id: AccountId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM accounts WHERE account_id = ?")
            .bind(account_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected())
    }
}
