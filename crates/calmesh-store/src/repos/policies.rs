//! Policy graph repository

use sqlx::SqlitePool;

use calmesh_types::{AccountId, Policy, PolicyEdge, PolicyId, Result, UserId};

use crate::db_err;
use crate::models::{PolicyEdgeRow, PolicyRow};

pub struct PolicyRepo {
    pool: SqlitePool,
}

impl PolicyRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, policy: &Policy) -> Result<()> {
        sqlx::query(
            "INSERT INTO policies (policy_id, user_id, name, is_default, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(policy.policy_id.to_string())
        .bind(policy.user_id.to_string())
        .bind(&policy.name)
        .bind(policy.is_default)
        .bind(policy.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn get(&self, policy_id: PolicyId) -> Result<Option<Policy>> {
        let row = sqlx::query_as::<_, PolicyRow>("SELECT * FROM policies WHERE policy_id = ?")
            .bind(policy_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(Policy::try_from).transpose()
    }

    /// The single active policy for a user (the most recently created)
    pub async fn active_for_user(&self, user_id: UserId) -> Result<Option<Policy>> {
        let row = sqlx::query_as::<_, PolicyRow>(
            "SELECT * FROM policies WHERE user_id = ? ORDER BY created_at DESC, policy_id DESC LIMIT 1",
        )
        .bind(user_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.map(Policy::try_from).transpose()
    }

    /// Atomically replace the edge set of a policy
    pub async fn replace_edges(&self, policy_id: PolicyId, edges: &[PolicyEdge]) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        sqlx::query("DELETE FROM policy_edges WHERE policy_id = ?")
            .bind(policy_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        for edge in edges {
            sqlx::query(
                r#"
                INSERT INTO policy_edges (policy_id, from_account_id, to_account_id, detail_level, calendar_kind)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(policy_id.to_string())
            .bind(edge.from_account_id.to_string())
            .bind(edge.to_account_id.to_string())
            .bind(edge.detail_level.as_str())
            .bind(edge.calendar_kind.as_str())
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    pub async fn edges(&self, policy_id: PolicyId) -> Result<Vec<PolicyEdge>> {
        let rows = sqlx::query_as::<_, PolicyEdgeRow>(
            r#"
            SELECT from_account_id, to_account_id, detail_level, calendar_kind
            FROM policy_edges WHERE policy_id = ?
            ORDER BY from_account_id, to_account_id
            "#,
        )
        .bind(policy_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.into_iter().map(PolicyEdge::try_from).collect()
    }

    pub async fn edges_from(
        &self,
        policy_id: PolicyId,
        from_account_id: AccountId,
    ) -> Result<Vec<PolicyEdge>> {
        let rows = sqlx::query_as::<_, PolicyEdgeRow>(
            r#"
            SELECT from_account_id, to_account_id, detail_level, calendar_kind
            FROM policy_edges WHERE policy_id = ? AND from_account_id = ?
            ORDER BY to_account_id
            "#,
        )
        .bind(policy_id.to_string())
        .bind(from_account_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.into_iter().map(PolicyEdge::try_from).collect()
    }

    /// Remove every edge that references an account, in any policy of the
    /// user. Used by the unlink cascade.
    pub async fn remove_edges_referencing(
        &self,
        user_id: UserId,
        account_id: AccountId,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM policy_edges
            WHERE (from_account_id = ? OR to_account_id = ?)
              AND policy_id IN (SELECT policy_id FROM policies WHERE user_id = ?)
            "#,
        )
        .bind(account_id.to_string())
        .bind(account_id.to_string())
        .bind(user_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected())
    }
}
