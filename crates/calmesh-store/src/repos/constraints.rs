//! Constraint and VIP policy repository

use sqlx::SqlitePool;

use calmesh_types::{Constraint, ConstraintId, Result, UserId, VipId, VipPolicy};

use crate::db_err;
use crate::models::{ConstraintRow, VipRow};

pub struct ConstraintRepo {
    pool: SqlitePool,
}

impl ConstraintRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, constraint: &Constraint) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO constraints (constraint_id, user_id, kind, config_json, active_from, active_to)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(constraint.constraint_id.to_string())
        .bind(constraint.user_id.to_string())
        .bind(constraint.kind.as_str())
        .bind(serde_json::to_string(&constraint.config)?)
        .bind(constraint.active_from)
        .bind(constraint.active_to)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn list(&self, user_id: UserId, active_at: Option<i64>) -> Result<Vec<Constraint>> {
        let rows = sqlx::query_as::<_, ConstraintRow>(
            "SELECT * FROM constraints WHERE user_id = ? ORDER BY constraint_id",
        )
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        let constraints: Vec<Constraint> = rows
            .into_iter()
            .map(Constraint::try_from)
            .collect::<Result<_>>()?;
        Ok(match active_at {
            Some(ts) => constraints
                .into_iter()
                .filter(|c| c.active_at(ts))
                .collect(),
            None => constraints,
        })
    }

    pub async fn delete(&self, constraint_id: ConstraintId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM constraints WHERE constraint_id = ?")
            .bind(constraint_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    // VIP policies

    pub async fn insert_vip(&self, vip: &VipPolicy) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO vip_policies (vip_id, user_id, participant_hash, display_name, priority_weight, conditions_json)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(vip.vip_id.to_string())
        .bind(vip.user_id.to_string())
        .bind(&vip.participant_hash)
        .bind(&vip.display_name)
        .bind(vip.priority_weight)
        .bind(serde_json::to_string(&vip.conditions)?)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn list_vips(&self, user_id: UserId) -> Result<Vec<VipPolicy>> {
        let rows = sqlx::query_as::<_, VipRow>(
            "SELECT * FROM vip_policies WHERE user_id = ? ORDER BY vip_id",
        )
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.into_iter().map(VipPolicy::try_from).collect()
    }

    pub async fn delete_vip(&self, vip_id: VipId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM vip_policies WHERE vip_id = ?")
            .bind(vip_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }
}
