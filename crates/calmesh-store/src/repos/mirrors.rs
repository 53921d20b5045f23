//! Mirror repository

use sqlx::SqlitePool;

use calmesh_types::{AccountId, CanonicalEventId, Mirror, MirrorState, Result, UserId};

use crate::db_err;
use crate::models::MirrorRow;

/// Per-user mirror totals for sync health
#[derive(Debug, Clone, Copy, Default)]
pub struct MirrorCounts {
    pub total: i64,
    pub pending: i64,
    pub error: i64,
}

pub struct MirrorRepo {
    pool: SqlitePool,
}

impl MirrorRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn upsert(&self, mirror: &Mirror) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO event_mirrors
                (canonical_event_id, target_account_id, target_calendar_id,
                 provider_event_id, last_projected_hash, last_write_ts, state, error_message)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(canonical_event_id, target_account_id) DO UPDATE SET
                target_calendar_id = excluded.target_calendar_id,
                last_projected_hash = excluded.last_projected_hash,
                state = excluded.state,
                error_message = excluded.error_message
            "#,
        )
        .bind(mirror.canonical_event_id.to_string())
        .bind(mirror.target_account_id.to_string())
        .bind(&mirror.target_calendar_id)
        .bind(&mirror.provider_event_id)
        .bind(&mirror.last_projected_hash)
        .bind(mirror.last_write_ts)
        .bind(mirror.state.as_str())
        .bind(&mirror.error_message)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn get(
        &self,
        canonical_event_id: CanonicalEventId,
        target_account_id: AccountId,
    ) -> Result<Option<Mirror>> {
        let row = sqlx::query_as::<_, MirrorRow>(
            "SELECT * FROM event_mirrors WHERE canonical_event_id = ? AND target_account_id = ?",
        )
        .bind(canonical_event_id.to_string())
        .bind(target_account_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.map(Mirror::try_from).transpose()
    }

    /// Partial state update; `provider_event_id` and `error_message` are
    /// only touched when given.
    pub async fn update_state(
        &self,
        canonical_event_id: CanonicalEventId,
        target_account_id: AccountId,
        state: MirrorState,
        provider_event_id: Option<&str>,
        error_message: Option<&str>,
        last_write_ts: Option<i64>,
    ) -> Result<()> {
        let mut sql = String::from("UPDATE event_mirrors SET state = ?");
        if provider_event_id.is_some() {
            sql.push_str(", provider_event_id = ?");
        }
        if error_message.is_some() {
            sql.push_str(", error_message = ?");
        } else {
            sql.push_str(", error_message = NULL");
        }
        if last_write_ts.is_some() {
            sql.push_str(", last_write_ts = ?");
        }
        sql.push_str(" WHERE canonical_event_id = ? AND target_account_id = ?");

        let mut query = sqlx::query(&sql).bind(state.as_str());
        if let Some(pid) = provider_event_id {
            query = query.bind(pid.to_string());
        }
        if let Some(err) = error_message {
            query = query.bind(err.to_string());
        }
        if let Some(ts) = last_write_ts {
            query = query.bind(ts);
        }
        query
            .bind(canonical_event_id.to_string())
            .bind(target_account_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Cache the resolved overlay calendar id after sentinel resolution
    pub async fn set_target_calendar(
        &self,
        canonical_event_id: CanonicalEventId,
        target_account_id: AccountId,
        target_calendar_id: &str,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE event_mirrors SET target_calendar_id = ? WHERE canonical_event_id = ? AND target_account_id = ?",
        )
        .bind(target_calendar_id)
        .bind(canonical_event_id.to_string())
        .bind(target_account_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn list_by_canonical(
        &self,
        canonical_event_id: CanonicalEventId,
    ) -> Result<Vec<Mirror>> {
        let rows = sqlx::query_as::<_, MirrorRow>(
            "SELECT * FROM event_mirrors WHERE canonical_event_id = ? ORDER BY target_account_id",
        )
        .bind(canonical_event_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.into_iter().map(Mirror::try_from).collect()
    }

    /// Live (non-tombstoned) mirrors of one canonical event
    pub async fn live_by_canonical(
        &self,
        canonical_event_id: CanonicalEventId,
    ) -> Result<Vec<Mirror>> {
        let rows = sqlx::query_as::<_, MirrorRow>(
            r#"
            SELECT * FROM event_mirrors
            WHERE canonical_event_id = ? AND state != 'TOMBSTONED'
            ORDER BY target_account_id
            "#,
        )
        .bind(canonical_event_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.into_iter().map(Mirror::try_from).collect()
    }

    pub async fn active_by_target(&self, target_account_id: AccountId) -> Result<Vec<Mirror>> {
        let rows = sqlx::query_as::<_, MirrorRow>(
            "SELECT * FROM event_mirrors WHERE target_account_id = ? AND state = 'ACTIVE' ORDER BY canonical_event_id",
        )
        .bind(target_account_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.into_iter().map(Mirror::try_from).collect()
    }

    pub async fn delete_by_target(&self, target_account_id: AccountId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM event_mirrors WHERE target_account_id = ?")
            .bind(target_account_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected())
    }

    /// Delete mirror rows of all canonical events originating from an
    /// account. Used by the unlink cascade.
    pub async fn delete_by_origin_account(&self, origin_account_id: AccountId) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM event_mirrors WHERE canonical_event_id IN (
                SELECT canonical_event_id FROM canonical_events WHERE origin_account_id = ?
            )
            "#,
        )
        .bind(origin_account_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected())
    }

    pub async fn counts(&self, user_id: UserId) -> Result<MirrorCounts> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT m.state, COUNT(*) FROM event_mirrors m
            JOIN canonical_events e ON e.canonical_event_id = m.canonical_event_id
            WHERE e.user_id = ?
            GROUP BY m.state
            "#,
        )
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut counts = MirrorCounts::default();
        for (state, n) in rows {
            counts.total += n;
            match state.as_str() {
                "PENDING" => counts.pending = n,
                "ERROR" => counts.error = n,
                _ => {}
            }
        }
        Ok(counts)
    }
}
