//! Scheduling history repository

use sqlx::SqlitePool;

use calmesh_types::{ParticipantStats, Result, SchedulingHistoryEntry, UserId};

use crate::db_err;
use crate::models::ParticipantStatsRow;

pub struct HistoryRepo {
    pool: SqlitePool,
}

impl HistoryRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, user_id: UserId, entry: &SchedulingHistoryEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO scheduling_history (session_id, user_id, participant_hash, got_preferred, scheduled_ts)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(session_id, participant_hash) DO UPDATE SET
                got_preferred = excluded.got_preferred,
                scheduled_ts = excluded.scheduled_ts
            "#,
        )
        .bind(entry.session_id.to_string())
        .bind(user_id.to_string())
        .bind(&entry.participant_hash)
        .bind(entry.got_preferred)
        .bind(entry.scheduled_ts)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    /// Aggregated stats per participant hash, for fairness scoring
    pub async fn stats_for(
        &self,
        user_id: UserId,
        participant_hashes: &[String],
    ) -> Result<Vec<ParticipantStats>> {
        if participant_hashes.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; participant_hashes.len()].join(", ");
        let sql = format!(
            r#"
            SELECT participant_hash,
                   COUNT(*) AS sessions_participated,
                   CAST(COALESCE(SUM(got_preferred), 0) AS INTEGER) AS sessions_preferred,
                   CAST(MAX(scheduled_ts) AS INTEGER) AS last_session_ts
            FROM scheduling_history
            WHERE user_id = ? AND participant_hash IN ({placeholders})
            GROUP BY participant_hash
            ORDER BY participant_hash
            "#
        );
        let mut query = sqlx::query_as::<_, ParticipantStatsRow>(&sql).bind(user_id.to_string());
        for hash in participant_hashes {
            query = query.bind(hash);
        }
        let rows = query.fetch_all(&self.pool).await.map_err(db_err)?;
        Ok(rows.into_iter().map(ParticipantStats::from).collect())
    }
}
