//! Event journal repository
//!
//! Append-only; rows are never updated or deleted. ULID journal ids are
//! lexicographically time-ordered, which gives cursor pagination for free.

use sqlx::SqlitePool;

use calmesh_types::{CanonicalEventId, JournalEntry, Result, UserId};

use crate::db_err;
use crate::models::JournalRow;

pub struct JournalRepo {
    pool: SqlitePool,
}

impl JournalRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn append(&self, entry: &JournalEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO event_journal
                (journal_id, user_id, canonical_event_id, ts, actor, change_type, patch_json, reason)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.journal_id.to_string())
        .bind(entry.user_id.to_string())
        .bind(entry.canonical_event_id.map(|id| id.to_string()))
        .bind(entry.ts)
        .bind(&entry.actor)
        .bind(&entry.change_type)
        .bind(
            entry
                .patch
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
        )
        .bind(&entry.reason)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    /// Cursor-paginated query, oldest first. The cursor is the last
    /// journal id seen.
    pub async fn query(
        &self,
        user_id: UserId,
        canonical_event_id: Option<CanonicalEventId>,
        limit: i64,
        cursor: Option<&str>,
    ) -> Result<Vec<JournalEntry>> {
        let mut sql = String::from("SELECT * FROM event_journal WHERE user_id = ?");
        if canonical_event_id.is_some() {
            sql.push_str(" AND canonical_event_id = ?");
        }
        if cursor.is_some() {
            sql.push_str(" AND journal_id > ?");
        }
        sql.push_str(" ORDER BY journal_id LIMIT ?");

        let mut query = sqlx::query_as::<_, JournalRow>(&sql).bind(user_id.to_string());
        if let Some(id) = canonical_event_id {
            query = query.bind(id.to_string());
        }
        if let Some(c) = cursor {
            query = query.bind(c.to_string());
        }
        let rows = query
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.into_iter().map(JournalEntry::try_from).collect()
    }

    pub async fn count(&self, user_id: UserId) -> Result<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM event_journal WHERE user_id = ?")
                .bind(user_id.to_string())
                .fetch_one(&self.pool)
                .await
                .map_err(db_err)?;
        Ok(count)
    }

    pub async fn last_ts(&self, user_id: UserId) -> Result<Option<i64>> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT ts FROM event_journal WHERE user_id = ? ORDER BY journal_id DESC LIMIT 1")
                .bind(user_id.to_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;
        Ok(row.map(|(ts,)| ts))
    }
}
