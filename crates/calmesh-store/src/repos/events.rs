//! Canonical event repository
//!
//! Version bumps and the provider-origin uniqueness invariant are enforced
//! here; write serialisation comes from the owning UserGraphActor.

use sqlx::SqlitePool;

use calmesh_types::{AccountId, CanonicalEvent, CanonicalEventId, Interval, Result, UserId};

use crate::db_err;
use crate::models::CanonicalEventRow;

/// One page of a cursor-paginated event listing
#[derive(Debug, Clone)]
pub struct EventListPage {
    pub events: Vec<CanonicalEvent>,
    /// Pass back to continue after the last row; `None` when exhausted
    pub next_cursor: Option<String>,
}

pub struct EventRepo {
    pool: SqlitePool,
}

impl EventRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn upsert(&self, event: &CanonicalEvent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO canonical_events
                (canonical_event_id, user_id, origin_account_id, origin_event_id,
                 title, description, location, start_ts, end_ts, all_day,
                 status, visibility, transparency, recurrence_rule, source,
                 version, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(canonical_event_id) DO UPDATE SET
                title = excluded.title,
                description = excluded.description,
                location = excluded.location,
                start_ts = excluded.start_ts,
                end_ts = excluded.end_ts,
                all_day = excluded.all_day,
                status = excluded.status,
                visibility = excluded.visibility,
                transparency = excluded.transparency,
                recurrence_rule = excluded.recurrence_rule,
                version = excluded.version,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(event.canonical_event_id.to_string())
        .bind(event.user_id.to_string())
        .bind(event.origin_account_id.to_string())
        .bind(&event.origin_event_id)
        .bind(&event.title)
        .bind(&event.description)
        .bind(&event.location)
        .bind(event.start)
        .bind(event.end)
        .bind(event.all_day)
        .bind(event.status.as_str())
        .bind(&event.visibility)
        .bind(event.transparency.as_str())
        .bind(&event.recurrence_rule)
        .bind(event.source.as_str())
        .bind(event.version)
        .bind(event.created_at)
        .bind(event.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn get(&self, id: CanonicalEventId) -> Result<Option<CanonicalEvent>> {
        let row = sqlx::query_as::<_, CanonicalEventRow>(
            "SELECT * FROM canonical_events WHERE canonical_event_id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.map(CanonicalEvent::try_from).transpose()
    }

    pub async fn find_by_origin(
        &self,
        origin_account_id: AccountId,
        origin_event_id: &str,
    ) -> Result<Option<CanonicalEvent>> {
        let row = sqlx::query_as::<_, CanonicalEventRow>(
            r#"
            SELECT * FROM canonical_events
            WHERE origin_account_id = ? AND origin_event_id = ? AND source = 'provider'
            "#,
        )
        .bind(origin_account_id.to_string())
        .bind(origin_event_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.map(CanonicalEvent::try_from).transpose()
    }

    /// Cursor-paginated listing ordered by `start` ascending with a stable
    /// id tie-break. The cursor is `"<start_ts>|<canonical_event_id>"`.
    pub async fn list(
        &self,
        user_id: UserId,
        time_min: Option<i64>,
        time_max: Option<i64>,
        origin_account_id: Option<AccountId>,
        limit: i64,
        cursor: Option<&str>,
    ) -> Result<EventListPage> {
        let mut sql = String::from("SELECT * FROM canonical_events WHERE user_id = ?");
        if time_min.is_some() {
            sql.push_str(" AND end_ts > ?");
        }
        if time_max.is_some() {
            sql.push_str(" AND start_ts < ?");
        }
        if origin_account_id.is_some() {
            sql.push_str(" AND origin_account_id = ?");
        }
        if cursor.is_some() {
            sql.push_str(
                " AND (start_ts > ? OR (start_ts = ? AND canonical_event_id > ?))",
            );
        }
        sql.push_str(" ORDER BY start_ts, canonical_event_id LIMIT ?");

        let (cursor_ts, cursor_id) = match cursor {
            Some(c) => {
                let (ts, id) = c.split_once('|').ok_or_else(|| {
                    calmesh_types::CalError::validation(format!("malformed cursor {c:?}"))
                })?;
                let ts: i64 = ts.parse().map_err(|_| {
                    calmesh_types::CalError::validation(format!("malformed cursor {c:?}"))
                })?;
                (Some(ts), Some(id.to_string()))
            }
            None => (None, None),
        };

        let mut query = sqlx::query_as::<_, CanonicalEventRow>(&sql).bind(user_id.to_string());
        if let Some(min) = time_min {
            query = query.bind(min);
        }
        if let Some(max) = time_max {
            query = query.bind(max);
        }
        if let Some(acc) = origin_account_id {
            query = query.bind(acc.to_string());
        }
        if let (Some(ts), Some(id)) = (cursor_ts, cursor_id) {
            query = query.bind(ts).bind(ts).bind(id);
        }
        let rows = query
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        let events: Vec<CanonicalEvent> = rows
            .into_iter()
            .map(CanonicalEvent::try_from)
            .collect::<Result<_>>()?;
        let next_cursor = if events.len() as i64 == limit {
            events
                .last()
                .map(|e| format!("{}|{}", e.start, e.canonical_event_id))
        } else {
            None
        };
        Ok(EventListPage {
            events,
            next_cursor,
        })
    }

    /// Every event originating from an account, for edge re-projection
    pub async fn list_by_origin_account(
        &self,
        origin_account_id: AccountId,
    ) -> Result<Vec<CanonicalEvent>> {
        let rows = sqlx::query_as::<_, CanonicalEventRow>(
            "SELECT * FROM canonical_events WHERE origin_account_id = ? ORDER BY canonical_event_id",
        )
        .bind(origin_account_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.into_iter().map(CanonicalEvent::try_from).collect()
    }

    /// Busy intervals for availability: opaque, non-cancelled events on the
    /// listed accounts overlapping `[start, end)`.
    pub async fn busy_intervals(
        &self,
        user_id: UserId,
        accounts: &[AccountId],
        start: i64,
        end: i64,
    ) -> Result<Vec<Interval>> {
        if accounts.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; accounts.len()].join(", ");
        let sql = format!(
            r#"
            SELECT start_ts, end_ts FROM canonical_events
            WHERE user_id = ?
              AND origin_account_id IN ({placeholders})
              AND transparency = 'opaque'
              AND status != 'cancelled'
              AND start_ts < ? AND end_ts > ?
            ORDER BY start_ts
            "#
        );
        let mut query = sqlx::query_as::<_, (i64, i64)>(&sql).bind(user_id.to_string());
        for account in accounts {
            query = query.bind(account.to_string());
        }
        let rows = query
            .bind(end)
            .bind(start)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(rows
            .into_iter()
            .map(|(s, e)| Interval::new(s, e))
            .collect())
    }

    pub async fn delete_by_origin_account(&self, origin_account_id: AccountId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM canonical_events WHERE origin_account_id = ?")
            .bind(origin_account_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected())
    }

    pub async fn count(&self, user_id: UserId) -> Result<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM canonical_events WHERE user_id = ?")
                .bind(user_id.to_string())
                .fetch_one(&self.pool)
                .await
                .map_err(db_err)?;
        Ok(count)
    }
}
