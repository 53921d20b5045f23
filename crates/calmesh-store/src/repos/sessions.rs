//! Scheduling session, candidate, and hold repository

use sqlx::SqlitePool;

use calmesh_types::{
    Candidate, CandidateId, CandidateStatus, CanonicalEventId, Hold, HoldId, HoldStatus, Result,
    SchedulingSession, SessionId, SessionStatus, UserId,
};

use crate::db_err;
use crate::models::{CandidateRow, HoldRow, SessionRow};

pub struct SessionRepo {
    pool: SqlitePool,
}

impl SessionRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, session: &SchedulingSession) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO scheduling_sessions
                (session_id, user_id, status, objective_json, created_at,
                 committed_candidate_id, committed_event_id)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(session.session_id.to_string())
        .bind(session.user_id.to_string())
        .bind(session.status.as_str())
        .bind(serde_json::to_string(&session.objective)?)
        .bind(session.created_at)
        .bind(session.committed_candidate_id.map(|c| c.to_string()))
        .bind(session.committed_event_id.map(|e| e.to_string()))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn get(&self, session_id: SessionId) -> Result<Option<SchedulingSession>> {
        let row = sqlx::query_as::<_, SessionRow>(
            "SELECT * FROM scheduling_sessions WHERE session_id = ?",
        )
        .bind(session_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.map(SchedulingSession::try_from).transpose()
    }

    pub async fn list(
        &self,
        user_id: UserId,
        status: Option<SessionStatus>,
        limit: i64,
    ) -> Result<Vec<SchedulingSession>> {
        let rows = if let Some(status) = status {
            sqlx::query_as::<_, SessionRow>(
                r#"
                SELECT * FROM scheduling_sessions
                WHERE user_id = ? AND status = ?
                ORDER BY created_at DESC, session_id DESC LIMIT ?
                "#,
            )
            .bind(user_id.to_string())
            .bind(status.as_str())
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?
        } else {
            sqlx::query_as::<_, SessionRow>(
                r#"
                SELECT * FROM scheduling_sessions
                WHERE user_id = ?
                ORDER BY created_at DESC, session_id DESC LIMIT ?
                "#,
            )
            .bind(user_id.to_string())
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?
        };
        rows.into_iter().map(SchedulingSession::try_from).collect()
    }

    pub async fn update_status(&self, session_id: SessionId, status: SessionStatus) -> Result<()> {
        sqlx::query("UPDATE scheduling_sessions SET status = ? WHERE session_id = ?")
            .bind(status.as_str())
            .bind(session_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    pub async fn mark_committed(
        &self,
        session_id: SessionId,
        candidate_id: CandidateId,
        event_id: CanonicalEventId,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE scheduling_sessions
            SET status = 'committed', committed_candidate_id = ?, committed_event_id = ?
            WHERE session_id = ?
            "#,
        )
        .bind(candidate_id.to_string())
        .bind(event_id.to_string())
        .bind(session_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    // Candidates

    pub async fn insert_candidate(&self, candidate: &Candidate) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO session_candidates
                (candidate_id, session_id, start_ts, end_ts, score, explanation, status)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(candidate.candidate_id.to_string())
        .bind(candidate.session_id.to_string())
        .bind(candidate.start)
        .bind(candidate.end)
        .bind(candidate.score)
        .bind(&candidate.explanation)
        .bind(candidate.status.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn get_candidate(&self, candidate_id: CandidateId) -> Result<Option<Candidate>> {
        let row = sqlx::query_as::<_, CandidateRow>(
            "SELECT * FROM session_candidates WHERE candidate_id = ?",
        )
        .bind(candidate_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.map(Candidate::try_from).transpose()
    }

    pub async fn candidates_by_session(&self, session_id: SessionId) -> Result<Vec<Candidate>> {
        let rows = sqlx::query_as::<_, CandidateRow>(
            "SELECT * FROM session_candidates WHERE session_id = ? ORDER BY score DESC, candidate_id",
        )
        .bind(session_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.into_iter().map(Candidate::try_from).collect()
    }

    pub async fn set_candidate_status(
        &self,
        candidate_id: CandidateId,
        status: CandidateStatus,
    ) -> Result<()> {
        sqlx::query("UPDATE session_candidates SET status = ? WHERE candidate_id = ?")
            .bind(status.as_str())
            .bind(candidate_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    // Holds

    pub async fn insert_hold(&self, hold: &Hold) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO session_holds
                (hold_id, session_id, account_id, provider_event_id, expires_at, status)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(hold.hold_id.to_string())
        .bind(hold.session_id.to_string())
        .bind(hold.account_id.to_string())
        .bind(&hold.provider_event_id)
        .bind(hold.expires_at)
        .bind(hold.status.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn get_hold(&self, hold_id: HoldId) -> Result<Option<Hold>> {
        let row = sqlx::query_as::<_, HoldRow>("SELECT * FROM session_holds WHERE hold_id = ?")
            .bind(hold_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(Hold::try_from).transpose()
    }

    pub async fn holds_by_session(&self, session_id: SessionId) -> Result<Vec<Hold>> {
        let rows = sqlx::query_as::<_, HoldRow>(
            "SELECT * FROM session_holds WHERE session_id = ? ORDER BY hold_id",
        )
        .bind(session_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.into_iter().map(Hold::try_from).collect()
    }

    /// `held` rows whose expiry has passed, scoped to a user's sessions
    pub async fn expired_holds(&self, user_id: UserId, now: i64) -> Result<Vec<Hold>> {
        let rows = sqlx::query_as::<_, HoldRow>(
            r#"
            SELECT h.* FROM session_holds h
            JOIN scheduling_sessions s ON s.session_id = h.session_id
            WHERE s.user_id = ? AND h.status = 'held' AND h.expires_at <= ?
            ORDER BY h.hold_id
            "#,
        )
        .bind(user_id.to_string())
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.into_iter().map(Hold::try_from).collect()
    }

    pub async fn set_hold_status(&self, hold_id: HoldId, status: HoldStatus) -> Result<()> {
        sqlx::query("UPDATE session_holds SET status = ? WHERE hold_id = ?")
            .bind(status.as_str())
            .bind(hold_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}
