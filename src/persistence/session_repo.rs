//! Session repository for `SQLite` persistence.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::models::session::{Session, SessionStatus};
use crate::{AppError, Result};

use super::db::Database;
use super::{parse_ts, ts};

/// Repository wrapper around `SQLite` for session records.
#[derive(Clone)]
pub struct SessionRepo {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct SessionRow {
    id: String,
    project_id: String,
    agent_id: String,
    status: String,
    total_turns: i64,
    created_at: String,
    updated_at: String,
}

impl SessionRow {
    fn into_session(self) -> Result<Session> {
        Ok(Session {
            status: SessionStatus::parse(&self.status)
                .map_err(|e| AppError::Db(format!("invalid session status: {e}")))?,
            total_turns: u32::try_from(self.total_turns)
                .map_err(|e| AppError::Db(format!("invalid total_turns: {e}")))?,
            created_at: parse_ts("created_at", &self.created_at)?,
            updated_at: parse_ts("updated_at", &self.updated_at)?,
            id: self.id,
            project_id: self.project_id,
            agent_id: self.agent_id,
        })
    }
}

impl SessionRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a new session record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the database insert fails.
    pub async fn create(&self, session: &Session) -> Result<Session> {
        sqlx::query(
            "INSERT INTO session (id, project_id, agent_id, status, total_turns, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(&session.id)
        .bind(&session.project_id)
        .bind(&session.agent_id)
        .bind(session.status.as_str())
        .bind(i64::from(session.total_turns))
        .bind(ts(session.created_at))
        .bind(ts(session.updated_at))
        .execute(self.db.as_ref())
        .await?;

        Ok(session.clone())
    }

    /// Retrieve a session by identifier.
    ///
    /// Returns `Ok(None)` if the session does not exist.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_by_id(&self, id: &str) -> Result<Option<Session>> {
        let row: Option<SessionRow> = sqlx::query_as("SELECT * FROM session WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.db.as_ref())
            .await?;

        row.map(SessionRow::into_session).transpose()
    }

    /// Move a running session to a terminal status.
    ///
    /// The guard on `status = 'running'` makes the transition a single
    /// conditional write; a session already terminal is left untouched.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the session does not exist, or
    /// `AppError::Db` if the transition is invalid or persistence fails.
    pub async fn update_status(&self, id: &str, status: SessionStatus) -> Result<Session> {
        if !status.is_terminal() {
            return Err(AppError::Db("invalid session status transition".into()));
        }

        let result = sqlx::query(
            "UPDATE session SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = 'running'",
        )
        .bind(status.as_str())
        .bind(ts(Utc::now()))
        .bind(id)
        .execute(self.db.as_ref())
        .await?;

        let session = self
            .get_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("session {id} not found")))?;

        if result.rows_affected() == 0 {
            return Err(AppError::Db(format!(
                "invalid session status transition: {} -> {}",
                session.status.as_str(),
                status.as_str()
            )));
        }

        Ok(session)
    }

    /// Record the latest completed turn count for a running session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn record_turns(&self, id: &str, total_turns: u32) -> Result<()> {
        sqlx::query(
            "UPDATE session SET total_turns = ?1, updated_at = ?2 \
             WHERE id = ?3 AND total_turns < ?1",
        )
        .bind(i64::from(total_turns))
        .bind(ts(Utc::now()))
        .bind(id)
        .execute(self.db.as_ref())
        .await?;

        Ok(())
    }

    /// List sessions currently in `status`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_by_status(&self, status: SessionStatus) -> Result<Vec<Session>> {
        let rows: Vec<SessionRow> =
            sqlx::query_as("SELECT * FROM session WHERE status = ?1 ORDER BY created_at")
                .bind(status.as_str())
                .fetch_all(self.db.as_ref())
                .await?;

        rows.into_iter().map(SessionRow::into_session).collect()
    }

    /// Delete a session row.
    ///
    /// Returns whether a row was removed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the delete fails.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM session WHERE id = ?1")
            .bind(id)
            .execute(self.db.as_ref())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete terminal sessions last updated before `cutoff`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the delete fails.
    pub async fn purge_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result =
            sqlx::query("DELETE FROM session WHERE status != 'running' AND updated_at < ?1")
                .bind(ts(cutoff))
                .execute(self.db.as_ref())
                .await?;

        Ok(result.rows_affected())
    }
}
