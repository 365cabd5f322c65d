//! Repository lock table access.
//!
//! Row layout: `repo (PK) | execution_id | schedule_id | action_type |
//! locked_at | expires_at`. Acquisition is one `INSERT .. ON CONFLICT DO
//! UPDATE .. WHERE` statement so that two racing executions can never
//! both observe "free" and both write.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::models::lock::{LockOutcome, LockRequest, RepoLock};
use crate::{AppError, Result};

use super::db::Database;
use super::{parse_ts, ts};

/// Repository wrapper around `SQLite` for lock rows.
#[derive(Clone)]
pub struct RepoLockRepo {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct RepoLockRow {
    repo: String,
    execution_id: String,
    schedule_id: String,
    action_type: String,
    locked_at: String,
    expires_at: String,
}

impl RepoLockRow {
    fn into_lock(self) -> Result<RepoLock> {
        Ok(RepoLock {
            locked_at: parse_ts("locked_at", &self.locked_at)?,
            expires_at: parse_ts("expires_at", &self.expires_at)?,
            repo: self.repo,
            execution_id: self.execution_id,
            schedule_id: self.schedule_id,
            action_type: self.action_type,
        })
    }
}

fn ttl_to_chrono(ttl: std::time::Duration) -> Result<chrono::Duration> {
    chrono::Duration::from_std(ttl).map_err(|e| AppError::Lock(format!("invalid ttl: {e}")))
}

impl RepoLockRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert the lock, or take over the existing row if it has expired
    /// or already belongs to the same execution, as of `now`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Lock` for an unrepresentable TTL or
    /// `AppError::Db` if the statement fails. Denial is not an error.
    pub async fn try_acquire_at(
        &self,
        request: &LockRequest,
        now: DateTime<Utc>,
    ) -> Result<LockOutcome> {
        let expires_at = now + ttl_to_chrono(request.ttl)?;
        let now_s = ts(now);

        let result = sqlx::query(
            "INSERT INTO repo_lock (repo, execution_id, schedule_id, action_type, locked_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(repo) DO UPDATE SET
               execution_id = excluded.execution_id,
               schedule_id = excluded.schedule_id,
               action_type = excluded.action_type,
               locked_at = excluded.locked_at,
               expires_at = excluded.expires_at
             WHERE repo_lock.expires_at <= ?5
                OR repo_lock.execution_id = excluded.execution_id",
        )
        .bind(&request.repo)
        .bind(&request.execution_id)
        .bind(&request.schedule_id)
        .bind(&request.action_type)
        .bind(&now_s)
        .bind(ts(expires_at))
        .execute(self.db.as_ref())
        .await?;

        if result.rows_affected() == 1 {
            return Ok(LockOutcome::Granted(RepoLock {
                repo: request.repo.clone(),
                execution_id: request.execution_id.clone(),
                schedule_id: request.schedule_id.clone(),
                action_type: request.action_type.clone(),
                locked_at: now,
                expires_at,
            }));
        }

        let holder = self.get(&request.repo).await?;
        Ok(LockOutcome::Denied { holder })
    }

    /// Push `expires_at` to `now + ttl` while `execution_id` still holds
    /// an unexpired lock. Returns whether the lock was extended.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Lock` for an unrepresentable TTL or
    /// `AppError::Db` if the update fails.
    pub async fn extend_at(
        &self,
        repo: &str,
        execution_id: &str,
        ttl: std::time::Duration,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let expires_at = now + ttl_to_chrono(ttl)?;
        let result = sqlx::query(
            "UPDATE repo_lock SET expires_at = ?1 \
             WHERE repo = ?2 AND execution_id = ?3 AND expires_at > ?4",
        )
        .bind(ts(expires_at))
        .bind(repo)
        .bind(execution_id)
        .bind(ts(now))
        .execute(self.db.as_ref())
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Delete the lock on `repo` if `execution_id` holds it.
    ///
    /// Returns whether a row was removed; releasing someone else's lock
    /// is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the delete fails.
    pub async fn release(&self, repo: &str, execution_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM repo_lock WHERE repo = ?1 AND execution_id = ?2")
            .bind(repo)
            .bind(execution_id)
            .execute(self.db.as_ref())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Read the lock row for `repo`, expired or not.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get(&self, repo: &str) -> Result<Option<RepoLock>> {
        let row: Option<RepoLockRow> = sqlx::query_as("SELECT * FROM repo_lock WHERE repo = ?1")
            .bind(repo)
            .fetch_optional(self.db.as_ref())
            .await?;

        row.map(RepoLockRow::into_lock).transpose()
    }

    /// Delete every lock that expired at or before `now`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the delete fails.
    pub async fn purge_expired_at(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM repo_lock WHERE expires_at <= ?1")
            .bind(ts(now))
            .execute(self.db.as_ref())
            .await?;

        Ok(result.rows_affected())
    }
}
