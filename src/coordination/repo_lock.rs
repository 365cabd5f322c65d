//! Auto-expiring mutual exclusion keyed by target repository.
//!
//! Acquisition is non-blocking: callers get [`LockOutcome::Granted`] or
//! [`LockOutcome::Denied`] immediately and decide themselves whether to
//! back off or skip. Locks are never renewed automatically; a holder that
//! outlives its TTL without calling [`RepoLockManager::extend`] is treated
//! as abandoned and its row may be taken over by the next requester.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, info_span, Instrument};

use crate::models::lock::{LockOutcome, LockRequest, RepoLock};
use crate::persistence::db::Database;
use crate::persistence::lock_repo::RepoLockRepo;
use crate::Result;

/// Grants and releases repository locks.
#[derive(Clone)]
pub struct RepoLockManager {
    repo: RepoLockRepo,
    default_ttl: Duration,
}

impl RepoLockManager {
    /// Create a manager over the given database.
    #[must_use]
    pub fn new(db: Arc<Database>, default_ttl: Duration) -> Self {
        Self {
            repo: RepoLockRepo::new(db),
            default_ttl,
        }
    }

    /// TTL used when a caller passes `None`.
    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Try to take the lock on `repo_key` for `execution_id`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db`/`AppError::Lock` only for storage failures;
    /// contention is reported as [`LockOutcome::Denied`].
    pub async fn try_acquire(
        &self,
        repo_key: &str,
        execution_id: &str,
        schedule_id: &str,
        action_type: &str,
        ttl: Option<Duration>,
    ) -> Result<LockOutcome> {
        let request = LockRequest {
            repo: repo_key.to_owned(),
            execution_id: execution_id.to_owned(),
            schedule_id: schedule_id.to_owned(),
            action_type: action_type.to_owned(),
            ttl: ttl.unwrap_or(self.default_ttl),
        };
        self.try_acquire_at(&request, Utc::now()).await
    }

    /// [`try_acquire`](Self::try_acquire) evaluated at an explicit instant.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db`/`AppError::Lock` only for storage failures.
    pub async fn try_acquire_at(
        &self,
        request: &LockRequest,
        now: DateTime<Utc>,
    ) -> Result<LockOutcome> {
        let span = info_span!(
            "repo_lock_acquire",
            repo = %request.repo,
            execution_id = %request.execution_id
        );

        let outcome = self
            .repo
            .try_acquire_at(request, now)
            .instrument(span.clone())
            .await?;
        let _guard = span.enter();
        match &outcome {
            LockOutcome::Granted(lock) => {
                info!(
                    schedule_id = %lock.schedule_id,
                    action_type = %lock.action_type,
                    expires_at = %lock.expires_at,
                    "repo lock granted"
                );
            }
            LockOutcome::Denied { holder } => {
                debug!(
                    held_by = holder.as_ref().map_or("unknown", |h| h.execution_id.as_str()),
                    "repo lock denied"
                );
            }
        }
        Ok(outcome)
    }

    /// Release the lock on `repo_key` if `execution_id` holds it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the delete fails.
    pub async fn release(&self, repo_key: &str, execution_id: &str) -> Result<bool> {
        let released = self.repo.release(repo_key, execution_id).await?;
        if released {
            info!(repo = repo_key, execution_id, "repo lock released");
        } else {
            debug!(repo = repo_key, execution_id, "repo lock not held by execution");
        }
        Ok(released)
    }

    /// Extend a still-held lock to `now + ttl`.
    ///
    /// Returns `false` if the lock already expired or belongs to someone
    /// else; the caller must then re-acquire.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn extend(&self, repo_key: &str, execution_id: &str, ttl: Duration) -> Result<bool> {
        self.extend_at(repo_key, execution_id, ttl, Utc::now()).await
    }

    /// [`extend`](Self::extend) evaluated at an explicit instant.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn extend_at(
        &self,
        repo_key: &str,
        execution_id: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let extended = self.repo.extend_at(repo_key, execution_id, ttl, now).await?;
        debug!(repo = repo_key, execution_id, extended, "repo lock extend");
        Ok(extended)
    }

    /// Current unexpired holder of `repo_key`, if any.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn holder(&self, repo_key: &str) -> Result<Option<RepoLock>> {
        let now = Utc::now();
        Ok(self
            .repo
            .get(repo_key)
            .await?
            .filter(|lock| !lock.is_expired_at(now)))
    }
}
