//! Repository lock records.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A held mutual-exclusion token for one repository.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RepoLock {
    /// Repository key; primary key of the lock table.
    pub repo: String,
    /// Execution currently holding the lock.
    pub execution_id: String,
    /// Schedule that triggered the execution.
    pub schedule_id: String,
    /// Kind of automated action being performed.
    pub action_type: String,
    /// When the lock was granted.
    pub locked_at: DateTime<Utc>,
    /// When the lock is considered abandoned.
    pub expires_at: DateTime<Utc>,
}

impl RepoLock {
    /// Whether the lock has passed its expiry at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Parameters for a lock acquisition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRequest {
    /// Repository key.
    pub repo: String,
    /// Requesting execution.
    pub execution_id: String,
    /// Triggering schedule.
    pub schedule_id: String,
    /// Automated action type.
    pub action_type: String,
    /// Lifetime of the lock if granted.
    pub ttl: Duration,
}

/// Result of a lock acquisition attempt. Denial is a normal outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockOutcome {
    /// Lock granted to the requester.
    Granted(RepoLock),
    /// Another execution holds an unexpired lock.
    Denied {
        /// Current holder, when it could be read back.
        holder: Option<RepoLock>,
    },
}

impl LockOutcome {
    /// Whether the lock was granted.
    #[must_use]
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted(_))
    }
}
