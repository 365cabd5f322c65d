//! Lock-gated session starts for scheduled and automated triggers.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::coordination::repo_lock::RepoLockManager;
use crate::models::lock::LockOutcome;
use crate::models::session::SessionSnapshot;
use crate::Result;

use super::session_manager::SessionManager;

/// A scheduled trigger asking to run an agent against a repository.
#[derive(Debug, Clone)]
pub struct ScheduledRun {
    /// Repository the run mutates; the lock key.
    pub repo: String,
    /// Schedule that fired.
    pub schedule_id: String,
    /// What the run does (e.g. `review`, `triage`).
    pub action_type: String,
    /// Project the session runs against.
    pub project_id: String,
    /// Agent to run.
    pub agent_id: String,
    /// Initial prompt.
    pub prompt: String,
    /// Lock TTL; the lock manager default when `None`.
    pub ttl: Option<Duration>,
}

/// Result of a launch attempt.
#[derive(Debug)]
pub enum LaunchOutcome {
    /// The lock was granted and the session started.
    Started {
        /// The started session.
        session: SessionSnapshot,
        /// Execution id holding the lock.
        execution_id: String,
        /// Watcher that releases the lock when the run ends.
        watcher: JoinHandle<()>,
    },
    /// Another execution holds the repository; nothing was started.
    Skipped {
        /// Execution currently holding the lock, if known.
        held_by: Option<String>,
    },
}

/// Starts sessions only while holding the target repository's lock.
pub struct ScheduledLauncher {
    locks: RepoLockManager,
    manager: Arc<SessionManager>,
    absolute_cap: Duration,
}

impl ScheduledLauncher {
    /// Create a launcher. `absolute_cap` bounds how long a run may hold its
    /// lock before it is stopped.
    #[must_use]
    pub fn new(locks: RepoLockManager, manager: Arc<SessionManager>, absolute_cap: Duration) -> Self {
        Self {
            locks,
            manager,
            absolute_cap,
        }
    }

    /// Try to launch `run`. Denial is reported as [`LaunchOutcome::Skipped`].
    ///
    /// # Errors
    ///
    /// Returns an error if lock storage or session creation fails; the lock
    /// is released again when session creation fails.
    pub async fn launch(&self, run: ScheduledRun) -> Result<LaunchOutcome> {
        let execution_id = Uuid::new_v4().to_string();
        let outcome = self
            .locks
            .try_acquire(
                &run.repo,
                &execution_id,
                &run.schedule_id,
                &run.action_type,
                run.ttl,
            )
            .await?;

        if let LockOutcome::Denied { holder } = outcome {
            let held_by = holder.map(|h| h.execution_id);
            info!(
                repo = %run.repo,
                schedule_id = %run.schedule_id,
                held_by = held_by.as_deref().unwrap_or("unknown"),
                "scheduled run skipped, repository busy"
            );
            return Ok(LaunchOutcome::Skipped { held_by });
        }

        let session = match self.start(&run).await {
            Ok(session) => session,
            Err(err) => {
                if let Err(release_err) = self.locks.release(&run.repo, &execution_id).await {
                    warn!(repo = %run.repo, %release_err, "failed to release lock after start failure");
                }
                return Err(err);
            }
        };

        let watcher = self.spawn_watcher(run.repo, execution_id.clone(), session.id.clone());
        Ok(LaunchOutcome::Started {
            session,
            execution_id,
            watcher,
        })
    }

    async fn start(&self, run: &ScheduledRun) -> Result<SessionSnapshot> {
        let session = self
            .manager
            .reserve_session(&run.project_id, &run.agent_id, &run.prompt)
            .await?;
        self.manager.start_session(&session.id)?;
        Ok(session)
    }

    /// Release the lock once the session settles, stopping it first if the
    /// absolute cap elapses.
    fn spawn_watcher(&self, repo: String, execution_id: String, session_id: String) -> JoinHandle<()> {
        let locks = self.locks.clone();
        let manager = Arc::clone(&self.manager);
        let cap = self.absolute_cap;

        tokio::spawn(async move {
            if let Some(mut done) = manager.completion(&session_id) {
                let settled = tokio::time::timeout(cap, done.wait_for(Option::is_some))
                    .await
                    .is_ok();
                if !settled {
                    warn!(session_id, repo, "scheduled run hit absolute cap, stopping");
                    if let Err(err) = manager.stop_session(&session_id).await {
                        warn!(session_id, %err, "failed to stop capped session");
                    }
                }
            }

            match locks.release(&repo, &execution_id).await {
                Ok(_) => {}
                Err(err) => warn!(repo, execution_id, %err, "failed to release repository lock"),
            }
        })
    }
}
