//! Background sweeper for expired locks and old sessions.
//!
//! Expired locks are already overwritten lazily on acquisition; the sweep
//! only keeps the table small. Terminal sessions are purged once they are
//! older than `retention_days`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::db::Database;
use super::lock_repo::RepoLockRepo;
use super::session_repo::SessionRepo;
use crate::Result;

/// Spawn the retention purge background task.
///
/// The first sweep runs immediately, then once per `interval`.
#[must_use]
pub fn spawn_retention_task(
    db: Arc<Database>,
    retention_days: u32,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("retention task shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(err) = purge(&db, retention_days).await {
                        error!(?err, "retention purge failed");
                    }
                }
            }
        }
    })
}

/// Run one purge pass.
///
/// # Errors
///
/// Returns `AppError::Db` if either delete fails.
pub async fn purge(db: &Arc<Database>, retention_days: u32) -> Result<()> {
    let now = Utc::now();
    let locks = RepoLockRepo::new(Arc::clone(db)).purge_expired_at(now).await?;

    let cutoff = now - chrono::Duration::days(i64::from(retention_days));
    let sessions = SessionRepo::new(Arc::clone(db))
        .purge_terminal_before(cutoff)
        .await?;

    info!(
        expired_locks = locks,
        purged_sessions = sessions,
        retention_days,
        "retention purge completed"
    );
    Ok(())
}
