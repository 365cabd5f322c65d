//! `SQLite` schema bootstrap logic.
//!
//! All table definitions use `CREATE TABLE IF NOT EXISTS` and are
//! re-run on every server startup.

use sqlx::SqlitePool;

use crate::Result;

/// Apply all table definitions to the connected `SQLite` database.
///
/// # Errors
///
/// Returns `AppError::Db` if any DDL statement fails.
pub async fn bootstrap_schema(pool: &SqlitePool) -> Result<()> {
    let ddl = r"
CREATE TABLE IF NOT EXISTS session (
    id              TEXT PRIMARY KEY NOT NULL,
    project_id      TEXT NOT NULL,
    agent_id        TEXT NOT NULL,
    status          TEXT NOT NULL CHECK(status IN ('running','idle','error','stopped')),
    total_turns     INTEGER NOT NULL DEFAULT 0,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS repo_lock (
    repo            TEXT PRIMARY KEY NOT NULL,
    execution_id    TEXT NOT NULL,
    schedule_id     TEXT NOT NULL,
    action_type     TEXT NOT NULL,
    locked_at       TEXT NOT NULL,
    expires_at      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_session_status ON session(status);
CREATE INDEX IF NOT EXISTS idx_repo_lock_expires ON repo_lock(expires_at);
";

    sqlx::raw_sql(ddl).execute(pool).await?;
    Ok(())
}
