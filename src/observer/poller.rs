//! Status-polling fallback.
//!
//! Push delivery can stall without the channel closing. Polling the
//! session's status covers that gap: a `running` answer counts as activity
//! and a terminal answer resolves the observation directly.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::Deserialize;

use crate::models::session::{SessionSnapshot, SessionStatus};
use crate::{AppError, Result};

use super::guard::SessionControl;

/// `{status, totalTurns}` as returned by the status query.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    /// Current lifecycle status.
    pub status: SessionStatus,
    /// Completed inference rounds.
    #[serde(default, alias = "total_turns")]
    pub total_turns: u32,
}

impl From<SessionSnapshot> for StatusReport {
    fn from(snapshot: SessionSnapshot) -> Self {
        Self {
            status: snapshot.status,
            total_turns: snapshot.total_turns,
        }
    }
}

/// Narrow query for a session's current status.
pub trait StatusSource: Send + Sync {
    /// Fetch the status of `session_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the status cannot be fetched; the observer logs
    /// it and tries again on the next poll.
    fn status<'a>(
        &'a self,
        session_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<StatusReport>> + Send + 'a>>;
}

/// Per-request limit for status and stop calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Session status and control over the HTTP gateway.
#[derive(Clone)]
pub struct HttpSessionApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSessionApi {
    /// Client for a gateway rooted at `base_url` (e.g. `http://127.0.0.1:3000`).
    ///
    /// # Errors
    ///
    /// Returns `AppError::Gateway` if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| AppError::Gateway(format!("failed to build http client: {err}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
        })
    }
}

impl StatusSource for HttpSessionApi {
    fn status<'a>(
        &'a self,
        session_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<StatusReport>> + Send + 'a>> {
        Box::pin(async move {
            let url = format!("{}/sessions/{session_id}/status", self.base_url);
            let response = self.client.get(&url).send().await?;
            if response.status() == reqwest::StatusCode::NOT_FOUND {
                return Err(AppError::NotFound(format!("session {session_id} not found")));
            }
            let response = response.error_for_status()?;
            Ok(response.json::<StatusReport>().await?)
        })
    }
}

impl SessionControl for HttpSessionApi {
    fn stop<'a>(&'a self, session_id: &'a str) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let url = format!("{}/sessions/{session_id}/stop", self.base_url);
            self.client.post(&url).send().await?.error_for_status()?;
            Ok(())
        })
    }
}
