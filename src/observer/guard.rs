//! Scoped cleanup for an observation.
//!
//! An [`ObservationGuard`] is taken when observation begins and released on
//! every resolution path. Non-terminal resolutions (timeout, channel error)
//! issue a best-effort stop so the session stops holding the admission
//! slot. A guard dropped without being released spawns that stop itself.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::Result;

use super::outcome::ObservationOutcome;

/// Best-effort termination of a session.
pub trait SessionControl: Send + Sync {
    /// Request that `session_id` stop.
    ///
    /// # Errors
    ///
    /// Returns an error if the request could not be delivered. Callers
    /// treat this as best effort.
    fn stop<'a>(&'a self, session_id: &'a str)
        -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}

/// Pairs an observation with its cleanup.
pub struct ObservationGuard {
    session_id: String,
    control: Arc<dyn SessionControl>,
    armed: bool,
}

impl ObservationGuard {
    /// Arm a guard for `session_id`.
    #[must_use]
    pub fn new(session_id: impl Into<String>, control: Arc<dyn SessionControl>) -> Self {
        Self {
            session_id: session_id.into(),
            control,
            armed: true,
        }
    }

    /// Session this guard protects.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Release the guard for `outcome`, stopping the session unless it
    /// reached a terminal status.
    pub async fn release(mut self, outcome: &ObservationOutcome) {
        self.armed = false;
        if outcome.is_terminal() {
            debug!(session_id = %self.session_id, "observation resolved terminally");
            return;
        }
        stop_best_effort(self.control.as_ref(), &self.session_id).await;
    }
}

impl Drop for ObservationGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(session_id = %self.session_id, "observation guard dropped outside runtime");
            return;
        };
        let control = Arc::clone(&self.control);
        let session_id = std::mem::take(&mut self.session_id);
        handle.spawn(async move {
            stop_best_effort(control.as_ref(), &session_id).await;
        });
    }
}

async fn stop_best_effort(control: &dyn SessionControl, session_id: &str) {
    match control.stop(session_id).await {
        Ok(()) => debug!(session_id, "stop requested after non-terminal resolution"),
        Err(err) => warn!(session_id, %err, "best-effort stop failed"),
    }
}
