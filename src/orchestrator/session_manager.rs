//! Session lifecycle management: reserve, start, stop, delete.
//!
//! A session is reserved first (row persisted, publisher created) so that
//! observers can subscribe by id before the loop emits anything, then
//! started on its own task. Stop is cooperative: the runner's cancellation
//! token is tripped and the caller waits a short grace period for the
//! loop to settle.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use crate::events::{EventBus, EventStream, SessionPublisher};
use crate::models::event::EventPayload;
use crate::models::session::{Session, SessionSnapshot, SessionStatus};
use crate::observer::guard::SessionControl;
use crate::observer::poller::{StatusReport, StatusSource};
use crate::persistence::session_repo::SessionRepo;
use crate::runner::SessionRunner;
use crate::{AppError, Result};

/// Grace period a stop request waits for the loop to settle.
const STOP_GRACE: Duration = Duration::from_secs(5);

/// Receives `Some(status)` once a started session settles.
pub type Completion = watch::Receiver<Option<SessionStatus>>;

enum Slot {
    Reserved {
        session: Session,
        prompt: String,
        publisher: SessionPublisher,
    },
    Running {
        cancel: CancellationToken,
        done: Completion,
    },
}

/// What `stop_session` found for an id.
enum StopTarget {
    Reserved(SessionPublisher),
    Running(CancellationToken, Completion),
    Untracked,
}

/// Owns every live session loop in this process.
pub struct SessionManager {
    sessions: SessionRepo,
    runner: SessionRunner,
    bus: EventBus,
    slots: Arc<Mutex<HashMap<String, Slot>>>,
}

impl SessionManager {
    /// Create a manager.
    #[must_use]
    pub fn new(sessions: SessionRepo, runner: SessionRunner, bus: EventBus) -> Self {
        Self {
            sessions,
            runner,
            bus,
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Persist a running session row without starting its loop.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert fails.
    pub async fn reserve_session(
        &self,
        project_id: &str,
        agent_id: &str,
        initial_prompt: &str,
    ) -> Result<SessionSnapshot> {
        let session = self
            .sessions
            .create(&Session::new(project_id.to_owned(), agent_id.to_owned()))
            .await?;
        let snapshot = session.snapshot();
        let publisher = self.bus.publisher(&session.id);

        self.lock().insert(
            session.id.clone(),
            Slot::Reserved {
                session,
                prompt: initial_prompt.to_owned(),
                publisher,
            },
        );
        info!(session_id = %snapshot.id, project_id, agent_id, "session reserved");
        Ok(snapshot)
    }

    /// Launch the loop for a reserved session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if `session_id` was never reserved here,
    /// or `AppError::Protocol` if it has already started.
    pub fn start_session(&self, session_id: &str) -> Result<()> {
        let mut slots = self.lock();
        let (session, prompt, publisher) = match slots.remove(session_id) {
            Some(Slot::Reserved {
                session,
                prompt,
                publisher,
            }) => (session, prompt, publisher),
            Some(running @ Slot::Running { .. }) => {
                slots.insert(session_id.to_owned(), running);
                return Err(AppError::Protocol(format!(
                    "session {session_id} already started"
                )));
            }
            None => {
                return Err(AppError::NotFound(format!(
                    "no reserved session {session_id}"
                )))
            }
        };

        let cancel = CancellationToken::new();
        let (done_tx, done_rx) = watch::channel(None);
        slots.insert(
            session_id.to_owned(),
            Slot::Running {
                cancel: cancel.clone(),
                done: done_rx,
            },
        );

        let runner = self.runner.clone();
        let registry = Arc::clone(&self.slots);
        let id = session_id.to_owned();
        let span = info_span!("session_task", session_id = %id);
        tokio::spawn(
            async move {
                let summary = runner.run(session, prompt, publisher, cancel).await;
                registry
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&id);
                let _ = done_tx.send(Some(summary.status));
                info!(
                    status = summary.status.as_str(),
                    total_turns = summary.total_turns,
                    tool_calls = summary.invocations.len(),
                    "session settled"
                );
            }
            .instrument(span),
        );

        info!(session_id, "session started");
        Ok(())
    }

    /// Reserve, subscribe, then start: the returned stream sees the first
    /// event.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the session row cannot be created.
    pub async fn create_session(
        &self,
        project_id: &str,
        agent_id: &str,
        initial_prompt: &str,
    ) -> Result<(SessionSnapshot, EventStream)> {
        let snapshot = self
            .reserve_session(project_id, agent_id, initial_prompt)
            .await?;
        let stream = self.bus.subscribe(&snapshot.id);
        self.start_session(&snapshot.id)?;
        Ok((snapshot, stream))
    }

    /// Current `{id, status, totalTurns}`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the session does not exist.
    pub async fn get_session(&self, session_id: &str) -> Result<SessionSnapshot> {
        self.sessions
            .get_by_id(session_id)
            .await?
            .map(|s| s.snapshot())
            .ok_or_else(|| AppError::NotFound(format!("session {session_id} not found")))
    }

    /// Completion handle for a started session still in flight.
    #[must_use]
    pub fn completion(&self, session_id: &str) -> Option<Completion> {
        match self.lock().get(session_id) {
            Some(Slot::Running { done, .. }) => Some(done.clone()),
            _ => None,
        }
    }

    /// Number of reserved or running sessions.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.lock().len()
    }

    /// Stop a session. A no-op for sessions already terminal.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the session does not exist.
    pub async fn stop_session(&self, session_id: &str) -> Result<SessionSnapshot> {
        let target = {
            let mut slots = self.lock();
            match slots.remove(session_id) {
                Some(Slot::Reserved { publisher, .. }) => StopTarget::Reserved(publisher),
                Some(Slot::Running { cancel, done }) => {
                    let target = StopTarget::Running(cancel.clone(), done.clone());
                    slots.insert(session_id.to_owned(), Slot::Running { cancel, done });
                    target
                }
                None => StopTarget::Untracked,
            }
        };

        match target {
            StopTarget::Running(cancel, mut done) => {
                cancel.cancel();
                let settled = tokio::time::timeout(STOP_GRACE, done.wait_for(Option::is_some))
                    .await
                    .is_ok();
                if !settled {
                    warn!(session_id, "session did not settle within stop grace period");
                }
            }
            StopTarget::Reserved(mut publisher) => {
                let marked = self.mark_stopped(session_id).await;
                publisher.emit(EventPayload::SessionExited {
                    reason: "stopped before start".into(),
                });
                marked?;
            }
            StopTarget::Untracked => {
                // Row left running by an earlier process.
                self.mark_stopped(session_id).await?;
            }
        }

        self.get_session(session_id).await
    }

    async fn mark_stopped(&self, session_id: &str) -> Result<()> {
        let current = self
            .sessions
            .get_by_id(session_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("session {session_id} not found")))?;
        if current.status == SessionStatus::Running {
            self.sessions
                .update_status(session_id, SessionStatus::Stopped)
                .await?;
            info!(session_id, "session marked stopped");
        }
        Ok(())
    }

    /// Stop (if needed) and delete a session. Returns `false` if it did not
    /// exist.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the delete fails.
    pub async fn delete_session(&self, session_id: &str) -> Result<bool> {
        match self.stop_session(session_id).await {
            Ok(_) => {}
            Err(AppError::NotFound(_)) => return Ok(false),
            Err(err) => return Err(err),
        }
        let deleted = self.sessions.delete(session_id).await?;
        self.bus.forget(session_id);
        info!(session_id, deleted, "session deleted");
        Ok(deleted)
    }

    /// Stop every session this manager owns.
    pub async fn shutdown(&self) {
        let ids: Vec<String> = self.lock().keys().cloned().collect();
        for id in ids {
            if let Err(err) = self.stop_session(&id).await {
                warn!(session_id = %id, %err, "failed to stop session during shutdown");
            }
        }
    }
}

impl StatusSource for SessionManager {
    fn status<'a>(
        &'a self,
        session_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<StatusReport>> + Send + 'a>> {
        Box::pin(async move { Ok(self.get_session(session_id).await?.into()) })
    }
}

impl SessionControl for SessionManager {
    fn stop<'a>(
        &'a self,
        session_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move { self.stop_session(session_id).await.map(|_| ()) })
    }
}
