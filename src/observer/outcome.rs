//! Observation outcomes and the loop that resolves them.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde::Serialize;
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, info, info_span, Instrument};

use crate::config::ObservationConfig;
use crate::models::event::{EventPayload, SessionEvent};
use crate::models::session::SessionStatus;
use crate::Result;

use super::client::{Signal, Subscription};
use super::guard::ObservationGuard;
use super::poller::{StatusReport, StatusSource};
use super::timer::{Deadline, ObservationTimer};

/// How an observation resolved.
///
/// `Timeout` and `Error` describe the observation, never the session: the
/// session may still be running server-side.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ObservationOutcome {
    /// The session reached a terminal status.
    Finished {
        /// Terminal status reached.
        status: SessionStatus,
        /// Final answer or failure message, when an event carried one.
        detail: Option<String>,
    },
    /// The subscription channel failed.
    Error {
        /// What went wrong.
        message: String,
    },
    /// No terminal signal arrived in time.
    Timeout {
        /// Deadline that fired.
        deadline: Deadline,
    },
}

impl ObservationOutcome {
    /// Whether the session itself reached a terminal status.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished { .. })
    }

    fn from_terminal_event(event: &SessionEvent) -> Self {
        match &event.payload {
            EventPayload::Result { content } => Self::Finished {
                status: SessionStatus::Idle,
                detail: Some(content.clone()),
            },
            EventPayload::Error { message } => Self::Finished {
                status: SessionStatus::Error,
                detail: Some(message.clone()),
            },
            EventPayload::SessionExited { reason } => Self::Finished {
                status: SessionStatus::Stopped,
                detail: Some(reason.clone()),
            },
            _ => Self::Error {
                message: format!("unexpected terminal event {}", event.event_type().as_str()),
            },
        }
    }
}

/// An outcome plus every event seen on the way.
#[derive(Debug, Clone)]
pub struct ObservationReport {
    /// How observation resolved.
    pub outcome: ObservationOutcome,
    /// Events received, in arrival order.
    pub events: Vec<SessionEvent>,
}

/// Observe one session until a terminal signal, a channel error, or a
/// deadline.
///
/// Activity events and polled `running` statuses re-arm the idle timer;
/// nothing else does. A status poll in flight never holds the loop: events
/// and deadlines are watched while it runs. `guard` is released on every
/// path.
pub async fn observe(
    mut subscription: Subscription,
    status_source: Option<Arc<dyn StatusSource>>,
    guard: ObservationGuard,
    config: &ObservationConfig,
) -> ObservationReport {
    let session_id = subscription.session_id().to_owned();
    let span = info_span!("observe_session", session_id = %session_id);

    async move {
        let mut timer = ObservationTimer::from_config(config);
        let period = config.poll_interval().max(Duration::from_secs(1));
        let mut poll = interval_at(Instant::now() + period, period);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut in_flight: Option<BoxFuture<'_, Result<StatusReport>>> = None;
        let mut events = Vec::new();

        let outcome = loop {
            let (deadline_at, deadline) = timer.next_deadline();
            tokio::select! {
                signal = subscription.next() => match signal {
                    Some(Signal::Event(event)) => {
                        let kind = event.event_type();
                        events.push(event);
                        if kind.is_terminal() {
                            if let Some(last) = events.last() {
                                break ObservationOutcome::from_terminal_event(last);
                            }
                        }
                        if kind.is_activity() {
                            timer.record_activity();
                        }
                    }
                    Some(Signal::ChannelLost(message)) => break ObservationOutcome::Error { message },
                    None => break ObservationOutcome::Error {
                        message: super::client::CHANNEL_CLOSED.into(),
                    },
                },
                _ = poll.tick(), if status_source.is_some() && in_flight.is_none() => {
                    in_flight = status_source
                        .as_deref()
                        .map(|source| source.status(&session_id));
                }
                polled = async {
                    match in_flight.as_mut() {
                        Some(pending) => pending.await,
                        None => std::future::pending().await,
                    }
                }, if in_flight.is_some() => {
                    in_flight = None;
                    match polled {
                        Ok(report) if report.status == SessionStatus::Running => {
                            timer.record_activity();
                        }
                        Ok(report) => {
                            break ObservationOutcome::Finished {
                                status: report.status,
                                detail: None,
                            };
                        }
                        Err(err) => debug!(%err, "status poll failed"),
                    }
                }
                () = sleep_until(deadline_at) => break ObservationOutcome::Timeout { deadline },
            }
        };

        info!(outcome = ?outcome, events = events.len(), "observation resolved");
        drop(in_flight);
        drop(subscription);
        guard.release(&outcome).await;
        ObservationReport { outcome, events }
    }
    .instrument(span)
    .await
}
