//! Event bus and per-session publishers.

use std::sync::Arc;

use tracing::debug;

use crate::models::event::{EventPayload, SessionEvent};

use super::registry::{EventStream, ListenerRegistry};

/// Publishes session events to the listeners in a [`ListenerRegistry`].
///
/// Ordering is guaranteed per session only. Events published while no
/// listener is attached are dropped unless the registry was built with an
/// orphan buffer; callers that must see the first event subscribe before
/// the session starts.
#[derive(Clone)]
pub struct EventBus {
    registry: Arc<ListenerRegistry>,
}

impl EventBus {
    /// Create a bus over an existing registry handle.
    #[must_use]
    pub fn new(registry: Arc<ListenerRegistry>) -> Self {
        Self { registry }
    }

    /// Deliver `event`; returns the number of listeners reached.
    pub fn publish(&self, event: &SessionEvent) -> usize {
        let delivered = self.registry.dispatch(event);
        debug!(
            session_id = %event.session_id,
            sequence = event.sequence,
            event_type = event.event_type().as_str(),
            delivered,
            "event published"
        );
        delivered
    }

    /// Attach a listener for `session_id`.
    #[must_use]
    pub fn subscribe(&self, session_id: &str) -> EventStream {
        self.registry.attach(session_id)
    }

    /// Whether the terminal event for `session_id` has been published.
    #[must_use]
    pub fn is_closed(&self, session_id: &str) -> bool {
        self.registry.is_closed(session_id)
    }

    /// Drop registry bookkeeping for a deleted session.
    pub fn forget(&self, session_id: &str) {
        self.registry.forget(session_id);
    }

    /// Create a sequencing publisher for one session.
    #[must_use]
    pub fn publisher(&self, session_id: &str) -> SessionPublisher {
        SessionPublisher {
            session_id: session_id.to_owned(),
            bus: self.clone(),
            next_sequence: 1,
            closed: false,
        }
    }
}

/// Stamps strictly increasing sequence numbers on one session's events.
///
/// After a terminal payload has been emitted every further `emit` is a
/// no-op returning `None`.
pub struct SessionPublisher {
    session_id: String,
    bus: EventBus,
    next_sequence: u64,
    closed: bool,
}

impl SessionPublisher {
    /// Session this publisher stamps.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Whether a terminal event has been emitted.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Publish `payload` with the next sequence number.
    pub fn emit(&mut self, payload: EventPayload) -> Option<u64> {
        if self.closed {
            return None;
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.closed = payload.event_type().is_terminal();

        let event = SessionEvent {
            session_id: self.session_id.clone(),
            sequence,
            payload,
        };
        self.bus.publish(&event);
        Some(sequence)
    }
}
