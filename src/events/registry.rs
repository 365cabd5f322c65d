//! Listener registry keyed by session id.

use std::collections::{HashMap, VecDeque};
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::Stream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

use crate::models::event::SessionEvent;

/// Receiving side of one subscription.
///
/// Ends (yields `None`) after the session's terminal event, on registry
/// shutdown, or when subscribing to a session that already terminated.
#[derive(Debug)]
pub struct EventStream {
    session_id: String,
    rx: mpsc::UnboundedReceiver<SessionEvent>,
}

impl EventStream {
    /// Session this stream follows.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Receive the next event.
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        self.rx.recv().await
    }

    /// Receive an already-queued event without waiting.
    pub fn try_recv(&mut self) -> Option<SessionEvent> {
        self.rx.try_recv().ok()
    }
}

impl Stream for EventStream {
    type Item = SessionEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// How long a terminated session keeps ending new streams immediately.
const CLOSED_RETENTION: Duration = Duration::from_secs(600);

/// Minimum spacing between sweeps of expired bookkeeping.
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Default)]
struct RegistryState {
    listeners: HashMap<String, Vec<mpsc::UnboundedSender<SessionEvent>>>,
    closed: HashMap<String, Instant>,
    orphans: HashMap<String, VecDeque<(Instant, SessionEvent)>>,
    last_sweep: Option<Instant>,
    shut_down: bool,
}

/// Registry of active listeners, one entry per session id.
pub struct ListenerRegistry {
    state: Mutex<RegistryState>,
    orphan_capacity: usize,
    orphan_ttl: Duration,
}

impl ListenerRegistry {
    /// Registry that drops events published with no listener attached.
    #[must_use]
    pub fn new() -> Self {
        Self::with_orphan_buffer(0, Duration::ZERO)
    }

    /// Registry that holds up to `capacity` events per session, for at most
    /// `ttl`, while no listener is attached, and replays them to the first
    /// listener that arrives.
    #[must_use]
    pub fn with_orphan_buffer(capacity: usize, ttl: Duration) -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            orphan_capacity: capacity,
            orphan_ttl: ttl,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attach a listener for `session_id`.
    #[must_use]
    pub fn attach(&self, session_id: &str) -> EventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.lock();
        self.sweep(&mut state);

        if let Some(buffered) = state.orphans.remove(session_id) {
            let now = Instant::now();
            let mut replayed = 0usize;
            for (at, event) in buffered {
                if now.duration_since(at) <= self.orphan_ttl && tx.send(event).is_ok() {
                    replayed += 1;
                }
            }
            debug!(session_id, replayed, "replayed buffered events to new listener");
        }

        // A terminated (or shut-down) session gets a stream that ends once
        // any replayed events are drained.
        if !state.shut_down && !state.closed.contains_key(session_id) {
            state
                .listeners
                .entry(session_id.to_owned())
                .or_default()
                .push(tx);
        }

        EventStream {
            session_id: session_id.to_owned(),
            rx,
        }
    }

    /// Deliver `event` to every live listener for its session.
    ///
    /// Returns the number of listeners reached. Events for a session whose
    /// terminal event has already been dispatched are ignored.
    pub fn dispatch(&self, event: &SessionEvent) -> usize {
        let mut state = self.lock();
        self.sweep(&mut state);
        let session_id = event.session_id.as_str();

        if state.shut_down || state.closed.contains_key(session_id) {
            debug!(session_id, sequence = event.sequence, "publish after close ignored");
            return 0;
        }

        let mut delivered = 0usize;
        if let Some(listeners) = state.listeners.get_mut(session_id) {
            listeners.retain(|tx| tx.send(event.clone()).is_ok());
            delivered = listeners.len();
            if listeners.is_empty() {
                state.listeners.remove(session_id);
            }
        }

        if delivered == 0 {
            self.buffer_orphan(&mut state, event);
        }

        if event.event_type().is_terminal() {
            state.closed.insert(session_id.to_owned(), Instant::now());
            // Dropping the senders ends every stream for this session.
            state.listeners.remove(session_id);
        }

        delivered
    }

    /// Drop closed markers past [`CLOSED_RETENTION`] and orphan queues
    /// whose newest event is older than the orphan TTL.
    fn sweep(&self, state: &mut RegistryState) {
        let now = Instant::now();
        if state
            .last_sweep
            .is_some_and(|at| now.duration_since(at) < SWEEP_INTERVAL)
        {
            return;
        }
        state.last_sweep = Some(now);

        let closed_before = state.closed.len();
        state
            .closed
            .retain(|_, at| now.duration_since(*at) < CLOSED_RETENTION);

        let orphans_before = state.orphans.len();
        let ttl = self.orphan_ttl;
        state.orphans.retain(|_, queue| {
            queue
                .back()
                .is_some_and(|(at, _)| now.duration_since(*at) <= ttl)
        });

        let evicted = closed_before - state.closed.len() + orphans_before - state.orphans.len();
        if evicted > 0 {
            debug!(evicted, "swept expired session bookkeeping");
        }
    }

    fn buffer_orphan(&self, state: &mut RegistryState, event: &SessionEvent) {
        if self.orphan_capacity == 0 {
            debug!(
                session_id = %event.session_id,
                sequence = event.sequence,
                "no listener registered, event dropped"
            );
            return;
        }

        let now = Instant::now();
        let queue = state.orphans.entry(event.session_id.clone()).or_default();
        queue.retain(|(at, _)| now.duration_since(*at) <= self.orphan_ttl);
        if queue.len() == self.orphan_capacity {
            queue.pop_front();
        }
        queue.push_back((now, event.clone()));
    }

    /// Number of live listeners for `session_id`.
    #[must_use]
    pub fn listener_count(&self, session_id: &str) -> usize {
        self.lock()
            .listeners
            .get(session_id)
            .map_or(0, |l| l.iter().filter(|tx| !tx.is_closed()).count())
    }

    /// Whether `session_id` has dispatched its terminal event.
    #[must_use]
    pub fn is_closed(&self, session_id: &str) -> bool {
        self.lock().closed.contains_key(session_id)
    }

    /// Drop all bookkeeping for a session that has been deleted.
    pub fn forget(&self, session_id: &str) {
        let mut state = self.lock();
        state.closed.remove(session_id);
        state.orphans.remove(session_id);
        state.listeners.remove(session_id);
    }

    /// End every stream and refuse further dispatches.
    pub fn shutdown(&self) {
        let mut state = self.lock();
        state.shut_down = true;
        state.listeners.clear();
        state.orphans.clear();
    }
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
