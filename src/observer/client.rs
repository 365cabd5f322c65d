//! Observer-side subscription channel.
//!
//! One [`GatewayClient`] multiplexes any number of [`Subscription`]s over a
//! single channel of JSON text frames. When the channel drops, every
//! pending subscription receives [`Signal::ChannelLost`] instead of
//! hanging.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::gateway::protocol::ClientMessage;
use crate::gateway::SubscriptionGateway;
use crate::models::event::SessionEvent;
use crate::{AppError, Result};

/// Reason reported to subscriptions when the channel drops.
pub const CHANNEL_CLOSED: &str = "channel closed unexpectedly";

/// What a subscription can receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    /// A normalized session event.
    Event(SessionEvent),
    /// The underlying channel is gone.
    ChannelLost(String),
}

#[derive(Default)]
struct ClientState {
    subscribers: HashMap<String, HashMap<u64, mpsc::UnboundedSender<Signal>>>,
    acks: HashMap<String, Vec<oneshot::Sender<()>>>,
    lost: Option<String>,
}

struct Shared {
    state: Mutex<ClientState>,
    next_id: AtomicU64,
    outbound: mpsc::UnboundedSender<String>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, ClientState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn send(&self, message: &ClientMessage) -> Result<()> {
        let text = serde_json::to_string(message)?;
        self.outbound
            .send(text)
            .map_err(|_| AppError::Gateway(CHANNEL_CLOSED.into()))
    }
}

/// Multiplexed subscription channel to a gateway.
pub struct GatewayClient {
    shared: Arc<Shared>,
    reader: JoinHandle<()>,
}

impl GatewayClient {
    /// Run a client over an existing pair of text-frame channels.
    #[must_use]
    pub fn new(
        outbound: mpsc::UnboundedSender<String>,
        inbound: mpsc::UnboundedReceiver<String>,
    ) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(ClientState::default()),
            next_id: AtomicU64::new(1),
            outbound,
        });
        let reader = tokio::spawn(read_loop(Arc::clone(&shared), inbound));
        Self { shared, reader }
    }

    /// Connect to a gateway in the same process.
    #[must_use]
    pub fn connect_in_process(gateway: &Arc<SubscriptionGateway>) -> Self {
        let (to_gateway, gateway_in) = mpsc::unbounded_channel();
        let (gateway_out, from_gateway) = mpsc::unbounded_channel();
        drop(gateway.spawn_channel(gateway_in, gateway_out));
        Self::new(to_gateway, from_gateway)
    }

    /// Connect to a gateway's `/ws` endpoint.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Gateway` if the WebSocket handshake fails.
    pub async fn connect_websocket(url: &str) -> Result<Self> {
        let (socket, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| AppError::Gateway(format!("websocket connect failed: {e}")))?;
        info!(url, "connected to subscription gateway");

        let (mut sink, mut stream) = socket.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if sink.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        tokio::spawn(async move {
            while let Some(Ok(message)) = stream.next().await {
                match message {
                    Message::Text(text) => {
                        if in_tx.send(text.as_str().to_owned()).is_err() {
                            break;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        });

        Ok(Self::new(out_tx, in_rx))
    }

    /// Subscribe to `session_id`, returning once the gateway has attached
    /// the listener. Starting the session after this returns cannot lose
    /// its first event.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Gateway` if the channel is closed before the
    /// gateway acknowledges.
    pub async fn subscribe(&self, session_id: &str) -> Result<Subscription> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst);

        let ack = {
            let mut state = self.shared.lock();
            if let Some(reason) = &state.lost {
                return Err(AppError::Gateway(reason.clone()));
            }
            let entry = state.subscribers.entry(session_id.to_owned()).or_default();
            entry.insert(id, tx);
            let (ack_tx, ack_rx) = oneshot::channel();
            state
                .acks
                .entry(session_id.to_owned())
                .or_default()
                .push(ack_tx);
            ack_rx
        };

        let subscription = Subscription {
            session_id: session_id.to_owned(),
            id,
            rx,
            shared: Arc::clone(&self.shared),
        };

        self.shared.send(&ClientMessage::Subscribe {
            session_id: session_id.to_owned(),
        })?;
        ack.await
            .map_err(|_| AppError::Gateway(CHANNEL_CLOSED.into()))?;

        Ok(subscription)
    }

    /// Whether the channel is still open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.shared.lock().lost.is_none()
    }
}

impl Drop for GatewayClient {
    fn drop(&mut self) {
        self.reader.abort();
        fail_pending(&self.shared);
    }
}

async fn read_loop(shared: Arc<Shared>, mut inbound: mpsc::UnboundedReceiver<String>) {
    while let Some(frame) = inbound.recv().await {
        route_frame(&shared, &frame);
    }
    fail_pending(&shared);
}

fn fail_pending(shared: &Shared) {
    let mut state = shared.lock();
    if state.lost.is_some() {
        return;
    }
    state.lost = Some(CHANNEL_CLOSED.into());
    state.acks.clear();
    let pending: usize = state.subscribers.values().map(HashMap::len).sum();
    for (_, senders) in state.subscribers.drain() {
        for (_, tx) in senders {
            let _ = tx.send(Signal::ChannelLost(CHANNEL_CLOSED.into()));
        }
    }
    warn!(pending, "subscription channel lost");
}

fn frame_session_id(value: &Value) -> Option<&str> {
    value
        .get("sessionId")
        .or_else(|| value.get("session_id"))
        .and_then(Value::as_str)
}

fn route_frame(shared: &Shared, frame: &str) {
    let value: Value = match serde_json::from_str(frame) {
        Ok(value) => value,
        Err(err) => {
            warn!(%err, "ignoring undecodable frame");
            return;
        }
    };

    match value.get("type").and_then(Value::as_str) {
        Some("session_event") => {}
        Some("subscribed") => {
            if let Some(session_id) = frame_session_id(&value) {
                let waiters = shared.lock().acks.remove(session_id).unwrap_or_default();
                for waiter in waiters {
                    let _ = waiter.send(());
                }
            }
            return;
        }
        Some("error") => {
            warn!(message = ?value.get("message"), "gateway reported error");
            return;
        }
        other => {
            debug!(frame_type = ?other, "ignoring control frame");
            return;
        }
    }

    let Some(session_id) = frame_session_id(&value) else {
        warn!("session_event without session id");
        return;
    };
    let raw_event = value.get("event").unwrap_or(&Value::Null);
    let event = match SessionEvent::from_value(session_id, raw_event) {
        Ok(event) => event,
        Err(err) => {
            warn!(session_id, %err, "dropping unnormalizable event");
            return;
        }
    };

    let mut state = shared.lock();
    if let Some(senders) = state.subscribers.get_mut(session_id) {
        senders.retain(|_, tx| tx.send(Signal::Event(event.clone())).is_ok());
    }
}

/// One session's stream of [`Signal`]s. Dropping it unsubscribes.
pub struct Subscription {
    session_id: String,
    id: u64,
    rx: mpsc::UnboundedReceiver<Signal>,
    shared: Arc<Shared>,
}

impl Subscription {
    /// Session followed.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Next signal. `None` only after a [`Signal::ChannelLost`] has been
    /// delivered.
    pub async fn next(&mut self) -> Option<Signal> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let last = {
            let mut state = self.shared.lock();
            match state.subscribers.get_mut(&self.session_id) {
                Some(senders) => {
                    senders.remove(&self.id);
                    let empty = senders.is_empty();
                    if empty {
                        state.subscribers.remove(&self.session_id);
                    }
                    empty
                }
                None => false,
            }
        };
        if last {
            let _ = self.shared.send(&ClientMessage::Unsubscribe {
                session_id: self.session_id.clone(),
            });
        }
    }
}
