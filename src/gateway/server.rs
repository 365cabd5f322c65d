//! Subscription gateway and its HTTP/WebSocket surface.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::EventsConfig;
use crate::events::{EventBus, EventStream, ListenerRegistry};
use crate::orchestrator::session_manager::SessionManager;
use crate::{AppError, Result};

use super::protocol::{ClientMessage, ServerMessage};

/// Relays session events to client channels.
///
/// Owns the [`ListenerRegistry`] for its whole lifetime; the
/// [`EventBus`] handed to publishers shares it by handle.
pub struct SubscriptionGateway {
    registry: Arc<ListenerRegistry>,
    shutdown: CancellationToken,
}

impl SubscriptionGateway {
    /// Create a gateway with a fresh registry.
    #[must_use]
    pub fn new(config: &EventsConfig) -> Self {
        Self {
            registry: Arc::new(ListenerRegistry::with_orphan_buffer(
                config.orphan_buffer_capacity,
                config.orphan_ttl(),
            )),
            shutdown: CancellationToken::new(),
        }
    }

    /// Bus publishing into this gateway's registry.
    #[must_use]
    pub fn event_bus(&self) -> EventBus {
        EventBus::new(Arc::clone(&self.registry))
    }

    /// Serve one client channel of JSON text frames until the inbound side
    /// closes or the gateway shuts down.
    ///
    /// Every subscription gets its own relay task. When the channel ends
    /// all relays stop and their listeners detach.
    pub async fn serve_channel(
        &self,
        mut inbound: mpsc::UnboundedReceiver<String>,
        outbound: mpsc::UnboundedSender<String>,
    ) {
        let client_id = Uuid::new_v4().to_string();
        info!(client_id, "subscription channel opened");
        let mut relays: HashMap<String, JoinHandle<()>> = HashMap::new();

        loop {
            let frame = tokio::select! {
                () = self.shutdown.cancelled() => break,
                frame = inbound.recv() => frame,
            };
            let Some(frame) = frame else { break };

            relays.retain(|_, relay| !relay.is_finished());

            let mut attached = None;
            let reply = match ClientMessage::parse(&frame) {
                Ok(ClientMessage::Subscribe { session_id }) => {
                    if !relays.contains_key(&session_id) {
                        attached = Some((session_id.clone(), self.registry.attach(&session_id)));
                    }
                    ServerMessage::Subscribed { session_id }
                }
                Ok(ClientMessage::Unsubscribe { session_id }) => {
                    if let Some(relay) = relays.remove(&session_id) {
                        relay.abort();
                        debug!(client_id, session_id, "subscription detached");
                    }
                    continue;
                }
                Err(err) => {
                    warn!(client_id, %err, "rejecting client message");
                    ServerMessage::Error {
                        message: err.to_string(),
                    }
                }
            };

            match reply.to_text() {
                Ok(text) => {
                    if outbound.send(text).is_err() {
                        break;
                    }
                }
                Err(err) => warn!(client_id, %err, "failed to encode reply"),
            }

            // The listener is attached before the ack; its relay starts after.
            if let Some((session_id, stream)) = attached {
                relays.insert(session_id.clone(), spawn_relay(stream, outbound.clone()));
                debug!(client_id, session_id, "subscription attached");
            }
        }

        for (_, relay) in relays {
            relay.abort();
        }
        info!(client_id, "subscription channel closed");
    }

    /// Spawn [`serve_channel`](Self::serve_channel) on its own task.
    pub fn spawn_channel(
        self: &Arc<Self>,
        inbound: mpsc::UnboundedReceiver<String>,
        outbound: mpsc::UnboundedSender<String>,
    ) -> JoinHandle<()> {
        let gateway = Arc::clone(self);
        tokio::spawn(async move { gateway.serve_channel(inbound, outbound).await })
    }

    /// Close every channel and end every listener stream.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.registry.shutdown();
        info!("subscription gateway shut down");
    }
}

fn spawn_relay(mut stream: EventStream, outbound: mpsc::UnboundedSender<String>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = stream.recv().await {
            match ServerMessage::from_event(&event).to_text() {
                Ok(text) => {
                    if outbound.send(text).is_err() {
                        break;
                    }
                }
                Err(err) => warn!(session_id = %event.session_id, %err, "failed to encode event"),
            }
        }
    })
}

/// Shared state handed to axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Subscription gateway.
    pub gateway: Arc<SubscriptionGateway>,
    /// Session control surface.
    pub manager: Arc<SessionManager>,
}

/// Body of `POST /sessions`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionBody {
    project_id: String,
    agent_id: String,
    initial_prompt: String,
    #[serde(default)]
    defer_start: bool,
}

/// Maps domain errors onto HTTP status codes.
struct ApiError(AppError);

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Config(_) | AppError::Protocol(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (
            status,
            Json(serde_json::json!({ "error": { "message": self.0.to_string() } })),
        )
            .into_response()
    }
}

/// Build the router: `/ws`, session control, status polling, `/health`.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .route("/sessions", post(create_session))
        .route("/sessions/{id}", axum::routing::delete(delete_session))
        .route("/sessions/{id}/status", get(session_status))
        .route("/sessions/{id}/start", post(start_session))
        .route("/sessions/{id}/stop", post(stop_session))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state.gateway))
}

/// Bridge a WebSocket onto the gateway's text-frame channel.
async fn handle_socket(socket: WebSocket, gateway: Arc<SubscriptionGateway>) {
    let (mut sink, mut stream) = socket.split();
    let (in_tx, in_rx) = mpsc::unbounded_channel::<String>();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();

    let writer = tokio::spawn(async move {
        while let Some(text) = out_rx.recv().await {
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let reader = tokio::spawn(async move {
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

    gateway.serve_channel(in_rx, out_tx).await;
    reader.abort();
    let _ = writer.await;
}

async fn create_session(
    State(state): State<AppState>,
    Json(body): Json<CreateSessionBody>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    let snapshot = state
        .manager
        .reserve_session(&body.project_id, &body.agent_id, &body.initial_prompt)
        .await?;
    if !body.defer_start {
        state.manager.start_session(&snapshot.id)?;
    }
    Ok((StatusCode::CREATED, Json(snapshot)))
}

async fn start_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    state.manager.start_session(&id)?;
    Ok(StatusCode::ACCEPTED)
}

async fn session_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    Ok(Json(state.manager.get_session(&id).await?))
}

async fn stop_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    Ok(Json(state.manager.stop_session(&id).await?))
}

async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    if state.manager.delete_session(&id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError(AppError::NotFound(format!("session {id} not found"))))
    }
}

/// Serve the router on `port` until `ct` is cancelled.
///
/// # Errors
///
/// Returns `AppError::Gateway` if the listener cannot bind or the server
/// fails.
pub async fn serve_http(state: AppState, port: u16, ct: CancellationToken) -> Result<()> {
    let bind = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .map_err(|err| AppError::Gateway(format!("failed to bind {bind}: {err}")))?;

    info!(%bind, "starting HTTP gateway");

    let gateway = Arc::clone(&state.gateway);
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async move {
            ct.cancelled().await;
            gateway.shutdown();
        })
        .await
        .map_err(|err| AppError::Gateway(format!("HTTP server error: {err}")))?;

    info!("HTTP gateway shut down");
    Ok(())
}
