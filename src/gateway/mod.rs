//! Subscription gateway, server side.
//!
//! Owns the listener registry behind the [`crate::events::EventBus`] and
//! relays matching events to each connected client channel. The HTTP
//! surface (`/ws`, status polling, session control, health) lives in
//! [`server`].

pub mod protocol;
pub mod server;

pub use protocol::{ClientMessage, ServerMessage};
pub use server::{build_router, serve_http, AppState, SubscriptionGateway};
