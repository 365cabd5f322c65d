//! Wire messages exchanged over a subscription channel.

use serde::{Deserialize, Serialize};

use crate::models::event::{SessionEvent, WireEvent};
use crate::{AppError, Result};

/// Control message sent by a client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Start relaying events for a session.
    Subscribe {
        /// Session to follow.
        #[serde(rename = "sessionId", alias = "session_id")]
        session_id: String,
    },
    /// Stop relaying events for a session.
    Unsubscribe {
        /// Session to drop.
        #[serde(rename = "sessionId", alias = "session_id")]
        session_id: String,
    },
}

impl ClientMessage {
    /// Parse a text frame.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Protocol` for malformed JSON or an unknown type.
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| AppError::Protocol(format!("invalid client message: {e}")))
    }
}

/// Push message sent to a client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// One relayed session event.
    SessionEvent {
        /// Session the event belongs to.
        #[serde(rename = "sessionId", alias = "session_id")]
        session_id: String,
        /// `{eventType, data, sequence}`.
        event: WireEvent,
    },
    /// Acknowledges a subscribe request.
    Subscribed {
        /// Session now followed.
        #[serde(rename = "sessionId", alias = "session_id")]
        session_id: String,
    },
    /// A control message could not be honoured.
    Error {
        /// Human-readable reason.
        message: String,
    },
}

impl ServerMessage {
    /// Wrap a session event for the wire.
    #[must_use]
    pub fn from_event(event: &SessionEvent) -> Self {
        Self::SessionEvent {
            session_id: event.session_id.clone(),
            event: event.to_wire(),
        }
    }

    /// Serialize to a text frame.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Protocol` if serialization fails.
    pub fn to_text(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
