//! Session events and their wire normalization.
//!
//! Producers and the wire format disagree on field names (`eventType` vs
//! `type`, `data` vs `payload`, a string vs a list of text blocks for
//! assistant content). Everything is folded into [`EventPayload`] at the
//! boundary so downstream code branches on one enum only.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{AppError, Result};

/// Discriminant of a [`SessionEvent`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Intermediate reasoning text.
    Thinking,
    /// Progress note about a tool call.
    ToolStatus,
    /// Model-authored message.
    Assistant,
    /// Loop finished with a final answer.
    Result,
    /// Loop ended without an explicit result.
    SessionExited,
    /// Loop ended on a failure.
    Error,
}

impl EventType {
    /// Wire representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Thinking => "thinking",
            Self::ToolStatus => "tool_status",
            Self::Assistant => "assistant",
            Self::Result => "result",
            Self::SessionExited => "session_exited",
            Self::Error => "error",
        }
    }

    /// Parse the wire representation, accepting camelCase spellings.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Protocol` for unknown event types.
    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "thinking" => Ok(Self::Thinking),
            "tool_status" | "toolStatus" => Ok(Self::ToolStatus),
            "assistant" => Ok(Self::Assistant),
            "result" => Ok(Self::Result),
            "session_exited" | "sessionExited" => Ok(Self::SessionExited),
            "error" => Ok(Self::Error),
            other => Err(AppError::Protocol(format!("unknown event type: {other}"))),
        }
    }

    /// Terminal events end an observation immediately.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Result | Self::SessionExited | Self::Error)
    }

    /// Activity events re-arm the idle timer.
    #[must_use]
    pub fn is_activity(self) -> bool {
        matches!(self, Self::Thinking | Self::ToolStatus | Self::Assistant)
    }
}

/// One content block of an assistant message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContentBlock {
    /// Block kind; only `text` is produced.
    #[serde(rename = "type")]
    pub kind: String,
    /// Block text.
    #[serde(default)]
    pub text: String,
}

/// Assistant message content: a plain string or a list of blocks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum MessageContent {
    /// Plain text content.
    Text(String),
    /// Structured content blocks.
    Blocks(Vec<ContentBlock>),
}

impl MessageContent {
    /// Concatenated text of all `text` blocks.
    #[must_use]
    pub fn text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Blocks(blocks) => blocks
                .iter()
                .filter(|b| b.kind == "text")
                .map(|b| b.text.as_str())
                .collect::<Vec<_>>()
                .join(""),
        }
    }
}

/// Canonical, typed payload of a session event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventPayload {
    /// Free-form intermediate text.
    Thinking {
        /// Reasoning text.
        text: String,
    },
    /// Tool progress note.
    ToolStatus {
        /// Human-readable status line.
        status_message: String,
    },
    /// Model-authored message.
    Assistant {
        /// Message content.
        content: MessageContent,
    },
    /// Terminal success marker carrying the final answer.
    Result {
        /// Final answer text.
        content: String,
    },
    /// Terminal marker for a loop that ended with no explicit result.
    SessionExited {
        /// Why the loop ended.
        reason: String,
    },
    /// Terminal failure marker.
    Error {
        /// Failure description.
        message: String,
    },
}

impl EventPayload {
    /// Discriminant of this payload.
    #[must_use]
    pub fn event_type(&self) -> EventType {
        match self {
            Self::Thinking { .. } => EventType::Thinking,
            Self::ToolStatus { .. } => EventType::ToolStatus,
            Self::Assistant { .. } => EventType::Assistant,
            Self::Result { .. } => EventType::Result,
            Self::SessionExited { .. } => EventType::SessionExited,
            Self::Error { .. } => EventType::Error,
        }
    }

    /// Wire `data` object for this payload.
    #[must_use]
    pub fn to_data(&self) -> Value {
        match self {
            Self::Thinking { text } => json!({ "text": text }),
            Self::ToolStatus { status_message } => json!({ "statusMessage": status_message }),
            Self::Assistant { content } => json!({ "message": { "content": content } }),
            Self::Result { content } => json!({ "content": content }),
            Self::SessionExited { reason } => json!({ "reason": reason }),
            Self::Error { message } => json!({ "error": { "message": message } }),
        }
    }

    /// Build a payload from an event type and a loosely shaped `data` value.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Protocol` if a required field is missing under
    /// every accepted spelling.
    pub fn from_data(event_type: EventType, data: &Value) -> Result<Self> {
        match event_type {
            EventType::Thinking => Ok(Self::Thinking {
                text: first_str(data, &["text", "thinking", "content"])
                    .or_else(|| data.as_str().map(str::to_owned))
                    .unwrap_or_default(),
            }),
            EventType::ToolStatus => {
                let status_message =
                    first_str(data, &["statusMessage", "status_message", "status", "message"])
                        .or_else(|| data.as_str().map(str::to_owned))
                        .ok_or_else(|| {
                            AppError::Protocol("tool_status event missing statusMessage".into())
                        })?;
                Ok(Self::ToolStatus { status_message })
            }
            EventType::Assistant => {
                let raw = data
                    .get("message")
                    .and_then(|m| m.get("content"))
                    .or_else(|| data.get("content"))
                    .ok_or_else(|| {
                        AppError::Protocol("assistant event missing message.content".into())
                    })?;
                let content: MessageContent = serde_json::from_value(raw.clone())
                    .map_err(|e| AppError::Protocol(format!("invalid assistant content: {e}")))?;
                Ok(Self::Assistant { content })
            }
            EventType::Result => Ok(Self::Result {
                content: first_str(data, &["content", "result", "text"]).unwrap_or_default(),
            }),
            EventType::SessionExited => Ok(Self::SessionExited {
                reason: first_str(data, &["reason", "message"]).unwrap_or_default(),
            }),
            EventType::Error => {
                let message = data
                    .get("error")
                    .and_then(|e| {
                        e.get("message")
                            .and_then(Value::as_str)
                            .or_else(|| e.as_str())
                    })
                    .map(str::to_owned)
                    .or_else(|| first_str(data, &["message"]))
                    .unwrap_or_else(|| "unknown error".into());
                Ok(Self::Error { message })
            }
        }
    }
}

fn first_str(data: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| data.get(*k).and_then(Value::as_str))
        .map(str::to_owned)
}

/// An immutable event emitted by a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEvent {
    /// Owning session.
    pub session_id: String,
    /// Per-session, strictly increasing sequence number (1-based).
    pub sequence: u64,
    /// Typed payload.
    pub payload: EventPayload,
}

impl SessionEvent {
    /// Discriminant of this event.
    #[must_use]
    pub fn event_type(&self) -> EventType {
        self.payload.event_type()
    }

    /// Wire form `{eventType, data, sequence}`.
    #[must_use]
    pub fn to_wire(&self) -> WireEvent {
        WireEvent {
            event_type: self.event_type(),
            data: self.payload.to_data(),
            sequence: self.sequence,
        }
    }

    /// Normalize an event for `session_id` from any accepted wire shape.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Protocol` if no event type can be found or the
    /// payload is missing required fields.
    pub fn from_value(session_id: &str, raw: &Value) -> Result<Self> {
        let type_raw = first_str(raw, &["eventType", "event_type", "type"])
            .ok_or_else(|| AppError::Protocol("event missing eventType".into()))?;
        let event_type = EventType::parse(&type_raw)?;
        let null = Value::Null;
        let data = raw
            .get("data")
            .or_else(|| raw.get("payload"))
            .unwrap_or(&null);
        let sequence = raw
            .get("sequence")
            .or_else(|| raw.get("seq"))
            .and_then(Value::as_u64)
            .unwrap_or(0);

        Ok(Self {
            session_id: session_id.to_owned(),
            sequence,
            payload: EventPayload::from_data(event_type, data)?,
        })
    }
}

/// `{eventType, data, sequence}` as carried inside a `session_event` push.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WireEvent {
    /// Event discriminant.
    pub event_type: EventType,
    /// Type-specific payload.
    pub data: Value,
    /// Per-session sequence number.
    pub sequence: u64,
}
