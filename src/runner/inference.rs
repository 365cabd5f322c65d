//! Inference capability abstraction.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::models::tool::ToolCall;
use crate::{AppError, Result};

/// Author of a conversation message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    /// Operator or initial prompt.
    User,
    /// Model output.
    Assistant,
    /// Tool result fed back to the model.
    Tool,
}

/// One entry of the accumulated conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    /// Message author.
    pub role: ChatRole,
    /// Message text.
    pub content: String,
    /// Tool calls requested in an assistant message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Call being answered by a tool message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    /// A user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// An assistant message, optionally requesting tool calls.
    #[must_use]
    pub fn assistant(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
            tool_calls,
            tool_call_id: None,
        }
    }

    /// A tool result answering `call_id`.
    #[must_use]
    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id.into()),
        }
    }
}

/// Schema advertised to the model for one tool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolSchema {
    /// Tool name.
    pub name: String,
    /// What the tool does.
    pub description: String,
    /// JSON schema of the arguments.
    pub parameters: Value,
}

/// Input to one inference round.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InferenceRequest {
    /// Session making the call.
    pub session_id: String,
    /// Agent whose persona/model should answer.
    pub agent_id: String,
    /// Accumulated conversation.
    pub messages: Vec<ChatMessage>,
    /// Tools the model may call.
    pub tools: Vec<ToolSchema>,
}

/// Output of one inference round.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct InferenceResponse {
    /// Intermediate reasoning, if the backend exposes it.
    #[serde(default)]
    pub thinking: Option<String>,
    /// Assistant text.
    #[serde(default)]
    pub content: String,
    /// Tool calls requested; empty means this is the final answer.
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

impl InferenceResponse {
    /// A final answer with no tool calls.
    #[must_use]
    pub fn answer(content: impl Into<String>) -> Self {
        Self {
            thinking: None,
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    /// A response requesting a single tool call.
    #[must_use]
    pub fn tool_call(call: ToolCall) -> Self {
        Self {
            thinking: None,
            content: String::new(),
            tool_calls: vec![call],
        }
    }
}

/// Per-turn inference capability.
pub trait InferenceBackend: Send + Sync {
    /// Run one inference round.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Inference` when the backend fails; the session
    /// treats this as fatal for the turn.
    fn complete(
        &self,
        request: InferenceRequest,
    ) -> Pin<Box<dyn Future<Output = Result<InferenceResponse>> + Send + '_>>;
}

/// Upper bound on one inference round trip, first-token latency included.
const INFERENCE_REQUEST_TIMEOUT: Duration = Duration::from_secs(600);

/// Inference backend reached over HTTP.
///
/// Posts the [`InferenceRequest`] as JSON and expects an
/// [`InferenceResponse`] body.
pub struct HttpInference {
    client: reqwest::Client,
    url: String,
}

impl HttpInference {
    /// Create a backend posting to `url`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Inference` if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(INFERENCE_REQUEST_TIMEOUT)
            .build()
            .map_err(|err| AppError::Inference(format!("failed to build http client: {err}")))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

impl InferenceBackend for HttpInference {
    fn complete(
        &self,
        request: InferenceRequest,
    ) -> Pin<Box<dyn Future<Output = Result<InferenceResponse>> + Send + '_>> {
        Box::pin(async move {
            debug!(
                session_id = %request.session_id,
                messages = request.messages.len(),
                "posting inference request"
            );
            let response = self
                .client
                .post(&self.url)
                .json(&request)
                .send()
                .await
                .map_err(|e| AppError::Inference(format!("request failed: {e}")))?;

            let status = response.status();
            if !status.is_success() {
                return Err(AppError::Inference(format!(
                    "backend returned status {status}"
                )));
            }

            response
                .json::<InferenceResponse>()
                .await
                .map_err(|e| AppError::Inference(format!("invalid response body: {e}")))
        })
    }
}
