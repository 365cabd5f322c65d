//! Tool call requests and invocation records.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool call requested by the inference capability.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    /// Correlation id echoed back with the result.
    pub id: String,
    /// Registered tool name.
    pub name: String,
    /// Tool arguments as given by the model.
    #[serde(default)]
    pub arguments: Value,
}

/// Result of one tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolOutcome {
    /// Tool returned a value.
    Success {
        /// Returned value.
        result: Value,
    },
    /// Tool failed; the message is fed back to the model as a synthetic result.
    Failure {
        /// Failure description.
        error_message: String,
    },
}

impl ToolOutcome {
    /// Whether the invocation failed.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure { .. })
    }

    /// The text handed back to the model for this outcome.
    #[must_use]
    pub fn transcript_text(&self) -> String {
        match self {
            Self::Success { result } => match result {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            },
            Self::Failure { error_message } => format!("Error: {error_message}"),
        }
    }
}

/// `{name, arguments, result|errorMessage, durationMs}` kept in the working transcript.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolInvocation {
    /// Correlation id of the originating call.
    pub call_id: String,
    /// Tool name.
    pub name: String,
    /// Arguments passed.
    pub arguments: Value,
    /// Success value or error message.
    pub outcome: ToolOutcome,
    /// Wall-clock duration.
    pub duration_ms: u64,
}
