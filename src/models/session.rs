//! Session model and lifecycle helpers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{AppError, Result};

/// Lifecycle status for an agent session.
///
/// `Running` is the only non-terminal state; every transition moves
/// toward one of the three terminal states and never back.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Loop is executing or waiting on inference/tools.
    Running,
    /// Loop finished with a final answer.
    Idle,
    /// Loop ended on a fatal failure.
    Error,
    /// Loop was cancelled externally.
    Stopped,
}

impl SessionStatus {
    /// Whether no further events will be produced in this state.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }

    /// Wire representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Idle => "idle",
            Self::Error => "error",
            Self::Stopped => "stopped",
        }
    }

    /// Parse the wire representation.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Protocol` for unknown values.
    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "running" => Ok(Self::Running),
            "idle" => Ok(Self::Idle),
            "error" => Ok(Self::Error),
            "stopped" => Ok(Self::Stopped),
            other => Err(AppError::Protocol(format!("unknown session status: {other}"))),
        }
    }
}

/// Session domain entity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Session {
    /// Unique record identifier.
    pub id: String,
    /// Project the agent works against.
    pub project_id: String,
    /// Agent assigned to the session.
    pub agent_id: String,
    /// Current lifecycle status.
    pub status: SessionStatus,
    /// Completed inference rounds.
    pub total_turns: u32,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last status or turn change.
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Construct a new running session with a generated identifier.
    #[must_use]
    pub fn new(project_id: String, agent_id: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            project_id,
            agent_id,
            status: SessionStatus::Running,
            total_turns: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Determine whether a lifecycle transition is permitted.
    #[must_use]
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        self.status == SessionStatus::Running && next.is_terminal()
    }

    /// The externally visible projection of this session.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id.clone(),
            status: self.status,
            total_turns: self.total_turns,
        }
    }
}

/// `{id, status, totalTurns}` as returned by the session control surface.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    /// Session identifier.
    pub id: String,
    /// Current lifecycle status.
    pub status: SessionStatus,
    /// Completed inference rounds.
    pub total_turns: u32,
}
