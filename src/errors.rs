//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
///
/// Lock denial and observation timeouts are ordinary outcomes and are
/// modelled as values elsewhere, never as variants here.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Persistence failure when interacting with `SQLite`.
    Db(String),
    /// Requested entity does not exist.
    NotFound(String),
    /// Inference capability failed; fatal for the current turn.
    Inference(String),
    /// A tool invocation failed; recovered inside the session loop.
    Tool(String),
    /// Subscription channel or HTTP gateway failure.
    Gateway(String),
    /// Inbound wire message could not be parsed or normalized.
    Protocol(String),
    /// Repository lock bookkeeping failure (not a denial).
    Lock(String),
    /// Admission slot could not be held (hold timeout, queue closed).
    Admission(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Db(msg) => write!(f, "db: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Inference(msg) => write!(f, "inference: {msg}"),
            Self::Tool(msg) => write!(f, "tool: {msg}"),
            Self::Gateway(msg) => write!(f, "gateway: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::Lock(msg) => write!(f, "lock: {msg}"),
            Self::Admission(msg) => write!(f, "admission: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::Db(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        Self::Gateway(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
