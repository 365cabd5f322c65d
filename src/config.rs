//! Global configuration parsing and validation.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// Session loop limits.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RunnerConfig {
    /// Hard cap on tool calls per session run before it is forced to `error`.
    #[serde(default = "default_max_tool_iterations")]
    pub max_tool_iterations: u32,
    /// Upper bound on a single tool invocation; 0 means no bound.
    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_seconds: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_tool_iterations: default_max_tool_iterations(),
            tool_timeout_seconds: default_tool_timeout(),
        }
    }
}

impl RunnerConfig {
    /// Tool timeout as a `Duration`, `None` when unbounded.
    #[must_use]
    pub fn tool_timeout(&self) -> Option<Duration> {
        (self.tool_timeout_seconds > 0).then(|| Duration::from_secs(self.tool_timeout_seconds))
    }
}

fn default_max_tool_iterations() -> u32 {
    25
}

fn default_tool_timeout() -> u64 {
    120
}

/// Deadlines applied while observing a session.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ObservationConfig {
    /// Non-resettable cap measured from observation start.
    #[serde(default = "default_absolute_cap")]
    pub absolute_cap_seconds: u64,
    /// Idle grace before the first activity signal arrives.
    #[serde(default = "default_initial_idle")]
    pub initial_idle_seconds: u64,
    /// Idle window re-armed by every activity signal.
    #[serde(default = "default_idle")]
    pub idle_seconds: u64,
    /// Interval between status polls in the fallback path.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
}

impl Default for ObservationConfig {
    fn default() -> Self {
        Self {
            absolute_cap_seconds: default_absolute_cap(),
            initial_idle_seconds: default_initial_idle(),
            idle_seconds: default_idle(),
            poll_interval_seconds: default_poll_interval(),
        }
    }
}

impl ObservationConfig {
    /// Absolute cap as a `Duration`.
    #[must_use]
    pub fn absolute_cap(&self) -> Duration {
        Duration::from_secs(self.absolute_cap_seconds)
    }

    /// Initial idle grace as a `Duration`.
    #[must_use]
    pub fn initial_idle(&self) -> Duration {
        Duration::from_secs(self.initial_idle_seconds)
    }

    /// Idle reset window as a `Duration`.
    #[must_use]
    pub fn idle(&self) -> Duration {
        Duration::from_secs(self.idle_seconds)
    }

    /// Poll interval as a `Duration`.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }
}

fn default_absolute_cap() -> u64 {
    600
}

fn default_initial_idle() -> u64 {
    300
}

fn default_idle() -> u64 {
    120
}

fn default_poll_interval() -> u64 {
    5
}

/// Repository lock defaults.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct LockConfig {
    /// TTL applied when a caller does not pass one.
    #[serde(default = "default_lock_ttl")]
    pub default_ttl_seconds: u64,
    /// How often expired lock rows are swept.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            default_ttl_seconds: default_lock_ttl(),
            sweep_interval_seconds: default_sweep_interval(),
        }
    }
}

impl LockConfig {
    /// Default lock TTL as a `Duration`.
    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_seconds)
    }

    /// Sweep interval as a `Duration`.
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds.max(1))
    }
}

fn default_lock_ttl() -> u64 {
    1800
}

fn default_sweep_interval() -> u64 {
    300
}

/// Admission queue settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AdmissionConfig {
    /// Maximum time one request may hold the slot; 0 means unbounded.
    #[serde(default = "default_hold_timeout")]
    pub hold_timeout_seconds: u64,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            hold_timeout_seconds: default_hold_timeout(),
        }
    }
}

impl AdmissionConfig {
    /// Hold timeout as a `Duration`, `None` when unbounded.
    #[must_use]
    pub fn hold_timeout(&self) -> Option<Duration> {
        (self.hold_timeout_seconds > 0).then(|| Duration::from_secs(self.hold_timeout_seconds))
    }
}

fn default_hold_timeout() -> u64 {
    300
}

/// Event bus delivery settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct EventsConfig {
    /// Events retained for sessions without listeners; 0 drops them.
    #[serde(default)]
    pub orphan_buffer_capacity: usize,
    /// Maximum age of a buffered orphan event.
    #[serde(default = "default_orphan_buffer_seconds")]
    pub orphan_buffer_seconds: u64,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            orphan_buffer_capacity: 0,
            orphan_buffer_seconds: default_orphan_buffer_seconds(),
        }
    }
}

impl EventsConfig {
    /// Orphan event lifetime as a `Duration`.
    #[must_use]
    pub fn orphan_ttl(&self) -> Duration {
        Duration::from_secs(self.orphan_buffer_seconds)
    }
}

fn default_orphan_buffer_seconds() -> u64 {
    5
}

fn default_http_port() -> u16 {
    3000
}

fn default_retention_days() -> u32 {
    30
}

fn default_db_path() -> PathBuf {
    PathBuf::from(".conductor/conductor.db")
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// `SQLite` database file.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    /// HTTP port for the gateway router.
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Days after termination before session rows are purged.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    /// Endpoint of the HTTP inference backend, if one is used.
    #[serde(default)]
    pub inference_url: Option<String>,
    /// Session loop limits.
    #[serde(default)]
    pub runner: RunnerConfig,
    /// Observation deadlines.
    #[serde(default)]
    pub observation: ObservationConfig,
    /// Repository lock defaults.
    #[serde(default)]
    pub locks: LockConfig,
    /// Admission queue settings.
    #[serde(default)]
    pub admission: AdmissionConfig,
    /// Event bus delivery settings.
    #[serde(default)]
    pub events: EventsConfig,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            http_port: default_http_port(),
            retention_days: default_retention_days(),
            inference_url: None,
            runner: RunnerConfig::default(),
            observation: ObservationConfig::default(),
            locks: LockConfig::default(),
            admission: AdmissionConfig::default(),
            events: EventsConfig::default(),
        }
    }
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.runner.max_tool_iterations == 0 {
            return Err(AppError::Config(
                "runner.max_tool_iterations must be greater than zero".into(),
            ));
        }

        if self.observation.absolute_cap_seconds == 0 {
            return Err(AppError::Config(
                "observation.absolute_cap_seconds must be greater than zero".into(),
            ));
        }

        if self.observation.idle_seconds == 0 || self.observation.initial_idle_seconds == 0 {
            return Err(AppError::Config(
                "observation idle windows must be greater than zero".into(),
            ));
        }

        if self.observation.idle_seconds > self.observation.initial_idle_seconds {
            return Err(AppError::Config(
                "observation.idle_seconds must not exceed initial_idle_seconds".into(),
            ));
        }

        if self.observation.poll_interval_seconds == 0 {
            return Err(AppError::Config(
                "observation.poll_interval_seconds must be greater than zero".into(),
            ));
        }

        if self.locks.default_ttl_seconds == 0 {
            return Err(AppError::Config(
                "locks.default_ttl_seconds must be greater than zero".into(),
            ));
        }

        Ok(())
    }
}
