//! Composite observation deadline: absolute cap plus activity-reset idle timer.

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::config::ObservationConfig;

/// Which deadline resolved an observation.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Deadline {
    /// The non-resettable cap measured from observation start.
    AbsoluteCap,
    /// No activity within the current idle window.
    Idle,
}

/// Two independent monotonic deadlines for one observation.
///
/// Activity moves only the idle deadline, and always to `now + idle`,
/// so the first activity replaces the longer initial grace.
#[derive(Debug, Clone)]
pub struct ObservationTimer {
    cap_at: Instant,
    idle_at: Instant,
    idle: Duration,
}

impl ObservationTimer {
    /// Start both timers now.
    #[must_use]
    pub fn start(absolute_cap: Duration, initial_idle: Duration, idle: Duration) -> Self {
        let now = Instant::now();
        Self {
            cap_at: now + absolute_cap,
            idle_at: now + initial_idle,
            idle,
        }
    }

    /// Start both timers from configuration.
    #[must_use]
    pub fn from_config(config: &ObservationConfig) -> Self {
        Self::start(config.absolute_cap(), config.initial_idle(), config.idle())
    }

    /// Re-arm the idle deadline after an activity signal.
    pub fn record_activity(&mut self) {
        self.idle_at = Instant::now() + self.idle;
    }

    /// Earliest pending deadline.
    #[must_use]
    pub fn next_deadline(&self) -> (Instant, Deadline) {
        if self.cap_at <= self.idle_at {
            (self.cap_at, Deadline::AbsoluteCap)
        } else {
            (self.idle_at, Deadline::Idle)
        }
    }
}
