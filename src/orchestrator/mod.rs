//! Session orchestration.
//!
//! Covers the session control surface (reserve, start, stop, delete) and
//! lock-gated scheduled starts.

pub mod scheduled;
pub mod session_manager;

pub use scheduled::{LaunchOutcome, ScheduledLauncher, ScheduledRun};
pub use session_manager::SessionManager;
