#![forbid(unsafe_code)]

//! Backend core for multi-agent orchestration: a per-session tool-calling
//! loop, per-session event fan-out with a subscription gateway, and the
//! coordination primitives (repository locks, inference admission,
//! observation deadlines) that keep concurrent sessions from starving each
//! other.

pub mod config;
pub mod coordination;
pub mod errors;
pub mod events;
pub mod gateway;
pub mod models;
pub mod observer;
pub mod orchestrator;
pub mod persistence;
pub mod runner;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
