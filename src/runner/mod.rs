//! Session runner: drives one agent's tool-calling loop.
//!
//! Inference is an opaque per-turn capability behind
//! [`inference::InferenceBackend`]; tools are looked up by name in a
//! [`tools::ToolRegistry`]. Neither defines semantics beyond request and
//! result exchange.

pub mod inference;
pub mod session_runner;
pub mod tools;

pub use session_runner::{RunSummary, SessionRunner};
