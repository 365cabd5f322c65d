//! In-process fan-out of session events.
//!
//! The [`registry::ListenerRegistry`] is owned by the subscription gateway
//! and handed to the [`bus::EventBus`] by `Arc`, so there is no ambient
//! global listener state: the registry lives from gateway construction to
//! gateway shutdown.

pub mod bus;
pub mod registry;

pub use bus::{EventBus, SessionPublisher};
pub use registry::{EventStream, ListenerRegistry};
