//! Observer side of the subscription gateway.
//!
//! Dashboards, tests and schedulers watch a session through a
//! [`client::Subscription`], optionally backed by status polling, under a
//! composite deadline from [`timer`]. [`outcome::observe`] ties these
//! together and always releases its [`guard::ObservationGuard`].

pub mod client;
pub mod guard;
pub mod outcome;
pub mod poller;
pub mod timer;

pub use client::{GatewayClient, Signal, Subscription};
pub use guard::{ObservationGuard, SessionControl};
pub use outcome::{observe, ObservationOutcome, ObservationReport};
pub use poller::{HttpSessionApi, StatusReport, StatusSource};
pub use timer::{Deadline, ObservationTimer};
