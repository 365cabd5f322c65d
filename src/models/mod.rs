//! Domain model module declarations.

pub mod event;
pub mod lock;
pub mod session;
pub mod tool;
