//! Coordination primitives guarding the two shared resources.
//!
//! - [`admission::AdmissionQueue`] serializes calls to the inference
//!   backend behind a single FIFO slot.
//! - [`repo_lock::RepoLockManager`] grants auto-expiring, per-repository
//!   mutual exclusion to scheduled executions.
//!
//! A session never holds both in a nested order that could deadlock: the
//! repo lock is taken before a session starts, the admission slot only
//! around individual inference calls.

pub mod admission;
pub mod repo_lock;
