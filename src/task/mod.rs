// src/task/mod.rs

//! User-facing task API.
//!
//! - [`lifecycle`] defines the [`Task`] trait, [`TaskContext`] and the hook
//!   sequence run inside a worker process.
//! - [`registry`] maps variant names to task constructors.
//! - [`builtin`] holds the variants shipped with the binary.

pub mod builtin;
pub mod lifecycle;
pub mod registry;

pub use lifecycle::{Task, TaskContext, TaskMetadata, TaskStore, run_abort, run_lifecycle};
pub use registry::TaskRegistry;
