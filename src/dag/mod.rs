// src/dag/mod.rs

//! Task graph representation.
//!
//! - [`graph`] holds the immutable, validated DAG of task nodes.
//! - [`selection`] resolves `--skip` / `--run-to` / `--run-from` into the
//!   set of tasks that start out skipped.

pub mod graph;
pub mod selection;

pub use graph::{TaskGraph, TaskNode};
pub use selection::Selection;
