// src/exec/mod.rs

//! Process execution layer.
//!
//! Every task attempt runs in its own OS process so that a crash or runaway
//! task cannot take the orchestrator down with it.
//!
//! - [`launcher`] defines the [`TaskLauncher`] trait execution units call.
//! - [`process`] is the production launcher: it spawns a worker, feeds it the
//!   attempt, forwards its output as log events and handles abort.
//! - [`worker`] is the other end, run by the `dagrun` binary in worker mode.
//! - [`protocol`] holds the frames both sides exchange.

pub mod launcher;
pub mod process;
pub mod protocol;
pub mod worker;

pub use launcher::{AttemptReport, TaskLauncher};
pub use process::ProcessLauncher;
pub use protocol::AttemptRequest;
