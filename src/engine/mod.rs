// src/engine/mod.rs

//! Execution engine.
//!
//! - [`unit`] drives one task through its lifecycle.
//! - [`gate`] bounds how many units run at once.
//! - [`store`] is the shared key/value store passed between tasks.
//! - [`events`] carries state transitions and task logs to the
//!   [`aggregator`], which maintains the per-state view and feeds observers.
//! - [`orchestrator`] wires all of the above together for one run.

pub mod aggregator;
pub mod events;
pub mod gate;
pub mod orchestrator;
pub mod state_map;
pub mod store;
pub mod unit;

pub use aggregator::{Observer, ProgressObserver, StateAggregator, StateView};
pub use events::{EventSender, LogEvent, RunEvent, StateTransition};
pub use gate::ConcurrencyGate;
pub use orchestrator::{Orchestrator, RunOptions, RunSummary};
pub use state_map::StateMap;
pub use store::{SharedStore, StoreWrite};
pub use unit::{ExecutionUnit, Seed, UnitHandle, UnitOutcome};
