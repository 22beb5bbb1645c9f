// src/checkpoint/mod.rs

//! Durable run progress.
//!
//! While a run is active the writer loop saves a [`CheckpointSnapshot`] on a
//! fixed interval. When the run ends the checkpoint is deleted if everything
//! succeeded and written one last time otherwise, so `--restart` can pick up
//! the unfinished tasks.

pub mod file;
pub mod memory;
pub mod snapshot;

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::aggregator::StateView;
use crate::engine::state_map::StateMap;
use crate::engine::store::SharedStore;
use crate::errors::{DagrunError, Result};

pub use file::FileCheckpointer;
pub use memory::MemoryCheckpointer;
pub use snapshot::{CheckpointSnapshot, RestorePlan, plan_restore};

/// Somewhere a checkpoint can be kept between runs.
pub trait Checkpointer: Send + Sync {
    /// Replace the stored checkpoint atomically.
    fn write(&self, snapshot: &CheckpointSnapshot) -> Result<()>;

    /// Load the stored checkpoint. `NoCheckpoint` if there is none.
    fn read(&self) -> Result<CheckpointSnapshot>;

    /// Remove the stored checkpoint; succeeds if there is none.
    fn clear(&self) -> Result<()>;

    /// Human readable location, for logs.
    fn describe(&self) -> String;
}

/// What happened to the checkpoint at the end of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalCheckpoint {
    Cleared,
    Written,
}

/// Save progress every `interval` until `run_complete` fires.
///
/// A failed write is logged and retried on the next tick.
pub async fn write_periodically(
    checkpointer: Arc<dyn Checkpointer>,
    view: StateView,
    store: SharedStore,
    interval: Duration,
    run_complete: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick fires immediately; nothing has happened yet.
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = run_complete.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let snapshot = CheckpointSnapshot {
            states: StateMap::clone(&view.snapshot()),
            store: store.snapshot(),
        };
        match write_blocking(Arc::clone(&checkpointer), snapshot).await {
            Ok(()) => debug!(path = %checkpointer.describe(), "checkpoint written"),
            Err(e) => warn!(
                path = %checkpointer.describe(),
                error = %e,
                "could not write checkpoint; will retry"
            ),
        }
    }
}

/// Clear the checkpoint after a clean run, write it otherwise.
pub async fn finalize(
    checkpointer: Arc<dyn Checkpointer>,
    states: &StateMap,
    store: &SharedStore,
) -> Result<FinalCheckpoint> {
    if states.has_failures() {
        let snapshot = CheckpointSnapshot {
            states: states.clone(),
            store: store.snapshot(),
        };
        write_blocking(Arc::clone(&checkpointer), snapshot).await?;
        info!(path = %checkpointer.describe(), "run incomplete; checkpoint kept for --restart");
        Ok(FinalCheckpoint::Written)
    } else {
        let cp = Arc::clone(&checkpointer);
        blocking(move || cp.clear()).await?;
        debug!(path = %checkpointer.describe(), "run succeeded; checkpoint removed");
        Ok(FinalCheckpoint::Cleared)
    }
}

async fn write_blocking(checkpointer: Arc<dyn Checkpointer>, snapshot: CheckpointSnapshot) -> Result<()> {
    blocking(move || checkpointer.write(&snapshot)).await
}

async fn blocking<F>(f: F) -> Result<()>
where
    F: FnOnce() -> Result<()> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| DagrunError::Other(anyhow::anyhow!("checkpoint worker failed: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ExecutionState;

    #[tokio::test]
    async fn clean_run_clears_checkpoint() {
        let cp = Arc::new(MemoryCheckpointer::new());
        cp.write(&CheckpointSnapshot::default()).unwrap();

        let states = StateMap::with_all_in(["a"], ExecutionState::Completed);
        let done = finalize(cp.clone(), &states, &SharedStore::new()).await.unwrap();

        assert_eq!(done, FinalCheckpoint::Cleared);
        assert!(cp.is_empty());
    }

    #[tokio::test]
    async fn failed_run_keeps_checkpoint() {
        let cp = Arc::new(MemoryCheckpointer::new());
        let states = StateMap::with_all_in(["a"], ExecutionState::Aborted);

        let done = finalize(cp.clone(), &states, &SharedStore::new()).await.unwrap();
        assert_eq!(done, FinalCheckpoint::Written);
        assert_eq!(cp.read().unwrap().states, states);
    }
}
