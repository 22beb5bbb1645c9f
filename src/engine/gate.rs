// src/engine/gate.rs

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Bounds how many units may run task code at the same time.
///
/// A limit of 0 means unbounded; acquiring then never waits.
#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    semaphore: Option<Arc<Semaphore>>,
    limit: usize,
}

/// Held while a unit is `RUNNING`. Dropping it frees the slot, including
/// when the holder is cancelled mid-attempt.
#[derive(Debug)]
pub struct GatePermit {
    _permit: Option<OwnedSemaphorePermit>,
}

impl ConcurrencyGate {
    pub fn new(limit: usize) -> Self {
        let semaphore = (limit > 0).then(|| Arc::new(Semaphore::new(limit)));
        Self { semaphore, limit }
    }

    pub fn unbounded() -> Self {
        Self::new(0)
    }

    /// Configured limit, 0 when unbounded.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Free slots right now, `None` when unbounded.
    pub fn available(&self) -> Option<usize> {
        self.semaphore.as_ref().map(|s| s.available_permits())
    }

    /// Wait for a free slot. Waiters are served in FIFO order.
    pub async fn acquire(&self) -> GatePermit {
        let permit = match &self.semaphore {
            // The semaphore is never closed, so this only yields `None` when
            // the gate is unbounded.
            Some(sem) => Arc::clone(sem).acquire_owned().await.ok(),
            None => None,
        };
        GatePermit { _permit: permit }
    }
}
