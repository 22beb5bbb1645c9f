// src/engine/unit.rs

//! Execution unit: drives one task from `INIT` to a terminal state.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::dag::TaskNode;
use crate::engine::events::EventSender;
use crate::engine::gate::ConcurrencyGate;
use crate::engine::store::SharedStore;
use crate::exec::launcher::TaskLauncher;
use crate::exec::protocol::AttemptRequest;
use crate::types::{ExecutionState, Severity, TaskName};

/// How a unit starts out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Seed {
    /// Run normally. `is_restart` is set when resuming from a checkpoint.
    Fresh { is_restart: bool },
    /// Wait for dependencies, then end `SKIP` without running.
    Skip,
    /// Already finished in an earlier run: jump straight to this state.
    Restored(ExecutionState),
}

impl Default for Seed {
    fn default() -> Self {
        Seed::Fresh { is_restart: false }
    }
}

/// Read-only view of a unit's state, handed to dependents.
#[derive(Debug, Clone)]
pub struct UnitHandle {
    name: TaskName,
    state: watch::Receiver<ExecutionState>,
}

impl UnitHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ExecutionState {
        *self.state.borrow()
    }

    /// Resolve once the unit reaches a terminal state.
    pub async fn wait(&self) -> ExecutionState {
        let mut rx = self.state.clone();
        let settled = rx.wait_for(|s| s.is_terminal()).await.map(|s| *s).ok();
        // A unit dropped without finishing reports its last state.
        settled.unwrap_or_else(|| *rx.borrow())
    }
}

/// Looks up sibling units by name.
pub type Resolver = Arc<dyn Fn(&str) -> Option<UnitHandle> + Send + Sync>;

/// Build a resolver over a fixed set of handles.
pub fn resolver_from(handles: HashMap<TaskName, UnitHandle>) -> Resolver {
    Arc::new(move |name: &str| handles.get(name).cloned())
}

/// Write half of a unit's state, created before the unit itself so that
/// every handle exists before any unit starts.
#[derive(Debug)]
pub struct StateCell {
    tx: watch::Sender<ExecutionState>,
}

pub fn state_cell(name: &str) -> (StateCell, UnitHandle) {
    let (tx, rx) = watch::channel(ExecutionState::Init);
    (
        StateCell { tx },
        UnitHandle {
            name: name.to_string(),
            state: rx,
        },
    )
}

/// Shared collaborators every unit needs.
#[derive(Clone)]
pub struct UnitDeps {
    pub events: EventSender,
    pub gate: ConcurrencyGate,
    pub store: SharedStore,
    pub launcher: Arc<dyn TaskLauncher>,
    pub resolver: Resolver,
}

impl fmt::Debug for UnitDeps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitDeps")
            .field("gate", &self.gate)
            .finish_non_exhaustive()
    }
}

/// Final result of driving a unit that was not cancelled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitOutcome {
    pub name: TaskName,
    pub state: ExecutionState,
    pub attempts: u32,
}

/// The unit was cancelled and has recorded `ABORTED`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cancelled {
    pub name: TaskName,
    pub attempts: u32,
}

impl fmt::Display for Cancelled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task '{}' was aborted", self.name)
    }
}

impl std::error::Error for Cancelled {}

pub struct ExecutionUnit {
    node: TaskNode,
    seed: Seed,
    cell: StateCell,
    attempts: u32,
    deps: UnitDeps,
}

impl fmt::Debug for ExecutionUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionUnit")
            .field("name", &self.node.name)
            .field("seed", &self.seed)
            .field("state", &self.state())
            .field("attempts", &self.attempts)
            .finish()
    }
}

impl ExecutionUnit {
    pub fn new(node: TaskNode, seed: Seed, cell: StateCell, deps: UnitDeps) -> Self {
        Self {
            node,
            seed,
            cell,
            attempts: 0,
            deps,
        }
    }

    pub fn name(&self) -> &str {
        &self.node.name
    }

    pub fn state(&self) -> ExecutionState {
        *self.cell.tx.borrow()
    }

    /// Drive the unit to a terminal state.
    ///
    /// Returns `Err(Cancelled)` after recording `ABORTED` if `cancel` fires
    /// before the unit finishes on its own.
    pub async fn drive(mut self, cancel: CancellationToken) -> Result<UnitOutcome, Cancelled> {
        if let Seed::Restored(state) = self.seed {
            self.transition(state);
            return Ok(self.outcome());
        }

        if cancel.is_cancelled() {
            return Err(self.abort());
        }
        self.transition(ExecutionState::Pending);

        let deps_ok = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(self.abort()),
            ok = self.await_dependencies() => ok,
        };
        if !deps_ok {
            self.transition(ExecutionState::Defaulted);
            return Ok(self.outcome());
        }

        if self.seed == Seed::Skip {
            self.transition(ExecutionState::Skip);
            return Ok(self.outcome());
        }

        self.attempt_loop(&cancel).await?;
        Ok(self.outcome())
    }

    /// Wait for every dependency, in declaration order. Returns false if any
    /// of them ended in a state that defaults this unit.
    async fn await_dependencies(&self) -> bool {
        let mut ok = true;
        for dep in self.node.depends_on.iter() {
            let Some(handle) = (self.deps.resolver)(dep) else {
                error!(task = %self.node.name, dep = %dep, "dependency has no execution unit");
                ok = false;
                continue;
            };
            let state = handle.wait().await;
            if state.blocks_dependents() {
                debug!(task = %self.node.name, dep = %dep, dep_state = %state, "dependency did not succeed");
                ok = false;
            }
        }
        ok
    }

    /// Run attempts until one succeeds or none are left, recording the final
    /// state. Every transition out of `RUNNING` is emitted while the gate
    /// permit is still held, so the event log never shows more running units
    /// than the gate allows.
    async fn attempt_loop(&mut self, cancel: &CancellationToken) -> Result<(), Cancelled> {
        let is_restart = matches!(self.seed, Seed::Fresh { is_restart: true });

        loop {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(self.abort()),
                permit = self.deps.gate.acquire() => permit,
            };

            self.attempts += 1;
            self.transition(ExecutionState::Running);
            info!(
                task = %self.node.name,
                attempt = self.attempts,
                max_attempts = self.node.max_attempts,
                "starting attempt"
            );

            let request = AttemptRequest {
                name: self.node.name.clone(),
                variant: self.node.variant.clone(),
                parameters: self.node.parameters.clone(),
                depends_on: self.node.depends_on.clone(),
                attempt: self.attempts,
                is_restart: is_restart || self.attempts > 1,
                store: self.deps.store.snapshot(),
            };

            let result = self
                .deps
                .launcher
                .launch(request, self.deps.events.clone(), cancel.clone())
                .await;

            let report = match result {
                Ok(report) => report,
                Err(e) if cancel.is_cancelled() => {
                    warn!(task = %self.node.name, error = %e, "attempt did not stop cleanly");
                    return Err(self.abort());
                }
                Err(e) => {
                    error!(task = %self.node.name, error = %e, "could not run attempt");
                    self.deps
                        .events
                        .log(&self.node.name, Severity::Critical, e.to_string());
                    self.transition(ExecutionState::Failed);
                    return Ok(());
                }
            };

            self.deps.store.merge(&report.store_writes);

            if report.aborted {
                return Err(self.abort());
            }
            if !report.failed {
                self.transition(ExecutionState::Completed);
                return Ok(());
            }
            if self.attempts >= self.node.max_attempts {
                warn!(task = %self.node.name, attempts = self.attempts, "task failed; no attempts left");
                self.transition(ExecutionState::Failed);
                return Ok(());
            }

            warn!(
                task = %self.node.name,
                attempt = self.attempts,
                backoff_secs = self.node.backoff.as_secs_f64(),
                "task failed; retrying"
            );
            self.transition(ExecutionState::Pending);
            drop(permit);

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(self.abort()),
                _ = tokio::time::sleep(self.node.backoff) => {}
            }
        }
    }

    /// Emit the event first, then publish: anything woken by the new state
    /// is guaranteed to log its own transitions after this one.
    fn transition(&mut self, to: ExecutionState) {
        let from = self.state();
        self.deps.events.transition(&self.node.name, from, to);
        self.cell.tx.send_replace(to);
        debug!(task = %self.node.name, %from, %to, "state transition");
    }

    fn abort(&mut self) -> Cancelled {
        info!(task = %self.node.name, from = %self.state(), "aborting");
        self.transition(ExecutionState::Aborted);
        Cancelled {
            name: self.node.name.clone(),
            attempts: self.attempts,
        }
    }

    fn outcome(&self) -> UnitOutcome {
        UnitOutcome {
            name: self.node.name.clone(),
            state: self.state(),
            attempts: self.attempts,
        }
    }
}
