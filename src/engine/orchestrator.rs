// src/engine/orchestrator.rs

//! Root loop of a run.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::checkpoint::{self, Checkpointer, FinalCheckpoint};
use crate::config::ConfigSection;
use crate::dag::TaskGraph;
use crate::engine::aggregator::{Observer, StateAggregator, StateView};
use crate::engine::events::event_queue;
use crate::engine::gate::ConcurrencyGate;
use crate::engine::state_map::StateMap;
use crate::engine::store::SharedStore;
use crate::engine::unit::{ExecutionUnit, Seed, UnitDeps, UnitOutcome, resolver_from, state_cell};
use crate::errors::Result;
use crate::exec::launcher::TaskLauncher;
use crate::types::{ExecutionState, TaskName};

/// Run-level knobs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunOptions {
    /// 0 means unbounded.
    pub max_concurrency: usize,
    pub checkpoint_interval: Duration,
    /// Upper bound on how long completion detection can lag.
    pub tick_interval: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_concurrency: 0,
            checkpoint_interval: Duration::from_secs(10),
            tick_interval: Duration::from_millis(250),
        }
    }
}

impl From<&ConfigSection> for RunOptions {
    fn from(cfg: &ConfigSection) -> Self {
        Self {
            max_concurrency: cfg.max_concurrency,
            checkpoint_interval: cfg.checkpoint_interval(),
            tick_interval: cfg.tick_interval(),
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub states: StateMap,
    /// Units that ran to completion on their own, by name.
    pub outcomes: BTreeMap<TaskName, UnitOutcome>,
    pub checkpoint: Option<FinalCheckpoint>,
}

impl RunSummary {
    /// Number of units that ended `FAILED` or `DEFAULTED`.
    pub fn exit_code(&self) -> usize {
        self.states.count_in(&ExecutionState::FAILURES)
    }

    pub fn state_of(&self, name: &str) -> Option<ExecutionState> {
        self.states.state_of(name)
    }

    pub fn aborted(&self) -> usize {
        self.states.count_in(&[ExecutionState::Aborted])
    }

    pub fn attempts_of(&self, name: &str) -> Option<u32> {
        self.outcomes.get(name).map(|o| o.attempts)
    }
}

pub struct Orchestrator {
    graph: TaskGraph,
    launcher: Arc<dyn TaskLauncher>,
    options: RunOptions,
    seeds: BTreeMap<TaskName, Seed>,
    store: SharedStore,
    observers: Vec<Box<dyn Observer>>,
    checkpointer: Option<Arc<dyn Checkpointer>>,
}

impl Orchestrator {
    pub fn new(graph: TaskGraph, launcher: Arc<dyn TaskLauncher>) -> Self {
        Self {
            graph,
            launcher,
            options: RunOptions::default(),
            seeds: BTreeMap::new(),
            store: SharedStore::new(),
            observers: Vec::new(),
            checkpointer: None,
        }
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    /// Override how individual units start. Unlisted tasks run fresh.
    pub fn with_seeds(mut self, seeds: BTreeMap<TaskName, Seed>) -> Self {
        self.seeds.extend(seeds);
        self
    }

    pub fn with_store(mut self, store: SharedStore) -> Self {
        self.store = store;
        self
    }

    pub fn with_observer(mut self, observer: impl Observer + 'static) -> Self {
        self.observers.push(Box::new(observer));
        self
    }

    pub fn with_checkpointer(mut self, checkpointer: Arc<dyn Checkpointer>) -> Self {
        self.checkpointer = Some(checkpointer);
        self
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Run every unit to a terminal state.
    ///
    /// Cancelling `cancel` aborts all in-flight units; the run still settles
    /// and finalizes normally afterwards.
    pub async fn run(self, cancel: CancellationToken) -> Result<RunSummary> {
        let Orchestrator {
            graph,
            launcher,
            options,
            seeds,
            store,
            observers,
            checkpointer,
        } = self;

        info!(
            tasks = graph.len(),
            max_concurrency = options.max_concurrency,
            "starting run"
        );

        let (events, event_rx) = event_queue();
        let (aggregator, view) = StateAggregator::new(
            StateMap::with_all_in(graph.names(), ExecutionState::Init),
            event_rx,
            observers,
        );
        let run_complete = CancellationToken::new();
        let aggregating = tokio::spawn(aggregator.run(run_complete.clone()));

        // Every handle must exist before the first unit looks up a dependency.
        let mut cells = Vec::with_capacity(graph.len());
        let mut handles = HashMap::with_capacity(graph.len());
        for node in graph.nodes() {
            let (cell, handle) = state_cell(&node.name);
            cells.push((node.clone(), cell));
            handles.insert(node.name.clone(), handle);
        }

        let deps = UnitDeps {
            events,
            gate: ConcurrencyGate::new(options.max_concurrency),
            store: store.clone(),
            launcher,
            resolver: resolver_from(handles),
        };

        let mut units = JoinSet::new();
        for (node, cell) in cells {
            let seed = seeds.get(&node.name).copied().unwrap_or_default();
            let unit = ExecutionUnit::new(node, seed, cell, deps.clone());
            units.spawn(unit.drive(cancel.clone()));
        }
        drop(deps);

        let writer = checkpointer.as_ref().map(|cp| {
            tokio::spawn(checkpoint::write_periodically(
                Arc::clone(cp),
                view.clone(),
                store.clone(),
                options.checkpoint_interval,
                run_complete.clone(),
            ))
        });

        wait_until_settled(view.clone(), options.tick_interval).await;
        run_complete.cancel();

        let mut outcomes = BTreeMap::new();
        while let Some(joined) = units.join_next().await {
            match joined {
                Ok(Ok(outcome)) => {
                    outcomes.insert(outcome.name.clone(), outcome);
                }
                Ok(Err(cancelled)) => info!(task = %cancelled.name, "unit aborted"),
                Err(e) => error!(error = %e, "execution unit panicked"),
            }
        }

        let states = match aggregating.await {
            Ok(states) => states,
            Err(e) => {
                error!(error = %e, "state aggregator failed");
                StateMap::clone(&view.snapshot())
            }
        };

        if let Some(writer) = writer {
            if let Err(e) = writer.await {
                warn!(error = %e, "checkpoint writer task failed");
            }
        }

        let final_checkpoint = match checkpointer {
            Some(cp) => match checkpoint::finalize(Arc::clone(&cp), &states, &store).await {
                Ok(done) => Some(done),
                Err(e) => {
                    error!(path = %cp.describe(), error = %e, "could not write final checkpoint");
                    None
                }
            },
            None => None,
        };

        let summary = RunSummary {
            states,
            outcomes,
            checkpoint: final_checkpoint,
        };
        if summary.exit_code() > 0 || summary.aborted() > 0 {
            warn!(
                failed = summary.exit_code(),
                aborted = summary.aborted(),
                summary = %summary.states.summary(),
                "run did not fully succeed"
            );
        }
        Ok(summary)
    }
}

/// Completion detector: returns once no unit is `INIT`, `PENDING` or
/// `RUNNING`. Wakes on every state change, and at least every `tick`.
async fn wait_until_settled(mut view: StateView, tick: Duration) {
    loop {
        if view.is_settled() {
            return;
        }
        tokio::select! {
            _ = view.changed() => {}
            _ = tokio::time::sleep(tick) => {}
        }
    }
}
