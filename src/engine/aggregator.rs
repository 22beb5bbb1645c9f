// src/engine/aggregator.rs

//! Single consumer of the run's event queue.
//!
//! The aggregator keeps the per-state name sets up to date, publishes a fresh
//! [`StateMap`] after every transition, forwards task logs into `tracing` and
//! fans every event out to the registered observers.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::engine::events::{EventReceiver, LogEvent, RunEvent, StateTransition};
use crate::engine::state_map::StateMap;
use crate::logging::emit_task_log;
use crate::types::{ExecutionState, TaskName};

/// Receives run events. Every method defaults to doing nothing.
pub trait Observer: Send {
    fn on_transition(&mut self, _transition: &StateTransition, _states: &StateMap) {}

    fn on_log(&mut self, _event: &LogEvent) {}

    /// Called once, after every unit has settled.
    fn on_run_complete(&mut self, _failed: bool, _states: &StateMap) {}
}

/// Read-only query handle on the aggregated state.
#[derive(Debug, Clone)]
pub struct StateView {
    rx: watch::Receiver<Arc<StateMap>>,
}

impl StateView {
    pub fn snapshot(&self) -> Arc<StateMap> {
        Arc::clone(&self.rx.borrow())
    }

    pub fn count_in(&self, states: &[ExecutionState]) -> usize {
        self.rx.borrow().count_in(states)
    }

    pub fn names_in(&self, states: &[ExecutionState]) -> BTreeSet<TaskName> {
        self.rx.borrow().names_in(states)
    }

    pub fn is_settled(&self) -> bool {
        self.rx.borrow().is_settled()
    }

    /// Resolve on the next published update (or immediately if the
    /// aggregator is gone).
    pub async fn changed(&mut self) {
        let _ = self.rx.changed().await;
    }

    /// Resolve once no unit is `INIT`, `PENDING` or `RUNNING`.
    pub async fn wait_until_settled(&self) -> Arc<StateMap> {
        let mut rx = self.rx.clone();
        let settled = rx
            .wait_for(|m| m.is_settled())
            .await
            .map(|map| Arc::clone(&map))
            .ok();
        settled.unwrap_or_else(|| Arc::clone(&rx.borrow()))
    }
}

pub struct StateAggregator {
    states: StateMap,
    publish: watch::Sender<Arc<StateMap>>,
    events: EventReceiver,
    observers: Vec<Box<dyn Observer>>,
}

impl StateAggregator {
    pub fn new(
        initial: StateMap,
        events: EventReceiver,
        observers: Vec<Box<dyn Observer>>,
    ) -> (Self, StateView) {
        let (publish, rx) = watch::channel(Arc::new(initial.clone()));
        (
            Self {
                states: initial,
                publish,
                events,
                observers,
            },
            StateView { rx },
        )
    }

    /// Consume events until `run_complete` fires, drain whatever is left and
    /// notify observers that the run is over.
    pub async fn run(mut self, run_complete: CancellationToken) -> StateMap {
        loop {
            tokio::select! {
                biased;
                event = self.events.recv() => match event {
                    Some(event) => self.handle(event),
                    None => break,
                },
                _ = run_complete.cancelled() => break,
            }
        }

        while let Ok(event) = self.events.try_recv() {
            self.handle(event);
        }

        let failed = self.states.has_failures();
        debug!(failed, summary = %self.states.summary(), "run complete; notifying observers");
        for observer in self.observers.iter_mut() {
            observer.on_run_complete(failed, &self.states);
        }

        self.states
    }

    fn handle(&mut self, event: RunEvent) {
        match event {
            RunEvent::Transition(transition) => {
                self.states.apply(&transition);
                self.publish.send_replace(Arc::new(self.states.clone()));
                for observer in self.observers.iter_mut() {
                    observer.on_transition(&transition, &self.states);
                }
            }
            RunEvent::Log(log) => {
                emit_task_log(&log.task, log.severity, &log.message);
                for observer in self.observers.iter_mut() {
                    observer.on_log(&log);
                }
            }
        }
    }
}

/// Logs progress whenever a task reaches a terminal state.
#[derive(Debug, Default)]
pub struct ProgressObserver;

impl Observer for ProgressObserver {
    fn on_transition(&mut self, transition: &StateTransition, states: &StateMap) {
        if !transition.to.is_terminal() {
            return;
        }
        let done = states.total() - states.count_in(&ExecutionState::ACTIVE);
        info!(
            task = %transition.task,
            state = %transition.to,
            progress = %format!("{done}/{}", states.total()),
            summary = %states.summary(),
            "task finished"
        );
    }

    fn on_run_complete(&mut self, failed: bool, states: &StateMap) {
        if failed {
            info!(summary = %states.summary(), "run finished with failures");
        } else {
            info!(summary = %states.summary(), "run finished successfully");
        }
    }
}
