use std::sync::{Arc, Mutex};

use dagrun::engine::{LogEvent, Observer, RunEvent, StateMap, StateTransition};
use dagrun::types::ExecutionState;

/// Observer that keeps every event it sees, in order.
///
/// Clones share the same buffer, so keep one and hand the other to the
/// orchestrator.
#[derive(Debug, Clone, Default)]
pub struct RecordingObserver {
    events: Arc<Mutex<Vec<RunEvent>>>,
    complete: Arc<Mutex<Option<bool>>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RunEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn transitions(&self) -> Vec<StateTransition> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                RunEvent::Transition(t) => Some(t),
                RunEvent::Log(_) => None,
            })
            .collect()
    }

    /// States `task` moved into, in order.
    pub fn states_of(&self, task: &str) -> Vec<ExecutionState> {
        self.transitions()
            .into_iter()
            .filter(|t| t.task == task)
            .map(|t| t.to)
            .collect()
    }

    pub fn logs(&self) -> Vec<LogEvent> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                RunEvent::Log(l) => Some(l),
                RunEvent::Transition(_) => None,
            })
            .collect()
    }

    pub fn logs_of(&self, task: &str) -> Vec<String> {
        self.logs()
            .into_iter()
            .filter(|l| l.task == task)
            .map(|l| l.message)
            .collect()
    }

    /// `Some(failed)` once the run-complete notification arrived.
    pub fn run_complete(&self) -> Option<bool> {
        *self.complete.lock().unwrap()
    }
}

impl Observer for RecordingObserver {
    fn on_transition(&mut self, transition: &StateTransition, _states: &StateMap) {
        self.events
            .lock()
            .unwrap()
            .push(RunEvent::Transition(transition.clone()));
    }

    fn on_log(&mut self, event: &LogEvent) {
        self.events.lock().unwrap().push(RunEvent::Log(event.clone()));
    }

    fn on_run_complete(&mut self, failed: bool, _states: &StateMap) {
        *self.complete.lock().unwrap() = Some(failed);
    }
}
