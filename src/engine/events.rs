// src/engine/events.rs

//! Events produced during a run.
//!
//! Units and launchers push onto one shared unbounded queue; the state
//! aggregator is its only consumer, so every observer sees events in
//! emission order.

use tokio::sync::mpsc;

use crate::types::{ExecutionState, Severity, TaskName};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateTransition {
    pub task: TaskName,
    pub from: ExecutionState,
    pub to: ExecutionState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEvent {
    pub task: TaskName,
    pub severity: Severity,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    Transition(StateTransition),
    Log(LogEvent),
}

/// Producer half of the event queue.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<RunEvent>,
}

pub type EventReceiver = mpsc::UnboundedReceiver<RunEvent>;

pub fn event_queue() -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender { tx }, rx)
}

impl EventSender {
    pub fn transition(&self, task: &str, from: ExecutionState, to: ExecutionState) {
        self.send(RunEvent::Transition(StateTransition {
            task: task.to_string(),
            from,
            to,
        }));
    }

    pub fn log(&self, task: &str, severity: Severity, message: impl Into<String>) {
        self.send(RunEvent::Log(LogEvent {
            task: task.to_string(),
            severity,
            message: message.into(),
        }));
    }

    fn send(&self, event: RunEvent) {
        // Only fails after the aggregator has shut down, at which point the
        // run is over and late events have nowhere to go.
        if self.tx.send(event).is_err() {
            tracing::trace!("event queue closed; dropping event");
        }
    }
}
