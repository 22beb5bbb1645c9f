// src/engine/state_map.rs

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::engine::events::StateTransition;
use crate::types::{ExecutionState, TaskName};

/// Task names partitioned by execution state.
///
/// Always carries an entry for each of the eight states, even when empty,
/// so serialized snapshots are self-describing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateMap {
    states: BTreeMap<ExecutionState, BTreeSet<TaskName>>,
}

impl Default for StateMap {
    fn default() -> Self {
        Self {
            states: ExecutionState::ALL
                .iter()
                .map(|s| (*s, BTreeSet::new()))
                .collect(),
        }
    }
}

impl StateMap {
    /// Every name starts in `state`.
    pub fn with_all_in<I, S>(names: I, state: ExecutionState) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<TaskName>,
    {
        let mut map = Self::default();
        for name in names {
            map.insert(name.into(), state);
        }
        map
    }

    pub fn insert(&mut self, name: TaskName, state: ExecutionState) {
        for set in self.states.values_mut() {
            set.remove(&name);
        }
        self.states.entry(state).or_default().insert(name);
    }

    /// Move a task according to a transition event.
    pub fn apply(&mut self, transition: &StateTransition) {
        if let Some(set) = self.states.get_mut(&transition.from) {
            set.remove(&transition.task);
        }
        self.states
            .entry(transition.to)
            .or_default()
            .insert(transition.task.clone());
    }

    pub fn state_of(&self, name: &str) -> Option<ExecutionState> {
        self.states
            .iter()
            .find(|(_, names)| names.contains(name))
            .map(|(state, _)| *state)
    }

    pub fn names(&self, state: ExecutionState) -> impl Iterator<Item = &str> {
        self.states
            .get(&state)
            .into_iter()
            .flat_map(|set| set.iter().map(String::as_str))
    }

    pub fn names_in(&self, states: &[ExecutionState]) -> BTreeSet<TaskName> {
        states
            .iter()
            .flat_map(|s| self.names(*s))
            .map(str::to_string)
            .collect()
    }

    pub fn count_in(&self, states: &[ExecutionState]) -> usize {
        states
            .iter()
            .filter_map(|s| self.states.get(s))
            .map(BTreeSet::len)
            .sum()
    }

    pub fn total(&self) -> usize {
        self.states.values().map(BTreeSet::len).sum()
    }

    /// All task names regardless of state.
    pub fn all_names(&self) -> BTreeSet<TaskName> {
        self.names_in(&ExecutionState::ALL)
    }

    /// No task is still `INIT`, `PENDING` or `RUNNING`.
    pub fn is_settled(&self) -> bool {
        self.count_in(&ExecutionState::ACTIVE) == 0
    }

    /// Anything ended `FAILED`, `DEFAULTED` or `ABORTED`.
    pub fn has_failures(&self) -> bool {
        self.count_in(&[
            ExecutionState::Failed,
            ExecutionState::Defaulted,
            ExecutionState::Aborted,
        ]) > 0
    }

    /// Compact one-line summary, e.g. `C:3 F:1 D:2`.
    pub fn summary(&self) -> String {
        self.states
            .iter()
            .filter(|(_, names)| !names.is_empty())
            .map(|(state, names)| format!("{}:{}", state.code(), names.len()))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ExecutionState::*;

    fn moved(task: &str, from: ExecutionState, to: ExecutionState) -> StateTransition {
        StateTransition {
            task: task.into(),
            from,
            to,
        }
    }

    #[test]
    fn default_has_every_state() {
        let map = StateMap::default();
        let json = serde_json::to_value(&map).unwrap();
        let obj = json["states"].as_object().unwrap();
        assert_eq!(obj.len(), 8);
        assert!(obj.contains_key("DEFAULTED"));
    }

    #[test]
    fn apply_moves_between_sets() {
        let mut map = StateMap::with_all_in(["a", "b"], Init);
        assert!(!map.is_settled());

        map.apply(&moved("a", Init, Pending));
        map.apply(&moved("a", Pending, Running));
        map.apply(&moved("a", Running, Completed));
        map.apply(&moved("b", Init, Pending));
        map.apply(&moved("b", Pending, Defaulted));

        assert_eq!(map.state_of("a"), Some(Completed));
        assert_eq!(map.count_in(&ExecutionState::FAILURES), 1);
        assert_eq!(map.total(), 2);
        assert!(map.is_settled());
        assert!(map.has_failures());
        assert_eq!(map.summary(), "C:1 D:1");
    }

    #[test]
    fn insert_replaces_previous_state() {
        let mut map = StateMap::with_all_in(["a"], Failed);
        map.insert("a".into(), Init);
        assert_eq!(map.state_of("a"), Some(Init));
        assert_eq!(map.total(), 1);
    }
}
