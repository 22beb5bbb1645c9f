// src/dag/selection.rs

//! Which tasks take part in a run.
//!
//! `--skip`, `--run-to` and `--run-from` never remove tasks from the graph;
//! they only decide which units start out marked as skipped.

use std::collections::BTreeSet;

use crate::dag::TaskGraph;
use crate::errors::{DagrunError, Result};
use crate::types::TaskName;

/// Task selection requested on the command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    pub skip: Vec<TaskName>,
    pub run_to: Option<TaskName>,
    pub run_from: Option<TaskName>,
}

impl Selection {
    pub fn is_empty(&self) -> bool {
        self.skip.is_empty() && self.run_to.is_none() && self.run_from.is_none()
    }

    /// Resolve the selection against `graph` into the set of skipped tasks.
    ///
    /// - `run_to`: keep the target and its transitive dependencies.
    /// - `run_from`: keep the target and its transitive dependents.
    /// - `skip`: always skipped, on top of the above.
    pub fn skipped(&self, graph: &TaskGraph) -> Result<BTreeSet<TaskName>> {
        for name in self
            .skip
            .iter()
            .chain(self.run_to.iter())
            .chain(self.run_from.iter())
        {
            if !graph.contains(name) {
                return Err(DagrunError::TaskNotFound(name.clone()));
            }
        }

        let mut keep: BTreeSet<TaskName> = graph.names().map(str::to_string).collect();

        if let Some(target) = &self.run_to {
            let mut upstream = graph.ancestors_of(target);
            upstream.insert(target.clone());
            keep.retain(|n| upstream.contains(n));
        }

        if let Some(target) = &self.run_from {
            let mut downstream = graph.descendants_of(target);
            downstream.insert(target.clone());
            keep.retain(|n| downstream.contains(n));
        }

        for name in &self.skip {
            keep.remove(name);
        }

        Ok(graph
            .names()
            .filter(|n| !keep.contains(*n))
            .map(str::to_string)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::TaskNode;

    // a -> b -> c, a -> d
    fn chain() -> TaskGraph {
        let mut b = TaskNode::new("b", "Sleep");
        b.depends_on = vec!["a".into()];
        let mut c = TaskNode::new("c", "Sleep");
        c.depends_on = vec!["b".into()];
        let mut d = TaskNode::new("d", "Sleep");
        d.depends_on = vec!["a".into()];
        TaskGraph::from_nodes([TaskNode::new("a", "Sleep"), b, c, d]).unwrap()
    }

    fn names(set: BTreeSet<TaskName>) -> Vec<String> {
        set.into_iter().collect()
    }

    #[test]
    fn empty_selection_skips_nothing() {
        let sel = Selection::default();
        assert!(sel.is_empty());
        assert!(sel.skipped(&chain()).unwrap().is_empty());
    }

    #[test]
    fn run_to_keeps_upstream_only() {
        let sel = Selection {
            run_to: Some("b".into()),
            ..Selection::default()
        };
        assert_eq!(names(sel.skipped(&chain()).unwrap()), vec!["c", "d"]);
    }

    #[test]
    fn run_from_keeps_downstream_only() {
        let sel = Selection {
            run_from: Some("b".into()),
            ..Selection::default()
        };
        assert_eq!(names(sel.skipped(&chain()).unwrap()), vec!["a", "d"]);
    }

    #[test]
    fn skip_combines_with_ranges() {
        let sel = Selection {
            skip: vec!["b".into()],
            run_from: Some("a".into()),
            ..Selection::default()
        };
        assert_eq!(names(sel.skipped(&chain()).unwrap()), vec!["b"]);
    }

    #[test]
    fn unknown_names_are_rejected() {
        let sel = Selection {
            skip: vec!["nope".into()],
            ..Selection::default()
        };
        assert!(matches!(
            sel.skipped(&chain()),
            Err(DagrunError::TaskNotFound(ref n)) if n == "nope"
        ));
    }
}
