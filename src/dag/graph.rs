// src/dag/graph.rs

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::errors::{DagrunError, Result};
use crate::types::TaskName;

/// One task in the job: what to run and what it waits for.
///
/// Created once at load time and never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskNode {
    pub name: TaskName,
    /// Registered variant that provides the task code.
    pub variant: String,
    /// Direct dependencies, in declaration order.
    pub depends_on: Vec<TaskName>,
    /// Total attempts allowed (>= 1).
    pub max_attempts: u32,
    /// Delay between a failed attempt and the next one.
    pub backoff: Duration,
    /// Opaque construction parameters.
    pub parameters: serde_json::Value,
}

impl TaskNode {
    pub fn new(name: impl Into<TaskName>, variant: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            variant: variant.into(),
            depends_on: Vec::new(),
            max_attempts: 1,
            backoff: Duration::ZERO,
            parameters: crate::config::model::empty_parameters(),
        }
    }
}

/// Immutable task graph keyed by task name.
///
/// Construction validates the structure: unique names, no missing or
/// self-referencing dependencies, and no cycles. Every `TaskGraph` in
/// existence is therefore a DAG.
#[derive(Debug, Clone)]
pub struct TaskGraph {
    nodes: BTreeMap<TaskName, TaskNode>,
    /// Reverse edges: task -> tasks that list it in `depends_on`.
    dependents: HashMap<TaskName, Vec<TaskName>>,
}

impl TaskGraph {
    /// Build and validate a graph from a list of nodes.
    pub fn from_nodes(nodes: impl IntoIterator<Item = TaskNode>) -> Result<Self> {
        let mut map: BTreeMap<TaskName, TaskNode> = BTreeMap::new();
        for node in nodes {
            if map.contains_key(&node.name) {
                return Err(DagrunError::DuplicateTask(node.name));
            }
            map.insert(node.name.clone(), node);
        }

        validate_dependencies(&map)?;
        validate_acyclic(&map)?;

        let mut dependents: HashMap<TaskName, Vec<TaskName>> = HashMap::new();
        for (name, node) in map.iter() {
            for dep in node.depends_on.iter() {
                dependents.entry(dep.clone()).or_default().push(name.clone());
            }
        }

        Ok(Self {
            nodes: map,
            dependents,
        })
    }

    /// All task names, in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(|s| s.as_str())
    }

    pub fn nodes(&self) -> impl Iterator<Item = &TaskNode> {
        self.nodes.values()
    }

    pub fn node(&self, name: &str) -> Option<&TaskNode> {
        self.nodes.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Immediate dependencies of a task.
    pub fn dependencies_of(&self, name: &str) -> &[TaskName] {
        self.nodes
            .get(name)
            .map(|n| n.depends_on.as_slice())
            .unwrap_or(&[])
    }

    /// Immediate dependents of a task (tasks that list this one in `depends_on`).
    pub fn dependents_of(&self, name: &str) -> &[TaskName] {
        self.dependents
            .get(name)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Transitive dependencies of `name`, excluding `name` itself.
    pub fn ancestors_of(&self, name: &str) -> BTreeSet<TaskName> {
        self.walk(name, |n| self.dependencies_of(n))
    }

    /// Transitive dependents of `name`, excluding `name` itself.
    pub fn descendants_of(&self, name: &str) -> BTreeSet<TaskName> {
        self.walk(name, |n| self.dependents_of(n))
    }

    fn walk<'a, F>(&'a self, start: &str, next: F) -> BTreeSet<TaskName>
    where
        F: Fn(&str) -> &'a [TaskName],
    {
        let mut stack: Vec<TaskName> = next(start).to_vec();
        let mut visited: BTreeSet<TaskName> = BTreeSet::new();

        while let Some(current) = stack.pop() {
            if !visited.insert(current.clone()) {
                continue;
            }
            stack.extend(next(&current).iter().cloned());
        }

        visited
    }
}

fn validate_dependencies(nodes: &BTreeMap<TaskName, TaskNode>) -> Result<()> {
    for (name, node) in nodes.iter() {
        for dep in node.depends_on.iter() {
            if dep == name {
                return Err(DagrunError::SelfDependency(name.clone()));
            }
            if !nodes.contains_key(dep) {
                return Err(DagrunError::UnknownDependency {
                    task: name.clone(),
                    dep: dep.clone(),
                });
            }
        }
    }
    Ok(())
}

fn validate_acyclic(nodes: &BTreeMap<TaskName, TaskNode>) -> Result<()> {
    // Edge direction: dep -> task.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for name in nodes.keys() {
        graph.add_node(name.as_str());
    }

    for (name, node) in nodes.iter() {
        for dep in node.depends_on.iter() {
            graph.add_edge(dep.as_str(), name.as_str(), ());
        }
    }

    // A topological sort will fail if there is a cycle.
    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(DagrunError::DagCycle(format!(
            "cycle detected in task graph involving task '{}'",
            cycle.node_id()
        ))),
    }
}
