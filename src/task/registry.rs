// src/task/registry.rs

use std::collections::BTreeMap;
use std::fmt;

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::errors::{DagrunError, Result};
use crate::task::Task;

type Factory = Box<dyn Fn(&Value) -> anyhow::Result<Box<dyn Task>> + Send + Sync>;

/// Maps variant names to constructors for task code.
///
/// The same registry is built in the orchestrator (to validate the job
/// definition up front) and in every worker process (to construct the task).
#[derive(Default)]
pub struct TaskRegistry {
    factories: BTreeMap<String, Factory>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task type built by deserializing its `parameters` table.
    pub fn register<T>(&mut self, variant: &str) -> Result<&mut Self>
    where
        T: Task + DeserializeOwned + 'static,
    {
        self.register_fn(variant, |params| {
            let task: T = serde_json::from_value(params.clone())
                .context("could not deserialize task parameters")?;
            Ok(Box::new(task) as Box<dyn Task>)
        })
    }

    /// Register a task variant with a custom constructor.
    pub fn register_fn<F>(&mut self, variant: &str, factory: F) -> Result<&mut Self>
    where
        F: Fn(&Value) -> anyhow::Result<Box<dyn Task>> + Send + Sync + 'static,
    {
        if self.factories.contains_key(variant) {
            return Err(DagrunError::ConfigError(format!(
                "task variant '{variant}' is registered twice"
            )));
        }
        self.factories.insert(variant.to_string(), Box::new(factory));
        Ok(self)
    }

    pub fn contains(&self, variant: &str) -> bool {
        self.factories.contains_key(variant)
    }

    pub fn variants(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    pub fn construct(&self, variant: &str, parameters: &Value) -> anyhow::Result<Box<dyn Task>> {
        let factory = self
            .factories
            .get(variant)
            .with_context(|| format!("unknown task variant '{variant}'"))?;
        factory(parameters)
    }
}

impl fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("variants", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}
