#![allow(dead_code)]

use std::collections::BTreeMap;

use dagrun::config::{ConfigSection, JobFile, RawJobFile, TaskConfig};
use dagrun::dag::TaskGraph;
use serde_json::Value;

/// Builder for `JobFile` to simplify test setup.
pub struct JobFileBuilder {
    raw: RawJobFile,
}

impl JobFileBuilder {
    pub fn new() -> Self {
        Self {
            raw: RawJobFile {
                config: ConfigSection::default(),
                task: BTreeMap::new(),
            },
        }
    }

    pub fn with_task(mut self, name: &str, task: TaskConfig) -> Self {
        self.raw.task.insert(name.to_string(), task);
        self
    }

    pub fn with_max_concurrency(mut self, n: usize) -> Self {
        self.raw.config.max_concurrency = n;
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.raw.config.name = name.to_string();
        self
    }

    pub fn raw(self) -> RawJobFile {
        self.raw
    }

    pub fn build(self) -> JobFile {
        JobFile::try_from(self.raw).expect("Failed to build valid job from builder")
    }

    pub fn build_graph(self) -> TaskGraph {
        self.build().into_parts().1
    }
}

impl Default for JobFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `TaskConfig`.
pub struct TaskConfigBuilder {
    task: TaskConfig,
}

impl TaskConfigBuilder {
    pub fn new(variant: &str) -> Self {
        Self {
            task: TaskConfig {
                variant: variant.to_string(),
                depends_on: vec![],
                max_attempts: 1,
                backoff: 0.0,
                parameters: Value::Object(Default::default()),
            },
        }
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.task.depends_on.push(dep.to_string());
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.task.max_attempts = n;
        self
    }

    pub fn backoff(mut self, secs: f64) -> Self {
        self.task.backoff = secs;
        self
    }

    pub fn param(mut self, key: &str, value: impl Into<Value>) -> Self {
        if let Value::Object(map) = &mut self.task.parameters {
            map.insert(key.to_string(), value.into());
        }
        self
    }

    pub fn build(self) -> TaskConfig {
        self.task
    }
}

/// Graph from `(name, deps)` pairs, every task using the `Sleep` variant.
pub fn graph(tasks: &[(&str, &[&str])]) -> TaskGraph {
    let mut builder = JobFileBuilder::new();
    for (name, deps) in tasks {
        let mut task = TaskConfigBuilder::new("Sleep");
        for dep in deps.iter() {
            task = task.after(dep);
        }
        builder = builder.with_task(name, task.build());
    }
    builder.build_graph()
}
