// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::dag::TaskGraph;

/// Top-level job definition as read from a TOML file.
///
/// ```toml
/// [config]
/// name = "nightly"
/// max_concurrency = 2
///
/// [task.extract]
/// variant = "Shell"
/// max_attempts = 3
/// backoff = 5
/// parameters = { cmd = "./extract.sh" }
///
/// [task.load]
/// variant = "Shell"
/// depends_on = ["extract"]
/// parameters = { cmd = "./load.sh" }
/// ```
///
/// Only `[task.<name>]` sections are required.
#[derive(Debug, Clone, Deserialize)]
pub struct RawJobFile {
    /// Run-level settings from `[config]`.
    #[serde(default)]
    pub config: ConfigSection,

    /// All tasks from `[task.<name>]`, keyed by task name.
    #[serde(default)]
    pub task: BTreeMap<String, TaskConfig>,
}

/// A validated job definition: run settings plus an immutable task graph.
///
/// Can only be obtained through `TryFrom<RawJobFile>`, which runs all
/// load-time validation.
#[derive(Debug, Clone)]
pub struct JobFile {
    config: ConfigSection,
    graph: TaskGraph,
}

impl JobFile {
    pub(crate) fn new_unchecked(config: ConfigSection, graph: TaskGraph) -> Self {
        Self { config, graph }
    }

    pub fn config(&self) -> &ConfigSection {
        &self.config
    }

    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    /// Split into owned parts for wiring the orchestrator.
    pub fn into_parts(self) -> (ConfigSection, TaskGraph) {
        (self.config, self.graph)
    }
}

/// `[config]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigSection {
    /// Job name; also the checkpoint file name.
    #[serde(default = "default_name")]
    pub name: String,

    /// Maximum number of tasks running at once. `0` means unbounded.
    #[serde(default)]
    pub max_concurrency: usize,

    /// How often the checkpoint is rewritten while the run is active.
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval_seconds: f64,

    /// Cadence of the completion detector and event drains.
    #[serde(default = "default_tick_interval")]
    pub tick_interval_seconds: f64,

    /// Directory holding checkpoint files.
    #[serde(default = "default_checkpoint_dir")]
    pub checkpoint_dir: PathBuf,

    /// How long an aborted task may take to wind down before it is killed.
    #[serde(default = "default_abort_grace")]
    pub abort_grace_seconds: f64,
}

fn default_name() -> String {
    "dagrun".to_string()
}

fn default_checkpoint_interval() -> f64 {
    10.0
}

fn default_tick_interval() -> f64 {
    0.25
}

fn default_checkpoint_dir() -> PathBuf {
    PathBuf::from(".dagrun")
}

fn default_abort_grace() -> f64 {
    30.0
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            name: default_name(),
            max_concurrency: 0,
            checkpoint_interval_seconds: default_checkpoint_interval(),
            tick_interval_seconds: default_tick_interval(),
            checkpoint_dir: default_checkpoint_dir(),
            abort_grace_seconds: default_abort_grace(),
        }
    }
}

impl ConfigSection {
    pub fn checkpoint_interval(&self) -> Duration {
        saturating_seconds(self.checkpoint_interval_seconds)
    }

    pub fn tick_interval(&self) -> Duration {
        saturating_seconds(self.tick_interval_seconds)
    }

    pub fn abort_grace(&self) -> Duration {
        saturating_seconds(self.abort_grace_seconds)
    }
}

/// Loading rejects out-of-range values; this only guards sections built by
/// hand.
fn saturating_seconds(value: f64) -> Duration {
    if value.is_nan() || value <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(value).unwrap_or(Duration::MAX)
}

/// `[task.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskConfig {
    /// Registered task variant to construct (e.g. `"Shell"`).
    pub variant: String,

    /// Tasks that must reach a terminal state before this one runs.
    #[serde(default, alias = "after")]
    pub depends_on: Vec<String>,

    /// Total attempts allowed, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Seconds to wait between a failed attempt and the next one.
    #[serde(default)]
    pub backoff: f64,

    /// Opaque construction parameters handed to the variant's factory.
    #[serde(default = "empty_parameters")]
    pub parameters: serde_json::Value,
}

fn default_max_attempts() -> u32 {
    1
}

pub(crate) fn empty_parameters() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_task_gets_defaults() {
        let raw: RawJobFile = toml::from_str(
            r#"
[task.a]
variant = "Sleep"
"#,
        )
        .unwrap();

        assert_eq!(raw.config.name, "dagrun");
        assert_eq!(raw.config.max_concurrency, 0);
        let a = &raw.task["a"];
        assert_eq!(a.max_attempts, 1);
        assert_eq!(a.backoff, 0.0);
        assert!(a.depends_on.is_empty());
        assert_eq!(a.parameters, empty_parameters());
    }

    #[test]
    fn huge_intervals_do_not_panic() {
        let cfg = ConfigSection {
            checkpoint_interval_seconds: 1e300,
            tick_interval_seconds: f64::NAN,
            ..ConfigSection::default()
        };
        assert_eq!(cfg.checkpoint_interval(), Duration::MAX);
        assert_eq!(cfg.tick_interval(), Duration::ZERO);
        assert_eq!(cfg.abort_grace(), Duration::from_secs(30));
    }

    #[test]
    fn parameters_become_json() {
        let raw: RawJobFile = toml::from_str(
            r#"
[task.a]
variant = "Shell"
after = ["b"]
parameters = { cmd = "echo hi", retries = 2 }

[task.b]
variant = "Sleep"
"#,
        )
        .unwrap();

        let a = &raw.task["a"];
        assert_eq!(a.depends_on, vec!["b".to_string()]);
        assert_eq!(a.parameters["cmd"], "echo hi");
        assert_eq!(a.parameters["retries"], 2);
    }
}
