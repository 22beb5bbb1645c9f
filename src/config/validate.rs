// src/config/validate.rs

use std::time::Duration;

use crate::config::model::{ConfigSection, JobFile, RawJobFile, TaskConfig};
use crate::dag::{TaskGraph, TaskNode};
use crate::errors::{DagrunError, Result};
use crate::task::TaskRegistry;

impl TryFrom<RawJobFile> for JobFile {
    type Error = DagrunError;

    fn try_from(raw: RawJobFile) -> std::result::Result<Self, Self::Error> {
        ensure_has_tasks(&raw)?;
        validate_global_config(&raw.config)?;

        let mut nodes = Vec::with_capacity(raw.task.len());
        for (name, task) in raw.task.into_iter() {
            nodes.push(task_node(name, task)?);
        }

        // Dependency references and cycles are checked by the graph itself.
        let graph = TaskGraph::from_nodes(nodes)?;
        Ok(JobFile::new_unchecked(raw.config, graph))
    }
}

/// Check that every task names a registered variant whose parameters
/// construct cleanly.
///
/// Collects every problem before failing so the whole job definition can be
/// fixed in one pass.
pub fn validate_variants(graph: &TaskGraph, registry: &TaskRegistry) -> Result<()> {
    let mut problems = Vec::new();

    for node in graph.nodes() {
        if !registry.contains(&node.variant) {
            problems.push(DagrunError::UnknownVariant {
                task: node.name.clone(),
                variant: node.variant.clone(),
            });
            continue;
        }
        if let Err(e) = registry.construct(&node.variant, &node.parameters) {
            problems.push(DagrunError::InvalidParameters {
                task: node.name.clone(),
                reason: format!("{e:#}"),
            });
        }
    }

    match problems.len() {
        0 => Ok(()),
        1 => Err(problems.remove(0)),
        _ => {
            let lines: Vec<String> = problems.iter().map(|p| format!("  - {p}")).collect();
            Err(DagrunError::ConfigError(format!(
                "errors exist in the job definition for {} tasks:\n{}",
                problems.len(),
                lines.join("\n")
            )))
        }
    }
}

fn ensure_has_tasks(raw: &RawJobFile) -> Result<()> {
    if raw.task.is_empty() {
        return Err(DagrunError::ConfigError(
            "job definition must contain at least one [task.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_global_config(cfg: &ConfigSection) -> Result<()> {
    if cfg.name.trim().is_empty() || cfg.name.contains(['/', '\\']) {
        return Err(DagrunError::ConfigError(format!(
            "[config].name must be a non-empty file name (got {:?})",
            cfg.name
        )));
    }

    ensure_interval("checkpoint_interval_seconds", cfg.checkpoint_interval_seconds, false)?;
    ensure_interval("tick_interval_seconds", cfg.tick_interval_seconds, false)?;
    ensure_interval("abort_grace_seconds", cfg.abort_grace_seconds, true)?;

    Ok(())
}

fn ensure_interval(field: &str, value: f64, zero_ok: bool) -> Result<()> {
    let valid = value.is_finite() && (value > 0.0 || (zero_ok && value == 0.0));
    if !valid {
        return Err(DagrunError::ConfigError(format!(
            "[config].{field} must be a {} number of seconds (got {value})",
            if zero_ok { "non-negative" } else { "positive" }
        )));
    }
    seconds(&format!("[config].{field}"), value)?;
    Ok(())
}

/// Convert a validated, non-negative number of seconds into a `Duration`.
fn seconds(field: &str, value: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(value).map_err(|_| {
        DagrunError::ConfigError(format!("{field} is too large (got {value} seconds)"))
    })
}

fn task_node(name: String, task: TaskConfig) -> Result<TaskNode> {
    if task.variant.trim().is_empty() {
        return Err(DagrunError::ConfigError(format!(
            "task '{name}' must name a variant"
        )));
    }
    if task.max_attempts == 0 {
        return Err(DagrunError::ConfigError(format!(
            "task '{name}': max_attempts must be >= 1 (got 0)"
        )));
    }
    if !task.backoff.is_finite() || task.backoff < 0.0 {
        return Err(DagrunError::ConfigError(format!(
            "task '{name}': backoff must be a non-negative number of seconds (got {})",
            task.backoff
        )));
    }

    let backoff = seconds(&format!("task '{name}': backoff"), task.backoff)?;

    Ok(TaskNode {
        name,
        variant: task.variant,
        depends_on: task.depends_on,
        max_attempts: task.max_attempts,
        backoff,
        parameters: task.parameters,
    })
}
