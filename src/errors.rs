// src/errors.rs

//! Crate-wide error type and result alias.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::TaskName;

#[derive(Error, Debug)]
pub enum DagrunError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("task '{task}' has unknown dependency '{dep}'")]
    UnknownDependency { task: TaskName, dep: TaskName },

    #[error("task '{0}' cannot depend on itself")]
    SelfDependency(TaskName),

    #[error("task '{0}' is defined more than once")]
    DuplicateTask(TaskName),

    #[error("Cycle detected in DAG: {0}")]
    DagCycle(String),

    #[error("task '{task}' uses unknown variant '{variant}'")]
    UnknownVariant { task: TaskName, variant: String },

    #[error("invalid parameters for task '{task}': {reason}")]
    InvalidParameters { task: TaskName, reason: String },

    #[error("Task not found: {0}")]
    TaskNotFound(TaskName),

    #[error("{}", describe_mismatch(.missing, .unknown))]
    CheckpointMismatch {
        missing: Vec<TaskName>,
        unknown: Vec<TaskName>,
    },

    #[error("checkpoint is unreadable: {0}")]
    CheckpointCorrupt(String),

    #[error("no checkpoint found at {0:?}")]
    NoCheckpoint(PathBuf),

    #[error("failed to spawn process for task '{task}': {source}")]
    Spawn {
        task: TaskName,
        #[source]
        source: std::io::Error,
    },

    #[error("worker protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

fn describe_mismatch(missing: &[TaskName], unknown: &[TaskName]) -> String {
    let mut msg = String::from("task names in checkpoint do not match the job definition");
    if !missing.is_empty() {
        msg.push_str("; missing in checkpoint: ");
        msg.push_str(&missing.join(", "));
    }
    if !unknown.is_empty() {
        msg.push_str("; unknown in checkpoint: ");
        msg.push_str(&unknown.join(", "));
    }
    msg
}

pub type Result<T> = std::result::Result<T, DagrunError>;
