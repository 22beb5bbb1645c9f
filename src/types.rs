// src/types.rs

//! Small shared vocabulary types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Canonical task name type used throughout the crate.
pub type TaskName = String;

/// Lifecycle state of a single execution unit.
///
/// `Init` is the only fresh starting state; `Completed` and `Skip` may also be
/// seeded from a checkpoint or the command line. Everything from `Completed`
/// onwards is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionState {
    Init,
    Pending,
    Running,
    Completed,
    Failed,
    Defaulted,
    Aborted,
    Skip,
}

impl ExecutionState {
    /// All eight states, in declaration order.
    pub const ALL: [ExecutionState; 8] = [
        ExecutionState::Init,
        ExecutionState::Pending,
        ExecutionState::Running,
        ExecutionState::Completed,
        ExecutionState::Failed,
        ExecutionState::Defaulted,
        ExecutionState::Aborted,
        ExecutionState::Skip,
    ];

    /// States in which a unit is still making progress.
    pub const ACTIVE: [ExecutionState; 3] = [
        ExecutionState::Init,
        ExecutionState::Pending,
        ExecutionState::Running,
    ];

    /// States that count against the exit code.
    pub const FAILURES: [ExecutionState; 2] =
        [ExecutionState::Failed, ExecutionState::Defaulted];

    pub fn is_terminal(self) -> bool {
        !Self::ACTIVE.contains(&self)
    }

    /// A dependency that ends in one of these states defaults its dependents.
    pub fn blocks_dependents(self) -> bool {
        matches!(
            self,
            ExecutionState::Failed | ExecutionState::Defaulted | ExecutionState::Aborted
        )
    }

    /// Whether a unit saved in this state must execute again after a restart.
    pub fn needs_rerun(self) -> bool {
        !matches!(self, ExecutionState::Completed | ExecutionState::Skip)
    }

    /// Single-letter code used in compact summaries.
    pub fn code(self) -> char {
        match self {
            ExecutionState::Init => '_',
            ExecutionState::Pending => 'P',
            ExecutionState::Running => 'R',
            ExecutionState::Completed => 'C',
            ExecutionState::Failed => 'F',
            ExecutionState::Defaulted => 'D',
            ExecutionState::Aborted => 'A',
            ExecutionState::Skip => 'S',
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionState::Init => "INIT",
            ExecutionState::Pending => "PENDING",
            ExecutionState::Running => "RUNNING",
            ExecutionState::Completed => "COMPLETED",
            ExecutionState::Failed => "FAILED",
            ExecutionState::Defaulted => "DEFAULTED",
            ExecutionState::Aborted => "ABORTED",
            ExecutionState::Skip => "SKIP",
        }
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity attached to task log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl Default for Severity {
    fn default() -> Self {
        Severity::Info
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "debug" => Ok(Severity::Debug),
            "info" => Ok(Severity::Info),
            "warn" | "warning" => Ok(Severity::Warning),
            "error" => Ok(Severity::Error),
            "critical" => Ok(Severity::Critical),
            other => Err(format!(
                "invalid severity: {other} (expected debug, info, warning, error or critical)"
            )),
        }
    }
}
