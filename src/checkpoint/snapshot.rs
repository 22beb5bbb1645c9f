// src/checkpoint/snapshot.rs

//! Checkpoint contents, their on-disk encoding and restart reclassification.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_json::value::RawValue;

use crate::dag::TaskGraph;
use crate::engine::state_map::StateMap;
use crate::engine::unit::Seed;
use crate::errors::{DagrunError, Result};
use crate::types::{ExecutionState, TaskName};

pub const FORMAT: &str = "dagrun-checkpoint";
pub const VERSION: u32 = 1;

/// Progress of a run at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckpointSnapshot {
    pub states: StateMap,
    #[serde(default)]
    pub store: BTreeMap<String, Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    format: String,
    version: u32,
    written_at: DateTime<Utc>,
    /// blake3 of the `snapshot` bytes exactly as written.
    digest: String,
    snapshot: Box<RawValue>,
}

fn digest_of(snapshot: &RawValue) -> String {
    blake3::hash(snapshot.get().as_bytes()).to_hex().to_string()
}

pub fn encode(snapshot: &CheckpointSnapshot) -> Result<Vec<u8>> {
    let body = serde_json::value::to_raw_value(snapshot)?;
    let envelope = Envelope {
        format: FORMAT.to_string(),
        version: VERSION,
        written_at: Utc::now(),
        digest: digest_of(&body),
        snapshot: body,
    };
    Ok(serde_json::to_vec_pretty(&envelope)?)
}

pub fn decode(bytes: &[u8]) -> Result<CheckpointSnapshot> {
    let envelope: Envelope = serde_json::from_slice(bytes)
        .map_err(|e| DagrunError::CheckpointCorrupt(format!("unreadable envelope: {e}")))?;

    if envelope.format != FORMAT {
        return Err(DagrunError::CheckpointCorrupt(format!(
            "unexpected format '{}'",
            envelope.format
        )));
    }
    if envelope.version != VERSION {
        return Err(DagrunError::CheckpointCorrupt(format!(
            "unsupported version {} (expected {VERSION})",
            envelope.version
        )));
    }
    if digest_of(&envelope.snapshot) != envelope.digest {
        return Err(DagrunError::CheckpointCorrupt(
            "digest does not match contents".to_string(),
        ));
    }

    serde_json::from_str(envelope.snapshot.get())
        .map_err(|e| DagrunError::CheckpointCorrupt(format!("malformed snapshot: {e}")))
}

/// How a resumed run should start.
#[derive(Debug, Clone, PartialEq)]
pub struct RestorePlan {
    pub seeds: BTreeMap<TaskName, Seed>,
    pub store: BTreeMap<String, Value>,
}

impl RestorePlan {
    /// Tasks that will execute again.
    pub fn rerun(&self) -> impl Iterator<Item = &str> {
        self.seeds
            .iter()
            .filter(|(_, seed)| matches!(seed, Seed::Fresh { .. }))
            .map(|(name, _)| name.as_str())
    }
}

/// Check a snapshot against the current graph and decide what runs again.
///
/// `COMPLETED` and `SKIP` tasks keep their state; everything else restarts
/// from attempt 1 with the restart flag set.
pub fn plan_restore(snapshot: &CheckpointSnapshot, graph: &TaskGraph) -> Result<RestorePlan> {
    let saved = snapshot.states.all_names();
    let current: BTreeSet<TaskName> = graph.names().map(str::to_string).collect();

    if saved != current || snapshot.states.total() != saved.len() {
        let missing: Vec<TaskName> = current.difference(&saved).cloned().collect();
        let unknown: Vec<TaskName> = saved.difference(&current).cloned().collect();
        if !missing.is_empty() || !unknown.is_empty() {
            return Err(DagrunError::CheckpointMismatch { missing, unknown });
        }
        return Err(DagrunError::CheckpointCorrupt(
            "a task appears in more than one state".to_string(),
        ));
    }

    let seeds = graph
        .names()
        .map(|name| {
            let seed = match snapshot.states.state_of(name) {
                Some(state @ (ExecutionState::Completed | ExecutionState::Skip)) => {
                    Seed::Restored(state)
                }
                _ => Seed::Fresh { is_restart: true },
            };
            (name.to_string(), seed)
        })
        .collect();

    Ok(RestorePlan {
        seeds,
        store: snapshot.store.clone(),
    })
}
