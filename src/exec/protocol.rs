// src/exec/protocol.rs

//! Line-framed JSON messages exchanged between the orchestrator and a worker
//! process.
//!
//! Parent → child goes over the child's stdin as one JSON object per line.
//! Child → parent shares stdout with whatever task code prints, so protocol
//! lines carry [`FRAME_PREFIX`] in front of the JSON. Anything else on stdout
//! is treated as plain task output.

use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::store::StoreWrite;
use crate::errors::{DagrunError, Result};
use crate::types::{Severity, TaskName};

/// Marks a child stdout line as a protocol frame.
pub const FRAME_PREFIX: &str = "\u{1e}dagrun:";

/// Everything a worker needs to run one attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRequest {
    pub name: TaskName,
    pub variant: String,
    #[serde(default)]
    pub parameters: Value,
    #[serde(default)]
    pub depends_on: Vec<TaskName>,
    pub attempt: u32,
    pub is_restart: bool,
    /// Copy of the shared store taken when the attempt was launched.
    #[serde(default)]
    pub store: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParentFrame {
    Start(AttemptRequest),
    Abort,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChildFrame {
    Log { severity: Severity, message: String },
    StoreSet { key: String, value: Value },
    StoreRemove { key: String },
    Finished { failed: bool, aborted: bool },
}

impl ChildFrame {
    pub fn store_write(&self) -> Option<StoreWrite> {
        match self {
            ChildFrame::StoreSet { key, value } => Some(StoreWrite::Set {
                key: key.clone(),
                value: value.clone(),
            }),
            ChildFrame::StoreRemove { key } => Some(StoreWrite::Remove { key: key.clone() }),
            _ => None,
        }
    }
}

/// One line read from a worker's stdout.
#[derive(Debug, Clone, PartialEq)]
pub enum StdoutLine {
    Frame(ChildFrame),
    Text(String),
}

pub fn encode_parent_frame(frame: &ParentFrame) -> Result<String> {
    let mut line = serde_json::to_string(frame)?;
    line.push('\n');
    Ok(line)
}

pub fn decode_parent_frame(line: &str) -> Result<ParentFrame> {
    serde_json::from_str(line.trim_end()).map_err(|e| {
        DagrunError::Protocol(format!("malformed control frame from orchestrator: {e}"))
    })
}

pub fn encode_child_frame(frame: &ChildFrame) -> Result<String> {
    let json = serde_json::to_string(frame)?;
    Ok(format!("{FRAME_PREFIX}{json}\n"))
}

/// Classify a stdout line. A prefixed line that fails to parse is an error so
/// that protocol drift never passes silently as task output.
pub fn decode_stdout_line(line: &str) -> Result<StdoutLine> {
    let line = line.trim_end_matches(['\r', '\n']);
    match line.strip_prefix(FRAME_PREFIX) {
        Some(json) => serde_json::from_str(json)
            .map(StdoutLine::Frame)
            .map_err(|e| DagrunError::Protocol(format!("malformed frame from worker: {e}"))),
        None => Ok(StdoutLine::Text(line.to_string())),
    }
}

/// Destination for frames emitted by task code.
pub trait FrameSink: Send + Sync {
    fn send(&self, frame: ChildFrame);
}

/// Writes frames to this process's stdout. Used inside worker processes.
#[derive(Debug, Default)]
pub struct StdoutSink;

impl FrameSink for StdoutSink {
    fn send(&self, frame: ChildFrame) {
        let Ok(line) = encode_child_frame(&frame) else {
            return;
        };
        let mut out = std::io::stdout().lock();
        // The parent is gone if this fails; nothing useful left to do.
        let _ = out.write_all(line.as_bytes()).and_then(|_| out.flush());
    }
}

/// Collects frames in memory. Handy for exercising tasks in-process.
#[derive(Debug, Default)]
pub struct MemorySink {
    frames: Mutex<Vec<ChildFrame>>,
}

impl MemorySink {
    pub fn frames(&self) -> Vec<ChildFrame> {
        self.frames
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}

impl FrameSink for MemorySink {
    fn send(&self, frame: ChildFrame) {
        self.frames
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(frame);
    }
}
