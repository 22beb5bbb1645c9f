// src/checkpoint/memory.rs

use std::sync::Mutex;

use crate::checkpoint::snapshot::{self, CheckpointSnapshot};
use crate::checkpoint::Checkpointer;
use crate::errors::{DagrunError, Result};

/// Keeps the encoded checkpoint in memory.
///
/// Goes through the same encoding as the file store, which makes it a
/// faithful stand-in for tests.
#[derive(Debug, Default)]
pub struct MemoryCheckpointer {
    slot: Mutex<Option<Vec<u8>>>,
    writes: Mutex<usize>,
}

impl MemoryCheckpointer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with an existing snapshot, as if left over by an earlier run.
    pub fn with_snapshot(snapshot: &CheckpointSnapshot) -> Result<Self> {
        let cp = Self::new();
        *cp.slot.lock().unwrap_or_else(|p| p.into_inner()) = Some(snapshot::encode(snapshot)?);
        Ok(cp)
    }

    pub fn is_empty(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .is_none()
    }

    /// Number of successful writes so far.
    pub fn write_count(&self) -> usize {
        *self.writes.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl Checkpointer for MemoryCheckpointer {
    fn write(&self, snapshot: &CheckpointSnapshot) -> Result<()> {
        let bytes = snapshot::encode(snapshot)?;
        *self.slot.lock().unwrap_or_else(|p| p.into_inner()) = Some(bytes);
        *self.writes.lock().unwrap_or_else(|p| p.into_inner()) += 1;
        Ok(())
    }

    fn read(&self) -> Result<CheckpointSnapshot> {
        match self.slot.lock().unwrap_or_else(|p| p.into_inner()).as_deref() {
            Some(bytes) => snapshot::decode(bytes),
            None => Err(DagrunError::NoCheckpoint("<memory>".into())),
        }
    }

    fn clear(&self) -> Result<()> {
        *self.slot.lock().unwrap_or_else(|p| p.into_inner()) = None;
        Ok(())
    }

    fn describe(&self) -> String {
        "<memory>".to_string()
    }
}
