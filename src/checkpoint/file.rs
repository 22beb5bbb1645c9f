// src/checkpoint/file.rs

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::checkpoint::snapshot::{self, CheckpointSnapshot};
use crate::checkpoint::Checkpointer;
use crate::errors::{DagrunError, Result};

/// Stores the checkpoint as `<dir>/<job name>`.
///
/// Writes go to `<name>.tmp` first, are flushed to disk and then renamed
/// over the real file, so a reader never sees a partial checkpoint.
#[derive(Debug, Clone)]
pub struct FileCheckpointer {
    path: PathBuf,
    tmp_path: PathBuf,
}

impl FileCheckpointer {
    pub fn new(dir: impl AsRef<Path>, job_name: &str) -> Self {
        let dir = dir.as_ref();
        Self {
            path: dir.join(job_name),
            tmp_path: dir.join(format!("{job_name}.tmp")),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }
}

impl Checkpointer for FileCheckpointer {
    fn write(&self, snapshot: &CheckpointSnapshot) -> Result<()> {
        let bytes = snapshot::encode(snapshot)?;

        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }

        {
            let mut file = fs::File::create(&self.tmp_path)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&self.tmp_path, &self.path)?;
        Ok(())
    }

    fn read(&self) -> Result<CheckpointSnapshot> {
        match fs::read(&self.path) {
            Ok(bytes) => snapshot::decode(&bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(DagrunError::NoCheckpoint(self.path.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn clear(&self) -> Result<()> {
        for path in [&self.path, &self.tmp_path] {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}
