use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Serialize, Deserialize)]
struct QueueFile {
    saved_at: DateTime<Utc>,
    tasks: Vec<String>,
}

/// File-backed persistence of queued task names.
///
/// ```text
/// data/
///   queue.json        ← written on shutdown
///   queue.json.bak    ← previous file, moved aside after a successful load
/// ```
pub struct QueueStore {
    path: PathBuf,
}

impl QueueStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn backup_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(".bak");
        PathBuf::from(name)
    }

    /// Write `names`, creating the parent directory if needed.
    pub fn save(&self, names: &[String]) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = QueueFile {
            saved_at: Utc::now(),
            tasks: names.to_vec(),
        };
        std::fs::write(&self.path, serde_json::to_string_pretty(&file)?)?;
        Ok(())
    }

    /// Read the saved names and move the file to its backup path.
    ///
    /// A missing file is an empty queue.
    pub fn load(&self) -> Result<Vec<String>, StoreError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let json = std::fs::read_to_string(&self.path)?;
        let file: QueueFile = serde_json::from_str(&json)?;
        std::fs::rename(&self.path, self.backup_path())?;
        debug!(saved_at = %file.saved_at, tasks = file.tasks.len(), "queue file loaded");
        Ok(file.tasks)
    }
}
