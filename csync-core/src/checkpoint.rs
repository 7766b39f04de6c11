//! Persisted resume state for replication tasks.
//!
//! Records the traversal position of a copy so a later run can pick up
//! where a stopped or crashed one left off. State lives as one JSON file
//! per task in a state directory, written atomically via tmp-rename.

use crate::copier::{CopyAction, CopyListener};
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Traversal position persisted between runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Id of the owning replication task.
    pub task_id: String,
    /// Source subtree the task copies from.
    pub source_root: String,
    /// Destination subtree the task copies into.
    pub destination_root: String,
    /// Last path committed, in traversal order.
    pub last_path: Option<String>,
    /// Batches committed so far.
    pub batches_committed: u64,
    /// Timestamp of the last update (Unix seconds).
    pub updated_at: i64,
    /// Whether a run was in flight when the state was written.
    pub in_progress: bool,
}

impl Checkpoint {
    pub fn new(task_id: &str, source_root: &str, destination_root: &str) -> Self {
        Self {
            task_id: task_id.to_string(),
            source_root: source_root.to_string(),
            destination_root: destination_root.to_string(),
            last_path: None,
            batches_committed: 0,
            updated_at: 0,
            in_progress: false,
        }
    }

    /// Load the checkpoint for `task_id` from a state directory.
    pub fn load(dir: &Path, task_id: &str) -> Result<Option<Self>> {
        let file = Self::file_path(dir, task_id);
        if !file.exists() {
            return Ok(None);
        }
        let data = fs::read_to_string(&file)
            .with_context(|| format!("Failed to read checkpoint from {:?}", file))?;
        let checkpoint: Checkpoint =
            serde_json::from_str(&data).with_context(|| "Failed to parse checkpoint JSON")?;
        Ok(Some(checkpoint))
    }

    /// Save the checkpoint into a state directory.
    pub fn save(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        let file = Self::file_path(dir, &self.task_id);
        let tmp = file.with_extension("tmp");
        let data = serde_json::to_string_pretty(self)?;
        fs::write(&tmp, &data)?;
        fs::rename(&tmp, &file)?;
        Ok(())
    }

    /// Remove the checkpoint for `task_id`, if present.
    pub fn remove(dir: &Path, task_id: &str) -> Result<()> {
        let file = Self::file_path(dir, task_id);
        if file.exists() {
            fs::remove_file(&file)?;
        }
        Ok(())
    }

    /// Record a committed position.
    pub fn record(&mut self, last_path: &str, batches_committed: u64) {
        self.last_path = Some(last_path.to_string());
        self.batches_committed = batches_committed;
        self.updated_at = chrono::Utc::now().timestamp();
        self.in_progress = true;
    }

    /// Mark the run as finished.
    pub fn finish(&mut self) {
        self.updated_at = chrono::Utc::now().timestamp();
        self.in_progress = false;
    }

    fn file_path(dir: &Path, task_id: &str) -> PathBuf {
        dir.join(format!("{}.checkpoint.json", task_id))
    }
}

/// Copy listener that persists the checkpoint at every batch boundary.
pub struct CheckpointWriter {
    dir: PathBuf,
    state: Mutex<Checkpoint>,
}

impl CheckpointWriter {
    pub fn new(dir: impl Into<PathBuf>, checkpoint: Checkpoint) -> Self {
        Self {
            dir: dir.into(),
            state: Mutex::new(checkpoint),
        }
    }

    /// Snapshot of the tracked state.
    pub fn checkpoint(&self) -> Result<Checkpoint> {
        Ok(self
            .state
            .lock()
            .map_err(|_| anyhow!("checkpoint state poisoned"))?
            .clone())
    }
}

impl CopyListener for CheckpointWriter {
    fn on_node(&self, _path: &str, _action: CopyAction) -> Result<()> {
        Ok(())
    }

    fn on_batch(&self, batches: u64, last_path: &str) -> Result<()> {
        let mut checkpoint = self
            .state
            .lock()
            .map_err(|_| anyhow!("checkpoint state poisoned"))?;
        checkpoint.record(last_path, batches);
        checkpoint.save(&self.dir)
    }
}
