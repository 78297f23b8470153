//! Per-batch checkpoint files (`progress_<batch>.json`).

use super::{io_error, to_pretty_json, write_atomic};
use crate::Result;
use crate::models::{BatchCounters, Checkpoint, RecordId};
use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Stores one checkpoint file per batch in a directory.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    /// Creates a store writing into `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Checkpoint file of `batch_id`.
    #[must_use]
    pub fn path_for(&self, batch_id: &str) -> PathBuf {
        self.dir.join(format!("progress_{batch_id}.json"))
    }

    /// Reads the full checkpoint of `batch_id`, if one exists.
    ///
    /// An unparseable file is reported and treated as absent; records it
    /// listed fall back to the per-record settled check.
    ///
    /// # Errors
    ///
    /// Returns an error only when the file exists but cannot be read.
    pub fn load_checkpoint(&self, batch_id: &str) -> Result<Option<Checkpoint>> {
        let path = self.path_for(batch_id);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error("read_checkpoint", &path, &e)),
        };
        match serde_json::from_str::<Checkpoint>(&contents) {
            Ok(checkpoint) => Ok(Some(checkpoint)),
            Err(e) => {
                tracing::warn!(
                    "Ignoring unreadable checkpoint {}: {e}",
                    path.display()
                );
                Ok(None)
            },
        }
    }

    /// Identifiers already completed in `batch_id`; empty when none exist.
    ///
    /// # Errors
    ///
    /// See [`CheckpointStore::load_checkpoint`].
    pub fn load(&self, batch_id: &str) -> Result<HashSet<RecordId>> {
        Ok(self
            .load_checkpoint(batch_id)?
            .map(|c| c.completed.into_iter().collect())
            .unwrap_or_default())
    }

    /// Overwrites the checkpoint of `batch_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be replaced.
    pub fn save(
        &self,
        batch_id: &str,
        completed: &[RecordId],
        counters: BatchCounters,
    ) -> Result<Checkpoint> {
        let checkpoint = Checkpoint::new(batch_id, completed.to_vec(), counters);
        write_atomic(&self.path_for(batch_id), &to_pretty_json(&checkpoint)?)?;
        tracing::debug!(
            "Checkpoint {batch_id}: {} completed ({} processed, {} failed, {} skipped)",
            completed.len(),
            counters.processed,
            counters.failed,
            counters.skipped
        );
        Ok(checkpoint)
    }

    /// Directory holding the checkpoint files.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(raw: &[&str]) -> Vec<RecordId> {
        raw.iter().map(|s| RecordId::new(*s)).collect()
    }

    #[test]
    fn test_missing_checkpoint_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        assert!(store.load("2019").unwrap().is_empty());
        assert!(store.load_checkpoint("2019").unwrap().is_none());
    }

    #[test]
    fn test_latest_save_wins() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        let counters = BatchCounters {
            processed: 2,
            failed: 0,
            skipped: 1,
        };

        store.save("2019", &ids(&["a", "b", "c"]), counters).unwrap();
        store.save("2019", &ids(&["a"]), BatchCounters::default()).unwrap();

        let loaded = store.load_checkpoint("2019").unwrap().unwrap();
        assert_eq!(loaded.completed, ids(&["a"]));
        assert_eq!(loaded.counters, BatchCounters::default());
        assert!(store.path_for("2019").ends_with("progress_2019.json"));
    }

    #[test]
    fn test_batches_are_independent() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        store
            .save("2019", &ids(&["x"]), BatchCounters::default())
            .unwrap();
        assert!(store.load("2020").unwrap().is_empty());
        assert!(store.load("2019").unwrap().contains(&RecordId::new("x")));
    }

    #[test]
    fn test_corrupt_checkpoint_treated_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        fs::write(store.path_for("2021"), "{\"batch_id\": ").unwrap();
        assert!(store.load("2021").unwrap().is_empty());
    }
}
