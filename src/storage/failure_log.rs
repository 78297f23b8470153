//! Append-only failure log, one JSON object per line.

use super::{io_error, write_atomic};
use crate::Result;
use crate::models::{FailureEntry, FailureSummary, RecordId};
use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// JSONL log of failed attempts.
///
/// Lines that do not parse are skipped when scanning and preserved verbatim
/// when compacting.
#[derive(Debug, Clone)]
pub struct FailureLog {
    path: PathBuf,
}

impl FailureLog {
    /// Creates a log backed by `path`. The file is created on first append.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Log file location.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one entry and flushes it to disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be opened or written.
    pub fn append(&self, entry: &FailureEntry) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| io_error("create_dir", parent, &e))?;
        }
        let mut line = serde_json::to_string(entry).map_err(|e| crate::Error::OperationFailed {
            operation: "serialize_failure".to_string(),
            cause: e.to_string(),
        })?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| io_error("open_failure_log", &self.path, &e))?;
        file.write_all(line.as_bytes())
            .and_then(|()| file.sync_data())
            .map_err(|e| io_error("append_failure_log", &self.path, &e))?;

        metrics::counter!("failure_log_entries_total", "category" => entry.category.as_str())
            .increment(1);
        Ok(())
    }

    fn read_lines(&self) -> Result<Vec<String>> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => Ok(contents.lines().map(ToString::to_string).collect()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(io_error("read_failure_log", &self.path, &e)),
        }
    }

    /// All parseable entries in file order.
    ///
    /// # Errors
    ///
    /// Returns an error if the log exists but cannot be read.
    pub fn entries(&self) -> Result<Vec<FailureEntry>> {
        let lines = self.read_lines()?;
        let mut entries = Vec::with_capacity(lines.len());
        for (number, line) in lines.iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<FailureEntry>(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => tracing::warn!(
                    "Skipping malformed line {} of {}: {e}",
                    number + 1,
                    self.path.display()
                ),
            }
        }
        Ok(entries)
    }

    /// First entry per record, in order of first occurrence.
    ///
    /// Terminal categories are included only when `include_terminal` is set.
    ///
    /// # Errors
    ///
    /// Returns an error if the log exists but cannot be read.
    pub fn scan(&self, include_terminal: bool) -> Result<Vec<FailureEntry>> {
        let mut seen = HashSet::new();
        Ok(self
            .entries()?
            .into_iter()
            .filter(|e| include_terminal || e.category.is_retryable())
            .filter(|e| seen.insert(e.record_id.clone()))
            .collect())
    }

    /// Records with a retryable failure, deduplicated, in order of first
    /// occurrence.
    ///
    /// # Errors
    ///
    /// Returns an error if the log exists but cannot be read.
    pub fn scan_retryable(&self) -> Result<Vec<RecordId>> {
        Ok(self.scan(false)?.into_iter().map(|e| e.record_id).collect())
    }

    /// Every record that appears in the log, in any category.
    ///
    /// # Errors
    ///
    /// Returns an error if the log exists but cannot be read.
    pub fn logged_ids(&self) -> Result<HashSet<RecordId>> {
        Ok(self.entries()?.into_iter().map(|e| e.record_id).collect())
    }

    /// Rewrites the log without any entry for `record_id`.
    ///
    /// Returns the number of entries removed. The file is untouched when
    /// nothing matches.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be read or replaced.
    pub fn compact_remove(&self, record_id: &RecordId) -> Result<usize> {
        self.compact(record_id, false)
    }

    /// Rewrites the log keeping only the newest entry for `record_id`.
    ///
    /// Used after appending a repeated failure, so the record is never
    /// absent from the log in between.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be read or replaced.
    pub fn compact_superseded(&self, record_id: &RecordId) -> Result<usize> {
        self.compact(record_id, true)
    }

    fn compact(&self, record_id: &RecordId, keep_latest: bool) -> Result<usize> {
        let lines = self.read_lines()?;
        let matches = |line: &str| {
            serde_json::from_str::<FailureEntry>(line)
                .is_ok_and(|entry| &entry.record_id == record_id)
        };
        let latest = if keep_latest {
            lines.iter().rposition(|line| matches(line.as_str()))
        } else {
            None
        };

        let mut kept = String::new();
        let mut removed = 0;
        for (position, line) in lines.iter().enumerate() {
            if matches(line.as_str()) && Some(position) != latest {
                removed += 1;
            } else {
                kept.push_str(line);
                kept.push('\n');
            }
        }
        if removed > 0 {
            write_atomic(&self.path, kept.as_bytes())?;
            tracing::info!("Removed {removed} failure entries for {record_id}");
        }
        Ok(removed)
    }

    /// Entries grouped by category.
    ///
    /// # Errors
    ///
    /// Returns an error if the log exists but cannot be read.
    pub fn summary(&self) -> Result<FailureSummary> {
        Ok(FailureSummary::from_entries(self.entries()?))
    }
}
