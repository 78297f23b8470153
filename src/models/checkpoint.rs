//! Per-batch resume checkpoints.

use super::RecordId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Batch-level outcome counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchCounters {
    /// Records labeled, across every run of the batch.
    pub processed: usize,
    /// Failed attempts logged, across every run of the batch.
    pub failed: usize,
    /// Records the latest run skipped as settled or already checkpointed.
    pub skipped: usize,
}

impl BatchCounters {
    /// Sum of all outcomes.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.processed + self.failed + self.skipped
    }

    /// Counters after a resumed run: labels and failures add up, skips
    /// describe only the latest run.
    #[must_use]
    pub const fn resumed_with(self, run: Self) -> Self {
        Self {
            processed: self.processed + run.processed,
            failed: self.failed + run.failed,
            skipped: run.skipped,
        }
    }
}

/// Durable progress of one batch. The latest write is authoritative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Batch identifier (e.g. the exam year).
    pub batch_id: String,
    /// Records already handled, in completion order.
    pub completed: Vec<RecordId>,
    /// Counters at the time of the write.
    #[serde(flatten)]
    pub counters: BatchCounters,
    /// When the checkpoint was written.
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Creates a checkpoint stamped with the current time.
    #[must_use]
    pub fn new(batch_id: impl Into<String>, completed: Vec<RecordId>, counters: BatchCounters) -> Self {
        Self {
            batch_id: batch_id.into(),
            completed,
            counters,
            updated_at: Utc::now(),
        }
    }
}
