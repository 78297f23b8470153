//! Data models for exam-classify.
//!
//! Records, batch checkpoints and failure-log entries.

mod checkpoint;
mod failure;
mod record;

pub use checkpoint::{BatchCounters, Checkpoint};
pub use failure::{FailureCategory, FailureEntry, FailureSummary};
pub use record::{AREA_FIELD, Alternative, LABEL_FIELD, LEADING_FIELDS, Record, RecordId};
