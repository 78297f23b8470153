//! Business logic services.
//!
//! Services drive the stores and the classification client to provide the
//! operator-level operations: running a batch, retrying logged failures and
//! validating a corpus.

mod orchestrator;
mod validation;

pub use orchestrator::{BatchOrchestrator, BatchReport};
pub use validation::{VALIDATION_REPORT_FILE, ValidationReport, validate_corpus};
