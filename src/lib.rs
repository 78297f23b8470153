//! # exam-classify
//!
//! Rate-limited, resumable classification of exam question corpora.
//!
//! Each question record carries a coarse *area*; an external language model
//! picks the fine-grained *label* (subject) from the area's candidate set.
//! The hard part is driving thousands of those calls against a remote API
//! that enforces both request and token quotas:
//!
//! - [`ratelimit::QuotaTracker`] keeps two sliding windows (requests, tokens)
//! - [`ratelimit::BackoffController`] spaces out attempts after failures
//! - [`classify::ClassificationClient`] gates every remote call on both
//! - [`storage`] persists records, per-batch checkpoints and the failure log
//! - [`services::BatchOrchestrator`] walks a batch and ties it together
//!
//! ## Example
//!
//! ```rust,ignore
//! use exam_classify::corpus::Corpus;
//! use exam_classify::llm::build_provider;
//! use exam_classify::{BatchOrchestrator, CancellationFlag, ClassifierConfig};
//!
//! let config = ClassifierConfig::load_default()?.with_env_overrides();
//! config.validate()?;
//! let provider = build_provider(&config.llm)?;
//! let orchestrator = BatchOrchestrator::from_config(&config, provider, CancellationFlag::new());
//! let batch = Corpus::new(&config.base_path).batch(2019, None)?;
//! let report = orchestrator.run_batch("2019", &batch)?;
//! println!("{} processed, {} failed", report.processed, report.failed);
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use std::path::PathBuf;
use thiserror::Error as ThisError;

pub mod classify;
pub mod config;
pub mod corpus;
pub mod llm;
pub mod models;
pub mod observability;
pub mod ratelimit;
pub mod services;
pub mod shutdown;
pub mod storage;

pub use classify::{ClassificationClient, ClassifyFailure};
pub use config::{AreaCatalog, ClassifierConfig};
pub use llm::LlmProvider;
pub use models::{
    BatchCounters, Checkpoint, FailureCategory, FailureEntry, Record, RecordId,
};
pub use services::{BatchOrchestrator, BatchReport};
pub use shutdown::CancellationFlag;

/// Error type for exam-classify operations.
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `InvalidInput` | Malformed batch index, unknown batch, bad CLI values |
/// | `Config` | Zero ceilings, empty area table, unreadable config file |
/// | `OperationFailed` | I/O on checkpoints, logs, reports |
/// | `RateLimited` | Remote API answered HTTP 429 |
/// | `Transport` | Connect/timeout errors, 5xx, undecodable responses |
/// | `NotFound` | A record file does not exist |
/// | `Corrupt` | A record file is not a JSON object |
#[derive(Debug, ThisError)]
pub enum Error {
    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Configuration is unusable. Fatal for the whole run.
    #[error("configuration error: {0}")]
    Config(String),

    /// An operation failed.
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// The remote provider signalled throttling.
    #[error("{provider} rate limited: {cause}")]
    RateLimited {
        /// Provider name.
        provider: &'static str,
        /// Response body or status text.
        cause: String,
    },

    /// The remote call failed in transit or with a server error.
    #[error("{provider} transport error: {cause}")]
    Transport {
        /// Provider name.
        provider: &'static str,
        /// The underlying cause.
        cause: String,
    },

    /// A record file is missing.
    #[error("record not found: {}", .0.display())]
    NotFound(PathBuf),

    /// A record file could not be parsed as a JSON object.
    #[error("corrupt record {}: {cause}", path.display())]
    Corrupt {
        /// Path of the offending file.
        path: PathBuf,
        /// Parser message.
        cause: String,
    },
}

/// Result type alias for exam-classify operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidInput("test error".to_string());
        assert_eq!(err.to_string(), "invalid input: test error");

        let err = Error::OperationFailed {
            operation: "test".to_string(),
            cause: "failed".to_string(),
        };
        assert_eq!(err.to_string(), "operation 'test' failed: failed");

        let err = Error::RateLimited {
            provider: "openai",
            cause: "429".to_string(),
        };
        assert_eq!(err.to_string(), "openai rate limited: 429");

        let err = Error::NotFound(PathBuf::from("year/2019/questions/1/details.json"));
        assert!(err.to_string().contains("year/2019/questions/1"));
    }
}
