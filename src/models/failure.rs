//! Failure-log entries.

use super::RecordId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Why a record could not be labeled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    /// Remote signalled overload.
    Throttled,
    /// Network, timeout or server error.
    Transport,
    /// Model output matched no known label.
    Unclassifiable,
    /// Extracted label is outside the area's candidate set, or the area is unknown.
    InvalidMapping,
    /// The prompt alone exceeds the token ceiling.
    Oversized,
    /// Record file is missing.
    NotFound,
    /// Record unreadable or unwritable.
    Storage,
}

impl FailureCategory {
    /// All categories, in display order.
    pub const ALL: [Self; 7] = [
        Self::Throttled,
        Self::Transport,
        Self::NotFound,
        Self::Storage,
        Self::Unclassifiable,
        Self::InvalidMapping,
        Self::Oversized,
    ];

    /// Returns the category as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Throttled => "throttled",
            Self::Transport => "transport",
            Self::Unclassifiable => "unclassifiable",
            Self::InvalidMapping => "invalid_mapping",
            Self::Oversized => "oversized",
            Self::NotFound => "not_found",
            Self::Storage => "storage",
        }
    }

    /// Whether an automatic retry scan picks this category up.
    ///
    /// Terminal categories need an operator decision (a corrected area,
    /// a shorter prompt) before they are worth another paid call.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Throttled | Self::Transport | Self::NotFound | Self::Storage
        )
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One failed attempt, as stored in the failure log (one JSON object per line).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureEntry {
    /// When the attempt failed.
    pub timestamp: DateTime<Utc>,
    /// Record that failed.
    pub record_id: RecordId,
    /// Absolute path at the time of failure.
    pub path: PathBuf,
    /// Failure category.
    pub category: FailureCategory,
    /// Human-readable detail.
    pub message: String,
    /// Area the record was classified under, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area: Option<String>,
}

impl FailureEntry {
    /// Creates an entry stamped with the current time.
    #[must_use]
    pub fn now(
        record_id: RecordId,
        path: impl Into<PathBuf>,
        category: FailureCategory,
        message: impl Into<String>,
        area: Option<&str>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            record_id,
            path: path.into(),
            category,
            message: message.into(),
            area: area.map(ToString::to_string),
        }
    }
}

/// Failure log grouped by category.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailureSummary {
    /// Total entries in the log.
    pub total: usize,
    /// Entries per category, each list in log order.
    pub by_category: BTreeMap<FailureCategory, Vec<FailureEntry>>,
}

impl FailureSummary {
    /// Groups entries by category.
    #[must_use]
    pub fn from_entries(entries: Vec<FailureEntry>) -> Self {
        let total = entries.len();
        let mut by_category: BTreeMap<FailureCategory, Vec<FailureEntry>> = BTreeMap::new();
        for entry in entries {
            by_category.entry(entry.category).or_default().push(entry);
        }
        Self { total, by_category }
    }

    /// Number of entries in `category`.
    #[must_use]
    pub fn count(&self, category: FailureCategory) -> usize {
        self.by_category.get(&category).map_or(0, Vec::len)
    }

    /// Whether the log is empty.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.total == 0
    }
}
