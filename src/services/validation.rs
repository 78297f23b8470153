//! Corpus-wide consistency check.

use crate::config::AreaCatalog;
use crate::corpus::Corpus;
use crate::models::RecordId;
use crate::storage::{RecordStore, to_pretty_json, write_atomic};
use crate::Result;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// File name of the report written into the corpus root.
pub const VALIDATION_REPORT_FILE: &str = "validation_report.json";

/// A label outside its area's candidate set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvalidMapping {
    /// Offending record.
    pub record_id: RecordId,
    /// Area on the record.
    pub area: String,
    /// Label on the record.
    pub label: String,
}

/// A record file that could not be read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileIssue {
    /// Offending record.
    pub record_id: RecordId,
    /// Load error.
    pub error: String,
}

/// Result of [`validate_corpus`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    /// Record files found.
    pub total_records: usize,
    /// Records with an area and a label valid for it.
    pub valid_records: usize,
    /// Records with no area.
    pub missing_area: Vec<RecordId>,
    /// Records with an area but no label.
    pub missing_label: Vec<RecordId>,
    /// Labels outside the area's candidate set.
    pub invalid_mapping: Vec<InvalidMapping>,
    /// Unreadable or unparseable files.
    pub file_errors: Vec<FileIssue>,
    /// Records per area.
    pub area_stats: BTreeMap<String, usize>,
    /// Records per label.
    pub label_stats: BTreeMap<String, usize>,
}

impl ValidationReport {
    /// Whether every record is settled.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.total_records == self.valid_records
    }

    /// Writes the report as `validation_report.json` under `base_path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn write_to(&self, base_path: &std::path::Path) -> Result<PathBuf> {
        let path = base_path.join(VALIDATION_REPORT_FILE);
        write_atomic(&path, &to_pretty_json(self)?)?;
        Ok(path)
    }
}

/// Checks every record of every year against `catalog`.
///
/// # Errors
///
/// Returns an error if the year or question directories cannot be listed.
/// Individual unreadable records are reported, not returned.
pub fn validate_corpus(corpus: &Corpus, catalog: &AreaCatalog) -> Result<ValidationReport> {
    let span = tracing::info_span!("corpus.validate", base = %corpus.base_path().display());
    let _enter = span.enter();

    let store = RecordStore::new(corpus.base_path(), catalog.clone());
    let mut report = ValidationReport::default();

    for year in corpus.years()? {
        let paths = corpus.record_paths(year)?;
        tracing::debug!("Year {year}: {} records", paths.len());
        for path in paths {
            report.total_records += 1;
            let record = match store.load(&path) {
                Ok(record) => record,
                Err(e) => {
                    report.file_errors.push(FileIssue {
                        record_id: RecordId::from_path(corpus.base_path(), &path),
                        error: e.to_string(),
                    });
                    continue;
                },
            };

            let Some(area) = record.area_hint() else {
                report.missing_area.push(record.id.clone());
                continue;
            };
            *report.area_stats.entry(area.to_string()).or_default() += 1;

            let Some(label) = record.label() else {
                report.missing_label.push(record.id.clone());
                continue;
            };
            *report.label_stats.entry(label.to_string()).or_default() += 1;

            if catalog.is_valid(area, label) {
                report.valid_records += 1;
            } else {
                report.invalid_mapping.push(InvalidMapping {
                    record_id: record.id.clone(),
                    area: area.to_string(),
                    label: label.to_string(),
                });
            }
        }
    }

    tracing::info!(
        "Validated {} records: {} valid, {} missing area, {} missing label, {} invalid, {} unreadable",
        report.total_records,
        report.valid_records,
        report.missing_area.len(),
        report.missing_label.len(),
        report.invalid_mapping.len(),
        report.file_errors.len()
    );
    Ok(report)
}
