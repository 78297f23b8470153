//! Read-only reporting commands.

use exam_classify::corpus::Corpus;
use exam_classify::services::validate_corpus;
use exam_classify::storage::FailureLog;
use exam_classify::{ClassifierConfig, FailureCategory, Result};
use std::process::ExitCode;

const SAMPLE: usize = 3;

/// Errors command.
pub fn cmd_errors(config: &ClassifierConfig) -> Result<ExitCode> {
    let log = FailureLog::new(config.failure_log_path());
    let summary = log.summary()?;
    if summary.is_empty() {
        println!("No failures logged in {}", log.path().display());
        return Ok(ExitCode::SUCCESS);
    }

    println!("Failure log: {}", log.path().display());
    println!("Total entries: {}", summary.total);
    for category in FailureCategory::ALL {
        let Some(entries) = summary.by_category.get(&category) else {
            continue;
        };
        let kind = if category.is_retryable() { "retryable" } else { "terminal" };
        println!();
        println!("{category} ({kind}): {}", entries.len());
        for entry in entries.iter().take(SAMPLE) {
            println!("  {}  {}", entry.record_id, entry.message);
        }
        if entries.len() > SAMPLE {
            println!("  ... and {} more", entries.len() - SAMPLE);
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// Validate command.
pub fn cmd_validate(config: &ClassifierConfig) -> Result<ExitCode> {
    let corpus = Corpus::new(&config.base_path);
    let report = validate_corpus(&corpus, &config.areas)?;
    let path = report.write_to(corpus.base_path())?;

    println!("Records:         {}", report.total_records);
    println!("Valid:           {}", report.valid_records);
    println!("Missing area:    {}", report.missing_area.len());
    println!("Missing label:   {}", report.missing_label.len());
    println!("Invalid mapping: {}", report.invalid_mapping.len());
    println!("Unreadable:      {}", report.file_errors.len());
    println!();
    println!("Per area:");
    for (area, count) in &report.area_stats {
        println!("  {area}: {count}");
    }
    println!("Per label:");
    for (label, count) in &report.label_stats {
        println!("  {label}: {count}");
    }
    println!();
    println!("Report written to {}", path.display());

    Ok(if report.is_clean() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    })
}
