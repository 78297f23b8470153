//! Batch command handlers.

use super::print_summary;
use exam_classify::corpus::Corpus;
use exam_classify::llm::{OpenAiClient, build_provider};
use exam_classify::{BatchOrchestrator, BatchReport, CancellationFlag, ClassifierConfig, Result};
use std::process::ExitCode;

fn orchestrator(config: &ClassifierConfig) -> Result<BatchOrchestrator<OpenAiClient>> {
    let provider = build_provider(&config.llm)?;
    let cancel = CancellationFlag::new();
    cancel.install_ctrlc_handler()?;
    Ok(BatchOrchestrator::from_config(config, provider, cancel))
}

/// Run command.
pub fn cmd_run(
    config: &ClassifierConfig,
    year: Option<u32>,
    start_index: Option<u64>,
) -> Result<ExitCode> {
    let corpus = Corpus::new(&config.base_path);
    let batches = corpus.batches(year, start_index)?;
    let orchestrator = orchestrator(config)?;

    let mut total = BatchReport::default();
    for (year, items) in batches {
        println!("Year {year}: {} questions", items.len());
        let report = orchestrator.run_batch(&year.to_string(), &items)?;
        total.absorb(&report);
        if report.cancelled {
            break;
        }
    }

    Ok(print_summary(
        "Run complete",
        &total,
        orchestrator.failure_log().path(),
    ))
}

/// Retry command.
pub fn cmd_retry(
    config: &ClassifierConfig,
    year: Option<u32>,
    include_terminal: bool,
) -> Result<ExitCode> {
    let orchestrator = orchestrator(config)?;
    let log = orchestrator.failure_log();

    let candidates: Vec<_> = log
        .scan(include_terminal)?
        .into_iter()
        .filter(|entry| year.is_none() || Corpus::batch_of(&entry.record_id) == year)
        .collect();
    if candidates.is_empty() {
        println!("Nothing to retry in {}", log.path().display());
        return Ok(ExitCode::SUCCESS);
    }

    println!("Retrying {} records", candidates.len());
    let report = orchestrator.retry(&candidates)?;
    Ok(print_summary("Retry complete", &report, log.path()))
}
