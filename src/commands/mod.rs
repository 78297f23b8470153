//! Command handlers module.
//!
//! - `batch.rs`: `run` and `retry`, which make remote calls
//! - `report.rs`: `errors` and `validate`, which only read the corpus

mod batch;
mod report;

pub use batch::{cmd_retry, cmd_run};
pub use report::{cmd_errors, cmd_validate};

use exam_classify::BatchReport;
use std::path::Path;
use std::process::ExitCode;

/// Prints the end-of-run summary and picks the exit code.
///
/// Failed records do not fail the process; an interrupted run does.
fn print_summary(label: &str, report: &BatchReport, failure_log: &Path) -> ExitCode {
    println!();
    println!("{label}:");
    println!("  Processed: {}", report.processed);
    println!("  Skipped:   {}", report.skipped);
    println!("  Failed:    {}", report.failed);
    println!("  Tokens:    {}", report.tokens);
    if report.failed > 0 {
        println!("  Failure log: {}", failure_log.display());
    }
    if report.cancelled {
        println!("  Interrupted; progress was checkpointed.");
        return ExitCode::from(130);
    }
    ExitCode::SUCCESS
}
