//! Binary entry point for exam-classify.
//!
//! Thin operator CLI over the library: run batches, retry logged failures,
//! summarize the failure log and validate a corpus.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// Allow print_stderr in main binary for CLI output
#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]
// Allow needless_pass_by_value for command functions
#![allow(clippy::needless_pass_by_value)]
// Allow multiple crate versions from transitive dependencies
#![allow(clippy::multiple_crate_versions)]

mod commands;

use clap::{Parser, Subcommand};
use exam_classify::ClassifierConfig;
use exam_classify::observability::{self, ObservabilityConfig};
use std::path::PathBuf;
use std::process::ExitCode;

/// exam-classify - rate-limited subject classification of exam questions.
#[derive(Parser)]
#[command(name = "exam-classify")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to configuration file.
    #[arg(short, long, global = true, env = "EXAM_CLASSIFY_CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Corpus root (overrides the config file).
    #[arg(short, long, global = true)]
    base_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Classify one year, or every year when none is given.
    Run {
        /// Exam year to process.
        #[arg(short, long)]
        year: Option<u32>,

        /// Skip questions numbered below this index.
        #[arg(short, long, requires = "year")]
        start_index: Option<u64>,
    },

    /// Retry records from the failure log.
    Retry {
        /// Only retry records of this year.
        #[arg(short, long)]
        year: Option<u32>,

        /// Also retry unclassifiable and invalid-mapping entries.
        #[arg(long)]
        include_terminal: bool,
    },

    /// Summarize the failure log.
    Errors,

    /// Check every record and write a validation report.
    Validate,
}

/// Main entry point.
fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        },
    };
    let config = match cli.base_path.clone() {
        Some(base_path) => config.with_base_path(base_path),
        None => config,
    };

    let _observability = match observability::init(ObservabilityConfig::from_settings(
        Some(&config.logging),
        Some(&config.metrics),
        cli.verbose,
    )) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Failed to initialize observability: {e}");
            return ExitCode::FAILURE;
        },
    };

    match run_command(cli.command, &config) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        },
    }
}

/// Runs the selected command.
fn run_command(command: Commands, config: &ClassifierConfig) -> exam_classify::Result<ExitCode> {
    config.validate()?;

    match command {
        Commands::Run { year, start_index } => commands::cmd_run(config, year, start_index),
        Commands::Retry {
            year,
            include_terminal,
        } => commands::cmd_retry(config, year, include_terminal),
        Commands::Errors => commands::cmd_errors(config),
        Commands::Validate => commands::cmd_validate(config),
    }
}

/// Loads configuration: explicit file, else the default location, then env.
fn load_config(path: Option<&std::path::Path>) -> exam_classify::Result<ClassifierConfig> {
    let config = match path {
        Some(path) => ClassifierConfig::load_from_file(path)?,
        None => ClassifierConfig::load_default()?,
    };
    Ok(config.with_env_overrides())
}
