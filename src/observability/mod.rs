//! Logging and metrics setup for the binary.
//!
//! One `tracing` subscriber (pretty or JSON, on stderr or a file) and an
//! optional Prometheus recorder whose snapshot is pushed when the run ends.

mod logging;
mod metrics;

pub use logging::{LogFormat, LoggingConfig};
pub use metrics::{MetricsConfig, MetricsHandle};

use crate::config::{LoggingSettings, MetricsSettings};
use crate::{Error, Result};
use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Full observability configuration.
#[derive(Debug)]
pub struct ObservabilityConfig {
    /// Logging configuration.
    pub logging: LoggingConfig,
    /// Metrics configuration.
    pub metrics: MetricsConfig,
}

impl ObservabilityConfig {
    /// Builds the configuration from config-file sections with env overrides.
    #[must_use]
    pub fn from_settings(
        logging: Option<&LoggingSettings>,
        metrics: Option<&MetricsSettings>,
        verbose: bool,
    ) -> Self {
        Self {
            logging: LoggingConfig::from_settings(logging, verbose),
            metrics: MetricsConfig::from_settings(metrics),
        }
    }
}

/// Keeps metrics alive for the run; dropping it pushes the final snapshot.
#[derive(Debug)]
pub struct ObservabilityHandle {
    metrics: Option<MetricsHandle>,
}

impl Drop for ObservabilityHandle {
    fn drop(&mut self) {
        if let Some(handle) = self.metrics.take() {
            handle.push();
        }
    }
}

/// Installs the global subscriber and, when enabled, the metrics recorder.
///
/// # Errors
///
/// Returns an error if the log file cannot be opened or a global
/// subscriber or recorder is already installed.
pub fn init(config: ObservabilityConfig) -> Result<ObservabilityHandle> {
    let metrics = metrics::install_prometheus(&config.metrics)?;

    let to_file = config.logging.file.is_some();
    let writer = match &config.logging.file {
        Some(path) => BoxMakeWriter::new(Mutex::new(open_log_file(path)?)),
        None => BoxMakeWriter::new(io::stderr),
    };
    let (json, pretty) = match config.logging.format {
        LogFormat::Json => (
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_writer(writer),
            ),
            None,
        ),
        LogFormat::Pretty => (
            None,
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(!to_file)
                    .with_target(to_file)
                    .with_writer(writer),
            ),
        ),
    };

    tracing_subscriber::registry()
        .with(config.logging.filter)
        .with(json)
        .with(pretty)
        .try_init()
        .map_err(|e| Error::OperationFailed {
            operation: "init_tracing".to_string(),
            cause: e.to_string(),
        })?;

    Ok(ObservabilityHandle { metrics })
}

fn open_log_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| Error::OperationFailed {
            operation: "create_log_dir".to_string(),
            cause: format!("{}: {e}", parent.display()),
        })?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| Error::OperationFailed {
            operation: "open_log_file".to_string(),
            cause: format!("{}: {e}", path.display()),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_log_file_is_appended() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs/run.log");
        writeln!(open_log_file(&path).unwrap(), "first").unwrap();
        writeln!(open_log_file(&path).unwrap(), "second").unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "first\nsecond\n");
    }
}
