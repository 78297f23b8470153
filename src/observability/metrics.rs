//! Prometheus metrics for a run, pushed to a gateway when the run ends.

use crate::config::MetricsSettings;
use crate::{Error, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;

const PUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Metrics configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsConfig {
    /// Whether a recorder is installed at all.
    pub enabled: bool,
    /// Push gateway URL for the final snapshot.
    pub push_gateway: Option<String>,
}

impl MetricsConfig {
    /// Builds metrics configuration from the `[metrics]` section.
    ///
    /// `EXAM_CLASSIFY_METRICS_ENABLED` and `EXAM_CLASSIFY_METRICS_PUSH_GATEWAY`
    /// take precedence over the file.
    #[must_use]
    pub fn from_settings(settings: Option<&MetricsSettings>) -> Self {
        let enabled = std::env::var("EXAM_CLASSIFY_METRICS_ENABLED")
            .ok()
            .map(|value| matches!(value.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
            .or_else(|| settings.and_then(|s| s.enabled))
            .unwrap_or(false);
        let push_gateway = std::env::var("EXAM_CLASSIFY_METRICS_PUSH_GATEWAY")
            .ok()
            .or_else(|| settings.and_then(|s| s.push_gateway.clone()))
            .map(|endpoint| endpoint.trim().to_string())
            .filter(|endpoint| !endpoint.is_empty());
        Self {
            enabled,
            push_gateway,
        }
    }
}

/// Installed recorder plus where to send its final snapshot.
#[derive(Debug)]
pub struct MetricsHandle {
    prometheus: PrometheusHandle,
    push_gateway: Option<String>,
}

impl MetricsHandle {
    /// Current snapshot in the Prometheus text format.
    #[must_use]
    pub fn render(&self) -> String {
        self.prometheus.render()
    }

    /// POSTs the snapshot to the push gateway, if one is configured.
    ///
    /// A failed push is logged; the run's outcome does not depend on it.
    pub fn push(&self) {
        let Some(endpoint) = &self.push_gateway else {
            return;
        };
        let mut payload = self.render();
        if !payload.ends_with('\n') {
            payload.push('\n');
        }

        let sent = Client::new()
            .post(endpoint)
            .header(CONTENT_TYPE, "text/plain; version=0.0.4")
            .timeout(PUSH_TIMEOUT)
            .body(payload)
            .send();
        match sent {
            Ok(resp) if resp.status().is_success() => {
                tracing::debug!("Pushed metrics to {endpoint}");
            },
            Ok(resp) => tracing::warn!("Metrics push to {endpoint} returned {}", resp.status()),
            Err(e) => tracing::warn!("Metrics push to {endpoint} failed: {e}"),
        }
    }
}

/// Installs the global Prometheus recorder when metrics are enabled.
///
/// # Errors
///
/// Returns an error if a global recorder is already installed.
pub fn install_prometheus(config: &MetricsConfig) -> Result<Option<MetricsHandle>> {
    if !config.enabled {
        return Ok(None);
    }
    let prometheus = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| Error::OperationFailed {
            operation: "install_metrics_recorder".to_string(),
            cause: e.to_string(),
        })?;
    Ok(Some(MetricsHandle {
        prometheus,
        push_gateway: config.push_gateway.clone(),
    }))
}
