//! Configuration management.
//!
//! Values come from, in increasing precedence: built-in defaults, a TOML
//! config file, then `EXAM_CLASSIFY_*` environment variables (a `.env` file
//! in the working directory is loaded first). [`ClassifierConfig::validate`]
//! must pass before any record is touched.

mod areas;

pub use areas::{Area, AreaCatalog, Vocabulary};

use crate::ratelimit::{BackoffConfig, QuotaConfig};
use crate::{Error, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration.
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// Corpus root (the directory containing `year/`).
    pub base_path: PathBuf,
    /// Remote provider settings.
    pub llm: LlmConfig,
    /// Quota ceilings.
    pub quota: QuotaConfig,
    /// Backoff curve.
    pub backoff: BackoffConfig,
    /// Checkpoint settings.
    pub checkpoint: CheckpointConfig,
    /// Failure log location; defaults to `<base_path>/filter_errors.jsonl`.
    pub failure_log: Option<PathBuf>,
    /// Candidate labels per area.
    pub areas: AreaCatalog,
    /// Logging settings.
    pub logging: LoggingSettings,
    /// Metrics settings.
    pub metrics: MetricsSettings,
}

/// Checkpoint settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointConfig {
    /// Save after every this many successes.
    pub cadence: usize,
    /// Directory for `progress_<batch>.json`; defaults to the base path.
    pub dir: Option<PathBuf>,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            cadence: 10,
            dir: None,
        }
    }
}

/// Remote provider configuration.
#[derive(Debug, Clone, Default)]
pub struct LlmConfig {
    /// Provider flavor.
    pub provider: ProviderKind,
    /// Model name.
    pub model: Option<String>,
    /// API key.
    pub api_key: Option<SecretString>,
    /// API base URL override.
    pub endpoint: Option<String>,
    /// Completion token limit.
    pub max_tokens: Option<u32>,
    /// Sampling temperature.
    pub temperature: Option<f32>,
    /// Request timeout in milliseconds.
    pub timeout_ms: Option<u64>,
    /// Connect timeout in milliseconds.
    pub connect_timeout_ms: Option<u64>,
}

/// OpenAI-compatible providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProviderKind {
    /// Groq.
    #[default]
    Groq,
    /// `OpenAI`.
    OpenAi,
    /// `OpenRouter`.
    OpenRouter,
}

impl ProviderKind {
    /// Parses a provider string.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "openai" => Self::OpenAi,
            "openrouter" | "open_router" | "open-router" => Self::OpenRouter,
            _ => Self::Groq,
        }
    }

    /// Default API base URL.
    #[must_use]
    pub const fn default_endpoint(self) -> &'static str {
        match self {
            Self::Groq => "https://api.groq.com/openai/v1",
            Self::OpenAi => "https://api.openai.com/v1",
            Self::OpenRouter => "https://openrouter.ai/api/v1",
        }
    }

    /// Default model.
    #[must_use]
    pub const fn default_model(self) -> &'static str {
        match self {
            Self::Groq => "llama-3.1-8b-instant",
            Self::OpenAi => "gpt-4o-mini",
            Self::OpenRouter => "meta-llama/llama-3.3-70b-instruct",
        }
    }

    /// Provider-specific API key variable.
    #[must_use]
    pub const fn api_key_env(self) -> &'static str {
        match self {
            Self::Groq => "GROQ_API_KEY",
            Self::OpenAi => "OPENAI_API_KEY",
            Self::OpenRouter => "OPENROUTER_API_KEY",
        }
    }
}

/// Logging section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingSettings {
    /// `pretty` or `json`.
    pub format: Option<String>,
    /// `tracing_subscriber::EnvFilter` directive.
    pub filter: Option<String>,
    /// Write logs to this file instead of stderr.
    pub file: Option<PathBuf>,
}

/// Metrics section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetricsSettings {
    /// Whether to install the Prometheus recorder.
    pub enabled: Option<bool>,
    /// Push gateway URL the final snapshot is POSTed to at exit.
    pub push_gateway: Option<String>,
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    /// Corpus section.
    pub corpus: Option<ConfigFileCorpus>,
    /// LLM section.
    pub llm: Option<ConfigFileLlm>,
    /// Quota section.
    pub quota: Option<ConfigFileQuota>,
    /// Backoff section.
    pub backoff: Option<ConfigFileBackoff>,
    /// Checkpoint section.
    pub checkpoint: Option<ConfigFileCheckpoint>,
    /// Failure log section.
    pub failure_log: Option<ConfigFileFailureLog>,
    /// Area table; replaces the built-in one when present.
    pub areas: Option<BTreeMap<String, ConfigFileArea>>,
    /// Logging section.
    pub logging: Option<LoggingSettings>,
    /// Metrics section.
    pub metrics: Option<MetricsSettings>,
}

/// Corpus section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileCorpus {
    /// Corpus root.
    pub base_path: Option<String>,
}

/// LLM section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileLlm {
    /// Provider name.
    pub provider: Option<String>,
    /// Model name.
    pub model: Option<String>,
    /// API key.
    pub api_key: Option<String>,
    /// Base URL.
    pub endpoint: Option<String>,
    /// Completion token limit.
    pub max_tokens: Option<u32>,
    /// Sampling temperature.
    pub temperature: Option<f32>,
    /// Request timeout in milliseconds.
    pub timeout_ms: Option<u64>,
    /// Connect timeout in milliseconds.
    pub connect_timeout_ms: Option<u64>,
}

/// Quota section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileQuota {
    /// Calls per request window.
    pub max_requests: Option<u64>,
    /// Request window length in seconds.
    pub window_secs: Option<u64>,
    /// Tokens per token window.
    pub max_tokens: Option<u64>,
    /// Token window length in seconds.
    pub token_window_secs: Option<u64>,
}

/// Backoff section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileBackoff {
    /// Base delay in seconds.
    pub base_secs: Option<f64>,
    /// Growth factor.
    pub multiplier: Option<f64>,
    /// Maximum delay in seconds.
    pub max_secs: Option<f64>,
}

/// Checkpoint section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileCheckpoint {
    /// Save every N successes.
    pub cadence: Option<usize>,
    /// Checkpoint directory.
    pub dir: Option<String>,
}

/// Failure log section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileFailureLog {
    /// Log file path.
    pub path: Option<String>,
}

/// One `[areas.<name>]` table.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileArea {
    /// Human-readable name.
    pub display_name: Option<String>,
    /// Candidate labels.
    #[serde(default)]
    pub labels: Vec<String>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("."),
            llm: LlmConfig::default(),
            quota: QuotaConfig::default(),
            backoff: BackoffConfig::default(),
            checkpoint: CheckpointConfig::default(),
            failure_log: None,
            areas: AreaCatalog::default(),
            logging: LoggingSettings::default(),
            metrics: MetricsSettings::default(),
        }
    }
}

impl ClassifierConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml(&contents)
    }

    /// Parses configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a valid config file.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let file: ConfigFile =
            toml::from_str(contents).map_err(|e| Error::Config(format!("invalid config: {e}")))?;
        Self::from_config_file(file)
    }

    /// Loads configuration from the default location, or defaults if absent.
    ///
    /// Looks for `exam-classify/config.toml` in the platform config dir.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_default() -> Result<Self> {
        let Some(base_dirs) = directories::BaseDirs::new() else {
            return Ok(Self::default());
        };
        Self::load_if_present(
            &base_dirs
                .config_dir()
                .join("exam-classify")
                .join("config.toml"),
        )
    }

    /// Loads `path` when it exists, defaults otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_if_present(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load_from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Converts a `ConfigFile` to `ClassifierConfig`.
    fn from_config_file(file: ConfigFile) -> Result<Self> {
        let mut config = Self::default();

        if let Some(base_path) = file.corpus.and_then(|c| c.base_path) {
            config.base_path = PathBuf::from(base_path);
        }
        if let Some(llm) = file.llm {
            if let Some(provider) = llm.provider {
                config.llm.provider = ProviderKind::parse(&provider);
            }
            config.llm.model = llm.model;
            config.llm.api_key = llm.api_key.map(SecretString::from);
            config.llm.endpoint = llm.endpoint;
            config.llm.max_tokens = llm.max_tokens;
            config.llm.temperature = llm.temperature;
            config.llm.timeout_ms = llm.timeout_ms;
            config.llm.connect_timeout_ms = llm.connect_timeout_ms;
        }
        if let Some(quota) = file.quota {
            if let Some(v) = quota.max_requests {
                config.quota.max_requests = v;
            }
            if let Some(v) = quota.window_secs {
                config.quota.request_window = Duration::from_secs(v);
            }
            if let Some(v) = quota.max_tokens {
                config.quota.max_tokens = v;
            }
            if let Some(v) = quota.token_window_secs {
                config.quota.token_window = Duration::from_secs(v);
            }
        }
        if let Some(backoff) = file.backoff {
            if let Some(v) = backoff.base_secs {
                config.backoff.base = secs_f64("backoff.base_secs", v)?;
            }
            if let Some(v) = backoff.multiplier {
                config.backoff.multiplier = v;
            }
            if let Some(v) = backoff.max_secs {
                config.backoff.max = secs_f64("backoff.max_secs", v)?;
            }
        }
        if let Some(checkpoint) = file.checkpoint {
            if let Some(v) = checkpoint.cadence {
                config.checkpoint.cadence = v;
            }
            config.checkpoint.dir = checkpoint.dir.map(PathBuf::from);
        }
        if let Some(path) = file.failure_log.and_then(|f| f.path) {
            config.failure_log = Some(PathBuf::from(path));
        }
        if let Some(areas) = file.areas {
            config.areas = AreaCatalog::new(
                areas
                    .into_iter()
                    .map(|(name, area)| Area {
                        name,
                        display_name: area.display_name,
                        labels: area.labels,
                    })
                    .collect(),
            );
        }
        if let Some(logging) = file.logging {
            config.logging = logging;
        }
        if let Some(metrics) = file.metrics {
            config.metrics = metrics;
        }

        Ok(config)
    }

    /// Applies environment variable overrides.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var("EXAM_CLASSIFY_BASE_PATH") {
            self.base_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("EXAM_CLASSIFY_PROVIDER") {
            self.llm.provider = ProviderKind::parse(&v);
        }
        if let Ok(v) = std::env::var("EXAM_CLASSIFY_MODEL") {
            self.llm.model = Some(v);
        }
        if let Ok(v) = std::env::var("EXAM_CLASSIFY_LLM_ENDPOINT") {
            self.llm.endpoint = Some(v);
        }
        if let Ok(v) = std::env::var("EXAM_CLASSIFY_API_KEY")
            .or_else(|_| std::env::var(self.llm.provider.api_key_env()))
        {
            self.llm.api_key = Some(SecretString::from(v));
        }
        if let Some(v) = parse_env::<u64>("EXAM_CLASSIFY_LLM_TIMEOUT_MS") {
            self.llm.timeout_ms = Some(v);
        }
        if let Some(v) = parse_env::<u64>("EXAM_CLASSIFY_QUOTA_MAX_REQUESTS") {
            self.quota.max_requests = v;
        }
        if let Some(v) = parse_env::<u64>("EXAM_CLASSIFY_QUOTA_MAX_TOKENS") {
            self.quota.max_tokens = v;
        }
        if let Some(v) = parse_env::<usize>("EXAM_CLASSIFY_CHECKPOINT_CADENCE") {
            self.checkpoint.cadence = v;
        }
        if let Ok(v) = std::env::var("EXAM_CLASSIFY_FAILURE_LOG") {
            self.failure_log = Some(PathBuf::from(v));
        }
        self
    }

    /// Sets the corpus root.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = path.into();
        self
    }

    /// Resolved failure-log path.
    #[must_use]
    pub fn failure_log_path(&self) -> PathBuf {
        self.failure_log
            .clone()
            .unwrap_or_else(|| self.base_path.join("filter_errors.jsonl"))
    }

    /// Resolved checkpoint directory.
    #[must_use]
    pub fn checkpoint_dir(&self) -> PathBuf {
        self.checkpoint
            .dir
            .clone()
            .unwrap_or_else(|| self.base_path.clone())
    }

    /// Rejects configurations that would stall or misbehave.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first offending value.
    pub fn validate(&self) -> Result<()> {
        let quota = &self.quota;
        if quota.max_requests == 0 || quota.max_tokens == 0 {
            return Err(Error::Config("quota ceilings must be positive".to_string()));
        }
        if quota.request_window.is_zero() || quota.token_window.is_zero() {
            return Err(Error::Config("quota windows must be positive".to_string()));
        }
        let backoff = &self.backoff;
        if !backoff.multiplier.is_finite() || backoff.multiplier < 1.0 {
            return Err(Error::Config(format!(
                "backoff multiplier must be >= 1, got {}",
                backoff.multiplier
            )));
        }
        if backoff.max < backoff.base {
            return Err(Error::Config(
                "backoff max delay is below the base delay".to_string(),
            ));
        }
        if self.checkpoint.cadence == 0 {
            return Err(Error::Config("checkpoint cadence must be positive".to_string()));
        }
        if self.areas.is_empty() {
            return Err(Error::Config("area table is empty".to_string()));
        }
        if let Some(area) = self.areas.iter().find(|a| a.labels.is_empty()) {
            return Err(Error::Config(format!("area '{}' has no labels", area.name)));
        }
        Ok(())
    }
}

fn secs_f64(key: &str, secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs)
        .map_err(|e| Error::InvalidInput(format!("{key} = {secs} is not a valid duration: {e}")))
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
