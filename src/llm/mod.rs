//! LLM client abstraction.
//!
//! The classifier only needs one thing from a model: a short free-text
//! answer to a single prompt, plus the provider's token accounting when it
//! reports one.

mod openai;

pub use openai::OpenAiClient;

use crate::Result;
use crate::config::LlmConfig;
use std::time::Duration;

/// Trait for LLM providers.
pub trait LlmProvider: Send + Sync {
    /// The provider name.
    fn name(&self) -> &'static str;

    /// Generates a completion for the given prompt.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::RateLimited`] when the provider signals
    /// throttling and [`crate::Error::Transport`] for every other failure.
    fn complete(&self, prompt: &str) -> Result<Completion>;
}

impl<P: LlmProvider + ?Sized> LlmProvider for Box<P> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn complete(&self, prompt: &str) -> Result<Completion> {
        (**self).complete(prompt)
    }
}

/// A model answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    /// Raw answer text.
    pub text: String,
    /// Tokens billed for the call, when the provider reports them.
    pub total_tokens: Option<u64>,
}

impl Completion {
    /// Creates a completion without usage data.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            total_tokens: None,
        }
    }

    /// Attaches the billed token count.
    #[must_use]
    pub const fn with_total_tokens(mut self, total_tokens: u64) -> Self {
        self.total_tokens = Some(total_tokens);
        self
    }
}

/// HTTP client configuration for LLM providers.
#[derive(Debug, Clone, Copy)]
pub struct LlmHttpConfig {
    /// Request timeout in milliseconds (0 to disable).
    pub timeout_ms: u64,
    /// Connect timeout in milliseconds (0 to disable).
    pub connect_timeout_ms: u64,
}

impl Default for LlmHttpConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            connect_timeout_ms: 3_000,
        }
    }
}

impl LlmHttpConfig {
    /// Loads HTTP configuration from config file settings.
    #[must_use]
    pub fn from_config(config: &LlmConfig) -> Self {
        let mut settings = Self::default();
        if let Some(timeout_ms) = config.timeout_ms {
            settings.timeout_ms = timeout_ms;
        }
        if let Some(connect_timeout_ms) = config.connect_timeout_ms {
            settings.connect_timeout_ms = connect_timeout_ms;
        }
        settings
    }
}

/// Builds a blocking HTTP client for LLM requests with configured timeouts.
#[must_use]
pub fn build_http_client(config: LlmHttpConfig) -> reqwest::blocking::Client {
    let mut builder = reqwest::blocking::Client::builder();
    if config.timeout_ms > 0 {
        builder = builder.timeout(Duration::from_millis(config.timeout_ms));
    }
    if config.connect_timeout_ms > 0 {
        builder = builder.connect_timeout(Duration::from_millis(config.connect_timeout_ms));
    }

    builder.build().unwrap_or_else(|err| {
        tracing::warn!("Failed to build LLM HTTP client: {err}");
        reqwest::blocking::Client::new()
    })
}

/// Builds the configured provider.
///
/// # Errors
///
/// Returns [`crate::Error::Config`] when no API key is available.
pub fn build_provider(config: &LlmConfig) -> Result<OpenAiClient> {
    let api_key = config.api_key.clone().ok_or_else(|| {
        crate::Error::Config(format!(
            "no API key: set EXAM_CLASSIFY_API_KEY or {}",
            config.provider.api_key_env()
        ))
    })?;

    let mut client = OpenAiClient::new(config.provider)
        .with_api_key(api_key)
        .with_http_config(LlmHttpConfig::from_config(config));
    if let Some(endpoint) = &config.endpoint {
        client = client.with_endpoint(endpoint);
    }
    if let Some(model) = &config.model {
        client = client.with_model(model);
    }
    if let Some(max_tokens) = config.max_tokens {
        client = client.with_max_tokens(max_tokens);
    }
    if let Some(temperature) = config.temperature {
        client = client.with_temperature(temperature);
    }
    Ok(client)
}
