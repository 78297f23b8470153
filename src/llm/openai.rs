//! OpenAI-compatible Chat Completions client (Groq, `OpenAI`, `OpenRouter`).

use super::{Completion, LlmHttpConfig, LlmProvider, build_http_client};
use crate::config::ProviderKind;
use crate::{Error, Result};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

/// Chat Completions client.
#[derive(Debug)]
pub struct OpenAiClient {
    /// Provider flavor.
    kind: ProviderKind,
    /// API key.
    api_key: Option<SecretString>,
    /// API endpoint.
    endpoint: String,
    /// Model to use.
    model: String,
    /// Completion token limit.
    max_tokens: u32,
    /// Sampling temperature.
    temperature: f32,
    /// HTTP client.
    client: reqwest::blocking::Client,
}

impl OpenAiClient {
    /// Default completion token limit; a label needs only a few.
    pub const DEFAULT_MAX_TOKENS: u32 = 100;

    /// Default sampling temperature.
    pub const DEFAULT_TEMPERATURE: f32 = 0.1;

    /// Creates a client for `kind` with its default endpoint and model.
    #[must_use]
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            api_key: None,
            endpoint: kind.default_endpoint().to_string(),
            model: kind.default_model().to_string(),
            max_tokens: Self::DEFAULT_MAX_TOKENS,
            temperature: Self::DEFAULT_TEMPERATURE,
            client: build_http_client(LlmHttpConfig::default()),
        }
    }

    /// Sets the API key.
    #[must_use]
    pub fn with_api_key(mut self, key: SecretString) -> Self {
        self.api_key = Some(key);
        self
    }

    /// Sets the API endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    /// Sets the model.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Sets the completion token limit.
    #[must_use]
    pub const fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Sets the sampling temperature.
    #[must_use]
    pub const fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Replaces the HTTP client with one using `config` timeouts.
    #[must_use]
    pub fn with_http_config(mut self, config: LlmHttpConfig) -> Self {
        self.client = build_http_client(config);
        self
    }

    /// Model in use.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Validates that the client is configured.
    fn validate(&self) -> Result<()> {
        if self.api_key.is_none() {
            return Err(Error::Config(format!(
                "{} not set",
                self.kind.api_key_env()
            )));
        }
        Ok(())
    }

    fn transport(&self, cause: impl Into<String>) -> Error {
        Error::Transport {
            provider: self.name(),
            cause: cause.into(),
        }
    }

    /// Makes a request to the Chat Completions API.
    fn request(&self, prompt: &str) -> Result<Completion> {
        self.validate()?;

        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| Error::Config("API key not configured".to_string()))?;

        let request = ChatCompletionRequest {
            model: &self.model,
            messages: vec![ChatMessageRef {
                role: "user",
                content: prompt,
            }],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let span = tracing::debug_span!("llm.request", provider = self.name(), model = %self.model);
        let _enter = span.enter();

        let response = self
            .client
            .post(format!("{}/chat/completions", self.endpoint))
            .bearer_auth(api_key.expose_secret())
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .map_err(|e| self.transport(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let body = response.text().unwrap_or_default();
            return Err(Error::RateLimited {
                provider: self.name(),
                cause: format!("API returned status: {status} - {body}"),
            });
        }
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(self.transport(format!("API returned status: {status} - {body}")));
        }

        let response: ChatCompletionResponse = response
            .json()
            .map_err(|e| self.transport(format!("undecodable response: {e}")))?;

        parse_completion(response).ok_or_else(|| self.transport("No choices in response"))
    }
}

impl LlmProvider for OpenAiClient {
    fn name(&self) -> &'static str {
        match self.kind {
            ProviderKind::Groq => "groq",
            ProviderKind::OpenAi => "openai",
            ProviderKind::OpenRouter => "openrouter",
        }
    }

    fn complete(&self, prompt: &str) -> Result<Completion> {
        self.request(prompt)
    }
}

fn parse_completion(response: ChatCompletionResponse) -> Option<Completion> {
    let total_tokens = response.usage.and_then(|u| u.total_tokens);
    response.choices.into_iter().next().map(|choice| Completion {
        text: choice.message.content.unwrap_or_default(),
        total_tokens,
    })
}

/// Request to the Chat Completions API.
#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessageRef<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessageRef<'a> {
    role: &'a str,
    content: &'a str,
}

/// Response from the Chat Completions API.
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    total_tokens: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = OpenAiClient::new(ProviderKind::Groq);
        assert_eq!(client.name(), "groq");
        assert_eq!(client.model(), "llama-3.1-8b-instant");
        assert_eq!(client.endpoint, "https://api.groq.com/openai/v1");
        assert_eq!(client.max_tokens, 100);
    }

    #[test]
    fn test_client_configuration() {
        let client = OpenAiClient::new(ProviderKind::OpenAi)
            .with_api_key(SecretString::from("test-key".to_string()))
            .with_endpoint("https://custom.endpoint/v1/")
            .with_model("gpt-4o")
            .with_temperature(0.0);

        assert_eq!(client.endpoint, "https://custom.endpoint/v1");
        assert_eq!(client.model(), "gpt-4o");
        assert!(client.validate().is_ok());
    }

    #[test]
    fn test_missing_key_is_config_error() {
        let client = OpenAiClient::new(ProviderKind::Groq);
        assert!(matches!(client.complete("x"), Err(Error::Config(_))));
    }

    #[test]
    fn test_request_serialization() {
        let request = ChatCompletionRequest {
            model: "m",
            messages: vec![ChatMessageRef {
                role: "user",
                content: "hello",
            }],
            max_tokens: 100,
            temperature: 0.1,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["max_tokens"], 100);
    }

    #[test]
    fn test_parse_completion_with_usage() {
        let response: ChatCompletionResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"role":"assistant","content":"historia"}}],
                "usage":{"prompt_tokens":380,"completion_tokens":2,"total_tokens":382}}"#,
        )
        .unwrap();
        let completion = parse_completion(response).unwrap();
        assert_eq!(completion.text, "historia");
        assert_eq!(completion.total_tokens, Some(382));
    }

    #[test]
    fn test_parse_completion_without_choices() {
        let response: ChatCompletionResponse =
            serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        assert!(parse_completion(response).is_none());
    }
}
