//! DeepSeek - hosted text-generation provider
//!
//! Uses the OpenAI-compatible chat completion API. Failures are mapped onto
//! [`Error`] so the resilience layer can tell rate limits and transient
//! faults apart from permanent ones:
//! - 429 → [`Error::RateLimit`] with the `Retry-After` hint
//! - 5xx → [`Error::ServerError`]
//! - other non-success statuses → [`Error::Api`]
//! - connect/transport failures → [`Error::Network`], timeouts → [`Error::Timeout`]

use crate::error::{Error, Result};
use crate::generation::{GenerationProvider, Prompt};
use crate::util::{mask_api_key, retry_after_from_headers, truncate_safe};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// DeepSeek API base URL
pub const DEEPSEEK_API_BASE: &str = "https://api.deepseek.com/v1";

/// Default DeepSeek model
pub const DEFAULT_MODEL: &str = "deepseek-chat";

/// Default sampling temperature
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// DeepSeek provider configuration
#[derive(Clone)]
pub struct DeepSeekConfig {
    /// API key
    pub api_key: String,
    /// Base URL
    pub base_url: String,
    /// Default model
    pub default_model: String,
    /// Sampling temperature
    pub temperature: f32,
    /// Per-request timeout
    pub timeout: Duration,
}

// SECURITY: Custom Debug implementation to mask API key
impl fmt::Debug for DeepSeekConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeepSeekConfig")
            .field("api_key", &mask_api_key(&self.api_key))
            .field("base_url", &self.base_url)
            .field("default_model", &self.default_model)
            .field("temperature", &self.temperature)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Sanitize API error messages
fn sanitize_api_error(error: &str) -> String {
    let lower = error.to_lowercase();

    if lower.contains("api key")
        || lower.contains("apikey")
        || lower.contains("invalid key")
        || lower.contains("unauthorized")
        || lower.contains("authentication")
    {
        return "API authentication error. Please check your DEEPSEEK_API_KEY.".to_string();
    }

    if error.len() > 300 {
        format!("{}...(truncated)", truncate_safe(error, 300))
    } else {
        error.to_string()
    }
}

impl DeepSeekConfig {
    /// Create a new configuration with an API key
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEEPSEEK_API_BASE.to_string(),
            default_model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            timeout: Duration::from_secs(120),
        }
    }

    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("DEEPSEEK_API_KEY")
            .map_err(|_| Error::NotConfigured("DEEPSEEK_API_KEY not set".to_string()))?;

        let mut config = Self::new(api_key);
        if let Ok(model) = std::env::var("DEEPSEEK_MODEL") {
            config.default_model = model;
        }
        if let Ok(url) = std::env::var("DEEPSEEK_API_URL") {
            config.base_url = url;
        }
        Ok(config)
    }

    /// Set the base URL
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Set the default model
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    /// Set the sampling temperature
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Usage statistics snapshot
#[derive(Debug, Clone, Serialize)]
pub struct ProviderStats {
    /// Completion endpoint
    pub api_url: String,
    /// Model in use
    pub model: String,
    /// Whether an API key is configured
    pub has_api_key: bool,
}

/// DeepSeek provider (OpenAI-compatible)
pub struct DeepSeekProvider {
    client: Client,
    config: DeepSeekConfig,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

impl DeepSeekProvider {
    /// Create a new DeepSeek provider
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(config: DeepSeekConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Provider(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        let config = DeepSeekConfig::from_env()?;
        Self::new(config)
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    /// Current configuration snapshot
    #[must_use]
    pub fn stats(&self) -> ProviderStats {
        ProviderStats {
            api_url: self.endpoint(),
            model: self.config.default_model.clone(),
            has_api_key: !self.config.api_key.is_empty(),
        }
    }

    /// Send a tiny prompt to verify credentials and connectivity
    pub async fn health_check(&self) -> Result<()> {
        let reply = self.generate(&Prompt::user("ping")).await?;
        debug!(chars = reply.len(), "DeepSeek connection verified");
        Ok(())
    }

    fn map_transport_error(&self, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::Timeout(self.config.timeout.as_millis() as u64)
        } else if e.is_decode() {
            Error::InvalidResponse(e.to_string())
        } else {
            Error::Network(sanitize_api_error(&e.to_string()))
        }
    }
}

#[async_trait::async_trait]
impl GenerationProvider for DeepSeekProvider {
    fn name(&self) -> &str {
        "deepseek"
    }

    #[instrument(
        skip(self, prompt),
        fields(model = %self.config.default_model, messages = prompt.messages.len())
    )]
    async fn generate(&self, prompt: &Prompt) -> Result<String> {
        if self.config.api_key.is_empty() {
            return Err(Error::NotConfigured("DEEPSEEK_API_KEY is empty".to_string()));
        }

        let request = ChatRequest {
            model: &self.config.default_model,
            messages: prompt
                .messages
                .iter()
                .map(|m| ChatMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
            temperature: self.config.temperature,
        };

        debug!("Sending request to DeepSeek");

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = retry_after_from_headers(response.headers());
            warn!(
                retry_after_secs = retry_after.map(|d| d.as_secs()),
                "DeepSeek rate limited (429)"
            );
            return Err(Error::RateLimit { retry_after });
        }

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            let message = sanitize_api_error(&error_text);
            if status.is_server_error() {
                return Err(Error::ServerError(format!("{}: {}", status.as_u16(), message)));
            }
            return Err(Error::Api {
                status: status.as_u16(),
                message,
            });
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| Error::InvalidResponse("No choices in response".to_string()))
    }
}
