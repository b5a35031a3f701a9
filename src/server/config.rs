//! Server configuration types
//!
//! Every section carries serde defaults so the embedded `config/default.toml`
//! can stay minimal and environment overrides can target single keys.

use aegis_core::ResilienceConfig;
use aegis_llm::DeepSeekConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub resilience: ResilienceConfig,
}

/// HTTP listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8090
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Shared counter backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,
    /// When false the quota store starts in LOCAL mode without probing
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            enabled: true,
        }
    }
}

impl RedisConfig {
    /// URL to probe, or `None` when the shared backend is disabled
    pub fn effective_url(&self) -> Option<&str> {
        (self.enabled && !self.url.is_empty()).then_some(self.url.as_str())
    }
}

/// LLM configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub deepseek: DeepSeekLlmConfig,
    /// Optional system instruction prepended to every prompt
    #[serde(default)]
    pub system_prompt: Option<String>,
}

/// DeepSeek-specific config (the API key comes from `DEEPSEEK_API_KEY`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeepSeekLlmConfig {
    #[serde(default = "default_deepseek_base_url")]
    pub base_url: String,
    #[serde(default = "default_deepseek_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_deepseek_base_url() -> String {
    aegis_llm::deepseek::DEEPSEEK_API_BASE.to_string()
}

fn default_deepseek_model() -> String {
    aegis_llm::deepseek::DEFAULT_MODEL.to_string()
}

fn default_temperature() -> f32 {
    aegis_llm::deepseek::DEFAULT_TEMPERATURE
}

fn default_timeout_secs() -> u64 {
    60
}

impl Default for DeepSeekLlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_deepseek_base_url(),
            model: default_deepseek_model(),
            temperature: default_temperature(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl DeepSeekLlmConfig {
    /// Provider configuration for `api_key`
    pub fn to_provider_config(&self, api_key: impl Into<String>) -> DeepSeekConfig {
        DeepSeekConfig::new(api_key)
            .with_base_url(self.base_url.clone())
            .with_model(self.model.clone())
            .with_temperature(self.temperature)
            .with_timeout(Duration::from_secs(self.timeout_secs))
    }
}
