//! Configuration types

use serde::{Deserialize, Serialize};

use crate::errors::LlmError;
use crate::llm::resolve::{resolve_provider_and_model, ProviderKind};
use crate::operate::retry::{
    DEFAULT_BACKOFF_FACTOR, DEFAULT_INITIAL_DELAY_MS, DEFAULT_MAX_DELAY_MS, DEFAULT_MAX_RETRIES,
    MAX_RETRIES_CEILING,
};
use crate::operate::{RetryPolicy, Turns};

/// Root configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ParleyConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turns: Option<Turns>,
    /// Alternate providers tried in order when the primary fails.
    #[serde(default)]
    pub fallback: Vec<FallbackEntry>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Primary provider configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LlmConfig {
    /// Provider name. Inferred from `model` when absent.
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    /// Overrides the vendor endpoint, e.g. for a proxy.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub auth: LlmAuth,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LlmAuth {
    #[serde(default)]
    pub api_key: Option<String>,
    /// Name of the environment variable holding the key.
    #[serde(default)]
    pub api_key_env: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_factor: default_backoff_factor(),
            max_retries: default_max_retries(),
        }
    }
}

impl RetryConfig {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.initial_delay_ms,
            self.max_delay_ms,
            self.backoff_factor,
            self.max_retries,
        )
    }
}

/// One link of the fallback chain. `max_tokens` and `temperature` are
/// inherited from the primary; credentials and endpoint are not.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FallbackEntry {
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub auth: LlmAuth,
}

impl FallbackEntry {
    pub fn new(provider: impl Into<String>, model: Option<&str>) -> Self {
        Self {
            provider: provider.into(),
            model: model.map(str::to_string),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_initial_delay_ms() -> u64 {
    DEFAULT_INITIAL_DELAY_MS
}

fn default_max_delay_ms() -> u64 {
    DEFAULT_MAX_DELAY_MS
}

fn default_backoff_factor() -> f64 {
    DEFAULT_BACKOFF_FACTOR
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_log_level() -> String {
    "info".to_string()
}

impl ParleyConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), LlmError> {
        resolve_provider_and_model(self.llm.provider.as_deref(), self.llm.model.as_deref())
            .map_err(|e| LlmError::Config(format!("llm: {}", e)))?;

        if let Some(temperature) = self.llm.temperature {
            if !(0.0..=2.0).contains(&temperature) {
                return Err(LlmError::Config(format!(
                    "llm.temperature must be between 0 and 2, got {}",
                    temperature
                )));
            }
        }

        self.retry.validate()?;

        for (i, entry) in self.fallback.iter().enumerate() {
            if ProviderKind::from_name(&entry.provider).is_none() {
                return Err(LlmError::Config(format!(
                    "fallback[{}]: unknown provider '{}'",
                    i, entry.provider
                )));
            }
        }

        match self.logging.level.to_ascii_lowercase().as_str() {
            "off" | "error" | "warn" | "info" | "debug" | "trace" => Ok(()),
            other => Err(LlmError::Config(format!(
                "logging.level must be one of off, error, warn, info, debug, trace; got '{}'",
                other
            ))),
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> Result<(), LlmError> {
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(LlmError::Config(format!(
                "retry.backoff_factor must be at least 1, got {}",
                self.backoff_factor
            )));
        }
        if self.initial_delay_ms > self.max_delay_ms {
            return Err(LlmError::Config(format!(
                "retry.initial_delay_ms ({}) exceeds retry.max_delay_ms ({})",
                self.initial_delay_ms, self.max_delay_ms
            )));
        }
        if self.max_retries > MAX_RETRIES_CEILING {
            log::warn!(
                "retry.max_retries {} is above the ceiling, clamping to {}",
                self.max_retries,
                MAX_RETRIES_CEILING
            );
        }
        Ok(())
    }
}
