//! Configuration loader for YAML files and environment resolution

use std::env;
use std::path::Path;
use tokio::fs;

use crate::config::types::*;
use crate::errors::LlmError;
use crate::llm::resolve::ProviderKind;

/// Configuration loader with environment resolution
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a YAML file
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<ParleyConfig, LlmError> {
        let path = path.as_ref();

        let content = fs::read_to_string(path).await.map_err(|e| {
            LlmError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        log::debug!("Loaded configuration from {}", path.display());
        Self::from_str(&content)
    }

    /// Load configuration from a YAML string
    pub fn from_str(content: &str) -> Result<ParleyConfig, LlmError> {
        let config: ParleyConfig = serde_yaml::from_str(content)
            .map_err(|e| LlmError::Config(format!("Failed to parse YAML config: {}", e)))?;

        config.validate()?;

        Ok(config)
    }
}

/// Resolves the API key for `provider`.
///
/// Order: the literal key, then the variable named by `api_key_env`, then
/// the provider's conventional variables. Empty values count as unset.
pub fn resolve_api_key(provider: ProviderKind, auth: &LlmAuth) -> Result<String, LlmError> {
    if let Some(key) = auth.api_key.as_deref().filter(|k| !k.is_empty()) {
        return Ok(key.to_string());
    }

    if let Some(var) = auth.api_key_env.as_deref() {
        return read_env(var).ok_or_else(|| {
            LlmError::Config(format!(
                "Environment variable {} (api_key_env for {}) is not set",
                var, provider
            ))
        });
    }

    for var in provider.api_key_env() {
        if let Some(key) = read_env(var) {
            log::debug!("Using {} for {}", var, provider);
            return Ok(key);
        }
    }

    Err(LlmError::Config(format!(
        "No API key for {}: set auth.api_key, auth.api_key_env or {}",
        provider,
        provider.api_key_env().join(" / ")
    )))
}

fn read_env(var: &str) -> Option<String> {
    env::var(var).ok().filter(|v| !v.is_empty())
}
