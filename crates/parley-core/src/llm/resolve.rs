//! Provider registry
//!
//! Maps a provider name or a model identifier to the vendor that serves it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::LlmError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Anthropic,
    #[serde(rename = "openai")]
    OpenAI,
    Gemini,
    #[serde(rename = "openrouter")]
    OpenRouter,
}

/// Provider used when neither a provider nor a model is configured.
pub const DEFAULT_PROVIDER: ProviderKind = ProviderKind::OpenAI;

impl ProviderKind {
    pub const ALL: [ProviderKind; 4] = [
        ProviderKind::Anthropic,
        ProviderKind::OpenAI,
        ProviderKind::Gemini,
        ProviderKind::OpenRouter,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::OpenAI => "openai",
            ProviderKind::Gemini => "gemini",
            ProviderKind::OpenRouter => "openrouter",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            ProviderKind::Anthropic => "claude-sonnet-4-20250514",
            ProviderKind::OpenAI => "gpt-4.1",
            ProviderKind::Gemini => "gemini-2.5-flash",
            ProviderKind::OpenRouter => "openai/gpt-4.1",
        }
    }

    /// Environment variables consulted for the API key, in order.
    pub fn api_key_env(&self) -> &'static [&'static str] {
        match self {
            ProviderKind::Anthropic => &["ANTHROPIC_API_KEY"],
            ProviderKind::OpenAI => &["OPENAI_API_KEY"],
            ProviderKind::Gemini => &["GEMINI_API_KEY", "GOOGLE_API_KEY"],
            ProviderKind::OpenRouter => &["OPENROUTER_API_KEY"],
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            ProviderKind::Anthropic => "https://api.anthropic.com",
            ProviderKind::OpenAI => "https://api.openai.com",
            ProviderKind::Gemini => "https://generativelanguage.googleapis.com",
            ProviderKind::OpenRouter => "https://openrouter.ai/api",
        }
    }

    /// Looks a provider up by name only.
    pub fn from_name(name: &str) -> Option<ProviderKind> {
        match name.trim().to_ascii_lowercase().as_str() {
            "anthropic" | "claude" => Some(ProviderKind::Anthropic),
            "openai" => Some(ProviderKind::OpenAI),
            "gemini" | "google" => Some(ProviderKind::Gemini),
            "openrouter" => Some(ProviderKind::OpenRouter),
            _ => None,
        }
    }

    /// Infers the provider from a model identifier.
    pub fn from_model(model: &str) -> Option<ProviderKind> {
        let model = model.trim().to_ascii_lowercase();
        if model.is_empty() {
            return None;
        }
        if model.contains('/') {
            return Some(ProviderKind::OpenRouter);
        }
        if model.starts_with("claude-") {
            return Some(ProviderKind::Anthropic);
        }
        if model.starts_with("gemini-") {
            return Some(ProviderKind::Gemini);
        }
        const OPENAI_PREFIXES: [&str; 5] = ["gpt-", "chatgpt-", "o1", "o3", "o4"];
        if OPENAI_PREFIXES.iter().any(|p| model.starts_with(p)) {
            return Some(ProviderKind::OpenAI);
        }
        None
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = LlmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProviderKind::from_name(s).ok_or_else(|| LlmError::UnknownProvider(s.to_string()))
    }
}

/// Resolves either a provider name or a model identifier.
pub fn resolve_provider(name_or_model: &str) -> Result<ProviderKind, LlmError> {
    ProviderKind::from_name(name_or_model)
        .or_else(|| ProviderKind::from_model(name_or_model))
        .ok_or_else(|| LlmError::UnknownProvider(name_or_model.to_string()))
}

/// Picks the provider and model for an `Llm` instance.
///
/// An explicit provider wins over the one implied by the model; when the two
/// disagree the model is replaced with the provider's default.
pub fn resolve_provider_and_model(
    provider: Option<&str>,
    model: Option<&str>,
) -> Result<(ProviderKind, String), LlmError> {
    let model = model.map(str::trim).filter(|m| !m.is_empty());

    match (provider, model) {
        (Some(name), model) => {
            let kind = name.parse::<ProviderKind>()?;
            let model = match model {
                Some(m) => match ProviderKind::from_model(m) {
                    Some(implied) if implied != kind => {
                        log::warn!(
                            "Model '{}' belongs to {}, using {} default model '{}'",
                            m,
                            implied,
                            kind,
                            kind.default_model()
                        );
                        kind.default_model().to_string()
                    }
                    _ => m.to_string(),
                },
                None => kind.default_model().to_string(),
            };
            Ok((kind, model))
        }
        (None, Some(m)) => {
            let kind = ProviderKind::from_model(m)
                .ok_or_else(|| LlmError::UnknownProvider(m.to_string()))?;
            Ok((kind, m.to_string()))
        }
        (None, None) => Ok((DEFAULT_PROVIDER, DEFAULT_PROVIDER.default_model().to_string())),
    }
}
