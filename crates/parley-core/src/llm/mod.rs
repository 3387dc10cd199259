//! Provider-agnostic entry point.
//!
//! [`Llm`] binds one provider, model and client together and runs buffered
//! or streamed sessions against it. When the primary provider fails, the
//! configured fallback chain is tried in order, each link built on demand.

use log::{info, warn};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

pub mod client;
pub mod providers;
pub mod resolve;
pub mod schema;

pub use client::ProviderClient;
pub use providers::{create_adapter, ProviderAdapter};
pub use resolve::{resolve_provider, resolve_provider_and_model, ProviderKind};

use crate::config::{resolve_api_key, FallbackEntry, LlmConfig, ParleyConfig};
use crate::core_types::LlmOperateResponse;
use crate::errors::LlmError;
use crate::operate::input::substitute;
use crate::operate::stream_loop::LlmChunkStream;
use crate::operate::{
    HookRunner, LlmHooks, LoopConfig, OperateInput, OperateLoop, RetryExecutor, StreamLoop, Turns,
};
use crate::tools::Toolkit;

/// Per-call fallback behaviour.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum FallbackOption {
    /// Use the chain from the instance configuration.
    #[default]
    Inherit,
    Disabled,
    /// Replace the configured chain for this call.
    Chain(Vec<FallbackEntry>),
}

/// Options for a single `operate` or `stream` call.
#[derive(Clone, Default)]
pub struct OperateOptions {
    /// Overrides the instance model for this call.
    pub model: Option<String>,
    pub system: Option<String>,
    pub instructions: Option<String>,
    /// Values for `{{key}}` placeholders in the input, system and instructions.
    pub data: Option<HashMap<String, String>>,
    pub tools: Option<Arc<Toolkit>>,
    /// Structured output schema, JSON schema or shorthand.
    pub format: Option<Value>,
    pub turns: Option<Turns>,
    pub hooks: LlmHooks,
    /// Merged into the vendor request body as is.
    pub provider_options: Option<Value>,
    pub user: Option<String>,
    pub fallback: FallbackOption,
}

pub struct Llm {
    provider: ProviderKind,
    model: String,
    adapter: Arc<dyn ProviderAdapter>,
    client: ProviderClient,
    config: ParleyConfig,
}

impl Llm {
    /// Resolves provider, model and credentials from `config`.
    pub fn new(config: ParleyConfig) -> Result<Self, LlmError> {
        let (provider, model) =
            resolve_provider_and_model(config.llm.provider.as_deref(), config.llm.model.as_deref())?;
        let api_key = resolve_api_key(provider, &config.llm.auth)?;
        let client = ProviderClient::new(provider, api_key, config.llm.base_url.clone())?;

        info!("Using {} model {}", provider, model);
        Ok(Self {
            provider,
            model,
            adapter: create_adapter(provider),
            client,
            config,
        })
    }

    /// Builds an instance around an existing adapter, e.g. a custom vendor.
    pub fn with_adapter(
        adapter: Arc<dyn ProviderAdapter>,
        client: ProviderClient,
        model: impl Into<String>,
        config: ParleyConfig,
    ) -> Self {
        Self {
            provider: client.provider(),
            model: model.into(),
            adapter,
            client,
            config,
        }
    }

    pub fn provider(&self) -> ProviderKind {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn config(&self) -> &ParleyConfig {
        &self.config
    }

    /// Runs a buffered session, falling back through the chain on failure.
    ///
    /// The response carries `fallback_used`/`fallback_attempts` whenever a
    /// chain was in effect. If every link fails, the last error is returned.
    pub async fn operate(
        &self,
        input: impl Into<OperateInput>,
        options: OperateOptions,
    ) -> Result<LlmOperateResponse, LlmError> {
        let input = input.into();
        let chain = self.fallback_chain(&options.fallback);

        let primary_error = match self.operate_once(input.clone(), &options).await {
            Ok(mut response) => {
                if !chain.is_empty() {
                    response.fallback_used = Some(false);
                    response.fallback_attempts = Some(1);
                }
                return Ok(response);
            }
            Err(err) => err,
        };

        if chain.is_empty() {
            return Err(primary_error);
        }
        warn!(
            "{} failed, trying {} fallback(s): {}",
            self.provider,
            chain.len(),
            primary_error
        );

        let inner = OperateOptions {
            model: None,
            fallback: FallbackOption::Disabled,
            ..options
        };
        let mut last_error = primary_error;

        for (i, entry) in chain.iter().enumerate() {
            let attempt = i as u32 + 2;
            let fallback = match self.fallback_llm(entry) {
                Ok(llm) => llm,
                Err(err) => {
                    warn!("Skipping fallback {} ({}): {}", attempt, entry.provider, err);
                    last_error = err;
                    continue;
                }
            };

            match fallback.operate_once(input.clone(), &inner).await {
                Ok(mut response) => {
                    info!(
                        "Fallback {} ({} {}) answered",
                        attempt, fallback.provider, fallback.model
                    );
                    response.fallback_used = Some(true);
                    response.fallback_attempts = Some(attempt);
                    return Ok(response);
                }
                Err(err) => {
                    warn!("Fallback {} ({}) failed: {}", attempt, entry.provider, err);
                    last_error = err;
                }
            }
        }

        Err(last_error)
    }

    /// Runs a streamed session. Must be called inside a tokio runtime.
    ///
    /// Streams do not fall back: a failure is reported as an `Error` chunk.
    pub fn stream(&self, input: impl Into<OperateInput>, options: OperateOptions) -> LlmChunkStream {
        let history = input.into().into_history(options.data.as_ref());
        StreamLoop::new(self.loop_config(&options)).execute(history)
    }

    async fn operate_once(
        &self,
        input: OperateInput,
        options: &OperateOptions,
    ) -> Result<LlmOperateResponse, LlmError> {
        let history = input.into_history(options.data.as_ref());
        OperateLoop::new(self.loop_config(options))
            .execute(history)
            .await
    }

    fn loop_config(&self, options: &OperateOptions) -> LoopConfig {
        let fill = |text: &Option<String>| {
            text.as_deref().map(|t| match &options.data {
                Some(data) => substitute(t, data),
                None => t.to_string(),
            })
        };

        let model = options.model.clone().unwrap_or_else(|| self.model.clone());
        let mut config = LoopConfig::new(self.adapter.clone(), self.client.clone(), model);
        config.system = fill(&options.system);
        config.instructions = fill(&options.instructions);
        config.toolkit = options
            .tools
            .clone()
            .unwrap_or_else(|| Arc::new(Toolkit::empty()));
        config.format = options.format.clone();
        config.max_turns = options
            .turns
            .or(self.config.turns)
            .unwrap_or_default()
            .max_turns();
        config.hooks = HookRunner::new(options.hooks.clone());
        config.retry = RetryExecutor::new(self.config.retry.to_policy());
        config.provider_options = options.provider_options.clone();
        config.user = options.user.clone();
        config.max_tokens = self.config.llm.max_tokens;
        config.temperature = self.config.llm.temperature;
        config
    }

    fn fallback_chain(&self, option: &FallbackOption) -> Vec<FallbackEntry> {
        match option {
            FallbackOption::Inherit => self.config.fallback.clone(),
            FallbackOption::Disabled => Vec::new(),
            FallbackOption::Chain(chain) => chain.clone(),
        }
    }

    fn fallback_llm(&self, entry: &FallbackEntry) -> Result<Llm, LlmError> {
        let mut config = self.config.clone();
        config.llm = LlmConfig {
            provider: Some(entry.provider.clone()),
            model: entry.model.clone(),
            base_url: entry.base_url.clone(),
            auth: entry.auth.clone(),
            max_tokens: self.config.llm.max_tokens,
            temperature: self.config.llm.temperature,
        };
        config.fallback = Vec::new();
        Llm::new(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LlmAuth, RetryConfig};
    use crate::core_types::{LlmStreamChunk, ResponseStatus, UsageItem};
    use crate::test_utils::{mock_client, MockAdapter, MOCK_MODEL};
    use futures_util::StreamExt;

    fn fast_config() -> ParleyConfig {
        ParleyConfig {
            retry: RetryConfig {
                initial_delay_ms: 0,
                max_delay_ms: 0,
                backoff_factor: 1.0,
                max_retries: 1,
            },
            ..Default::default()
        }
    }

    fn mock_llm(adapter: Arc<MockAdapter>, config: ParleyConfig) -> Llm {
        Llm::with_adapter(adapter, mock_client(), MOCK_MODEL, config)
    }

    fn unreachable_fallback() -> FallbackEntry {
        FallbackEntry {
            provider: "openrouter".to_string(),
            model: Some("openai/gpt-4.1".to_string()),
            base_url: None,
            auth: LlmAuth {
                api_key: None,
                api_key_env: Some("PARLEY_TEST_UNSET_KEY".to_string()),
            },
        }
    }

    #[tokio::test]
    async fn test_operate_substitutes_data() {
        let adapter = MockAdapter::with_responses(vec![Ok(MockAdapter::text_response("ok"))]);
        let llm = mock_llm(adapter.clone(), fast_config());

        let options = OperateOptions {
            system: Some("You help {{user}}.".to_string()),
            instructions: Some("Reply in {{lang}}.".to_string()),
            data: Some(HashMap::from([
                ("user".to_string(), "Ada".to_string()),
                ("lang".to_string(), "French".to_string()),
            ])),
            ..Default::default()
        };
        let response = llm.operate("Hello {{user}}", options).await.unwrap();

        assert_eq!(response.status, ResponseStatus::Completed);
        let request = &adapter.requests()[0];
        assert_eq!(request["system"], "You help Ada.");
        assert_eq!(request["instructions"], "Reply in French.");
        assert_eq!(request["messages"][0]["content"], "Hello Ada");
    }

    #[tokio::test]
    async fn test_model_override_applies_to_one_call() {
        let adapter = MockAdapter::with_responses(vec![
            Ok(MockAdapter::text_response("a")),
            Ok(MockAdapter::text_response("b")),
        ]);
        let llm = mock_llm(adapter.clone(), fast_config());

        let options = OperateOptions {
            model: Some("mock-large".to_string()),
            ..Default::default()
        };
        let response = llm.operate("one", options).await.unwrap();
        assert_eq!(response.model, "mock-large");

        llm.operate("two", OperateOptions::default()).await.unwrap();
        let requests = adapter.requests();
        assert_eq!(requests[0]["model"], "mock-large");
        assert_eq!(requests[1]["model"], MOCK_MODEL);
    }

    #[tokio::test]
    async fn test_primary_success_reports_no_fallback() {
        let adapter = MockAdapter::with_responses(vec![
            Ok(MockAdapter::text_response("a")),
            Ok(MockAdapter::text_response("b")),
        ]);
        let mut config = fast_config();
        config.fallback = vec![unreachable_fallback()];
        let llm = mock_llm(adapter.clone(), config);

        let response = llm.operate("hi", OperateOptions::default()).await.unwrap();
        assert_eq!(response.fallback_used, Some(false));
        assert_eq!(response.fallback_attempts, Some(1));

        let options = OperateOptions {
            fallback: FallbackOption::Disabled,
            ..Default::default()
        };
        let response = llm.operate("hi", options).await.unwrap();
        assert_eq!(response.fallback_used, None);
    }

    #[tokio::test]
    async fn test_exhausted_chain_returns_last_error() {
        let adapter = MockAdapter::with_responses(vec![Err(MockAdapter::api_error(401))]);
        let mut config = fast_config();
        config.fallback = vec![unreachable_fallback()];
        let llm = mock_llm(adapter.clone(), config);

        let err = llm.operate("hi", OperateOptions::default()).await.unwrap_err();

        // the fallback could not be built, so its error is the last one
        assert!(matches!(err, LlmError::Config(ref m) if m.contains("PARLEY_TEST_UNSET_KEY")));
        assert_eq!(adapter.request_count(), 1);
    }

    #[tokio::test]
    async fn test_disabled_fallback_rethrows_primary_error() {
        let adapter = MockAdapter::with_responses(vec![Err(MockAdapter::api_error(400))]);
        let mut config = fast_config();
        config.fallback = vec![unreachable_fallback()];
        let llm = mock_llm(adapter, config);

        let options = OperateOptions {
            fallback: FallbackOption::Disabled,
            ..Default::default()
        };
        let err = llm.operate("hi", options).await.unwrap_err();
        assert_eq!(err.root_cause().status(), 400);
    }

    #[tokio::test]
    async fn test_stream_through_facade() {
        let adapter = MockAdapter::with_streams(vec![Ok(vec![
            Ok(LlmStreamChunk::Text {
                content: "streamed".to_string(),
            }),
            Ok(LlmStreamChunk::Done {
                usage: vec![UsageItem::new("mock", MOCK_MODEL, 4, 2, 0)],
            }),
        ])]);
        let llm = mock_llm(adapter, fast_config());

        let chunks: Vec<_> = llm.stream("hi", OperateOptions::default()).collect().await;
        assert_eq!(chunks.len(), 2);
        assert!(matches!(&chunks[1], LlmStreamChunk::Done { usage } if usage[0].total == 6));
    }

    #[test]
    fn test_new_resolves_provider_from_model() {
        let config = ParleyConfig {
            llm: LlmConfig {
                model: Some("claude-sonnet-4-20250514".to_string()),
                auth: LlmAuth {
                    api_key: Some("sk-test".to_string()),
                    api_key_env: None,
                },
                ..Default::default()
            },
            ..Default::default()
        };
        let llm = Llm::new(config).unwrap();
        assert_eq!(llm.provider(), ProviderKind::Anthropic);
        assert_eq!(llm.model(), "claude-sonnet-4-20250514");
    }

    #[test]
    fn test_new_rejects_unknown_model() {
        let config = ParleyConfig {
            llm: LlmConfig {
                model: Some("mystery-7b".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(matches!(Llm::new(config), Err(LlmError::UnknownProvider(_))));
    }
}
