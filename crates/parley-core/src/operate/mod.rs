//! Multi-turn orchestration
//!
//! [`OperateLoop`] drives a buffered session and returns one
//! [`LlmOperateResponse`](crate::core_types::LlmOperateResponse);
//! [`StreamLoop`] drives the same state machine and emits
//! [`LlmStreamChunk`](crate::core_types::LlmStreamChunk)s as they happen.
//! Both share the per-invocation [`LoopConfig`] and the tool dispatch below.

pub mod hooks;
pub mod input;
pub mod operate_loop;
pub mod response;
pub mod retry;
pub mod stream_loop;

pub use hooks::{
    Hook, HookRunner, LlmHooks, ModelErrorContext, ModelRequestContext, ModelResponseContext,
    ToolContext, ToolErrorContext, ToolResultContext,
};
pub use input::{OperateInput, Turns, DEFAULT_MAX_TURNS, MAX_TURNS_CEILING};
pub use operate_loop::OperateLoop;
pub use response::ResponseBuilder;
pub use retry::{RetryExecutor, RetryPolicy};
pub use stream_loop::StreamLoop;

use log::warn;
use serde_json::Value;
use std::sync::Arc;

use crate::core_types::{
    History, OperateRequest, ProviderToolDefinition, StandardToolCall, StandardToolResult,
    UsageItem,
};
use crate::errors::LlmError;
use crate::llm::client::ProviderClient;
use crate::llm::providers::ProviderAdapter;
use crate::tools::Toolkit;

/// Everything one loop invocation needs besides its input history.
#[derive(Clone)]
pub struct LoopConfig {
    pub adapter: Arc<dyn ProviderAdapter>,
    pub client: ProviderClient,
    pub model: String,
    pub system: Option<String>,
    pub instructions: Option<String>,
    pub toolkit: Arc<Toolkit>,
    /// Output schema as supplied by the caller, before vendor formatting.
    pub format: Option<Value>,
    pub max_turns: usize,
    pub hooks: HookRunner,
    pub retry: RetryExecutor,
    pub provider_options: Option<Value>,
    pub user: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl LoopConfig {
    pub fn new(adapter: Arc<dyn ProviderAdapter>, client: ProviderClient, model: impl Into<String>) -> Self {
        Self {
            adapter,
            client,
            model: model.into(),
            system: None,
            instructions: None,
            toolkit: Arc::new(Toolkit::empty()),
            format: None,
            max_turns: DEFAULT_MAX_TURNS,
            hooks: HookRunner::default(),
            retry: RetryExecutor::default(),
            provider_options: None,
            user: None,
            max_tokens: None,
            temperature: None,
        }
    }

    pub fn provider(&self) -> &str {
        self.adapter.name()
    }

    /// Vendor-ready output schema and the tool list sent on every turn.
    pub(crate) fn prepare(&self) -> Result<(Option<Value>, Vec<ProviderToolDefinition>), LlmError> {
        let format = self
            .format
            .as_ref()
            .map(|schema| self.adapter.format_output_schema(schema))
            .transpose()?;
        let tools = self.adapter.format_tools(&self.toolkit, format.as_ref());
        Ok((format, tools))
    }

    pub(crate) fn request(
        &self,
        messages: History,
        tools: &[ProviderToolDefinition],
        format: Option<&Value>,
    ) -> OperateRequest {
        OperateRequest {
            model: self.model.clone(),
            messages,
            system: self.system.clone(),
            instructions: self.instructions.clone(),
            tools: tools.to_vec(),
            format: format.cloned(),
            provider_options: self.provider_options.clone(),
            user: self.user.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        }
    }

    /// Vendors that do not echo the model leave it empty; fill it in.
    pub(crate) fn usage_with_model(&self, mut usage: UsageItem) -> UsageItem {
        if usage.model.is_empty() {
            usage.model = self.model.clone();
        }
        if usage.provider.is_empty() {
            usage.provider = self.provider().to_string();
        }
        usage
    }

    /// Runs one tool call with its hooks. A failing tool is reported as
    /// [`ToolOutcome::Failed`]; only hook errors abort.
    pub(crate) async fn run_tool(&self, call: &StandardToolCall) -> Result<ToolOutcome, LlmError> {
        self.hooks.before_each_tool(call).await?;

        match self.toolkit.call(&call.name, &call.arguments).await {
            Ok(output) => {
                self.hooks.after_each_tool(call, &output).await?;
                Ok(ToolOutcome::Output(output))
            }
            Err(error) => {
                warn!("Tool '{}' ({}) failed: {}", call.name, call.call_id, error);
                self.hooks.on_tool_error(call, &error).await?;
                Ok(ToolOutcome::Failed(error))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum ToolOutcome {
    Output(Value),
    Failed(LlmError),
}

impl ToolOutcome {
    pub fn to_result(&self) -> StandardToolResult {
        match self {
            ToolOutcome::Output(output) => StandardToolResult::new(output.clone()),
            ToolOutcome::Failed(error) => StandardToolResult::error(error.to_string()),
        }
    }
}
