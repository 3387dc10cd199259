//! Vendor adapters
//!
//! Each adapter translates the normalized request/response model to one
//! vendor's wire format. Adapters are stateless; the loops share one instance
//! across turns and across concurrent invocations.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use log::warn;
use serde_json::{Map, Value};
use std::sync::Arc;

use super::client::ProviderClient;
use super::resolve::ProviderKind;
use super::schema::normalize_output_schema;
use crate::core_types::{
    History, HistoryItem, LlmStreamChunk, OperateRequest, ParsedResponse, ProviderToolDefinition,
    Role, StandardToolCall, StandardToolResult, UsageItem,
};
use crate::errors::{ClassifiedError, LlmError};
use crate::tools::Toolkit;

pub mod anthropic;
pub mod gemini;
pub mod openai;
pub mod openrouter;

pub use anthropic::AnthropicAdapter;
pub use gemini::GeminiAdapter;
pub use openai::OpenAiAdapter;
pub use openrouter::OpenRouterAdapter;

/// Name of the synthetic tool a model calls to deliver its structured answer.
pub const STRUCTURED_OUTPUT_TOOL: &str = "structured_output";

const STRUCTURED_OUTPUT_DESCRIPTION: &str =
    "Return the final answer as structured data. Call this exactly once, when the answer is complete.";

/// Vendor-shaped request body.
pub type ProviderRequest = Value;

pub type ChunkStream = BoxStream<'static, Result<LlmStreamChunk, LlmError>>;

#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn name(&self) -> &str;

    fn build_request(&self, request: &OperateRequest) -> Result<ProviderRequest, LlmError>;

    /// Tool definitions to send with every request. With an output schema,
    /// one extra synthetic tool is appended.
    fn format_tools(
        &self,
        toolkit: &Toolkit,
        output_schema: Option<&Value>,
    ) -> Vec<ProviderToolDefinition> {
        let mut tools = toolkit.definitions();
        if let Some(schema) = output_schema {
            tools.push(ProviderToolDefinition {
                name: STRUCTURED_OUTPUT_TOOL.to_string(),
                description: STRUCTURED_OUTPUT_DESCRIPTION.to_string(),
                parameters: schema.clone(),
            });
        }
        tools
    }

    fn format_output_schema(&self, schema: &Value) -> Result<Value, LlmError> {
        normalize_output_schema(schema)
    }

    async fn execute_request(
        &self,
        client: &ProviderClient,
        request: &ProviderRequest,
    ) -> Result<Value, LlmError>;

    async fn execute_stream_request(
        &self,
        _client: &ProviderClient,
        _request: &ProviderRequest,
    ) -> Result<ChunkStream, LlmError> {
        Err(LlmError::StreamingUnsupported(self.name().to_string()))
    }

    fn extract_text(&self, raw: &Value) -> Option<String>;

    fn stop_reason(&self, raw: &Value) -> Option<String>;

    fn response_model(&self, raw: &Value) -> Option<String> {
        raw.get("model").and_then(|m| m.as_str()).map(str::to_string)
    }

    fn parse_response(&self, raw: &Value) -> Result<ParsedResponse, LlmError> {
        if !raw.is_object() {
            return Err(LlmError::Parse(format!(
                "{} response is not an object",
                self.name()
            )));
        }
        let model = self.response_model(raw).unwrap_or_default();
        Ok(ParsedResponse {
            content: self.extract_text(raw),
            has_tool_calls: !self.extract_tool_calls(raw).is_empty(),
            stop_reason: self.stop_reason(raw),
            usage: self.extract_usage(raw, &model),
            raw: raw.clone(),
        })
    }

    fn extract_tool_calls(&self, raw: &Value) -> Vec<StandardToolCall>;

    fn extract_usage(&self, raw: &Value, model: &str) -> UsageItem;

    fn format_tool_result(&self, call: &StandardToolCall, result: &StandardToolResult) -> Value;

    /// Appends a tool result to an already built request.
    fn append_tool_result(
        &self,
        request: &ProviderRequest,
        call: &StandardToolCall,
        result: &StandardToolResult,
    ) -> Result<ProviderRequest, LlmError>;

    fn classify_error(&self, error: &LlmError) -> ClassifiedError {
        classify_by_status(self.name(), error)
    }

    /// False when the model asked for another turn.
    fn is_complete(&self, raw: &Value) -> bool;

    fn has_structured_output(&self, raw: &Value) -> bool {
        self.extract_structured_output(raw).is_some()
    }

    fn extract_structured_output(&self, raw: &Value) -> Option<Value> {
        self.extract_tool_calls(raw)
            .into_iter()
            .find(|call| call.name == STRUCTURED_OUTPUT_TOOL)
            .and_then(|call| parse_arguments(&call.arguments).ok())
    }

    /// History items produced by one response, in the order the vendor
    /// returned them.
    fn response_to_history(&self, raw: &Value) -> Vec<HistoryItem>;
}

pub fn create_adapter(kind: ProviderKind) -> Arc<dyn ProviderAdapter> {
    match kind {
        ProviderKind::Anthropic => Arc::new(AnthropicAdapter::new()),
        ProviderKind::OpenAI => Arc::new(OpenAiAdapter::new()),
        ProviderKind::Gemini => Arc::new(GeminiAdapter::new()),
        ProviderKind::OpenRouter => Arc::new(OpenRouterAdapter::new()),
    }
}

/// Status-code based classification shared by every vendor. Adapters consult
/// their own error type tables first and fall back to this.
pub fn classify_by_status(provider: &str, error: &LlmError) -> ClassifiedError {
    match error {
        LlmError::Api {
            status,
            retry_after_secs,
            ..
        } => match status {
            429 => ClassifiedError::rate_limit(error.clone(), *retry_after_secs),
            408 | 409 | 500 | 502 | 503 | 504 | 529 => ClassifiedError::retryable(error.clone()),
            400 | 401 | 402 | 403 | 404 | 413 | 422 => {
                ClassifiedError::unrecoverable(error.clone())
            }
            _ => unknown(provider, error),
        },
        LlmError::Transport { .. } => ClassifiedError::retryable(error.clone()),
        LlmError::BadGateway { .. }
        | LlmError::Config(_)
        | LlmError::UnknownProvider(_)
        | LlmError::ToolNotFound(_)
        | LlmError::ToolArguments { .. }
        | LlmError::Hook(_)
        | LlmError::StreamingUnsupported(_) => ClassifiedError::unrecoverable(error.clone()),
        _ => unknown(provider, error),
    }
}

fn unknown(provider: &str, error: &LlmError) -> ClassifiedError {
    warn!(
        "Unclassified {} error, retrying optimistically: {}",
        provider, error
    );
    ClassifiedError::unknown(error.clone())
}

/// Parses model-produced tool arguments. Empty strings are an empty object.
pub fn parse_arguments(arguments: &str) -> Result<Value, LlmError> {
    if arguments.trim().is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    serde_json::from_str(arguments)
        .map_err(|e| LlmError::Parse(format!("Invalid tool arguments: {}", e)))
}

/// Returns the conversation with `instructions` appended to the last user
/// message, or as a new user message when the history does not end with one.
pub fn messages_with_instructions(request: &OperateRequest) -> History {
    let mut messages = request.messages.clone();
    let Some(instructions) = request.instructions.as_deref().filter(|i| !i.is_empty()) else {
        return messages;
    };

    match messages.last_mut() {
        Some(HistoryItem::Message {
            role: Role::User,
            content,
        }) => {
            content.push_str("\n\n");
            content.push_str(instructions);
        }
        _ => messages.push(HistoryItem::user(instructions)),
    }
    messages
}

/// Joins the request's system prompt with any system/developer messages found
/// in history.
pub fn collect_system_prompt(request: &OperateRequest, history: &History) -> Option<String> {
    let mut parts: Vec<&str> = Vec::new();
    if let Some(system) = request.system.as_deref().filter(|s| !s.is_empty()) {
        parts.push(system);
    }
    for item in history {
        if let HistoryItem::Message {
            role: Role::System | Role::Developer,
            content,
        } = item
        {
            parts.push(content);
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("\n\n"))
    }
}

/// Shallow merge of caller-provided options into the vendor body. Option
/// keys overwrite whatever the adapter produced.
pub fn merge_provider_options(body: &mut Value, options: Option<&Value>) {
    if let (Some(target), Some(Value::Object(extra))) = (body.as_object_mut(), options) {
        for (key, value) in extra {
            target.insert(key.clone(), value.clone());
        }
    }
}

/// Tool call whose argument fragments are still arriving on a stream.
#[derive(Debug, Clone, Default)]
pub(crate) struct PendingToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

impl PendingToolCall {
    pub fn into_chunk(self) -> LlmStreamChunk {
        LlmStreamChunk::ToolCall {
            id: self.id,
            name: self.name,
            arguments: self.arguments,
        }
    }
}

pub(crate) fn as_u64(value: Option<&Value>) -> u64 {
    value.and_then(|v| v.as_u64()).unwrap_or(0)
}
