//! Anthropic Messages API adapter

use async_stream::stream;
use async_trait::async_trait;
use futures_util::StreamExt;
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;

use super::{
    as_u64, classify_by_status, collect_system_prompt, merge_provider_options,
    messages_with_instructions, parse_arguments, ChunkStream, PendingToolCall, ProviderAdapter,
    ProviderRequest,
};
use crate::core_types::{
    HistoryItem, LlmStreamChunk, OperateRequest, Role, StandardToolCall, StandardToolResult,
    UsageItem,
};
use crate::errors::{ClassifiedError, LlmError};
use crate::llm::client::{ProviderClient, SseStream};

const MESSAGES_PATH: &str = "/v1/messages";
const DEFAULT_MAX_TOKENS: u32 = 4096;
const PROVIDER: &str = "anthropic";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<AnthropicMessage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tools: Vec<AnthropicTool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_choice: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    metadata: Option<Value>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct AnthropicMessage {
    role: String,
    content: Vec<AnthropicContent>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicContent {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
    Thinking {
        thinking: String,
        #[serde(default)]
        signature: String,
    },
    RedactedThinking {
        data: String,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: Value,
}

#[derive(Debug, Default, Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    model: String,
    #[serde(default)]
    content: Vec<AnthropicContent>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: AnthropicUsage,
}

#[derive(Debug, Default, Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
    #[serde(default)]
    cache_creation_input_tokens: Option<u64>,
    #[serde(default)]
    cache_read_input_tokens: Option<u64>,
}

impl AnthropicUsage {
    fn input(&self) -> u64 {
        self.input_tokens
            + self.cache_creation_input_tokens.unwrap_or(0)
            + self.cache_read_input_tokens.unwrap_or(0)
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    MessageStart {
        message: AnthropicResponse,
    },
    ContentBlockStart {
        index: u64,
        content_block: AnthropicContent,
    },
    ContentBlockDelta {
        index: u64,
        delta: ContentDelta,
    },
    ContentBlockStop {
        index: u64,
    },
    MessageDelta {
        #[serde(default)]
        usage: Option<AnthropicUsage>,
    },
    MessageStop,
    Ping,
    Error {
        error: StreamError,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentDelta {
    TextDelta {
        text: String,
    },
    InputJsonDelta {
        partial_json: String,
    },
    ThinkingDelta {
        thinking: String,
    },
    SignatureDelta {
        signature: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct StreamError {
    #[serde(rename = "type", default)]
    error_type: String,
    #[serde(default)]
    message: String,
}

impl StreamError {
    fn into_error(self) -> LlmError {
        let status = match self.error_type.as_str() {
            "rate_limit_error" => 429,
            "overloaded_error" => 529,
            "invalid_request_error" => 400,
            _ => 500,
        };
        LlmError::Api {
            provider: PROVIDER.to_string(),
            status,
            error_type: Some(self.error_type),
            message: self.message,
            retry_after_secs: None,
        }
    }
}

fn decode(raw: &Value) -> AnthropicResponse {
    AnthropicResponse::deserialize(raw).unwrap_or_default()
}

/// Appends `block` to the last message when it has the same role, otherwise
/// starts a new message. Keeps user/assistant turns alternating.
fn push_block(messages: &mut Vec<AnthropicMessage>, role: &str, block: AnthropicContent) {
    match messages.last_mut() {
        Some(last) if last.role == role => last.content.push(block),
        _ => messages.push(AnthropicMessage {
            role: role.to_string(),
            content: vec![block],
        }),
    }
}

fn tool_result_block(call: &StandardToolCall, result: &StandardToolResult) -> AnthropicContent {
    AnthropicContent::ToolResult {
        tool_use_id: call.call_id.clone(),
        content: result.output_text(),
    }
}

#[derive(Debug, Default, Clone)]
pub struct AnthropicAdapter;

impl AnthropicAdapter {
    pub fn new() -> Self {
        Self
    }

    fn convert_messages(&self, history: &[HistoryItem]) -> Result<Vec<AnthropicMessage>, LlmError> {
        let mut messages = Vec::new();
        for item in history {
            match item {
                HistoryItem::Message { role, content } => match role {
                    Role::System | Role::Developer => {}
                    Role::User => push_block(
                        &mut messages,
                        "user",
                        AnthropicContent::Text {
                            text: content.clone(),
                        },
                    ),
                    Role::Assistant => {
                        if !content.is_empty() {
                            push_block(
                                &mut messages,
                                "assistant",
                                AnthropicContent::Text {
                                    text: content.clone(),
                                },
                            )
                        }
                    }
                },
                HistoryItem::ToolCall {
                    call_id,
                    name,
                    arguments,
                } => push_block(
                    &mut messages,
                    "assistant",
                    AnthropicContent::ToolUse {
                        id: call_id.clone(),
                        name: name.clone(),
                        input: parse_arguments(arguments)?,
                    },
                ),
                HistoryItem::ToolResult {
                    call_id, output, ..
                } => push_block(
                    &mut messages,
                    "user",
                    AnthropicContent::ToolResult {
                        tool_use_id: call_id.clone(),
                        content: output.clone(),
                    },
                ),
                HistoryItem::Reasoning { id, content } => {
                    let block = match content {
                        Some(thinking) => AnthropicContent::Thinking {
                            thinking: thinking.clone(),
                            signature: id.clone(),
                        },
                        None => AnthropicContent::RedactedThinking { data: id.clone() },
                    };
                    push_block(&mut messages, "assistant", block);
                }
            }
        }
        Ok(messages)
    }
}

/// Thinking block still receiving `thinking_delta`/`signature_delta` events.
#[derive(Debug, Default)]
struct PendingThinking {
    thinking: String,
    signature: String,
}

/// Turns Anthropic SSE payloads into normalized chunks. Tool input arrives
/// as `input_json_delta` fragments and is emitted once its block stops;
/// thinking blocks become `Reasoning` chunks the same way.
fn translate_stream(mut events: SseStream, model: String) -> ChunkStream {
    let chunks = stream! {
        let mut pending: HashMap<u64, PendingToolCall> = HashMap::new();
        let mut thinking: HashMap<u64, PendingThinking> = HashMap::new();
        let mut model = model;
        let mut input_tokens = 0u64;
        let mut output_tokens = 0u64;

        while let Some(data) = events.next().await {
            let data = match data {
                Ok(data) => data,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };
            let event: StreamEvent = match serde_json::from_str(&data) {
                Ok(event) => event,
                Err(e) => {
                    warn!("Skipping unparseable anthropic stream event: {}", e);
                    continue;
                }
            };

            match event {
                StreamEvent::MessageStart { message } => {
                    input_tokens = message.usage.input();
                    output_tokens = message.usage.output_tokens;
                    if !message.model.is_empty() {
                        model = message.model;
                    }
                }
                StreamEvent::ContentBlockStart { index, content_block } => match content_block {
                    AnthropicContent::ToolUse { id, name, .. } => {
                        pending.insert(index, PendingToolCall { id, name, arguments: String::new() });
                    }
                    AnthropicContent::Text { text } if !text.is_empty() => {
                        yield Ok(LlmStreamChunk::Text { content: text });
                    }
                    AnthropicContent::Thinking { thinking: text, signature } => {
                        thinking.insert(index, PendingThinking { thinking: text, signature });
                    }
                    AnthropicContent::RedactedThinking { data } => {
                        yield Ok(LlmStreamChunk::Reasoning { id: data, content: None });
                    }
                    _ => {}
                },
                StreamEvent::ContentBlockDelta { index, delta } => match delta {
                    ContentDelta::TextDelta { text } => {
                        yield Ok(LlmStreamChunk::Text { content: text });
                    }
                    ContentDelta::InputJsonDelta { partial_json } => {
                        if let Some(call) = pending.get_mut(&index) {
                            call.arguments.push_str(&partial_json);
                        }
                    }
                    ContentDelta::ThinkingDelta { thinking: text } => {
                        if let Some(block) = thinking.get_mut(&index) {
                            block.thinking.push_str(&text);
                        }
                    }
                    ContentDelta::SignatureDelta { signature } => {
                        if let Some(block) = thinking.get_mut(&index) {
                            block.signature.push_str(&signature);
                        }
                    }
                    ContentDelta::Other => {}
                },
                StreamEvent::ContentBlockStop { index } => {
                    if let Some(call) = pending.remove(&index) {
                        yield Ok(call.into_chunk());
                    }
                    if let Some(block) = thinking.remove(&index) {
                        yield Ok(LlmStreamChunk::Reasoning {
                            id: block.signature,
                            content: Some(block.thinking),
                        });
                    }
                }
                StreamEvent::MessageDelta { usage } => {
                    if let Some(usage) = usage {
                        output_tokens = usage.output_tokens;
                    }
                }
                StreamEvent::MessageStop => {
                    let usage = UsageItem::new(PROVIDER, &model, input_tokens, output_tokens, 0);
                    yield Ok(LlmStreamChunk::Done { usage: vec![usage] });
                    return;
                }
                StreamEvent::Error { error } => {
                    yield Err(error.into_error());
                    return;
                }
                StreamEvent::Ping | StreamEvent::Unknown => {}
            }
        }

        yield Err(LlmError::Transport {
            provider: PROVIDER.to_string(),
            message: "stream ended before message_stop".to_string(),
            timeout: false,
        });
    };
    chunks.boxed()
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn build_request(&self, request: &OperateRequest) -> Result<ProviderRequest, LlmError> {
        let history = messages_with_instructions(request);
        let system = collect_system_prompt(request, &history);
        let messages = self.convert_messages(&history)?;

        let tools: Vec<AnthropicTool> = request
            .tools
            .iter()
            .map(|t| AnthropicTool {
                name: t.name.clone(),
                description: t.description.clone(),
                input_schema: t.parameters.clone(),
            })
            .collect();

        let tool_choice = if request.format.is_some() && !tools.is_empty() {
            Some(json!({ "type": "any" }))
        } else {
            None
        };

        let body = AnthropicRequest {
            model: request.model.clone(),
            max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            system,
            messages,
            tools,
            tool_choice,
            temperature: request.temperature,
            metadata: request.user.as_ref().map(|u| json!({ "user_id": u })),
            extra: Map::new(),
        };

        let mut body = serde_json::to_value(body)?;
        merge_provider_options(&mut body, request.provider_options.as_ref());
        Ok(body)
    }

    async fn execute_request(
        &self,
        client: &ProviderClient,
        request: &ProviderRequest,
    ) -> Result<Value, LlmError> {
        client.post_json(MESSAGES_PATH, request).await
    }

    async fn execute_stream_request(
        &self,
        client: &ProviderClient,
        request: &ProviderRequest,
    ) -> Result<ChunkStream, LlmError> {
        let mut body = request.clone();
        if let Some(map) = body.as_object_mut() {
            map.insert("stream".to_string(), Value::Bool(true));
        }
        let model = request["model"].as_str().unwrap_or_default().to_string();
        let events = client.post_sse(MESSAGES_PATH, &body).await?;
        Ok(translate_stream(events, model))
    }

    fn extract_text(&self, raw: &Value) -> Option<String> {
        let texts: Vec<String> = decode(raw)
            .content
            .into_iter()
            .filter_map(|block| match block {
                AnthropicContent::Text { text } => Some(text),
                _ => None,
            })
            .collect();
        if texts.is_empty() {
            None
        } else {
            Some(texts.join(""))
        }
    }

    fn stop_reason(&self, raw: &Value) -> Option<String> {
        raw.get("stop_reason").and_then(|s| s.as_str()).map(str::to_string)
    }

    fn extract_tool_calls(&self, raw: &Value) -> Vec<StandardToolCall> {
        raw.get("content")
            .and_then(|c| c.as_array())
            .map(|blocks| {
                blocks
                    .iter()
                    .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("tool_use"))
                    .map(|b| StandardToolCall {
                        call_id: b["id"].as_str().unwrap_or_default().to_string(),
                        name: b["name"].as_str().unwrap_or_default().to_string(),
                        arguments: b.get("input").map(|i| i.to_string()).unwrap_or_default(),
                        raw: b.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn extract_usage(&self, raw: &Value, model: &str) -> UsageItem {
        let usage = raw.get("usage");
        let input = as_u64(usage.and_then(|u| u.get("input_tokens")))
            + as_u64(usage.and_then(|u| u.get("cache_creation_input_tokens")))
            + as_u64(usage.and_then(|u| u.get("cache_read_input_tokens")));
        let output = as_u64(usage.and_then(|u| u.get("output_tokens")));
        UsageItem::new(PROVIDER, model, input, output, 0)
    }

    fn format_tool_result(&self, call: &StandardToolCall, result: &StandardToolResult) -> Value {
        serde_json::to_value(tool_result_block(call, result)).unwrap_or(Value::Null)
    }

    fn append_tool_result(
        &self,
        request: &ProviderRequest,
        call: &StandardToolCall,
        result: &StandardToolResult,
    ) -> Result<ProviderRequest, LlmError> {
        let mut body = AnthropicRequest::deserialize(request)?;
        push_block(&mut body.messages, "user", tool_result_block(call, result));
        Ok(serde_json::to_value(body)?)
    }

    fn classify_error(&self, error: &LlmError) -> ClassifiedError {
        if let LlmError::Api {
            error_type: Some(error_type),
            retry_after_secs,
            ..
        } = error
        {
            match error_type.as_str() {
                "rate_limit_error" => {
                    return ClassifiedError::rate_limit(error.clone(), *retry_after_secs)
                }
                "overloaded_error" | "api_error" => {
                    return ClassifiedError::retryable(error.clone())
                }
                "authentication_error"
                | "permission_error"
                | "invalid_request_error"
                | "not_found_error"
                | "request_too_large"
                | "billing_error" => return ClassifiedError::unrecoverable(error.clone()),
                _ => {}
            }
        }
        classify_by_status(PROVIDER, error)
    }

    fn is_complete(&self, raw: &Value) -> bool {
        self.stop_reason(raw).as_deref() != Some("tool_use")
    }

    fn response_to_history(&self, raw: &Value) -> Vec<HistoryItem> {
        decode(raw)
            .content
            .into_iter()
            .filter_map(|block| match block {
                AnthropicContent::Text { text } if !text.is_empty() => {
                    Some(HistoryItem::assistant(text))
                }
                AnthropicContent::ToolUse { id, name, input } => {
                    Some(HistoryItem::tool_call(id, name, input.to_string()))
                }
                AnthropicContent::Thinking {
                    thinking,
                    signature,
                } => Some(HistoryItem::Reasoning {
                    id: signature,
                    content: Some(thinking),
                }),
                AnthropicContent::RedactedThinking { data } => Some(HistoryItem::Reasoning {
                    id: data,
                    content: None,
                }),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_types::ProviderToolDefinition;
    use crate::errors::ErrorCategory;
    use futures_util::stream;

    fn request_with(messages: Vec<HistoryItem>) -> OperateRequest {
        OperateRequest {
            model: "claude-sonnet-4-20250514".to_string(),
            messages,
            ..Default::default()
        }
    }

    fn tool_response() -> Value {
        json!({
            "id": "msg_01",
            "type": "message",
            "role": "assistant",
            "model": "claude-sonnet-4-20250514",
            "content": [
                { "type": "text", "text": "Let me check." },
                { "type": "tool_use", "id": "toolu_1", "name": "get_weather", "input": { "city": "Paris" } }
            ],
            "stop_reason": "tool_use",
            "usage": { "input_tokens": 25, "output_tokens": 12 }
        })
    }

    #[test]
    fn test_simple_request() {
        let adapter = AnthropicAdapter::new();
        let mut request = request_with(vec![HistoryItem::user("Hello")]);
        request.system = Some("You are terse.".to_string());

        let body = adapter.build_request(&request).unwrap();

        assert_eq!(body["model"], "claude-sonnet-4-20250514");
        assert_eq!(body["max_tokens"], DEFAULT_MAX_TOKENS);
        assert_eq!(body["system"], "You are terse.");
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"][0]["text"], "Hello");
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn test_system_messages_lifted_out_of_history() {
        let adapter = AnthropicAdapter::new();
        let request = request_with(vec![
            HistoryItem::system("Be helpful."),
            HistoryItem::user("Hi"),
        ]);
        let body = adapter.build_request(&request).unwrap();
        assert_eq!(body["system"], "Be helpful.");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_tool_history_conversion() {
        let adapter = AnthropicAdapter::new();
        let request = request_with(vec![
            HistoryItem::user("Weather in Paris?"),
            HistoryItem::assistant("Let me check."),
            HistoryItem::tool_call("toolu_1", "get_weather", r#"{"city":"Paris"}"#),
            HistoryItem::tool_result("toolu_1", "get_weather", r#"{"temp":18}"#),
        ]);
        let body = adapter.build_request(&request).unwrap();
        let messages = body["messages"].as_array().unwrap();

        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1]["role"], "assistant");
        assert_eq!(messages[1]["content"][1]["type"], "tool_use");
        assert_eq!(messages[1]["content"][1]["input"]["city"], "Paris");
        assert_eq!(messages[2]["role"], "user");
        assert_eq!(messages[2]["content"][0]["type"], "tool_result");
        assert_eq!(messages[2]["content"][0]["tool_use_id"], "toolu_1");
    }

    #[test]
    fn test_structured_output_forces_tool_use() {
        let adapter = AnthropicAdapter::new();
        let mut request = request_with(vec![HistoryItem::user("Extract")]);
        let schema = json!({"type": "object", "properties": {"name": {"type": "string"}}});
        request.tools = adapter.format_tools(&crate::tools::Toolkit::empty(), Some(&schema));
        request.format = Some(schema);

        let body = adapter.build_request(&request).unwrap();
        assert_eq!(body["tools"][0]["name"], super::super::STRUCTURED_OUTPUT_TOOL);
        assert_eq!(body["tool_choice"]["type"], "any");
    }

    #[test]
    fn test_provider_options_override() {
        let adapter = AnthropicAdapter::new();
        let mut request = request_with(vec![HistoryItem::user("Hi")]);
        request.provider_options = Some(json!({ "max_tokens": 128, "top_k": 3 }));
        let body = adapter.build_request(&request).unwrap();
        assert_eq!(body["max_tokens"], 128);
        assert_eq!(body["top_k"], 3);
    }

    #[test]
    fn test_parse_tool_response() {
        let adapter = AnthropicAdapter::new();
        let raw = tool_response();

        let parsed = adapter.parse_response(&raw).unwrap();
        assert_eq!(parsed.content.as_deref(), Some("Let me check."));
        assert!(parsed.has_tool_calls);
        assert_eq!(parsed.usage.input, 25);
        assert_eq!(parsed.usage.total, 37);
        assert!(!adapter.is_complete(&raw));

        let calls = adapter.extract_tool_calls(&raw);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].call_id, "toolu_1");
        assert_eq!(
            serde_json::from_str::<Value>(&calls[0].arguments).unwrap(),
            json!({"city": "Paris"})
        );
    }

    #[test]
    fn test_response_to_history_keeps_order_and_thinking() {
        let adapter = AnthropicAdapter::new();
        let raw = json!({
            "model": "claude-sonnet-4-20250514",
            "content": [
                { "type": "thinking", "thinking": "The user wants weather.", "signature": "sig_1" },
                { "type": "text", "text": "Checking." },
                { "type": "tool_use", "id": "toolu_2", "name": "get_weather", "input": {} }
            ],
            "stop_reason": "tool_use",
            "usage": { "input_tokens": 1, "output_tokens": 1 }
        });
        let items = adapter.response_to_history(&raw);
        assert_eq!(items.len(), 3);
        assert_eq!(
            items[0],
            HistoryItem::Reasoning {
                id: "sig_1".to_string(),
                content: Some("The user wants weather.".to_string())
            }
        );
        assert!(items[2].is_tool_call());

        let request = request_with(items);
        let body = adapter.build_request(&request).unwrap();
        assert_eq!(body["messages"][0]["content"][0]["type"], "thinking");
        assert_eq!(body["messages"][0]["content"][0]["signature"], "sig_1");
    }

    #[test]
    fn test_structured_output_extraction() {
        let adapter = AnthropicAdapter::new();
        let raw = json!({
            "content": [
                { "type": "tool_use", "id": "toolu_3", "name": "structured_output", "input": { "name": "Ada" } }
            ],
            "stop_reason": "tool_use"
        });
        assert!(adapter.has_structured_output(&raw));
        assert_eq!(adapter.extract_structured_output(&raw), Some(json!({"name": "Ada"})));
        assert!(!adapter.has_structured_output(&tool_response()));
    }

    #[test]
    fn test_append_tool_result_matches_rebuilt_request() {
        let adapter = AnthropicAdapter::new();
        let call = StandardToolCall::new("toolu_1", "get_weather", r#"{"city":"Paris"}"#);
        let result = StandardToolResult::new(json!({"temp": 18}));

        let before = adapter
            .build_request(&request_with(vec![
                HistoryItem::user("Weather?"),
                call.to_history_item(),
            ]))
            .unwrap();
        let appended = adapter.append_tool_result(&before, &call, &result).unwrap();

        let rebuilt = adapter
            .build_request(&request_with(vec![
                HistoryItem::user("Weather?"),
                call.to_history_item(),
                result.to_history_item(&call),
            ]))
            .unwrap();

        assert_eq!(appended, rebuilt);
    }

    #[test]
    fn test_error_classification() {
        let adapter = AnthropicAdapter::new();
        let error = |status: u16, kind: &str| LlmError::Api {
            provider: PROVIDER.to_string(),
            status,
            error_type: Some(kind.to_string()),
            message: "x".to_string(),
            retry_after_secs: Some(12),
        };

        let rate = adapter.classify_error(&error(429, "rate_limit_error"));
        assert_eq!(rate.category, ErrorCategory::RateLimit);
        assert_eq!(rate.suggested_delay_ms, Some(12_000));
        assert_eq!(
            adapter.classify_error(&error(529, "overloaded_error")).category,
            ErrorCategory::Retryable
        );
        assert_eq!(
            adapter.classify_error(&error(401, "authentication_error")).category,
            ErrorCategory::Unrecoverable
        );
        assert_eq!(
            adapter.classify_error(&error(418, "teapot_error")).category,
            ErrorCategory::Unknown
        );
    }

    #[test]
    fn test_tool_definitions() {
        let adapter = AnthropicAdapter::new();
        let mut request = request_with(vec![HistoryItem::user("Hi")]);
        request.tools = vec![ProviderToolDefinition {
            name: "lookup".to_string(),
            description: "Look things up".to_string(),
            parameters: json!({"type": "object", "properties": {}}),
        }];
        let body = adapter.build_request(&request).unwrap();
        assert_eq!(body["tools"][0]["input_schema"]["type"], "object");
        assert!(body.get("tool_choice").is_none());
    }

    #[tokio::test]
    async fn test_stream_buffers_tool_input() {
        let events = vec![
            json!({"type": "message_start", "message": {"model": "claude-sonnet-4-20250514", "usage": {"input_tokens": 10, "output_tokens": 1}}}),
            json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}}),
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "Hi"}}),
            json!({"type": "content_block_stop", "index": 0}),
            json!({"type": "content_block_start", "index": 1, "content_block": {"type": "tool_use", "id": "toolu_9", "name": "lookup", "input": {}}}),
            json!({"type": "content_block_delta", "index": 1, "delta": {"type": "input_json_delta", "partial_json": "{\"q\":"}}),
            json!({"type": "ping"}),
            json!({"type": "content_block_delta", "index": 1, "delta": {"type": "input_json_delta", "partial_json": "\"rust\"}"}}),
            json!({"type": "content_block_stop", "index": 1}),
            json!({"type": "message_delta", "delta": {"stop_reason": "tool_use"}, "usage": {"output_tokens": 20}}),
            json!({"type": "message_stop"}),
        ];
        let source = stream::iter(events.into_iter().map(|e| Ok(e.to_string()))).boxed();

        let chunks: Vec<_> = translate_stream(source, "m".to_string())
            .map(|c| c.unwrap())
            .collect()
            .await;

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0], LlmStreamChunk::Text { content: "Hi".to_string() });
        assert_eq!(
            chunks[1],
            LlmStreamChunk::ToolCall {
                id: "toolu_9".to_string(),
                name: "lookup".to_string(),
                arguments: r#"{"q":"rust"}"#.to_string(),
            }
        );
        match &chunks[2] {
            LlmStreamChunk::Done { usage } => {
                assert_eq!(usage[0].input, 10);
                assert_eq!(usage[0].output, 20);
                assert_eq!(usage[0].model, "claude-sonnet-4-20250514");
            }
            other => panic!("expected Done, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stream_error_event() {
        let events = vec![json!({"type": "error", "error": {"type": "overloaded_error", "message": "Overloaded"}})];
        let source = stream::iter(events.into_iter().map(|e| Ok(e.to_string()))).boxed();
        let chunks: Vec<_> = translate_stream(source, "m".to_string()).collect().await;
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].as_ref().unwrap_err().status(), 529);
    }

    #[tokio::test]
    async fn test_stream_thinking_precedes_tool_call() {
        let events = vec![
            json!({"type": "message_start", "message": {"model": "m", "usage": {"input_tokens": 5}}}),
            json!({"type": "content_block_start", "index": 0, "content_block": {"type": "thinking", "thinking": ""}}),
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "thinking_delta", "thinking": "Need a "}}),
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "thinking_delta", "thinking": "lookup."}}),
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "signature_delta", "signature": "EqQBCgIYAhIM"}}),
            json!({"type": "content_block_stop", "index": 0}),
            json!({"type": "content_block_start", "index": 1, "content_block": {"type": "redacted_thinking", "data": "opaque"}}),
            json!({"type": "content_block_stop", "index": 1}),
            json!({"type": "content_block_start", "index": 2, "content_block": {"type": "tool_use", "id": "toolu_1", "name": "lookup", "input": {}}}),
            json!({"type": "content_block_delta", "index": 2, "delta": {"type": "input_json_delta", "partial_json": "{}"}}),
            json!({"type": "content_block_stop", "index": 2}),
            json!({"type": "message_stop"}),
        ];
        let source = stream::iter(events.into_iter().map(|e| Ok(e.to_string()))).boxed();

        let chunks: Vec<_> = translate_stream(source, "m".to_string())
            .map(|c| c.unwrap())
            .collect()
            .await;

        assert_eq!(chunks.len(), 4);
        assert_eq!(
            chunks[0],
            LlmStreamChunk::Reasoning {
                id: "EqQBCgIYAhIM".to_string(),
                content: Some("Need a lookup.".to_string()),
            }
        );
        assert_eq!(
            chunks[1],
            LlmStreamChunk::Reasoning {
                id: "opaque".to_string(),
                content: None,
            }
        );
        assert!(matches!(&chunks[2], LlmStreamChunk::ToolCall { id, .. } if id == "toolu_1"));
        assert!(matches!(chunks[3], LlmStreamChunk::Done { .. }));
    }
}
