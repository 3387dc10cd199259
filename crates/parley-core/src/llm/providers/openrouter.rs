//! OpenRouter adapter (OpenAI-compatible chat completions)

use async_stream::stream;
use async_trait::async_trait;
use futures_util::StreamExt;
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use super::{
    as_u64, classify_by_status, collect_system_prompt, merge_provider_options,
    messages_with_instructions, ChunkStream, PendingToolCall, ProviderAdapter, ProviderRequest,
};
use crate::core_types::{
    HistoryItem, LlmStreamChunk, OperateRequest, Role, StandardToolCall, StandardToolResult,
    UsageItem,
};
use crate::errors::LlmError;
use crate::llm::client::{ProviderClient, SseStream};

const COMPLETIONS_PATH: &str = "/v1/chat/completions";
const PROVIDER: &str = "openrouter";
const STREAM_DONE: &str = "[DONE]";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ChatTool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_choice: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user: Option<String>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct ChatMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<ChatToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl ChatMessage {
    fn text(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: Some(content.to_string()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    fn tool(call_id: &str, output: &str) -> Self {
        Self {
            role: "tool".to_string(),
            content: Some(output.to_string()),
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct ChatToolCall {
    id: String,
    #[serde(rename = "type", default = "function_type")]
    kind: String,
    function: ChatFunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct ChatFunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct ChatTool {
    #[serde(rename = "type")]
    kind: String,
    function: ChatFunctionDefinition,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct ChatFunctionDefinition {
    name: String,
    description: String,
    parameters: Value,
}

fn function_type() -> String {
    "function".to_string()
}

#[derive(Debug, Default, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    id: String,
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ChatToolCall>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCallDelta>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    #[serde(default)]
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

fn decode(raw: &Value) -> ChatResponse {
    ChatResponse::deserialize(raw).unwrap_or_default()
}

fn usage_item(usage: Option<&Value>, model: &str) -> UsageItem {
    UsageItem::new(
        PROVIDER,
        model,
        as_u64(usage.and_then(|u| u.get("prompt_tokens"))),
        as_u64(usage.and_then(|u| u.get("completion_tokens"))),
        as_u64(usage.and_then(|u| u.pointer("/completion_tokens_details/reasoning_tokens"))),
    )
}

#[derive(Debug, Default, Clone)]
pub struct OpenRouterAdapter;

impl OpenRouterAdapter {
    pub fn new() -> Self {
        Self
    }

    fn convert_messages(&self, system: Option<String>, history: &[HistoryItem]) -> Vec<ChatMessage> {
        let mut messages: Vec<ChatMessage> = Vec::new();
        if let Some(system) = system {
            messages.push(ChatMessage::text("system", &system));
        }

        for item in history {
            match item {
                HistoryItem::Message { role, content } => match role {
                    Role::System | Role::Developer => {}
                    Role::User => messages.push(ChatMessage::text("user", content)),
                    Role::Assistant => messages.push(ChatMessage::text("assistant", content)),
                },
                HistoryItem::ToolCall {
                    call_id,
                    name,
                    arguments,
                } => {
                    let call = ChatToolCall {
                        id: call_id.clone(),
                        kind: function_type(),
                        function: ChatFunctionCall {
                            name: name.clone(),
                            arguments: arguments.clone(),
                        },
                    };
                    match messages.last_mut() {
                        Some(last) if last.role == "assistant" => last.tool_calls.push(call),
                        _ => messages.push(ChatMessage {
                            role: "assistant".to_string(),
                            content: None,
                            tool_calls: vec![call],
                            tool_call_id: None,
                        }),
                    }
                }
                HistoryItem::ToolResult {
                    call_id, output, ..
                } => messages.push(ChatMessage::tool(call_id, output)),
                HistoryItem::Reasoning { .. } => {}
            }
        }
        messages
    }
}

/// Chat completion deltas carry tool calls as fragments keyed by index.
/// They are emitted, in index order, when a choice finishes or the stream
/// reports `[DONE]`.
fn translate_stream(mut events: SseStream, model: String) -> ChunkStream {
    let chunks = stream! {
        let mut pending: BTreeMap<usize, PendingToolCall> = BTreeMap::new();
        let mut usage: Option<Value> = None;
        let mut model = model;

        while let Some(data) = events.next().await {
            let data = match data {
                Ok(data) => data,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };
            if data.trim() == STREAM_DONE {
                break;
            }
            let chunk: StreamChunk = match serde_json::from_str(&data) {
                Ok(chunk) => chunk,
                Err(e) => {
                    warn!("Skipping unparseable openrouter stream event: {}", e);
                    continue;
                }
            };
            if let Some(error) = chunk.error {
                yield Err(LlmError::Api {
                    provider: PROVIDER.to_string(),
                    status: error["code"]
                        .as_u64()
                        .map(|c| u16::try_from(c).unwrap_or(502))
                        .unwrap_or(500),
                    error_type: None,
                    message: error["message"].as_str().unwrap_or_default().to_string(),
                    retry_after_secs: None,
                });
                return;
            }
            if let Some(m) = chunk.model {
                model = m;
            }
            if chunk.usage.is_some() {
                usage = chunk.usage;
            }

            for choice in chunk.choices {
                if let Some(content) = choice.delta.content {
                    if !content.is_empty() {
                        yield Ok(LlmStreamChunk::Text { content });
                    }
                }
                for delta in choice.delta.tool_calls {
                    let call = pending.entry(delta.index).or_default();
                    if let Some(id) = delta.id {
                        call.id = id;
                    }
                    if let Some(function) = delta.function {
                        if let Some(name) = function.name {
                            call.name.push_str(&name);
                        }
                        if let Some(arguments) = function.arguments {
                            call.arguments.push_str(&arguments);
                        }
                    }
                }
                if choice.finish_reason.is_some() {
                    for (_, call) in std::mem::take(&mut pending) {
                        yield Ok(call.into_chunk());
                    }
                }
            }
        }

        for (_, call) in std::mem::take(&mut pending) {
            yield Ok(call.into_chunk());
        }
        yield Ok(LlmStreamChunk::Done { usage: vec![usage_item(usage.as_ref(), &model)] });
    };
    chunks.boxed()
}

#[async_trait]
impl ProviderAdapter for OpenRouterAdapter {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn build_request(&self, request: &OperateRequest) -> Result<ProviderRequest, LlmError> {
        let history = messages_with_instructions(request);
        let system = collect_system_prompt(request, &history);

        let tools: Vec<ChatTool> = request
            .tools
            .iter()
            .map(|t| ChatTool {
                kind: function_type(),
                function: ChatFunctionDefinition {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect();

        let tool_choice = if request.format.is_some() && !tools.is_empty() {
            Some("required".to_string())
        } else {
            None
        };

        let body = ChatRequest {
            model: request.model.clone(),
            messages: self.convert_messages(system, &history),
            tools,
            tool_choice,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            user: request.user.clone(),
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
        client.post_json(COMPLETIONS_PATH, request).await
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
        let events = client.post_sse(COMPLETIONS_PATH, &body).await?;
        Ok(translate_stream(events, model))
    }

    fn extract_text(&self, raw: &Value) -> Option<String> {
        raw.pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .filter(|c| !c.is_empty())
            .map(str::to_string)
    }

    fn stop_reason(&self, raw: &Value) -> Option<String> {
        raw.pointer("/choices/0/finish_reason")
            .and_then(|r| r.as_str())
            .map(str::to_string)
    }

    fn extract_tool_calls(&self, raw: &Value) -> Vec<StandardToolCall> {
        raw.pointer("/choices/0/message/tool_calls")
            .and_then(|c| c.as_array())
            .map(|calls| {
                calls
                    .iter()
                    .map(|call| StandardToolCall {
                        call_id: call["id"].as_str().unwrap_or_default().to_string(),
                        name: call["function"]["name"].as_str().unwrap_or_default().to_string(),
                        arguments: call["function"]["arguments"]
                            .as_str()
                            .unwrap_or_default()
                            .to_string(),
                        raw: call.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn extract_usage(&self, raw: &Value, model: &str) -> UsageItem {
        usage_item(raw.get("usage"), model)
    }

    fn format_tool_result(&self, call: &StandardToolCall, result: &StandardToolResult) -> Value {
        serde_json::to_value(ChatMessage::tool(&call.call_id, &result.output_text()))
            .unwrap_or(Value::Null)
    }

    fn append_tool_result(
        &self,
        request: &ProviderRequest,
        call: &StandardToolCall,
        result: &StandardToolResult,
    ) -> Result<ProviderRequest, LlmError> {
        let mut body = ChatRequest::deserialize(request)?;
        body.messages
            .push(ChatMessage::tool(&call.call_id, &result.output_text()));
        Ok(serde_json::to_value(body)?)
    }

    fn is_complete(&self, raw: &Value) -> bool {
        self.extract_tool_calls(raw).is_empty()
    }

    fn response_to_history(&self, raw: &Value) -> Vec<HistoryItem> {
        let response = decode(raw);
        let id = response.id;
        let Some(choice) = response.choices.into_iter().next() else {
            return Vec::new();
        };

        let mut items = Vec::new();
        if let Some(reasoning) = choice.message.reasoning.filter(|r| !r.is_empty()) {
            items.push(HistoryItem::Reasoning {
                id,
                content: Some(reasoning),
            });
        }
        if let Some(content) = choice.message.content.filter(|c| !c.is_empty()) {
            items.push(HistoryItem::assistant(content));
        }
        for call in choice.message.tool_calls {
            items.push(HistoryItem::tool_call(
                call.id,
                call.function.name,
                call.function.arguments,
            ));
        }
        items
    }
}
