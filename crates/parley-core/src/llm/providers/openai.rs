//! OpenAI Responses API adapter

use async_stream::stream;
use async_trait::async_trait;
use futures_util::StreamExt;
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

use super::{
    as_u64, classify_by_status, collect_system_prompt, merge_provider_options,
    messages_with_instructions, ChunkStream, PendingToolCall, ProviderAdapter, ProviderRequest,
};
use crate::core_types::{
    HistoryItem, LlmStreamChunk, OperateRequest, Role, StandardToolCall, StandardToolResult,
    UsageItem,
};
use crate::errors::{ClassifiedError, LlmError};
use crate::llm::client::{ProviderClient, SseStream};

const RESPONSES_PATH: &str = "/v1/responses";
const PROVIDER: &str = "openai";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct ResponsesRequest {
    model: String,
    input: Vec<InputItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    instructions: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tools: Vec<FunctionTool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_choice: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user: Option<String>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
enum InputItem {
    Message {
        role: String,
        content: String,
    },
    FunctionCall {
        call_id: String,
        name: String,
        arguments: String,
    },
    FunctionCallOutput {
        call_id: String,
        output: String,
    },
    Reasoning {
        id: String,
        #[serde(default)]
        summary: Vec<SummaryText>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct SummaryText {
    #[serde(rename = "type")]
    kind: String,
    text: String,
}

impl SummaryText {
    fn new(text: String) -> Self {
        Self {
            kind: "summary_text".to_string(),
            text,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct FunctionTool {
    #[serde(rename = "type")]
    kind: String,
    name: String,
    description: String,
    parameters: Value,
    strict: bool,
}

#[derive(Debug, Default, Deserialize)]
struct ResponsesResponse {
    #[serde(default)]
    model: String,
    #[serde(default)]
    output: Vec<OutputItem>,
    #[serde(default)]
    usage: Option<ResponsesUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OutputItem {
    Message {
        #[serde(default)]
        content: Vec<OutputContent>,
    },
    FunctionCall {
        #[serde(default)]
        id: Option<String>,
        call_id: String,
        name: String,
        #[serde(default)]
        arguments: String,
    },
    Reasoning {
        id: String,
        #[serde(default)]
        summary: Vec<SummaryText>,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OutputContent {
    OutputText {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Default, Deserialize)]
struct ResponsesUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
    #[serde(default)]
    output_tokens_details: Option<OutputTokensDetails>,
}

#[derive(Debug, Default, Deserialize)]
struct OutputTokensDetails {
    #[serde(default)]
    reasoning_tokens: u64,
}

impl ResponsesUsage {
    fn to_item(&self, model: &str) -> UsageItem {
        let reasoning = self
            .output_tokens_details
            .as_ref()
            .map(|d| d.reasoning_tokens)
            .unwrap_or(0);
        UsageItem::new(PROVIDER, model, self.input_tokens, self.output_tokens, reasoning)
    }
}

fn decode(raw: &Value) -> ResponsesResponse {
    ResponsesResponse::deserialize(raw).unwrap_or_default()
}

fn role_name(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::Developer => "developer",
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

fn tool_output_item(call: &StandardToolCall, result: &StandardToolResult) -> InputItem {
    InputItem::FunctionCallOutput {
        call_id: call.call_id.clone(),
        output: result.output_text(),
    }
}

#[derive(Debug, Default, Clone)]
pub struct OpenAiAdapter;

impl OpenAiAdapter {
    pub fn new() -> Self {
        Self
    }

    fn convert_input(&self, history: &[HistoryItem]) -> Vec<InputItem> {
        history
            .iter()
            .filter_map(|item| match item {
                HistoryItem::Message {
                    role: Role::System | Role::Developer,
                    ..
                } => None,
                HistoryItem::Message { role, content } => Some(InputItem::Message {
                    role: role_name(*role).to_string(),
                    content: content.clone(),
                }),
                HistoryItem::ToolCall {
                    call_id,
                    name,
                    arguments,
                } => Some(InputItem::FunctionCall {
                    call_id: call_id.clone(),
                    name: name.clone(),
                    arguments: arguments.clone(),
                }),
                HistoryItem::ToolResult {
                    call_id, output, ..
                } => Some(InputItem::FunctionCallOutput {
                    call_id: call_id.clone(),
                    output: output.clone(),
                }),
                HistoryItem::Reasoning { id, content } => Some(InputItem::Reasoning {
                    id: id.clone(),
                    summary: content.iter().cloned().map(SummaryText::new).collect(),
                }),
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum StreamEvent {
    #[serde(rename = "response.output_text.delta")]
    TextDelta { delta: String },
    #[serde(rename = "response.output_item.added")]
    ItemAdded { item: Value },
    #[serde(rename = "response.function_call_arguments.delta")]
    ArgumentsDelta { item_id: String, delta: String },
    #[serde(rename = "response.output_item.done")]
    ItemDone { item: Value },
    #[serde(rename = "response.completed", alias = "response.incomplete")]
    Completed { response: ResponsesResponse },
    #[serde(rename = "response.failed")]
    Failed { response: Value },
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        code: Option<String>,
        #[serde(default)]
        message: String,
    },
    #[serde(other)]
    Unknown,
}

fn stream_error(code: Option<String>, message: String) -> LlmError {
    let status = match code.as_deref() {
        Some("rate_limit_exceeded") => 429,
        Some("server_error") => 500,
        Some("invalid_prompt") => 400,
        _ => 500,
    };
    LlmError::Api {
        provider: PROVIDER.to_string(),
        status,
        error_type: code,
        message,
        retry_after_secs: None,
    }
}

fn join_summary(summary: Vec<SummaryText>) -> Option<String> {
    if summary.is_empty() {
        return None;
    }
    Some(
        summary
            .into_iter()
            .map(|s| s.text)
            .collect::<Vec<_>>()
            .join("\n"),
    )
}

/// Turns Responses API events into normalized chunks. Function call
/// arguments are collected per output item and emitted when the item is done.
fn translate_stream(mut events: SseStream, model: String) -> ChunkStream {
    let chunks = stream! {
        let mut pending: HashMap<String, PendingToolCall> = HashMap::new();

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
                    warn!("Skipping unparseable openai stream event: {}", e);
                    continue;
                }
            };

            match event {
                StreamEvent::TextDelta { delta } => {
                    yield Ok(LlmStreamChunk::Text { content: delta });
                }
                StreamEvent::ItemAdded { item } => {
                    if item["type"] == "function_call" {
                        let key = item["id"].as_str().unwrap_or_default().to_string();
                        pending.insert(key, PendingToolCall {
                            id: item["call_id"].as_str().unwrap_or_default().to_string(),
                            name: item["name"].as_str().unwrap_or_default().to_string(),
                            arguments: String::new(),
                        });
                    }
                }
                StreamEvent::ArgumentsDelta { item_id, delta } => {
                    if let Some(call) = pending.get_mut(&item_id) {
                        call.arguments.push_str(&delta);
                    }
                }
                StreamEvent::ItemDone { item } => {
                    if item["type"] == "function_call" {
                        let key = item["id"].as_str().unwrap_or_default().to_string();
                        let mut call = pending.remove(&key).unwrap_or_default();
                        if let Some(call_id) = item["call_id"].as_str() {
                            call.id = call_id.to_string();
                        }
                        if let Some(name) = item["name"].as_str() {
                            call.name = name.to_string();
                        }
                        if let Some(arguments) = item["arguments"].as_str() {
                            call.arguments = arguments.to_string();
                        }
                        yield Ok(call.into_chunk());
                    } else if item["type"] == "reasoning" {
                        if let Ok(OutputItem::Reasoning { id, summary }) = OutputItem::deserialize(&item) {
                            yield Ok(LlmStreamChunk::Reasoning { id, content: join_summary(summary) });
                        }
                    }
                }
                StreamEvent::Completed { response } => {
                    let model = if response.model.is_empty() { model.clone() } else { response.model.clone() };
                    let usage = response.usage.unwrap_or_default().to_item(&model);
                    yield Ok(LlmStreamChunk::Done { usage: vec![usage] });
                    return;
                }
                StreamEvent::Failed { response } => {
                    let code = response["error"]["code"].as_str().map(str::to_string);
                    let message = response["error"]["message"]
                        .as_str()
                        .unwrap_or("response failed")
                        .to_string();
                    yield Err(stream_error(code, message));
                    return;
                }
                StreamEvent::Error { code, message } => {
                    yield Err(stream_error(code, message));
                    return;
                }
                StreamEvent::Unknown => {}
            }
        }

        yield Err(LlmError::Transport {
            provider: PROVIDER.to_string(),
            message: "stream ended before response.completed".to_string(),
            timeout: false,
        });
    };
    chunks.boxed()
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn build_request(&self, request: &OperateRequest) -> Result<ProviderRequest, LlmError> {
        let history = messages_with_instructions(request);
        let instructions = collect_system_prompt(request, &history);

        let tools: Vec<FunctionTool> = request
            .tools
            .iter()
            .map(|t| FunctionTool {
                kind: "function".to_string(),
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.parameters.clone(),
                strict: false,
            })
            .collect();

        let tool_choice = if request.format.is_some() && !tools.is_empty() {
            Some("required".to_string())
        } else {
            None
        };

        let body = ResponsesRequest {
            model: request.model.clone(),
            input: self.convert_input(&history),
            instructions,
            tools,
            tool_choice,
            temperature: request.temperature,
            max_output_tokens: request.max_tokens,
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
        client.post_json(RESPONSES_PATH, request).await
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
        let events = client.post_sse(RESPONSES_PATH, &body).await?;
        Ok(translate_stream(events, model))
    }

    fn extract_text(&self, raw: &Value) -> Option<String> {
        let mut text = String::new();
        let mut found = false;
        for item in decode(raw).output {
            if let OutputItem::Message { content } = item {
                for part in content {
                    if let OutputContent::OutputText { text: t } = part {
                        text.push_str(&t);
                        found = true;
                    }
                }
            }
        }
        found.then_some(text)
    }

    fn stop_reason(&self, raw: &Value) -> Option<String> {
        raw["incomplete_details"]["reason"]
            .as_str()
            .or_else(|| raw["status"].as_str())
            .map(str::to_string)
    }

    fn extract_tool_calls(&self, raw: &Value) -> Vec<StandardToolCall> {
        raw.get("output")
            .and_then(|o| o.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter(|item| item["type"] == "function_call")
                    .map(|item| StandardToolCall {
                        call_id: item["call_id"].as_str().unwrap_or_default().to_string(),
                        name: item["name"].as_str().unwrap_or_default().to_string(),
                        arguments: item["arguments"].as_str().unwrap_or_default().to_string(),
                        raw: item.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn extract_usage(&self, raw: &Value, model: &str) -> UsageItem {
        let usage = raw.get("usage");
        UsageItem::new(
            PROVIDER,
            model,
            as_u64(usage.and_then(|u| u.get("input_tokens"))),
            as_u64(usage.and_then(|u| u.get("output_tokens"))),
            as_u64(usage.and_then(|u| u.pointer("/output_tokens_details/reasoning_tokens"))),
        )
    }

    fn format_tool_result(&self, call: &StandardToolCall, result: &StandardToolResult) -> Value {
        serde_json::to_value(tool_output_item(call, result)).unwrap_or(Value::Null)
    }

    fn append_tool_result(
        &self,
        request: &ProviderRequest,
        call: &StandardToolCall,
        result: &StandardToolResult,
    ) -> Result<ProviderRequest, LlmError> {
        let mut body = ResponsesRequest::deserialize(request)?;
        body.input.push(tool_output_item(call, result));
        Ok(serde_json::to_value(body)?)
    }

    fn classify_error(&self, error: &LlmError) -> ClassifiedError {
        if let LlmError::Api {
            error_type: Some(error_type),
            ..
        } = error
        {
            match error_type.as_str() {
                "insufficient_quota" | "invalid_api_key" => {
                    return ClassifiedError::unrecoverable(error.clone())
                }
                "server_error" => return ClassifiedError::retryable(error.clone()),
                _ => {}
            }
        }
        classify_by_status(PROVIDER, error)
    }

    fn is_complete(&self, raw: &Value) -> bool {
        self.extract_tool_calls(raw).is_empty()
    }

    fn response_to_history(&self, raw: &Value) -> Vec<HistoryItem> {
        let mut items = Vec::new();
        for item in decode(raw).output {
            match item {
                OutputItem::Message { content } => {
                    let text: String = content
                        .into_iter()
                        .filter_map(|part| match part {
                            OutputContent::OutputText { text } => Some(text),
                            OutputContent::Other => None,
                        })
                        .collect();
                    if !text.is_empty() {
                        items.push(HistoryItem::assistant(text));
                    }
                }
                OutputItem::FunctionCall {
                    call_id,
                    name,
                    arguments,
                    ..
                } => items.push(HistoryItem::tool_call(call_id, name, arguments)),
                OutputItem::Reasoning { id, summary } => {
                    items.push(HistoryItem::Reasoning {
                        id,
                        content: join_summary(summary),
                    });
                }
                OutputItem::Unknown => {}
            }
        }
        items
    }
}
