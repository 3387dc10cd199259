//! Google Gemini `generateContent` adapter

use async_stream::stream;
use async_trait::async_trait;
use futures_util::StreamExt;
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::{
    as_u64, classify_by_status, collect_system_prompt, merge_provider_options,
    messages_with_instructions, parse_arguments, ChunkStream, ProviderAdapter, ProviderRequest,
};
use crate::core_types::{
    HistoryItem, LlmStreamChunk, OperateRequest, Role, StandardToolCall, StandardToolResult,
    UsageItem,
};
use crate::errors::{ClassifiedError, LlmError};
use crate::llm::client::{ProviderClient, SseStream};
use crate::llm::schema::{normalize_output_schema, strip_keys};

const PROVIDER: &str = "gemini";

/// Schema keywords Gemini's function declaration validator rejects.
const UNSUPPORTED_SCHEMA_KEYS: [&str; 2] = ["$schema", "additionalProperties"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    /// Kept for bookkeeping; removed before the body is sent since Gemini
    /// takes the model from the URL.
    model: String,
    contents: Vec<GeminiContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tools: Vec<GeminiTool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_config: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct GeminiContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
enum GeminiPart {
    FunctionCall {
        #[serde(rename = "functionCall")]
        function_call: GeminiFunctionCall,
    },
    FunctionResponse {
        #[serde(rename = "functionResponse")]
        function_response: GeminiFunctionResponse,
    },
    Text {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        thought: Option<bool>,
    },
    Other(Value),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct GeminiFunctionCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct GeminiFunctionResponse {
    name: String,
    response: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct GeminiTool {
    function_declarations: Vec<GeminiFunctionDeclaration>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct GeminiFunctionDeclaration {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    usage_metadata: Option<GeminiUsage>,
    #[serde(default)]
    model_version: Option<String>,
    #[serde(default)]
    response_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiContent>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsage {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
    #[serde(default)]
    thoughts_token_count: u64,
}

impl GeminiUsage {
    /// Thought tokens are billed as output.
    fn to_item(&self, model: &str) -> UsageItem {
        UsageItem::new(
            PROVIDER,
            model,
            self.prompt_token_count,
            self.candidates_token_count + self.thoughts_token_count,
            self.thoughts_token_count,
        )
    }
}

impl GeminiResponse {
    fn parts(self) -> Vec<GeminiPart> {
        self.candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts)
            .unwrap_or_default()
    }
}

fn decode(raw: &Value) -> GeminiResponse {
    GeminiResponse::deserialize(raw).unwrap_or_default()
}

/// Gemini only returns call ids on some models. Without one, an id is derived
/// from the response id and the part position so that repeated extraction
/// from the same payload yields the same ids.
fn call_id(function_call: &GeminiFunctionCall, response_id: Option<&str>, index: usize) -> String {
    match &function_call.id {
        Some(id) if !id.is_empty() => id.clone(),
        _ => format!(
            "call_{}_{}_{}",
            response_id.unwrap_or(PROVIDER),
            index,
            function_call.name
        ),
    }
}

/// `functionResponse.response` must be an object.
fn response_object(output: &str) -> Value {
    match serde_json::from_str::<Value>(output) {
        Ok(value @ Value::Object(_)) => value,
        Ok(value) => json!({ "result": value }),
        Err(_) => json!({ "result": output }),
    }
}

fn function_response_part(name: &str, output: &str) -> GeminiPart {
    GeminiPart::FunctionResponse {
        function_response: GeminiFunctionResponse {
            name: name.to_string(),
            response: response_object(output),
        },
    }
}

fn push_part(contents: &mut Vec<GeminiContent>, role: &str, part: GeminiPart) {
    match contents.last_mut() {
        Some(last) if last.role.as_deref() == Some(role) => last.parts.push(part),
        _ => contents.push(GeminiContent {
            role: Some(role.to_string()),
            parts: vec![part],
        }),
    }
}

fn sanitize_schema(schema: &Value) -> Value {
    let mut schema = schema.clone();
    strip_keys(&mut schema, &UNSUPPORTED_SCHEMA_KEYS);
    schema
}

#[derive(Debug, Default, Clone)]
pub struct GeminiAdapter;

impl GeminiAdapter {
    pub fn new() -> Self {
        Self
    }

    fn convert_contents(&self, history: &[HistoryItem]) -> Result<Vec<GeminiContent>, LlmError> {
        let mut contents = Vec::new();
        for item in history {
            match item {
                HistoryItem::Message { role, content } => match role {
                    Role::System | Role::Developer => {}
                    Role::User => push_part(
                        &mut contents,
                        "user",
                        GeminiPart::Text {
                            text: content.clone(),
                            thought: None,
                        },
                    ),
                    Role::Assistant => push_part(
                        &mut contents,
                        "model",
                        GeminiPart::Text {
                            text: content.clone(),
                            thought: None,
                        },
                    ),
                },
                HistoryItem::ToolCall {
                    name, arguments, ..
                } => push_part(
                    &mut contents,
                    "model",
                    GeminiPart::FunctionCall {
                        function_call: GeminiFunctionCall {
                            id: None,
                            name: name.clone(),
                            args: parse_arguments(arguments)?,
                        },
                    },
                ),
                HistoryItem::ToolResult { name, output, .. } => {
                    push_part(&mut contents, "user", function_response_part(name, output))
                }
                // Thought summaries are not accepted back as input.
                HistoryItem::Reasoning { .. } => {}
            }
        }
        Ok(contents)
    }
}

fn stream_path(model: &str) -> String {
    format!("/v1beta/models/{}:streamGenerateContent?alt=sse", model)
}

fn generate_path(model: &str) -> String {
    format!("/v1beta/models/{}:generateContent", model)
}

/// Splits the bookkeeping model name off a built request.
fn split_model(request: &ProviderRequest) -> (String, Value) {
    let mut body = request.clone();
    let model = body
        .as_object_mut()
        .and_then(|map| map.remove("model"))
        .and_then(|m| m.as_str().map(str::to_string))
        .unwrap_or_default();
    (model, body)
}

/// Gemini streams whole candidates, so function calls arrive complete and can
/// be emitted as soon as they are seen. Usage is cumulative; the last value
/// wins.
fn translate_stream(mut events: SseStream, model: String) -> ChunkStream {
    let chunks = stream! {
        let mut usage: Option<GeminiUsage> = None;
        let mut model = model;

        while let Some(data) = events.next().await {
            let data = match data {
                Ok(data) => data,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };
            let value: Value = match serde_json::from_str(&data) {
                Ok(value) => value,
                Err(e) => {
                    warn!("Skipping unparseable gemini stream event: {}", e);
                    continue;
                }
            };
            if let Some(error) = value.get("error") {
                yield Err(LlmError::Api {
                    provider: PROVIDER.to_string(),
                    status: error["code"]
                        .as_u64()
                        .map(|c| u16::try_from(c).unwrap_or(502))
                        .unwrap_or(500),
                    error_type: error["status"].as_str().map(str::to_string),
                    message: error["message"].as_str().unwrap_or_default().to_string(),
                    retry_after_secs: None,
                });
                return;
            }

            let response = decode(&value);
            if let Some(version) = &response.model_version {
                model = version.clone();
            }
            if response.usage_metadata.is_some() {
                usage = response.usage_metadata;
            }
            let parts = response
                .candidates
                .into_iter()
                .next()
                .and_then(|c| c.content)
                .map(|c| c.parts)
                .unwrap_or_default();

            for part in parts {
                match part {
                    GeminiPart::Text { text, thought } if thought != Some(true) && !text.is_empty() => {
                        yield Ok(LlmStreamChunk::Text { content: text });
                    }
                    GeminiPart::FunctionCall { function_call } => {
                        let id = function_call
                            .id
                            .clone()
                            .filter(|id| !id.is_empty())
                            .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple()));
                        yield Ok(LlmStreamChunk::ToolCall {
                            id,
                            name: function_call.name,
                            arguments: function_call.args.to_string(),
                        });
                    }
                    _ => {}
                }
            }
        }

        let usage = usage.unwrap_or_default().to_item(&model);
        yield Ok(LlmStreamChunk::Done { usage: vec![usage] });
    };
    chunks.boxed()
}

#[async_trait]
impl ProviderAdapter for GeminiAdapter {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn format_output_schema(&self, schema: &Value) -> Result<Value, LlmError> {
        Ok(sanitize_schema(&normalize_output_schema(schema)?))
    }

    fn build_request(&self, request: &OperateRequest) -> Result<ProviderRequest, LlmError> {
        let history = messages_with_instructions(request);
        let system_instruction = collect_system_prompt(request, &history).map(|text| GeminiContent {
            role: None,
            parts: vec![GeminiPart::Text { text, thought: None }],
        });

        let tools = if request.tools.is_empty() {
            Vec::new()
        } else {
            vec![GeminiTool {
                function_declarations: request
                    .tools
                    .iter()
                    .map(|t| GeminiFunctionDeclaration {
                        name: t.name.clone(),
                        description: t.description.clone(),
                        parameters: sanitize_schema(&t.parameters),
                    })
                    .collect(),
            }]
        };

        let tool_config = if request.format.is_some() && !tools.is_empty() {
            Some(json!({ "functionCallingConfig": { "mode": "ANY" } }))
        } else {
            None
        };

        let generation_config = if request.temperature.is_some() || request.max_tokens.is_some() {
            Some(GenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_tokens,
            })
        } else {
            None
        };

        let body = GeminiRequest {
            model: request.model.clone(),
            contents: self.convert_contents(&history)?,
            system_instruction,
            tools,
            tool_config,
            generation_config,
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
        let (model, body) = split_model(request);
        client.post_json(&generate_path(&model), &body).await
    }

    async fn execute_stream_request(
        &self,
        client: &ProviderClient,
        request: &ProviderRequest,
    ) -> Result<ChunkStream, LlmError> {
        let (model, body) = split_model(request);
        let events = client.post_sse(&stream_path(&model), &body).await?;
        Ok(translate_stream(events, model))
    }

    fn extract_text(&self, raw: &Value) -> Option<String> {
        let texts: Vec<String> = decode(raw)
            .parts()
            .into_iter()
            .filter_map(|part| match part {
                GeminiPart::Text { text, thought } if thought != Some(true) => Some(text),
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
        raw.pointer("/candidates/0/finishReason")
            .and_then(|r| r.as_str())
            .map(str::to_string)
    }

    fn response_model(&self, raw: &Value) -> Option<String> {
        raw.get("modelVersion").and_then(|m| m.as_str()).map(str::to_string)
    }

    fn extract_tool_calls(&self, raw: &Value) -> Vec<StandardToolCall> {
        let response = decode(raw);
        let response_id = response.response_id.clone();
        response
            .parts()
            .into_iter()
            .enumerate()
            .filter_map(|(index, part)| match part {
                GeminiPart::FunctionCall { function_call } => Some(StandardToolCall {
                    call_id: call_id(&function_call, response_id.as_deref(), index),
                    name: function_call.name.clone(),
                    arguments: function_call.args.to_string(),
                    raw: json!({ "functionCall": function_call }),
                }),
                _ => None,
            })
            .collect()
    }

    fn extract_usage(&self, raw: &Value, model: &str) -> UsageItem {
        let usage = raw.get("usageMetadata");
        let thoughts = as_u64(usage.and_then(|u| u.get("thoughtsTokenCount")));
        UsageItem::new(
            PROVIDER,
            model,
            as_u64(usage.and_then(|u| u.get("promptTokenCount"))),
            as_u64(usage.and_then(|u| u.get("candidatesTokenCount"))) + thoughts,
            thoughts,
        )
    }

    fn format_tool_result(&self, call: &StandardToolCall, result: &StandardToolResult) -> Value {
        serde_json::to_value(function_response_part(&call.name, &result.output_text()))
            .unwrap_or(Value::Null)
    }

    fn append_tool_result(
        &self,
        request: &ProviderRequest,
        call: &StandardToolCall,
        result: &StandardToolResult,
    ) -> Result<ProviderRequest, LlmError> {
        let mut body = GeminiRequest::deserialize(request)?;
        push_part(
            &mut body.contents,
            "user",
            function_response_part(&call.name, &result.output_text()),
        );
        Ok(serde_json::to_value(body)?)
    }

    fn classify_error(&self, error: &LlmError) -> ClassifiedError {
        if let LlmError::Api {
            error_type: Some(status),
            retry_after_secs,
            ..
        } = error
        {
            match status.as_str() {
                "RESOURCE_EXHAUSTED" => {
                    return ClassifiedError::rate_limit(error.clone(), *retry_after_secs)
                }
                "UNAVAILABLE" | "INTERNAL" | "DEADLINE_EXCEEDED" => {
                    return ClassifiedError::retryable(error.clone())
                }
                "INVALID_ARGUMENT" | "FAILED_PRECONDITION" | "PERMISSION_DENIED"
                | "UNAUTHENTICATED" | "NOT_FOUND" => {
                    return ClassifiedError::unrecoverable(error.clone())
                }
                _ => {}
            }
        }
        classify_by_status(PROVIDER, error)
    }

    fn is_complete(&self, raw: &Value) -> bool {
        self.extract_tool_calls(raw).is_empty()
    }

    fn response_to_history(&self, raw: &Value) -> Vec<HistoryItem> {
        let response = decode(raw);
        let response_id = response.response_id.clone();
        response
            .parts()
            .into_iter()
            .enumerate()
            .filter_map(|(index, part)| match part {
                GeminiPart::Text {
                    text,
                    thought: Some(true),
                } => Some(HistoryItem::Reasoning {
                    id: format!("thought_{}", index),
                    content: Some(text),
                }),
                GeminiPart::Text { text, .. } if !text.is_empty() => {
                    Some(HistoryItem::assistant(text))
                }
                GeminiPart::FunctionCall { function_call } => Some(HistoryItem::tool_call(
                    call_id(&function_call, response_id.as_deref(), index),
                    function_call.name.clone(),
                    function_call.args.to_string(),
                )),
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
            model: "gemini-2.5-flash".to_string(),
            messages,
            ..Default::default()
        }
    }

    fn function_call_response() -> Value {
        json!({
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [
                        { "text": "Thinking about it", "thought": true },
                        { "functionCall": { "name": "get_weather", "args": { "city": "Rome" } } }
                    ]
                },
                "finishReason": "STOP"
            }],
            "usageMetadata": {
                "promptTokenCount": 30,
                "candidatesTokenCount": 10,
                "thoughtsTokenCount": 6,
                "totalTokenCount": 46
            },
            "modelVersion": "gemini-2.5-flash",
            "responseId": "r1"
        })
    }

    #[test]
    fn test_simple_request() {
        let adapter = GeminiAdapter::new();
        let mut request = request_with(vec![
            HistoryItem::user("Hello"),
            HistoryItem::assistant("Hi!"),
            HistoryItem::user("How are you?"),
        ]);
        request.system = Some("Be kind.".to_string());
        request.temperature = Some(0.2);

        let body = adapter.build_request(&request).unwrap();
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "Be kind.");
        assert_eq!(body["contents"].as_array().unwrap().len(), 3);
        assert_eq!(body["contents"][1]["role"], "model");
        assert_eq!(body["generationConfig"]["temperature"].as_f64().unwrap() as f32, 0.2);
    }

    #[test]
    fn test_tool_schemas_are_sanitized() {
        let adapter = GeminiAdapter::new();
        let mut request = request_with(vec![HistoryItem::user("Hi")]);
        request.tools = vec![ProviderToolDefinition {
            name: "lookup".to_string(),
            description: "Look up".to_string(),
            parameters: json!({
                "$schema": "http://json-schema.org/draft-07/schema#",
                "type": "object",
                "properties": { "q": { "type": "string" } },
                "additionalProperties": false
            }),
        }];
        let body = adapter.build_request(&request).unwrap();
        let params = &body["tools"][0]["functionDeclarations"][0]["parameters"];
        assert!(params.get("additionalProperties").is_none());
        assert!(params.get("$schema").is_none());
        assert_eq!(params["properties"]["q"]["type"], "string");
    }

    #[test]
    fn test_output_schema_drops_additional_properties() {
        let adapter = GeminiAdapter::new();
        let schema = adapter
            .format_output_schema(&json!({ "title": "string", "score": "number" }))
            .unwrap();
        assert!(schema.get("additionalProperties").is_none());
        let required = schema["required"].as_array().unwrap();
        assert_eq!(required.len(), 2);
        assert!(required.contains(&json!("title")));
    }

    #[test]
    fn test_parse_function_call_response() {
        let adapter = GeminiAdapter::new();
        let raw = function_call_response();

        let parsed = adapter.parse_response(&raw).unwrap();
        assert!(parsed.has_tool_calls);
        assert!(parsed.content.is_none());
        assert_eq!(parsed.usage.input, 30);
        assert_eq!(parsed.usage.output, 16);
        assert_eq!(parsed.usage.reasoning, 6);
        assert!(!adapter.is_complete(&raw));

        let calls = adapter.extract_tool_calls(&raw);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "get_weather");

        let history = adapter.response_to_history(&raw);
        assert!(matches!(history[0], HistoryItem::Reasoning { .. }));
        match &history[1] {
            HistoryItem::ToolCall { call_id, .. } => assert_eq!(call_id, &calls[0].call_id),
            other => panic!("expected tool call, got {:?}", other),
        }
    }

    #[test]
    fn test_tool_result_history_conversion() {
        let adapter = GeminiAdapter::new();
        let request = request_with(vec![
            HistoryItem::user("Weather?"),
            HistoryItem::tool_call("c1", "get_weather", r#"{"city":"Rome"}"#),
            HistoryItem::tool_result("c1", "get_weather", "sunny"),
        ]);
        let body = adapter.build_request(&request).unwrap();
        let contents = body["contents"].as_array().unwrap();
        assert_eq!(contents[1]["parts"][0]["functionCall"]["args"]["city"], "Rome");
        assert_eq!(contents[2]["role"], "user");
        assert_eq!(
            contents[2]["parts"][0]["functionResponse"]["response"],
            json!({"result": "sunny"})
        );
    }

    #[test]
    fn test_append_tool_result_matches_rebuilt_request() {
        let adapter = GeminiAdapter::new();
        let call = StandardToolCall::new("c1", "get_weather", r#"{"city":"Rome"}"#);
        let result = StandardToolResult::new(json!({"temp": 25}));

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
    fn test_split_model_from_body() {
        let (model, body) = split_model(&json!({"model": "gemini-2.5-pro", "contents": []}));
        assert_eq!(model, "gemini-2.5-pro");
        assert!(body.get("model").is_none());
        assert_eq!(
            stream_path(&model),
            "/v1beta/models/gemini-2.5-pro:streamGenerateContent?alt=sse"
        );
    }

    #[test]
    fn test_error_classification() {
        let adapter = GeminiAdapter::new();
        let error = |status: u16, kind: &str| LlmError::Api {
            provider: PROVIDER.to_string(),
            status,
            error_type: Some(kind.to_string()),
            message: "x".to_string(),
            retry_after_secs: None,
        };
        assert_eq!(
            adapter.classify_error(&error(429, "RESOURCE_EXHAUSTED")).category,
            ErrorCategory::RateLimit
        );
        assert_eq!(
            adapter.classify_error(&error(503, "UNAVAILABLE")).category,
            ErrorCategory::Retryable
        );
        assert_eq!(
            adapter.classify_error(&error(400, "INVALID_ARGUMENT")).category,
            ErrorCategory::Unrecoverable
        );
    }

    #[tokio::test]
    async fn test_stream_text_and_function_call() {
        let events = vec![
            json!({"candidates": [{"content": {"role": "model", "parts": [{"text": "Hel"}]}}]}),
            json!({"candidates": [{"content": {"role": "model", "parts": [{"text": "lo"}]}}]}),
            json!({"candidates": [{"content": {"role": "model", "parts": [{"functionCall": {"name": "lookup", "args": {"q": "x"}}}]}, "finishReason": "STOP"}],
                   "usageMetadata": {"promptTokenCount": 4, "candidatesTokenCount": 3}}),
        ];
        let source = stream::iter(events.into_iter().map(|e| Ok(e.to_string()))).boxed();
        let chunks: Vec<_> = translate_stream(source, "gemini-2.5-flash".to_string())
            .map(|c| c.unwrap())
            .collect()
            .await;

        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[1], LlmStreamChunk::Text { content: "lo".to_string() });
        match &chunks[2] {
            LlmStreamChunk::ToolCall { id, name, arguments } => {
                assert!(id.starts_with("call_"));
                assert_eq!(name, "lookup");
                assert_eq!(arguments, r#"{"q":"x"}"#);
            }
            other => panic!("expected tool call, got {:?}", other),
        }
        assert!(matches!(&chunks[3], LlmStreamChunk::Done { usage } if usage[0].total == 7));
    }

    #[tokio::test]
    async fn test_stream_error_codes() {
        let huge = json!({"error": {"code": 65536 + 429, "status": "RESOURCE_EXHAUSTED", "message": "quota"}});
        let source = stream::iter(vec![Ok(huge.to_string())]).boxed();
        let chunks: Vec<_> = translate_stream(source, "gemini-2.5-flash".to_string()).collect().await;
        assert_eq!(chunks[0].as_ref().unwrap_err().status(), 502);

        let quota = json!({"error": {"code": 429, "status": "RESOURCE_EXHAUSTED", "message": "quota"}});
        let source = stream::iter(vec![Ok(quota.to_string())]).boxed();
        let chunks: Vec<_> = translate_stream(source, "gemini-2.5-flash".to_string()).collect().await;
        assert_eq!(chunks[0].as_ref().unwrap_err().status(), 429);
    }
}
