//! Scripted provider adapter for loop and facade tests.
//!
//! Responses use a minimal vendor-neutral shape:
//! `{"model", "content", "tool_calls": [{"id", "name", "arguments"}], "usage": {"input", "output"}}`.

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::core_types::{
    HistoryItem, LlmStreamChunk, OperateRequest, StandardToolCall, StandardToolResult, UsageItem,
};
use crate::errors::LlmError;
use crate::llm::client::ProviderClient;
use crate::llm::providers::{ChunkStream, ProviderAdapter, ProviderRequest};
use crate::llm::resolve::ProviderKind;
use crate::operate::{LoopConfig, RetryExecutor, RetryPolicy};

pub const MOCK_MODEL: &str = "mock-model";

type StreamScript = Vec<Result<LlmStreamChunk, LlmError>>;

#[derive(Default)]
pub struct MockAdapter {
    responses: Mutex<VecDeque<Result<Value, LlmError>>>,
    streams: Mutex<VecDeque<Result<StreamScript, LlmError>>>,
    requests: Mutex<Vec<Value>>,
}

impl MockAdapter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_responses(responses: Vec<Result<Value, LlmError>>) -> Arc<Self> {
        let adapter = Self::default();
        adapter.responses.lock().unwrap().extend(responses);
        Arc::new(adapter)
    }

    pub fn with_streams(streams: Vec<Result<StreamScript, LlmError>>) -> Arc<Self> {
        let adapter = Self::default();
        adapter.streams.lock().unwrap().extend(streams);
        Arc::new(adapter)
    }

    pub fn requests(&self) -> Vec<Value> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn text_response(text: &str) -> Value {
        json!({
            "model": MOCK_MODEL,
            "content": text,
            "tool_calls": [],
            "usage": { "input": 10, "output": 5 }
        })
    }

    pub fn tool_response(calls: &[(&str, &str, &str)]) -> Value {
        let calls: Vec<Value> = calls
            .iter()
            .map(|(id, name, arguments)| json!({ "id": id, "name": name, "arguments": arguments }))
            .collect();
        json!({
            "model": MOCK_MODEL,
            "content": null,
            "tool_calls": calls,
            "usage": { "input": 10, "output": 5 }
        })
    }

    pub fn api_error(status: u16) -> LlmError {
        LlmError::Api {
            provider: "mock".to_string(),
            status,
            error_type: None,
            message: format!("scripted {}", status),
            retry_after_secs: None,
        }
    }
}

#[async_trait]
impl ProviderAdapter for MockAdapter {
    fn name(&self) -> &str {
        "mock"
    }

    fn build_request(&self, request: &OperateRequest) -> Result<ProviderRequest, LlmError> {
        Ok(json!({
            "model": request.model,
            "messages": request.messages,
            "system": request.system,
            "instructions": request.instructions,
            "tools": request.tools,
            "format": request.format,
        }))
    }

    async fn execute_request(
        &self,
        _client: &ProviderClient,
        request: &ProviderRequest,
    ) -> Result<Value, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::Internal("no scripted response left".to_string())))
    }

    async fn execute_stream_request(
        &self,
        _client: &ProviderClient,
        request: &ProviderRequest,
    ) -> Result<ChunkStream, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        let script = self
            .streams
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::Internal("no scripted stream left".to_string())))?;
        Ok(stream::iter(script).boxed())
    }

    fn extract_text(&self, raw: &Value) -> Option<String> {
        raw["content"].as_str().map(str::to_string)
    }

    fn stop_reason(&self, raw: &Value) -> Option<String> {
        if self.extract_tool_calls(raw).is_empty() {
            Some("end_turn".to_string())
        } else {
            Some("tool_use".to_string())
        }
    }

    fn extract_tool_calls(&self, raw: &Value) -> Vec<StandardToolCall> {
        raw["tool_calls"]
            .as_array()
            .map(|calls| {
                calls
                    .iter()
                    .map(|c| StandardToolCall {
                        call_id: c["id"].as_str().unwrap_or_default().to_string(),
                        name: c["name"].as_str().unwrap_or_default().to_string(),
                        arguments: c["arguments"].as_str().unwrap_or_default().to_string(),
                        raw: c.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn extract_usage(&self, raw: &Value, model: &str) -> UsageItem {
        UsageItem::new(
            "mock",
            model,
            raw["usage"]["input"].as_u64().unwrap_or(0),
            raw["usage"]["output"].as_u64().unwrap_or(0),
            0,
        )
    }

    fn format_tool_result(&self, call: &StandardToolCall, result: &StandardToolResult) -> Value {
        serde_json::to_value(result.to_history_item(call)).unwrap_or(Value::Null)
    }

    fn append_tool_result(
        &self,
        request: &ProviderRequest,
        call: &StandardToolCall,
        result: &StandardToolResult,
    ) -> Result<ProviderRequest, LlmError> {
        let mut request = request.clone();
        if let Some(messages) = request["messages"].as_array_mut() {
            messages.push(self.format_tool_result(call, result));
        }
        Ok(request)
    }

    fn is_complete(&self, raw: &Value) -> bool {
        self.extract_tool_calls(raw).is_empty()
    }

    fn response_to_history(&self, raw: &Value) -> Vec<HistoryItem> {
        let mut items = Vec::new();
        if let Some(text) = self.extract_text(raw).filter(|t| !t.is_empty()) {
            items.push(HistoryItem::assistant(text));
        }
        items.extend(self.extract_tool_calls(raw).iter().map(|c| c.to_history_item()));
        items
    }
}

pub fn mock_client() -> ProviderClient {
    ProviderClient::new(ProviderKind::OpenAI, "test-key", Some("http://127.0.0.1:9".to_string()))
        .unwrap()
}

/// Loop configuration around `adapter` with zero-delay retries.
pub fn mock_loop_config(adapter: Arc<MockAdapter>) -> LoopConfig {
    let mut config = LoopConfig::new(adapter, mock_client(), MOCK_MODEL);
    config.retry = RetryExecutor::new(RetryPolicy::new(0, 0, 2.0, 2));
    config
}
