//! Core type definitions shared by the loops and the provider adapters
//!
//! These types are the normalized conversational protocol. Adapters translate
//! them to and from each vendor's native shape; the loops never look at vendor
//! payloads except through the opaque `raw` values carried alongside.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::LlmError;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    Developer,
    User,
    Assistant,
}

/// One entry of a conversation. Order is causal: the next model request is
/// built from the items in the order they appear.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HistoryItem {
    Message {
        role: Role,
        content: String,
    },
    ToolCall {
        call_id: String,
        name: String,
        arguments: String,
    },
    ToolResult {
        call_id: String,
        name: String,
        output: String,
    },
    Reasoning {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
    },
}

impl HistoryItem {
    pub fn message(role: Role, content: impl Into<String>) -> Self {
        HistoryItem::Message {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::message(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::message(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::message(Role::System, content)
    }

    pub fn tool_call(
        call_id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        HistoryItem::ToolCall {
            call_id: call_id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    pub fn tool_result(
        call_id: impl Into<String>,
        name: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        HistoryItem::ToolResult {
            call_id: call_id.into(),
            name: name.into(),
            output: output.into(),
        }
    }

    pub fn is_tool_call(&self) -> bool {
        matches!(self, HistoryItem::ToolCall { .. })
    }
}

pub type History = Vec<HistoryItem>;

/// Tool schema as it is handed to an adapter. Adapters wrap this in their
/// vendor envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Normalized request, rebuilt by the loop at the start of every turn.
#[derive(Debug, Clone, Default)]
pub struct OperateRequest {
    pub model: String,
    pub messages: History,
    pub system: Option<String>,
    pub instructions: Option<String>,
    pub tools: Vec<ProviderToolDefinition>,
    /// Vendor-ready structured output schema, already passed through
    /// `ProviderAdapter::format_output_schema`.
    pub format: Option<Value>,
    pub provider_options: Option<Value>,
    pub user: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UsageItem {
    pub input: u64,
    pub output: u64,
    pub reasoning: u64,
    pub total: u64,
    pub provider: String,
    pub model: String,
}

impl UsageItem {
    pub fn new(provider: &str, model: &str, input: u64, output: u64, reasoning: u64) -> Self {
        Self {
            input,
            output,
            reasoning,
            total: input + output,
            provider: provider.to_string(),
            model: model.to_string(),
        }
    }
}

/// Ordered usage items, one per successful vendor call of a session.
pub type Usage = Vec<UsageItem>;

#[derive(Debug, Clone)]
pub struct ParsedResponse {
    pub content: Option<String>,
    pub has_tool_calls: bool,
    pub stop_reason: Option<String>,
    pub usage: UsageItem,
    pub raw: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StandardToolCall {
    pub call_id: String,
    pub name: String,
    pub arguments: String,
    pub raw: Value,
}

impl StandardToolCall {
    pub fn new(call_id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            name: name.into(),
            arguments: arguments.into(),
            raw: Value::Null,
        }
    }

    pub fn to_history_item(&self) -> HistoryItem {
        HistoryItem::tool_call(&self.call_id, &self.name, &self.arguments)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StandardToolResult {
    pub output: Value,
    pub raw: Option<Value>,
}

impl StandardToolResult {
    pub fn new(output: Value) -> Self {
        Self { output, raw: None }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(serde_json::json!({ "error": message.into() }))
    }

    /// Text form sent back to the model. Strings are passed through, any
    /// other value is serialized as JSON.
    pub fn output_text(&self) -> String {
        match &self.output {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        }
    }

    pub fn to_history_item(&self, call: &StandardToolCall) -> HistoryItem {
        HistoryItem::tool_result(&call.call_id, &call.name, self.output_text())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    InProgress,
    Completed,
    Incomplete,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponseError {
    pub status: u16,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ResponseError {
    /// The status comes from the outer error; the detail from the root cause
    /// so a `BadGateway` still says what went wrong upstream.
    pub fn from_error(error: &LlmError) -> Self {
        let status = error.status();
        Self {
            status,
            title: status_title(status).to_string(),
            detail: Some(error.root_cause().to_string()),
        }
    }

    pub fn too_many_turns(max_turns: usize) -> Self {
        Self {
            status: 429,
            title: "Too Many Turns".to_string(),
            detail: Some(format!(
                "Model requested function call but exceeded {} turns",
                max_turns
            )),
        }
    }
}

fn status_title(status: u16) -> &'static str {
    match status {
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        429 => "Too Many Requests",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "Internal Server Error",
    }
}

/// Final answer of a session. Structured output wins over plain text when the
/// model produced both.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ResponseContent {
    Text(String),
    Structured(Value),
}

impl ResponseContent {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ResponseContent::Text(text) => Some(text),
            ResponseContent::Structured(_) => None,
        }
    }

    pub fn as_structured(&self) -> Option<&Value> {
        match self {
            ResponseContent::Structured(value) => Some(value),
            ResponseContent::Text(_) => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmOperateResponse {
    pub content: Option<ResponseContent>,
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
    pub history: History,
    pub output: Vec<HistoryItem>,
    pub usage: Usage,
    pub responses: Vec<Value>,
    pub provider: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_used: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_attempts: Option<u32>,
}

impl LlmOperateResponse {
    pub fn total_usage(&self) -> UsageItem {
        sum_usage(&self.usage)
    }
}

/// Sums a session's usage. Provider and model are taken from the last item.
pub fn sum_usage(usage: &[UsageItem]) -> UsageItem {
    let mut total = UsageItem::default();
    for item in usage {
        total.input += item.input;
        total.output += item.output;
        total.reasoning += item.reasoning;
        total.total += item.total;
        total.provider = item.provider.clone();
        total.model = item.model.clone();
    }
    total
}

/// Unit of incremental output. Adapters emit these per vendor call; the
/// stream loop re-emits them to the consumer, holding back every `Done` until
/// the whole session is over. `Reasoning` is only produced by adapters: the
/// stream loop records it in history and does not forward it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LlmStreamChunk {
    Text {
        content: String,
    },
    ToolCall {
        id: String,
        name: String,
        arguments: String,
    },
    Reasoning {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
    },
    ToolResult {
        id: String,
        name: String,
        result: Value,
    },
    Error {
        error: ResponseError,
    },
    Done {
        usage: Usage,
    },
}
