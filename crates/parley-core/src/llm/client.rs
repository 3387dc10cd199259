//! HTTP transport shared by every provider adapter
//!
//! The client owns authentication and endpoint selection for one provider.
//! Adapters only hand it a path and a JSON body.

use async_stream::stream;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use log::debug;
use reqwest::header::{HeaderMap, HeaderValue, InvalidHeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Response};
use serde_json::Value;
use std::time::Duration;

use super::resolve::ProviderKind;
use crate::errors::LlmError;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const CONNECT_TIMEOUT_SECS: u64 = 30;
const MAX_ERROR_BODY: usize = 512;

/// Stream of raw `data:` payloads from a server-sent event response.
pub type SseStream = BoxStream<'static, Result<String, LlmError>>;

#[derive(Debug, Clone)]
pub struct ProviderClient {
    provider: ProviderKind,
    http: Client,
    api_key: String,
    base_url: String,
}

impl ProviderClient {
    pub fn new(
        provider: ProviderKind,
        api_key: impl Into<String>,
        base_url: Option<String>,
    ) -> Result<Self, LlmError> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| LlmError::Config(format!("Failed to build HTTP client: {}", e)))?;

        let base_url = base_url
            .unwrap_or_else(|| provider.default_base_url().to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            provider,
            http,
            api_key: api_key.into(),
            base_url,
        })
    }

    pub fn provider(&self) -> ProviderKind {
        self.provider
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn headers(&self) -> Result<HeaderMap, LlmError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let invalid_key = |_: InvalidHeaderValue| LlmError::Config(format!("Invalid {} API key", self.provider));
        match self.provider {
            ProviderKind::Anthropic => {
                headers.insert(
                    "x-api-key",
                    HeaderValue::from_str(&self.api_key).map_err(invalid_key)?,
                );
                headers.insert(
                    "anthropic-version",
                    HeaderValue::from_static(ANTHROPIC_VERSION),
                );
            }
            ProviderKind::Gemini => {
                headers.insert(
                    "x-goog-api-key",
                    HeaderValue::from_str(&self.api_key).map_err(invalid_key)?,
                );
            }
            ProviderKind::OpenAI | ProviderKind::OpenRouter => {
                headers.insert(
                    AUTHORIZATION,
                    HeaderValue::from_str(&format!("Bearer {}", self.api_key))
                        .map_err(invalid_key)?,
                );
            }
        }
        Ok(headers)
    }

    async fn send(&self, path: &str, body: &Value) -> Result<Response, LlmError> {
        let url = self.url(path);
        debug!("{} request to {}", self.provider, url);

        let response = self
            .http
            .post(&url)
            .headers(self.headers()?)
            .json(body)
            .send()
            .await
            .map_err(|e| LlmError::Transport {
                provider: self.provider.to_string(),
                message: e.to_string(),
                timeout: e.is_timeout(),
            })?;

        if !response.status().is_success() {
            return Err(response_to_error(response, self.provider).await);
        }
        Ok(response)
    }

    pub async fn post_json(&self, path: &str, body: &Value) -> Result<Value, LlmError> {
        let response = self.send(path, body).await?;
        let text = response.text().await.map_err(|e| LlmError::Transport {
            provider: self.provider.to_string(),
            message: e.to_string(),
            timeout: e.is_timeout(),
        })?;
        serde_json::from_str(&text).map_err(|e| {
            LlmError::Parse(format!("Invalid {} response body: {}", self.provider, e))
        })
    }

    /// Opens a server-sent event stream. Errors before the first byte are
    /// returned directly; errors afterwards are yielded as stream items.
    pub async fn post_sse(&self, path: &str, body: &Value) -> Result<SseStream, LlmError> {
        let response = self.send(path, body).await?;
        let provider = self.provider;

        let events = stream! {
            let mut bytes = response.bytes_stream();
            let mut buffer: Vec<u8> = Vec::new();

            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(LlmError::Transport {
                            provider: provider.to_string(),
                            message: e.to_string(),
                            timeout: e.is_timeout(),
                        });
                        return;
                    }
                };
                buffer.extend(chunk.iter().copied().filter(|b| *b != b'\r'));

                while let Some(end) = buffer.windows(2).position(|w| w == b"\n\n") {
                    let event: Vec<u8> = buffer.drain(..end + 2).collect();
                    if let Some(data) = event_data(&String::from_utf8_lossy(&event)) {
                        yield Ok(data);
                    }
                }
            }

            if let Some(data) = event_data(&String::from_utf8_lossy(&buffer)) {
                yield Ok(data);
            }
        };

        Ok(events.boxed())
    }
}

/// Joins the `data:` lines of one SSE event.
pub fn event_data(event: &str) -> Option<String> {
    let lines: Vec<&str> = event
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|data| data.strip_prefix(' ').unwrap_or(data))
        .collect();
    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

pub fn parse_retry_after(response: &Response) -> Option<u64> {
    response
        .headers()
        .get("retry-after")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
}

async fn response_to_error(response: Response, provider: ProviderKind) -> LlmError {
    let status = response.status().as_u16();
    let retry_after_secs = parse_retry_after(&response);
    let body = response.text().await.unwrap_or_default();
    let (error_type, message) = parse_error_body(&body);

    LlmError::Api {
        provider: provider.to_string(),
        status,
        error_type,
        message,
        retry_after_secs,
    }
}

/// Pulls the vendor error type and message out of an error body. Handles the
/// `{"error": {"type"|"status"|"code", "message"}}` envelopes the supported
/// vendors use.
pub fn parse_error_body(body: &str) -> (Option<String>, String) {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let error = parsed.as_ref().and_then(|v| v.get("error"));

    let error_type = error.and_then(|e| {
        ["type", "status", "code"].iter().find_map(|key| match e.get(*key) {
            Some(Value::String(s)) => Some(s.clone()),
            _ => None,
        })
    });

    let message = error
        .and_then(|e| e.get("message"))
        .and_then(|m| m.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| truncate(body));

    (error_type, message)
}

fn truncate(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... [truncated]", &body[..end])
}
