//! Local HTTP server impersonating vendor endpoints.

#![allow(dead_code)]

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use parley_core::config::{LlmAuth, LlmConfig, ParleyConfig, RetryConfig};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

#[derive(Debug, Clone)]
pub struct Scripted {
    status: u16,
    content_type: &'static str,
    body: String,
}

impl Scripted {
    pub fn json(body: Value) -> Self {
        Self {
            status: 200,
            content_type: "application/json",
            body: body.to_string(),
        }
    }

    pub fn error(status: u16, body: Value) -> Self {
        Self {
            status,
            content_type: "application/json",
            body: body.to_string(),
        }
    }

    /// Server-sent events, one `data:` line per value.
    pub fn sse(events: &[Value]) -> Self {
        let body = events
            .iter()
            .map(|event| format!("data: {}\n\n", event))
            .collect::<String>();
        Self::sse_raw(body)
    }

    pub fn sse_raw(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            content_type: "text/event-stream",
            body: body.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub path: String,
    pub headers: HeaderMap,
    pub body: Value,
}

#[derive(Clone, Default)]
struct MockState {
    responses: Arc<Mutex<VecDeque<Scripted>>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

async fn handle(
    State(state): State<MockState>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = uri
        .path_and_query()
        .map(|p| p.to_string())
        .unwrap_or_else(|| uri.path().to_string());
    log::debug!("Mock vendor received {}", path);

    state.requests.lock().unwrap().push(RecordedRequest {
        path,
        headers,
        body: serde_json::from_slice(&body).unwrap_or(Value::Null),
    });

    match state.responses.lock().unwrap().pop_front() {
        Some(scripted) => (
            StatusCode::from_u16(scripted.status).unwrap(),
            [(header::CONTENT_TYPE, scripted.content_type)],
            scripted.body,
        )
            .into_response(),
        None => {
            log::error!("Mock vendor ran out of responses");
            (StatusCode::SERVICE_UNAVAILABLE, "no scripted response left").into_response()
        }
    }
}

pub struct MockVendorServer {
    pub base_url: String,
    state: MockState,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl MockVendorServer {
    pub async fn start(responses: Vec<Scripted>) -> Self {
        let state = MockState::default();
        state.responses.lock().unwrap().extend(responses);

        let app = Router::new().fallback(handle).with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap_or_else(|e| {
            panic!("Failed to bind mock vendor to 127.0.0.1:0: {}", e);
        });
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .unwrap_or_else(|e| log::error!("Mock vendor error: {}", e));
        });

        Self {
            base_url: format!("http://{}", addr),
            state,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().unwrap().clone()
    }
}

impl Drop for MockVendorServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Configuration pointing `provider` at the mock server, with instant retries.
pub fn config_for(provider: &str, model: &str, base_url: &str) -> ParleyConfig {
    ParleyConfig {
        llm: LlmConfig {
            provider: Some(provider.to_string()),
            model: Some(model.to_string()),
            base_url: Some(base_url.to_string()),
            auth: LlmAuth {
                api_key: Some("test-key".to_string()),
                api_key_env: None,
            },
            ..Default::default()
        },
        retry: RetryConfig {
            initial_delay_ms: 0,
            max_delay_ms: 0,
            backoff_factor: 1.0,
            max_retries: 1,
        },
        ..Default::default()
    }
}
