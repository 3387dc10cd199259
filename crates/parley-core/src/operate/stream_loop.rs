//! Streaming multi-turn loop
//!
//! The session runs on its own task and pushes chunks through a bounded
//! channel; the consumer pulls at its own pace. Dropping the consumer stream
//! stops the session at its next emitted chunk. A request already in flight
//! is not aborted.

use async_stream::stream;
use futures_util::stream::{BoxStream, StreamExt};
use log::{debug, error, info, warn};
use serde_json::json;
use tokio::sync::mpsc;

use super::hooks::{ModelRequestContext, ModelResponseContext};
use super::{LoopConfig, ToolOutcome};
use crate::core_types::{
    sum_usage, History, HistoryItem, LlmStreamChunk, ResponseError, StandardToolCall, Usage,
};
use crate::errors::LlmError;
use crate::llm::providers::{ProviderAdapter, STRUCTURED_OUTPUT_TOOL};

const CHANNEL_CAPACITY: usize = 32;

pub type LlmChunkStream = BoxStream<'static, LlmStreamChunk>;

pub struct StreamLoop {
    config: LoopConfig,
}

impl StreamLoop {
    pub fn new(config: LoopConfig) -> Self {
        Self { config }
    }

    /// Starts the session. The returned stream always ends with exactly one
    /// `Done` chunk carrying the usage of every vendor call, unless the
    /// consumer stops reading first.
    pub fn execute(self, history: History) -> LlmChunkStream {
        let (tx, mut rx) = mpsc::channel(CHANNEL_CAPACITY);
        let session = Session {
            config: self.config,
            tx,
        };
        tokio::spawn(session.run(history));

        let chunks = stream! {
            while let Some(chunk) = rx.recv().await {
                yield chunk;
            }
        };
        chunks.boxed()
    }
}

enum Abort {
    ConsumerGone,
    Failed(LlmError),
}

impl From<LlmError> for Abort {
    fn from(error: LlmError) -> Self {
        Abort::Failed(error)
    }
}

struct Session {
    config: LoopConfig,
    tx: mpsc::Sender<LlmStreamChunk>,
}

impl Session {
    async fn run(self, history: History) {
        let mut usage: Usage = Vec::new();

        match self.drive(history, &mut usage).await {
            Ok(()) => {}
            Err(Abort::ConsumerGone) => {
                debug!("Stream consumer went away, ending session");
                return;
            }
            Err(Abort::Failed(err)) => {
                error!("Stream session failed: {}", err);
                let chunk = LlmStreamChunk::Error {
                    error: ResponseError::from_error(&err),
                };
                if self.emit(chunk).await.is_err() {
                    return;
                }
            }
        }

        let _ = self.tx.send(LlmStreamChunk::Done { usage }).await;
    }

    async fn emit(&self, chunk: LlmStreamChunk) -> Result<(), Abort> {
        self.tx.send(chunk).await.map_err(|_| Abort::ConsumerGone)
    }

    async fn drive(&self, mut history: History, usage: &mut Usage) -> Result<(), Abort> {
        let config = &self.config;
        let adapter: &dyn ProviderAdapter = config.adapter.as_ref();
        let client = &config.client;
        let provider = config.provider().to_string();

        let (format, tools) = config.prepare()?;

        for turn in 1..=config.max_turns {
            let request = config.request(history.clone(), &tools, format.as_ref());
            let body = adapter.build_request(&request)?;

            debug!(
                "{} stream turn {}/{}: requesting {}",
                provider, turn, config.max_turns, config.model
            );
            config
                .hooks
                .before_each_model_request(|| ModelRequestContext {
                    turn,
                    provider: provider.clone(),
                    model: config.model.clone(),
                    request: body.clone(),
                })
                .await?;

            // Only opening the stream is retried; a failure mid-stream ends
            // the session.
            let body_ref = &body;
            let context = format!("{} stream (turn {})", provider, turn);
            let mut chunks = config
                .retry
                .execute(
                    move || adapter.execute_stream_request(client, body_ref),
                    |err| adapter.classify_error(err),
                    &context,
                    &config.hooks,
                )
                .await?;

            let mut reasoning: Vec<HistoryItem> = Vec::new();
            let mut text = String::new();
            let mut calls: Vec<StandardToolCall> = Vec::new();
            let mut turn_usage: Usage = Vec::new();

            while let Some(chunk) = chunks.next().await {
                match chunk? {
                    LlmStreamChunk::Text { content } => {
                        text.push_str(&content);
                        self.emit(LlmStreamChunk::Text { content }).await?;
                    }
                    LlmStreamChunk::ToolCall {
                        id,
                        name,
                        arguments,
                    } => {
                        calls.push(StandardToolCall::new(&id, &name, &arguments));
                        self.emit(LlmStreamChunk::ToolCall {
                            id,
                            name,
                            arguments,
                        })
                        .await?;
                    }
                    LlmStreamChunk::Reasoning { id, content } => {
                        reasoning.push(HistoryItem::Reasoning { id, content });
                    }
                    LlmStreamChunk::Done { usage: items } => {
                        turn_usage.extend(items.into_iter().map(|u| config.usage_with_model(u)));
                    }
                    other => self.emit(other).await?,
                }
            }

            let turn_total = sum_usage(&turn_usage);
            usage.extend(turn_usage);
            config
                .hooks
                .after_each_model_response(|| ModelResponseContext {
                    turn,
                    provider: provider.clone(),
                    model: config.model.clone(),
                    response: json!({
                        "content": text,
                        "tool_calls": calls
                            .iter()
                            .map(|c| json!({ "id": c.call_id, "name": c.name, "arguments": c.arguments }))
                            .collect::<Vec<_>>(),
                    }),
                    usage: turn_total,
                })
                .await?;

            // reasoning precedes the text and tool calls it produced
            history.extend(reasoning);
            if !text.is_empty() {
                history.push(HistoryItem::assistant(text));
            }

            if calls.is_empty() {
                info!("{} stream completed on turn {}", provider, turn);
                return Ok(());
            }
            if format.is_some() && calls.iter().any(|c| c.name == STRUCTURED_OUTPUT_TOOL) {
                info!("{} streamed structured output on turn {}", provider, turn);
                return Ok(());
            }
            if turn == config.max_turns {
                warn!(
                    "{} requested {} tool call(s) after the last allowed turn ({})",
                    provider,
                    calls.len(),
                    config.max_turns
                );
                self.emit(LlmStreamChunk::Error {
                    error: ResponseError::too_many_turns(config.max_turns),
                })
                .await?;
                return Ok(());
            }

            history.extend(calls.iter().map(StandardToolCall::to_history_item));
            for call in &calls {
                let outcome = config.run_tool(call).await?;
                let chunk = match &outcome {
                    ToolOutcome::Output(output) => LlmStreamChunk::ToolResult {
                        id: call.call_id.clone(),
                        name: call.name.clone(),
                        result: output.clone(),
                    },
                    ToolOutcome::Failed(err) => LlmStreamChunk::Error {
                        error: ResponseError::from_error(err),
                    },
                };
                self.emit(chunk).await?;
                history.push(outcome.to_result().to_history_item(call));
            }
        }

        Ok(())
    }
}
