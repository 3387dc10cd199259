//! Buffered multi-turn loop

use log::{debug, info, warn};

use super::hooks::{ModelRequestContext, ModelResponseContext};
use super::response::ResponseBuilder;
use super::LoopConfig;
use crate::core_types::{History, HistoryItem, LlmOperateResponse, ResponseContent, ResponseError};
use crate::errors::LlmError;
use crate::llm::providers::{ProviderAdapter, STRUCTURED_OUTPUT_TOOL};

pub struct OperateLoop {
    config: LoopConfig,
}

impl OperateLoop {
    pub fn new(config: LoopConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// Runs the session to completion or turn exhaustion. Model errors that
    /// survive the retry policy and hook errors are returned as `Err`; tool
    /// failures are fed back to the model instead.
    pub async fn execute(&self, history: History) -> Result<LlmOperateResponse, LlmError> {
        let config = &self.config;
        let adapter: &dyn ProviderAdapter = config.adapter.as_ref();
        let client = &config.client;
        let provider = config.provider().to_string();

        let (format, tools) = config.prepare()?;
        let mut builder = ResponseBuilder::new(&provider, &config.model);
        builder.extend_history(history);

        for turn in 1..=config.max_turns {
            let request = config.request(builder.history().to_vec(), &tools, format.as_ref());
            let body = adapter.build_request(&request)?;

            debug!(
                "{} turn {}/{}: requesting {} with {} history item(s)",
                provider,
                turn,
                config.max_turns,
                config.model,
                request.messages.len()
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

            let body_ref = &body;
            let context = format!("{} request (turn {})", provider, turn);
            let raw = config
                .retry
                .execute(
                    move || adapter.execute_request(client, body_ref),
                    |error| adapter.classify_error(error),
                    &context,
                    &config.hooks,
                )
                .await?;

            let parsed = adapter.parse_response(&raw)?;
            let usage = config.usage_with_model(parsed.usage.clone());
            config
                .hooks
                .after_each_model_response(|| ModelResponseContext {
                    turn,
                    provider: provider.clone(),
                    model: config.model.clone(),
                    response: raw.clone(),
                    usage: usage.clone(),
                })
                .await?;
            builder.add_usage(usage).add_response(raw.clone());

            let items = adapter.response_to_history(&raw);

            if format.is_some() {
                if let Some(structured) = adapter.extract_structured_output(&raw) {
                    for item in items {
                        if !is_structured_output_call(&item) {
                            builder.append_to_history(item.clone());
                        }
                        builder.append_to_output(item);
                    }
                    info!("{} returned structured output on turn {}", provider, turn);
                    builder
                        .set_content(ResponseContent::Structured(structured))
                        .complete();
                    return Ok(builder.build());
                }
            }

            let calls = adapter.extract_tool_calls(&raw);
            if calls.is_empty() {
                for item in items {
                    builder.append_to_history(item.clone()).append_to_output(item);
                }
                if let Some(text) = parsed.content {
                    builder.set_content(ResponseContent::Text(text));
                }
                builder.complete();
                return Ok(builder.build());
            }

            if turn == config.max_turns {
                warn!(
                    "{} requested {} tool call(s) after the last allowed turn ({})",
                    provider,
                    calls.len(),
                    config.max_turns
                );
                for item in items {
                    if !item.is_tool_call() {
                        builder.append_to_history(item.clone());
                    }
                    builder.append_to_output(item);
                }
                if let Some(text) = parsed.content {
                    builder.set_content(ResponseContent::Text(text));
                }
                builder
                    .set_error(ResponseError::too_many_turns(config.max_turns))
                    .incomplete();
                return Ok(builder.build());
            }

            for item in items {
                builder.append_to_history(item.clone()).append_to_output(item);
            }
            for call in &calls {
                let outcome = config.run_tool(call).await?;
                let item = outcome.to_result().to_history_item(call);
                builder.append_to_history(item.clone()).append_to_output(item);
            }
        }

        // Only reachable with max_turns == 0, which Turns never produces.
        builder
            .set_error(ResponseError::too_many_turns(config.max_turns))
            .incomplete();
        Ok(builder.build())
    }
}

fn is_structured_output_call(item: &HistoryItem) -> bool {
    matches!(item, HistoryItem::ToolCall { name, .. } if name == STRUCTURED_OUTPUT_TOOL)
}
