use serde_json::Value;

use crate::core_types::{
    HistoryItem, LlmOperateResponse, ResponseContent, ResponseError, ResponseStatus, UsageItem,
};

/// Accumulates the response envelope over the turns of one invocation.
#[derive(Debug, Clone)]
pub struct ResponseBuilder {
    response: LlmOperateResponse,
}

impl ResponseBuilder {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            response: LlmOperateResponse {
                content: None,
                status: ResponseStatus::InProgress,
                error: None,
                history: Vec::new(),
                output: Vec::new(),
                usage: Vec::new(),
                responses: Vec::new(),
                provider: provider.into(),
                model: model.into(),
                fallback_used: None,
                fallback_attempts: None,
            },
        }
    }

    pub fn set_content(&mut self, content: ResponseContent) -> &mut Self {
        self.response.content = Some(content);
        self
    }

    pub fn set_status(&mut self, status: ResponseStatus) -> &mut Self {
        self.response.status = status;
        self
    }

    pub fn set_error(&mut self, error: ResponseError) -> &mut Self {
        self.response.error = Some(error);
        self
    }

    pub fn append_to_history(&mut self, item: HistoryItem) -> &mut Self {
        self.response.history.push(item);
        self
    }

    pub fn extend_history(&mut self, items: impl IntoIterator<Item = HistoryItem>) -> &mut Self {
        self.response.history.extend(items);
        self
    }

    pub fn append_to_output(&mut self, item: HistoryItem) -> &mut Self {
        self.response.output.push(item);
        self
    }

    pub fn add_usage(&mut self, usage: UsageItem) -> &mut Self {
        self.response.usage.push(usage);
        self
    }

    pub fn add_response(&mut self, raw: Value) -> &mut Self {
        self.response.responses.push(raw);
        self
    }

    pub fn complete(&mut self) -> &mut Self {
        self.set_status(ResponseStatus::Completed)
    }

    pub fn incomplete(&mut self) -> &mut Self {
        self.set_status(ResponseStatus::Incomplete)
    }

    pub fn history(&self) -> &[HistoryItem] {
        &self.response.history
    }

    pub fn usage(&self) -> &[UsageItem] {
        &self.response.usage
    }

    pub fn status(&self) -> ResponseStatus {
        self.response.status
    }

    /// Snapshot of the current state. Later mutation of the builder does not
    /// affect snapshots already handed out.
    pub fn build(&self) -> LlmOperateResponse {
        self.response.clone()
    }
}
