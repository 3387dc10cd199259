//! Error types for the orchestration engine
//!
//! Every failure that can escape an operate or stream call is expressed as an
//! [`LlmError`]. Vendor failures are additionally tagged by the adapter that
//! produced them with an [`ErrorCategory`], which is what the retry executor
//! consults before deciding to sleep and try again.

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum LlmError {
    #[error("{provider} API error ({status}): {message}")]
    Api {
        provider: String,
        status: u16,
        error_type: Option<String>,
        message: String,
        retry_after_secs: Option<u64>,
    },
    #[error("{provider} request failed: {message}")]
    Transport {
        provider: String,
        message: String,
        timeout: bool,
    },
    #[error("Parsing error: {0}")]
    Parse(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Unknown provider or model: {0}")]
    UnknownProvider(String),
    #[error("Tool not found: {0}")]
    ToolNotFound(String),
    #[error("Invalid arguments for tool '{tool_name}': {message}")]
    ToolArguments { tool_name: String, message: String },
    #[error("Tool execution failed for '{tool_name}': {message}")]
    Tool { tool_name: String, message: String },
    #[error("Hook failed: {0}")]
    Hook(String),
    #[error("Streaming is not supported by {0}")]
    StreamingUnsupported(String),
    #[error("Bad Gateway")]
    BadGateway {
        #[source]
        cause: Box<LlmError>,
    },
    #[error("Internal error: {0}")]
    Internal(String),
}

impl LlmError {
    pub fn tool(tool_name: impl Into<String>, message: impl Into<String>) -> Self {
        LlmError::Tool {
            tool_name: tool_name.into(),
            message: message.into(),
        }
    }

    pub fn hook(message: impl Into<String>) -> Self {
        LlmError::Hook(message.into())
    }

    pub fn bad_gateway(cause: LlmError) -> Self {
        LlmError::BadGateway {
            cause: Box::new(cause),
        }
    }

    /// HTTP-style status used when the error is reported inside a response
    /// envelope or a stream `Error` chunk.
    pub fn status(&self) -> u16 {
        match self {
            LlmError::Api { status, .. } => *status,
            LlmError::Transport { timeout: true, .. } => 504,
            LlmError::Transport { .. } => 502,
            LlmError::Parse(_) => 502,
            LlmError::Config(_) => 500,
            LlmError::UnknownProvider(_) => 400,
            LlmError::ToolNotFound(_) => 404,
            LlmError::ToolArguments { .. } => 400,
            LlmError::Tool { .. } => 500,
            LlmError::Hook(_) => 500,
            LlmError::StreamingUnsupported(_) => 501,
            LlmError::BadGateway { .. } => 502,
            LlmError::Internal(_) => 500,
        }
    }

    /// The innermost error, looking through `BadGateway` wrappers.
    pub fn root_cause(&self) -> &LlmError {
        match self {
            LlmError::BadGateway { cause } => cause.root_cause(),
            other => other,
        }
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        LlmError::Transport {
            provider: "http".to_string(),
            message: err.to_string(),
            timeout: err.is_timeout(),
        }
    }
}

impl From<serde_json::Error> for LlmError {
    fn from(err: serde_json::Error) -> Self {
        LlmError::Parse(err.to_string())
    }
}

/// Classification buckets shared by all vendors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    RateLimit,
    Retryable,
    Unrecoverable,
    Unknown,
}

#[derive(Debug, Clone)]
pub struct ClassifiedError {
    pub error: LlmError,
    pub category: ErrorCategory,
    pub should_retry: bool,
    pub suggested_delay_ms: Option<u64>,
}

/// Delay handed back to callers for rate limits without a `retry-after` hint.
pub const DEFAULT_RATE_LIMIT_DELAY_MS: u64 = 60_000;

impl ClassifiedError {
    pub fn rate_limit(error: LlmError, retry_after_secs: Option<u64>) -> Self {
        Self {
            error,
            category: ErrorCategory::RateLimit,
            should_retry: false,
            suggested_delay_ms: Some(
                retry_after_secs
                    .map(|secs| secs.saturating_mul(1000))
                    .unwrap_or(DEFAULT_RATE_LIMIT_DELAY_MS),
            ),
        }
    }

    pub fn retryable(error: LlmError) -> Self {
        Self {
            error,
            category: ErrorCategory::Retryable,
            should_retry: true,
            suggested_delay_ms: None,
        }
    }

    pub fn unrecoverable(error: LlmError) -> Self {
        Self {
            error,
            category: ErrorCategory::Unrecoverable,
            should_retry: false,
            suggested_delay_ms: None,
        }
    }

    /// Unknown errors are retried optimistically. Callers are expected to log
    /// them so the vendor table can be extended.
    pub fn unknown(error: LlmError) -> Self {
        Self {
            error,
            category: ErrorCategory::Unknown,
            should_retry: true,
            suggested_delay_ms: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_bad_gateway_preserves_cause() {
        let cause = LlmError::Api {
            provider: "anthropic".to_string(),
            status: 529,
            error_type: Some("overloaded_error".to_string()),
            message: "Overloaded".to_string(),
            retry_after_secs: None,
        };
        let wrapped = LlmError::bad_gateway(cause);

        assert_eq!(wrapped.to_string(), "Bad Gateway");
        assert_eq!(wrapped.status(), 502);
        let source = wrapped.source().unwrap();
        assert!(source.to_string().contains("Overloaded"));
        assert_eq!(wrapped.root_cause().status(), 529);
    }

    #[test]
    fn test_rate_limit_delay_defaults() {
        let err = LlmError::Internal("x".to_string());
        let classified = ClassifiedError::rate_limit(err.clone(), None);
        assert_eq!(classified.category, ErrorCategory::RateLimit);
        assert!(!classified.should_retry);
        assert_eq!(classified.suggested_delay_ms, Some(DEFAULT_RATE_LIMIT_DELAY_MS));

        let classified = ClassifiedError::rate_limit(err, Some(7));
        assert_eq!(classified.suggested_delay_ms, Some(7000));
    }

    #[test]
    fn test_huge_retry_after_saturates() {
        let err = LlmError::Api {
            provider: "openai".to_string(),
            status: 429,
            error_type: None,
            message: "slow down".to_string(),
            retry_after_secs: None,
        };
        let classified = ClassifiedError::rate_limit(err.clone(), Some(u64::MAX / 100));
        assert_eq!(classified.suggested_delay_ms, Some(u64::MAX));

        let classified = ClassifiedError::rate_limit(err, Some(u64::MAX));
        assert_eq!(classified.suggested_delay_ms, Some(u64::MAX));
    }

    #[test]
    fn test_unknown_is_optimistic() {
        let classified = ClassifiedError::unknown(LlmError::Parse("bad".to_string()));
        assert_eq!(classified.category, ErrorCategory::Unknown);
        assert!(classified.should_retry);
    }

    #[test]
    fn test_transport_timeout_status() {
        let err = LlmError::Transport {
            provider: "openai".to_string(),
            message: "timed out".to_string(),
            timeout: true,
        };
        assert_eq!(err.status(), 504);
    }
}
