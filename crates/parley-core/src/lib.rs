//! Provider-agnostic multi-turn LLM orchestration.
//!
//! This crate drives chat-style model APIs through tool-calling cycles and
//! structured-output extraction, with retry/backoff, lifecycle hooks, and a
//! provider fallback chain. Sessions are delivered either buffered or as a
//! stream of chunks.
//!
//! # Architecture Overview
//!
//! - **Provider adapters**: per-vendor translation of requests, responses,
//!   tool calls, and errors (Anthropic, OpenAI, Gemini, OpenRouter)
//! - **Toolkit**: registry and dispatcher for caller-supplied tools
//! - **Retry**: backoff policy plus an executor parameterised by the
//!   adapter's error classifier
//! - **Hooks**: optional async callbacks around model requests and tool calls
//! - **Loops**: buffered and streaming drivers sharing one state machine
//! - **Llm facade**: provider/model resolution and fallback
//! - **Configuration**: YAML documents with environment-resolved credentials

pub mod config;
pub mod core_types;
pub mod errors;
pub mod llm;
pub mod operate;
pub mod tools;

pub use config::{ConfigLoader, FallbackEntry, ParleyConfig};
pub use core_types::{
    History, HistoryItem, LlmOperateResponse, LlmStreamChunk, ResponseContent, ResponseStatus,
    Role, UsageItem,
};
pub use errors::{ClassifiedError, ErrorCategory, LlmError};
pub use llm::{FallbackOption, Llm, OperateOptions, ProviderKind};
pub use operate::{Hook, LlmHooks, OperateInput, Turns};
pub use tools::{FnTool, Tool, Toolkit};

#[cfg(test)]
pub mod test_utils;
