//! Lifecycle hooks
//!
//! Each slot is optional. A present hook is awaited at its point in the loop;
//! a hook that returns an error aborts the loop with that error.

use futures_util::future::{BoxFuture, FutureExt};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

use crate::core_types::{StandardToolCall, UsageItem};
use crate::errors::{ErrorCategory, LlmError};

/// A single hook callback taking a context of type `C`.
pub struct Hook<C>(Arc<dyn Fn(C) -> BoxFuture<'static, Result<(), LlmError>> + Send + Sync>);

impl<C> Clone for Hook<C> {
    fn clone(&self) -> Self {
        Hook(self.0.clone())
    }
}

impl<C: Send + 'static> Hook<C> {
    pub fn new<F, Fut>(func: F) -> Self
    where
        F: Fn(C) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), LlmError>> + Send + 'static,
    {
        Hook(Arc::new(move |ctx| func(ctx).boxed()))
    }

    pub fn sync<F>(func: F) -> Self
    where
        F: Fn(C) -> Result<(), LlmError> + Send + Sync + 'static,
    {
        Hook(Arc::new(move |ctx| {
            let result = func(ctx);
            async move { result }.boxed()
        }))
    }

    pub async fn call(&self, ctx: C) -> Result<(), LlmError> {
        (self.0)(ctx).await
    }
}

#[derive(Debug, Clone)]
pub struct ModelRequestContext {
    pub turn: usize,
    pub provider: String,
    pub model: String,
    pub request: Value,
}

#[derive(Debug, Clone)]
pub struct ModelResponseContext {
    pub turn: usize,
    pub provider: String,
    pub model: String,
    pub response: Value,
    pub usage: UsageItem,
}

#[derive(Debug, Clone)]
pub struct ToolContext {
    pub call: StandardToolCall,
}

#[derive(Debug, Clone)]
pub struct ToolResultContext {
    pub call: StandardToolCall,
    pub result: Value,
}

#[derive(Debug, Clone)]
pub struct ToolErrorContext {
    pub call: StandardToolCall,
    pub error: LlmError,
}

#[derive(Debug, Clone)]
pub struct ModelErrorContext {
    pub context: String,
    pub error: LlmError,
    pub category: ErrorCategory,
    pub attempt: u32,
    /// Backoff about to be slept, for retryable errors.
    pub delay_ms: Option<u64>,
}

#[derive(Clone, Default)]
pub struct LlmHooks {
    pub before_each_model_request: Option<Hook<ModelRequestContext>>,
    pub after_each_model_response: Option<Hook<ModelResponseContext>>,
    pub before_each_tool: Option<Hook<ToolContext>>,
    pub after_each_tool: Option<Hook<ToolResultContext>>,
    pub on_tool_error: Option<Hook<ToolErrorContext>>,
    pub on_retryable_model_error: Option<Hook<ModelErrorContext>>,
    pub on_unrecoverable_model_error: Option<Hook<ModelErrorContext>>,
}

impl std::fmt::Debug for LlmHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmHooks")
            .field("before_each_model_request", &self.before_each_model_request.is_some())
            .field("after_each_model_response", &self.after_each_model_response.is_some())
            .field("before_each_tool", &self.before_each_tool.is_some())
            .field("after_each_tool", &self.after_each_tool.is_some())
            .field("on_tool_error", &self.on_tool_error.is_some())
            .field("on_retryable_model_error", &self.on_retryable_model_error.is_some())
            .field("on_unrecoverable_model_error", &self.on_unrecoverable_model_error.is_some())
            .finish()
    }
}

/// Invokes `hook` if present. The context is only built when there is a hook
/// to receive it.
pub async fn invoke_hook<C, F>(hook: Option<&Hook<C>>, make_context: F) -> Result<(), LlmError>
where
    C: Send + 'static,
    F: FnOnce() -> C,
{
    match hook {
        Some(hook) => hook.call(make_context()).await,
        None => Ok(()),
    }
}

/// Dispatches the seven lifecycle slots of an [`LlmHooks`].
#[derive(Debug, Clone, Default)]
pub struct HookRunner {
    hooks: LlmHooks,
}

impl HookRunner {
    pub fn new(hooks: LlmHooks) -> Self {
        Self { hooks }
    }

    pub async fn before_each_model_request(
        &self,
        make_context: impl FnOnce() -> ModelRequestContext,
    ) -> Result<(), LlmError> {
        invoke_hook(self.hooks.before_each_model_request.as_ref(), make_context).await
    }

    pub async fn after_each_model_response(
        &self,
        make_context: impl FnOnce() -> ModelResponseContext,
    ) -> Result<(), LlmError> {
        invoke_hook(self.hooks.after_each_model_response.as_ref(), make_context).await
    }

    pub async fn before_each_tool(&self, call: &StandardToolCall) -> Result<(), LlmError> {
        invoke_hook(self.hooks.before_each_tool.as_ref(), || ToolContext {
            call: call.clone(),
        })
        .await
    }

    pub async fn after_each_tool(
        &self,
        call: &StandardToolCall,
        result: &Value,
    ) -> Result<(), LlmError> {
        invoke_hook(self.hooks.after_each_tool.as_ref(), || ToolResultContext {
            call: call.clone(),
            result: result.clone(),
        })
        .await
    }

    pub async fn on_tool_error(
        &self,
        call: &StandardToolCall,
        error: &LlmError,
    ) -> Result<(), LlmError> {
        invoke_hook(self.hooks.on_tool_error.as_ref(), || ToolErrorContext {
            call: call.clone(),
            error: error.clone(),
        })
        .await
    }

    pub async fn on_retryable_model_error(
        &self,
        make_context: impl FnOnce() -> ModelErrorContext,
    ) -> Result<(), LlmError> {
        invoke_hook(self.hooks.on_retryable_model_error.as_ref(), make_context).await
    }

    pub async fn on_unrecoverable_model_error(
        &self,
        make_context: impl FnOnce() -> ModelErrorContext,
    ) -> Result<(), LlmError> {
        invoke_hook(self.hooks.on_unrecoverable_model_error.as_ref(), make_context).await
    }
}
