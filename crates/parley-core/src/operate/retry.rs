//! Exponential backoff for model requests

use log::warn;
use std::future::Future;
use std::time::Duration;

use super::hooks::{HookRunner, ModelErrorContext};
use crate::errors::{ClassifiedError, LlmError};

/// Hard upper bound on `max_retries`, whatever the configuration says.
pub const MAX_RETRIES_CEILING: u32 = 72;

pub const DEFAULT_INITIAL_DELAY_MS: u64 = 1000;
pub const DEFAULT_MAX_DELAY_MS: u64 = 32_000;
pub const DEFAULT_BACKOFF_FACTOR: f64 = 2.0;
pub const DEFAULT_MAX_RETRIES: u32 = 6;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    initial_delay_ms: u64,
    max_delay_ms: u64,
    backoff_factor: f64,
    max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_INITIAL_DELAY_MS,
            DEFAULT_MAX_DELAY_MS,
            DEFAULT_BACKOFF_FACTOR,
            DEFAULT_MAX_RETRIES,
        )
    }
}

impl RetryPolicy {
    pub fn new(initial_delay_ms: u64, max_delay_ms: u64, backoff_factor: f64, max_retries: u32) -> Self {
        Self {
            initial_delay_ms,
            max_delay_ms,
            backoff_factor,
            max_retries: max_retries.min(MAX_RETRIES_CEILING),
        }
    }

    /// A policy that gives up after the first failure.
    pub fn no_retry() -> Self {
        Self::new(0, 0, 1.0, 0)
    }

    pub fn initial_delay_ms(&self) -> u64 {
        self.initial_delay_ms
    }

    pub fn max_delay_ms(&self) -> u64 {
        self.max_delay_ms
    }

    pub fn backoff_factor(&self) -> f64 {
        self.backoff_factor
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// `min(initial * factor^attempt, max)` in milliseconds.
    pub fn delay_for_attempt(&self, attempt: u32) -> u64 {
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let delay = self.initial_delay_ms as f64 * self.backoff_factor.powi(exponent);
        if !delay.is_finite() || delay >= self.max_delay_ms as f64 {
            self.max_delay_ms
        } else {
            delay as u64
        }
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}

/// Runs an operation until it succeeds, is classified as not worth retrying,
/// or exhausts the policy. Terminal failures are reported as
/// [`LlmError::BadGateway`] carrying the last error as its cause.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn execute<T, F, Fut, C>(
        &self,
        mut operation: F,
        classify: C,
        context: &str,
        hooks: &HookRunner,
    ) -> Result<T, LlmError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LlmError>>,
        C: Fn(&LlmError) -> ClassifiedError,
    {
        let mut attempt: u32 = 0;

        loop {
            let error = match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            let classified = classify(&error);

            if !classified.should_retry || !self.policy.should_retry(attempt) {
                warn!(
                    "{}: giving up after {} attempt(s) ({:?}): {}",
                    context,
                    attempt + 1,
                    classified.category,
                    classified.error
                );
                hooks
                    .on_unrecoverable_model_error(|| ModelErrorContext {
                        context: context.to_string(),
                        error: classified.error.clone(),
                        category: classified.category,
                        attempt,
                        delay_ms: classified.suggested_delay_ms,
                    })
                    .await?;
                return Err(LlmError::bad_gateway(classified.error));
            }

            let delay_ms = self.policy.delay_for_attempt(attempt);
            warn!(
                "{}: attempt {} failed ({:?}), retrying in {}ms: {}",
                context,
                attempt + 1,
                classified.category,
                delay_ms,
                classified.error
            );
            hooks
                .on_retryable_model_error(|| ModelErrorContext {
                    context: context.to_string(),
                    error: classified.error.clone(),
                    category: classified.category,
                    attempt,
                    delay_ms: Some(delay_ms),
                })
                .await?;

            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            attempt += 1;
        }
    }
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}
