#![deny(unused)]
//! Model gateway for the code interpreter.
//!
//! This crate provides:
//! - Rate-limit detection on upstream model errors
//! - Exponential backoff with jitter and a bounded retry budget
//! - A retrying wrapper for any `LlmClient`, including streamed calls

pub mod providers;
pub mod retry;

pub use providers::{MockLlmClient, RetryingLlmClient};
pub use retry::{
    is_rate_limited, RetryOutcome, RetryPolicy, RetryReport, RetryState, RetryableError,
    RetryingCaller, RATE_LIMIT_PATTERN,
};

use code_interpreter_core::config::RetryConfig;
use code_interpreter_core::traits::LlmClient;
use std::sync::Arc;

/// Wrap `client` with the retry policy from configuration.
pub fn with_retry(client: Arc<dyn LlmClient>, config: &RetryConfig) -> RetryingLlmClient {
    let policy = RetryPolicy::from(config);
    tracing::debug!(
        max_retries = policy.max_retries,
        min_wait_ms = policy.min_wait.as_millis() as u64,
        max_wait_ms = policy.max_wait.as_millis() as u64,
        "Wrapping LLM client with rate-limit retry"
    );
    RetryingLlmClient::new(client, policy)
}
