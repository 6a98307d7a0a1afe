//! LLM client wrappers.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use code_interpreter_core::{
    traits::{ChatMessage, LlmClient, LlmResponse, LlmUsage},
    Error, Result,
};

use crate::retry::{RetryPolicy, RetryingCaller};

/// A wrapper client that retries rate-limited calls with backoff.
pub struct RetryingLlmClient {
    inner: Arc<dyn LlmClient>,
    caller: RetryingCaller,
}

impl RetryingLlmClient {
    pub fn new(inner: Arc<dyn LlmClient>, policy: RetryPolicy) -> Self {
        Self {
            inner,
            caller: RetryingCaller::new(policy),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        self.caller.policy()
    }
}

#[async_trait]
impl LlmClient for RetryingLlmClient {
    async fn complete(&self, prompt: &str) -> Result<LlmResponse> {
        self.caller.call(|| self.inner.complete(prompt)).await
    }

    async fn chat(&self, messages: &[ChatMessage]) -> Result<LlmResponse> {
        self.caller.call(|| self.inner.chat(messages)).await
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.caller.call(|| self.inner.embed(text)).await
    }
}

// =============================================================================
// Mock LLM Client for Testing
// =============================================================================

/// Mock LLM client for testing without real API calls.
pub struct MockLlmClient {
    /// Response to return.
    response: String,
    /// Error message returned by the first `failures` calls.
    failure: Option<String>,
    failures: usize,
    calls: AtomicUsize,
}

impl MockLlmClient {
    /// Create a new mock client.
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            failure: None,
            failures: 0,
            calls: AtomicUsize::new(0),
        }
    }

    /// Create a mock client that always fails with `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self::new("").failing_first(usize::MAX, message)
    }

    /// Fail the first `count` calls with `message`, then respond normally.
    pub fn failing_first(mut self, count: usize, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self.failures = count;
        self
    }

    /// Calls received so far, across all methods.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<()> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.failure {
            Some(message) if n < self.failures => Err(Error::model_provider(message.clone())),
            _ => Ok(()),
        }
    }

    fn respond(&self, input: &str) -> LlmResponse {
        LlmResponse {
            content: format!("{}: {}", self.response, input),
            finish_reason: "stop".to_string(),
            usage: LlmUsage {
                prompt_tokens: input.len() as u64 / 4,
                completion_tokens: self.response.len() as u64 / 4,
                total_tokens: (input.len() + self.response.len()) as u64 / 4,
            },
        }
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, prompt: &str) -> Result<LlmResponse> {
        self.check()?;
        Ok(self.respond(prompt))
    }

    async fn chat(&self, messages: &[ChatMessage]) -> Result<LlmResponse> {
        self.check()?;
        let last_message = messages.last().map(|m| m.content.as_str()).unwrap_or("");
        Ok(self.respond(last_message))
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.check()?;
        let hash = text.bytes().fold(0u64, |acc, b| acc.wrapping_add(b as u64));
        Ok((0..128)
            .map(|i| (hash.wrapping_add(i as u64) % 1000) as f32 / 1000.0)
            .collect())
    }
}
