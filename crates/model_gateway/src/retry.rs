//! Rate-limit aware retry for upstream model calls.
//!
//! Only rate limiting is retried. It is recognised from the error message
//! alone: the message must *start* with `429` or `Too Many Requests`
//! (case-insensitive). Every other error propagates on the first attempt.

use futures::{Stream, StreamExt};
use rand::Rng;
use regex::Regex;
use std::future::Future;
use std::sync::OnceLock;
use std::time::Duration;

use code_interpreter_core::config::RetryConfig;
use code_interpreter_core::Error;

/// Anchored at the start of the message.
pub const RATE_LIMIT_PATTERN: &str = r"(?i)^(too many requests|429)";

/// Upper bound of the random jitter, as a fraction of the base wait.
pub const JITTER_FRACTION: f64 = 0.1;

fn rate_limit_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(RATE_LIMIT_PATTERN).expect("rate limit pattern is valid"))
}

/// Whether an error message signals upstream rate limiting.
pub fn is_rate_limited(message: &str) -> bool {
    rate_limit_regex().is_match(message)
}

// =============================================================================
// Retryable Errors
// =============================================================================

/// Errors the retrying caller can classify.
pub trait RetryableError: std::fmt::Display {
    /// Message text inspected by the rate-limit matcher.
    fn retry_message(&self) -> String {
        self.to_string()
    }
}

impl RetryableError for Error {
    fn retry_message(&self) -> String {
        self.message()
    }
}

impl RetryableError for anyhow::Error {}

impl RetryableError for String {}

// =============================================================================
// Policy
// =============================================================================

/// Retry limits and backoff bounds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub min_wait: Duration,
    pub max_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            min_wait: Duration::from_secs(1),
            max_wait: Duration::from_secs(60),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        let defaults = Self::default();
        let secs = |value: f64, fallback: Duration| {
            Duration::try_from_secs_f64(value).unwrap_or(fallback)
        };
        Self {
            max_retries: config.max_retries,
            min_wait: secs(config.min_wait_secs, defaults.min_wait),
            max_wait: secs(config.max_wait_secs, defaults.max_wait),
        }
    }
}

impl RetryPolicy {
    /// Base wait before retry number `attempt` (1-based), without jitter:
    /// `min(min_wait * 2^(attempt-1), max_wait)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.min_wait
            .saturating_mul(1u32 << exponent)
            .min(self.max_wait)
    }

    /// Base wait plus uniform jitter in `[0, 10%]` of it.
    pub fn jittered_backoff(&self, attempt: u32) -> Duration {
        let base = self.backoff(attempt);
        let jitter = rand::thread_rng().gen_range(0.0..=JITTER_FRACTION);
        base + base.mul_f64(jitter)
    }
}

// =============================================================================
// State Machine
// =============================================================================

/// Where a retrying call currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    Idle,
    Calling { attempt: u32 },
    Waiting { attempt: u32, delay: Duration },
}

/// How a retrying call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    Succeeded,
    Failed,
}

/// Summary of one retrying call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryReport {
    pub outcome: RetryOutcome,
    /// Number of times the operation was invoked.
    pub attempts: u32,
    /// Time spent sleeping between attempts.
    pub total_wait: Duration,
}

/// Wraps an async operation and retries it on rate limiting.
#[derive(Debug, Clone, Default)]
pub struct RetryingCaller {
    policy: RetryPolicy,
}

impl RetryingCaller {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `op`, retrying on rate limiting. After `max_retries` retries the
    /// last error is returned unchanged.
    pub async fn call<T, E, F, Fut>(&self, op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RetryableError,
    {
        self.call_with_report(op).await.0
    }

    /// Like [`call`](Self::call), also reporting attempts and total wait.
    pub async fn call_with_report<T, E, F, Fut>(&self, mut op: F) -> (Result<T, E>, RetryReport)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RetryableError,
    {
        let mut state = RetryState::Idle;
        let mut total_wait = Duration::ZERO;

        loop {
            state = match state {
                RetryState::Idle => RetryState::Calling { attempt: 1 },
                RetryState::Calling { attempt } => match op().await {
                    Ok(value) => {
                        if attempt > 1 {
                            tracing::info!(attempts = attempt, "Call succeeded after retry");
                        }
                        let report = RetryReport {
                            outcome: RetryOutcome::Succeeded,
                            attempts: attempt,
                            total_wait,
                        };
                        return (Ok(value), report);
                    }
                    Err(e) => match self.next_after_error(&e, attempt) {
                        Some(waiting) => waiting,
                        None => {
                            let report = RetryReport {
                                outcome: RetryOutcome::Failed,
                                attempts: attempt,
                                total_wait,
                            };
                            return (Err(e), report);
                        }
                    },
                },
                RetryState::Waiting { attempt, delay } => {
                    tokio::time::sleep(delay).await;
                    total_wait += delay;
                    RetryState::Calling {
                        attempt: attempt + 1,
                    }
                }
            };
        }
    }

    /// Run a streamed operation, forwarding each chunk to `sink`.
    ///
    /// Rate limiting is retried only while nothing has been forwarded yet.
    /// Once a chunk reached the sink any error propagates, so the consumer
    /// never sees output replayed. Returns the number of chunks forwarded.
    pub async fn call_stream<T, E, F, S, K>(&self, mut open: F, mut sink: K) -> Result<usize, E>
    where
        F: FnMut() -> S,
        S: Stream<Item = Result<T, E>>,
        K: FnMut(T),
        E: RetryableError,
    {
        let mut attempt = 1;
        loop {
            let stream = open();
            futures::pin_mut!(stream);

            let mut forwarded = 0usize;
            let mut failure = None;
            while let Some(item) = stream.next().await {
                match item {
                    Ok(chunk) => {
                        sink(chunk);
                        forwarded += 1;
                    }
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                }
            }

            let Some(e) = failure else {
                return Ok(forwarded);
            };
            if forwarded > 0 {
                tracing::warn!(
                    attempt,
                    forwarded,
                    error = %e,
                    "Stream failed after output was forwarded; not retrying"
                );
                return Err(e);
            }
            match self.next_after_error(&e, attempt) {
                Some(RetryState::Waiting { delay, .. }) => {
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                _ => return Err(e),
            }
        }
    }

    /// Decide whether a failed attempt is followed by a wait.
    fn next_after_error<E: RetryableError>(&self, error: &E, attempt: u32) -> Option<RetryState> {
        if !is_rate_limited(&error.retry_message()) {
            return None;
        }
        if attempt > self.policy.max_retries {
            tracing::warn!(
                attempts = attempt,
                max_retries = self.policy.max_retries,
                error = %error,
                "Rate limited and out of retries"
            );
            return None;
        }

        let delay = self.policy.jittered_backoff(attempt);
        tracing::warn!(
            attempt,
            max_retries = self.policy.max_retries,
            wait_ms = delay.as_millis() as u64,
            error = %error,
            "Rate limited, retrying"
        );
        Some(RetryState::Waiting { attempt, delay })
    }
}
