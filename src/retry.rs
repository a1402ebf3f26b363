//! Retry with exponential backoff for provider calls.

use std::future::Future;
use std::time::Duration;

use crate::classify::{classify, FailureClass, TransportFailure};
use crate::Error;

/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Backoff schedule for rate-limited provider calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubled for every retry after it.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_secs(1),
        }
    }
}

/// Bookkeeping for one `run_with_retry` invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetryState {
    pub attempts: u32,
    pub last_class: Option<FailureClass>,
    pub elapsed: Duration,
}

/// The outcome of one attempt.
#[derive(Debug)]
pub enum Attempt<T> {
    Success(T),
    Retryable(TransportFailure),
    Fatal(Error),
}

impl<T> Attempt<T> {
    /// Fold an operation result into an attempt outcome, classifying transport failures.
    pub fn from_result(provider: &str, result: Result<T, Error>) -> Self {
        let failure = match result {
            Ok(value) => return Attempt::Success(value),
            Err(Error::Transport { failure, .. }) => failure,
            Err(Error::Http(e)) => TransportFailure::from(&e),
            Err(other) => return Attempt::Fatal(other),
        };

        let class = classify(&failure);
        if class.is_retryable() {
            Attempt::Retryable(failure)
        } else {
            Attempt::Fatal(Error::Rejected {
                provider: provider.to_string(),
                class,
                message: failure.message,
            })
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Delay before retry number `retry` (zero-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(retry))
    }

    /// Run `operation`, retrying rate-limited failures with exponential backoff.
    ///
    /// Only wrap the call that produces the first byte of a reply: once the
    /// caller has observed output, a retry would duplicate it.
    pub async fn run_with_retry<T, F, Fut>(&self, provider: &str, operation: F) -> Result<T, Error>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        self.run_with_state(provider, operation)
            .await
            .map(|(value, _)| value)
    }

    /// Like [`run_with_retry`](Self::run_with_retry) but also reports the final retry state.
    pub async fn run_with_state<T, F, Fut>(
        &self,
        provider: &str,
        mut operation: F,
    ) -> Result<(T, RetryState), Error>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        let mut state = RetryState::default();

        loop {
            state.attempts += 1;

            let failure = match Attempt::from_result(provider, operation().await) {
                Attempt::Success(value) => return Ok((value, state)),
                Attempt::Fatal(error) => {
                    tracing::error!(provider, attempt = state.attempts, error = %error, "provider call failed");
                    return Err(error);
                }
                Attempt::Retryable(failure) => failure,
            };

            let class = classify(&failure);
            state.last_class = Some(class);

            let retries_spent = state.attempts - 1;
            if retries_spent >= self.max_retries {
                tracing::error!(
                    provider,
                    attempts = state.attempts,
                    "giving up after repeated rate limiting"
                );
                return Err(Error::RetriesExhausted {
                    provider: provider.to_string(),
                    attempts: state.attempts,
                    last_class: class,
                    message: failure.message,
                });
            }

            let delay = self.delay_for(retries_spent);
            tracing::warn!(
                provider,
                attempt = state.attempts,
                delay_ms = delay.as_millis() as u64,
                "rate limited, backing off"
            );
            tokio::time::sleep(delay).await;
            state.elapsed += delay;
        }
    }
}
