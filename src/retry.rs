//! Exponential backoff for transient failures

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first one
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(4),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based), with up to 50% jitter
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay);
        let jitter = rand::thread_rng().gen_range(0.5..=1.0);
        exp.mul_f64(jitter)
    }
}

/// Errors that know whether another attempt could succeed
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for crate::llm::LlmError {
    fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl Retryable for crate::error::ChatError {
    fn is_retryable(&self) -> bool {
        crate::error::ChatError::is_retryable(self)
    }
}

/// Outcome of [`with_backoff`]
#[derive(Debug)]
pub enum Attempt<T, E> {
    Done(Result<T, E>),
    Cancelled,
}

/// Run `job` until it succeeds, fails permanently, runs out of retries, or
/// `cancel` fires.
pub async fn with_backoff<T, E, F, Fut>(
    policy: RetryPolicy,
    cancel: &CancellationToken,
    mut job: F,
) -> Attempt<T, E>
where
    E: Retryable + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => return Attempt::Cancelled,
            result = job() => result,
        };

        match result {
            Err(e) if e.is_retryable() && attempt < policy.max_retries => {
                let delay = policy.delay_for(attempt);
                attempt += 1;
                tracing::warn!(
                    attempt,
                    max_retries = policy.max_retries,
                    delay_ms = %delay.as_millis(),
                    error = %e,
                    "Retrying after transient failure"
                );
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return Attempt::Cancelled,
                    () = tokio::time::sleep(delay) => {}
                }
            }
            other => return Attempt::Done(other),
        }
    }
}
