//! Bounded retry with linear backoff around a single chunk send.

use std::future::Future;
use std::time::Duration;

use chunkup_client::ClientError;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// How often and how patiently a chunk is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Wait after failed attempt `attempt` (1-based): `base_delay * attempt`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

/// The last error of a send that did not succeed.
#[derive(Debug, thiserror::Error)]
#[error("gave up after {attempts} attempt(s): {source}")]
pub struct RetryError {
    pub attempts: u32,
    #[source]
    pub source: ClientError,
}

/// Runs `attempt_fn` until it succeeds or the policy gives up.
///
/// `Cancelled` and `Unauthorized` outcomes are returned immediately. A
/// cancellation during the backoff wait ends the loop with `Cancelled`.
/// `on_retry(next_attempt, delay, &error)` fires before each wait.
pub async fn send_with_retry<T, F, Fut, R>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut attempt_fn: F,
    mut on_retry: R,
) -> Result<T, RetryError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ClientError>>,
    R: FnMut(u32, Duration, &ClientError),
{
    let mut attempt = 1;
    loop {
        let error = match attempt_fn(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if error.is_cancelled() || error.is_unauthorized() || attempt >= policy.max_attempts {
            return Err(RetryError {
                attempts: attempt,
                source: error,
            });
        }

        let delay = policy.delay_for_attempt(attempt);
        warn!(
            attempt,
            max = policy.max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "chunk send failed, retrying"
        );
        on_retry(attempt + 1, delay, &error);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(RetryError {
                    attempts: attempt,
                    source: ClientError::Cancelled,
                });
            }
            _ = tokio::time::sleep(delay) => {}
        }
        attempt += 1;
    }
}
