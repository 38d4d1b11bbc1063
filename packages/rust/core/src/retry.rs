//! Bounded exponential backoff around a single external call.

use std::future::Future;

use tracing::{debug, warn};

use vignette_shared::{Result, RetryPolicy, VignetteError};

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// policy's attempt ceiling is reached.
///
/// Each attempt is bounded by `policy.call_timeout`; a timeout counts as a
/// transport failure. `op` receives the 1-based attempt number. When every
/// attempt fails the last error is wrapped in [`VignetteError::Exhausted`].
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        let outcome = match tokio::time::timeout(policy.call_timeout, op(attempt)).await {
            Ok(result) => result,
            Err(_) => Err(VignetteError::transport(format!(
                "{label}: timed out after {}ms",
                policy.call_timeout.as_millis()
            ))),
        };

        match outcome {
            Ok(value) => {
                if attempt > 1 {
                    debug!(label, attempt, "call succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) if attempt >= max_attempts => {
                warn!(label, attempts = attempt, error = %e, "retries exhausted");
                return Err(VignetteError::Exhausted {
                    attempts: attempt,
                    last: Box::new(e),
                });
            }
            Err(e) => {
                let delay = policy.backoff(attempt);
                warn!(
                    label,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "call failed, backing off"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
