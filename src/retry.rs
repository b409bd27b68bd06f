//! Retry logic with exponential backoff
//!
//! Used by the orchestrators for transient failures during job and export
//! submission. Status polls and artifact downloads are never retried — a
//! failed poll attempt surfaces immediately (see the error-handling policy
//! in [`crate::error`]).

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::config::RetryConfig;
use crate::error::{Error, Result, TransportError};

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (network timeouts, connection resets, 5xx/429 from the
/// service) should return `true`. Permanent failures (4xx, malformed
/// responses, cancellation) should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Transport(t) => t.is_retryable(),
            // Everything else is permanent or caller-driven.
            _ => false,
        }
    }
}

impl IsRetryable for TransportError {
    fn is_retryable(&self) -> bool {
        match self {
            TransportError::Network(e) => e.is_timeout() || e.is_connect(),
            // 429 and 5xx are worth another attempt; other statuses are not.
            TransportError::Status { code, .. } => *code == 429 || *code >= 500,
            TransportError::BuildClient(_)
            | TransportError::InvalidUrl { .. }
            | TransportError::MalformedResponse { .. }
            | TransportError::Push(_) => false,
        }
    }
}

/// Execute an async operation with exponential backoff retry logic
///
/// Retries only while the error reports itself as retryable and attempts
/// remain; returns the last error otherwise. Backoff sleeps are raced
/// against `cancel`, so a triggered token resolves the call with
/// [`Error::Cancelled`] without waiting out the delay.
pub async fn with_retry<F, Fut, T>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    let mut delay = config.initial_delay;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(attempts = attempt + 1, "operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && attempt < config.max_attempts => {
                attempt += 1;

                tracing::warn!(
                    error = %e,
                    attempt = attempt,
                    max_attempts = config.max_attempts,
                    delay_ms = delay.as_millis(),
                    "operation failed, retrying"
                );

                let jittered_delay = if config.jitter { add_jitter(delay) } else { delay };
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(Error::Cancelled),
                    _ = tokio::time::sleep(jittered_delay) => {}
                }

                let next_delay =
                    Duration::from_secs_f64(delay.as_secs_f64() * config.backoff_multiplier);
                delay = next_delay.min(config.max_delay);
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!(
                        error = %e,
                        attempts = attempt + 1,
                        "operation failed after all retry attempts exhausted"
                    );
                } else {
                    tracing::error!(error = %e, "operation failed with non-retryable error");
                }
                return Err(e);
            }
        }
    }
}

/// Add random jitter to a delay to prevent thundering herd
///
/// Jitter is uniformly distributed between 0% and 100% of the delay, so the
/// actual delay lies between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
}
