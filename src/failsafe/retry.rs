//! Retry logic with exponential backoff

use std::future::Future;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use tracing::debug;

use crate::Error;

/// Retry policy derived from a provider's tuned config
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Initial backoff
    pub initial_backoff: Duration,
    /// Maximum backoff
    pub max_backoff: Duration,
    /// Backoff multiplier
    pub multiplier: f32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Default backoff shape with the given retry budget
    #[must_use]
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// Create an exponential backoff builder
    #[must_use]
    pub fn create_backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.initial_backoff)
            .with_max_delay(self.max_backoff)
            .with_factor(self.multiplier)
            .with_max_times(self.max_retries as usize)
            .with_jitter()
    }
}

/// Execute a future with retry logic
///
/// Only errors for which [`Error::is_retryable`] holds are retried.
///
/// # Errors
///
/// Returns the last error from `f` if all retry attempts are exhausted or
/// the error is not retryable.
pub async fn with_retry<F, Fut, T>(policy: &RetryPolicy, name: &str, f: F) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    if policy.max_retries == 0 {
        let mut f = f;
        return f().await;
    }

    f.retry(policy.create_backoff())
        .when(Error::is_retryable)
        .notify(|e: &Error, delay: Duration| {
            debug!(
                operation = name,
                delay_ms = delay.as_millis() as u64,
                error = %e,
                "Retrying after backoff"
            );
        })
        .await
}
