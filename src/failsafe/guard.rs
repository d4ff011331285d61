//! Hot-path wrapper applying tuned settings to provider calls

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use tracing::debug;

use super::rate_limiter::RateLimiter;
use super::retry::{RetryPolicy, with_retry};
use crate::context::ReliabilityContext;
use crate::optimizer::AutoOptimizer;
use crate::outcomes::{CallOutcome, ErrorCategory};
use crate::{Error, Result};

/// Classify an adapter error for the outcome store
#[must_use]
pub fn categorize(error: &Error) -> ErrorCategory {
    match error {
        Error::ProviderTimeout { .. } => ErrorCategory::Timeout,
        Error::Io(_) => ErrorCategory::Network,
        Error::RateLimited(_) => ErrorCategory::RateLimited,
        Error::ProviderCall { retryable: true, .. } => ErrorCategory::ServerError,
        Error::ProviderCall { retryable: false, .. } => ErrorCategory::ClientError,
        _ => ErrorCategory::Unknown,
    }
}

/// Runs provider calls under breaker admission, rate limiting, per-attempt
/// timeouts and bounded retries, all taken from the optimizer's tuned config
///
/// Every attempt is reported back as a [`CallOutcome`], which is what feeds
/// the breakers, the optimizer and the predictor.
#[derive(Debug)]
pub struct ProviderGuard {
    ctx: Arc<ReliabilityContext>,
    optimizer: Arc<AutoOptimizer>,
    limiter: RateLimiter,
}

impl ProviderGuard {
    /// Create a guard over the shared context
    #[must_use]
    pub fn new(ctx: Arc<ReliabilityContext>, optimizer: Arc<AutoOptimizer>) -> Self {
        Self {
            ctx,
            optimizer,
            limiter: RateLimiter::new(),
        }
    }

    /// Call `provider` through `op`
    ///
    /// Unregistered providers are registered with their defaults on first use.
    ///
    /// # Errors
    ///
    /// - [`Error::CircuitOpen`] if the breaker rejects the call or opens
    ///   between attempts
    /// - [`Error::RateLimited`] if the provider's per-minute budget is spent
    /// - [`Error::ProviderTimeout`] if the last attempt timed out
    /// - the adapter's own error if the last attempt failed
    pub async fn call<F, Fut, T>(&self, provider: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let config = self
            .optimizer
            .get_optimized_config(provider)
            .unwrap_or_else(|| self.optimizer.register_provider(provider, None));

        if !self.ctx.breakers.can_call(provider) {
            debug!(provider, "Call rejected by open circuit");
            return Err(Error::CircuitOpen(provider.to_string()));
        }
        if !self.limiter.try_acquire(provider, config.rate_limit_per_minute) {
            debug!(provider, limit = config.rate_limit_per_minute, "Call rejected by rate limiter");
            return Err(Error::RateLimited(provider.to_string()));
        }

        let policy = RetryPolicy::with_max_retries(config.max_retries);
        let timeout = Duration::from_millis(config.timeout_ms);
        let ctx = &self.ctx;
        let attempts = &AtomicU32::new(0);

        with_retry(&policy, provider, || {
            // The first attempt was admitted above; retries must not slip
            // past a breaker that opened in between.
            let attempt = attempts.fetch_add(1, Ordering::Relaxed);
            let admitted = attempt == 0 || ctx.breakers.can_call(provider);
            let fut = if admitted { Some(op()) } else { None };

            async move {
                let Some(fut) = fut else {
                    return Err(Error::CircuitOpen(provider.to_string()));
                };
                let started = Instant::now();
                let result = tokio::time::timeout(timeout, fut).await;
                let latency_ms = started.elapsed().as_millis() as u64;

                match result {
                    Ok(Ok(value)) => {
                        ctx.record_outcome(&CallOutcome::success(provider, latency_ms));
                        Ok(value)
                    }
                    Ok(Err(e)) => {
                        ctx.record_outcome(&CallOutcome::failure(provider, latency_ms, categorize(&e)));
                        Err(e)
                    }
                    Err(_) => {
                        ctx.record_outcome(&CallOutcome::failure(provider, latency_ms, ErrorCategory::Timeout));
                        Err(Error::ProviderTimeout {
                            provider: provider.to_string(),
                            timeout_ms: config.timeout_ms,
                        })
                    }
                }
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::failsafe::CircuitState;
    use crate::optimizer::ProviderConfigUpdate;
    use chrono::Utc;

    fn guard() -> ProviderGuard {
        let ctx = Arc::new(ReliabilityContext::new(&Config::default()).unwrap());
        let optimizer = Arc::new(AutoOptimizer::new(Arc::clone(&ctx), &ctx.config().optimizer));
        ProviderGuard::new(ctx, optimizer)
    }

    fn fast_timeouts(guard: &ProviderGuard, provider: &str, timeout_ms: u64, max_retries: u32) {
        guard.optimizer.register_provider(provider, None);
        guard
            .optimizer
            .force_config(
                provider,
                &ProviderConfigUpdate {
                    timeout_ms: Some(timeout_ms),
                    max_retries: Some(max_retries),
                    ..ProviderConfigUpdate::default()
                },
            )
            .unwrap();
    }

    #[tokio::test]
    async fn successful_call_is_recorded() {
        let guard = guard();
        let receipt = guard.call("mpesa", || async { Ok("MPESA123") }).await.unwrap();

        assert_eq!(receipt, "MPESA123");
        let stats = guard
            .ctx
            .outcomes
            .stats_since("mpesa", Utc::now() - chrono::Duration::minutes(1));
        assert_eq!(stats.total, 1);
        assert!(guard.optimizer.get_optimized_config("mpesa").is_some());
    }

    #[tokio::test]
    async fn slow_attempts_time_out_and_are_retried() {
        // GIVEN: a 20ms timeout with one retry
        let guard = guard();
        fast_timeouts(&guard, "mtn_momo", 20, 1);
        let calls = &AtomicU32::new(0);

        // WHEN: the provider always hangs
        let result: Result<()> = guard
            .call("mtn_momo", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        // THEN: two attempts, both recorded as timeouts
        assert!(matches!(result, Err(Error::ProviderTimeout { timeout_ms: 20, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let stats = guard
            .ctx
            .outcomes
            .stats_since("mtn_momo", Utc::now() - chrono::Duration::minutes(1));
        assert_eq!(stats.errors_by_category[&ErrorCategory::Timeout], 2);
    }

    #[tokio::test]
    async fn open_circuit_rejects_without_calling() {
        let guard = guard();
        for _ in 0..5 {
            guard.ctx.record_outcome(&CallOutcome::failure("paystack", 10, ErrorCategory::ServerError));
        }
        assert_eq!(guard.ctx.breakers.get_state("paystack").state, CircuitState::Open);

        let calls = &AtomicU32::new(0);
        let result: Result<()> = guard
            .call("paystack", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(Error::CircuitOpen(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn retries_stop_once_the_breaker_opens() {
        // GIVEN: a generous retry budget and the default threshold of 5
        let guard = guard();
        fast_timeouts(&guard, "intasend", 1_000, 6);
        let calls = &AtomicU32::new(0);

        // WHEN: every attempt fails with a retryable error
        let result: Result<()> = guard
            .call("intasend", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::provider_call("intasend", "502 bad gateway", true))
            })
            .await;

        // THEN: the fifth failure opens the breaker and the sixth attempt is refused
        assert!(matches!(result, Err(Error::CircuitOpen(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn rate_limit_is_enforced_per_provider() {
        let guard = guard();
        guard.optimizer.register_provider("airtel_money", None);
        guard
            .optimizer
            .force_config(
                "airtel_money",
                &ProviderConfigUpdate {
                    rate_limit_per_minute: Some(1),
                    ..ProviderConfigUpdate::default()
                },
            )
            .unwrap();

        assert!(guard.call("airtel_money", || async { Ok(()) }).await.is_ok());
        assert!(matches!(
            guard.call("airtel_money", || async { Ok(()) }).await,
            Err(Error::RateLimited(_))
        ));
    }

    #[test]
    fn adapter_errors_are_categorized() {
        assert_eq!(
            categorize(&Error::provider_call("mpesa", "insufficient funds", false)),
            ErrorCategory::ClientError
        );
        assert_eq!(
            categorize(&Error::provider_call("mpesa", "503", true)),
            ErrorCategory::ServerError
        );
        assert_eq!(
            categorize(&Error::Io(std::io::Error::other("reset"))),
            ErrorCategory::Network
        );
    }
}
