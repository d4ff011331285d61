//! Per-provider rate limiting
//!
//! Each provider gets its own `governor` limiter sized from the tuned
//! `rate_limit_per_minute`. When the optimizer changes the limit the
//! limiter is rebuilt lazily on the next acquire.

use std::num::NonZeroU32;

use dashmap::DashMap;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter as GovernorLimiter};
use tracing::debug;

struct ProviderLimiter {
    per_minute: u32,
    limiter: DefaultDirectRateLimiter,
}

impl ProviderLimiter {
    fn new(per_minute: u32) -> Self {
        let quota = Quota::per_minute(NonZeroU32::new(per_minute).unwrap_or(NonZeroU32::MIN));
        Self {
            per_minute,
            limiter: GovernorLimiter::direct(quota),
        }
    }
}

/// Rate limiter for provider calls
#[derive(Default)]
pub struct RateLimiter {
    limiters: DashMap<String, ProviderLimiter>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("providers", &self.limiters.len())
            .finish()
    }
}

impl RateLimiter {
    /// Create a limiter with no providers
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to acquire a permit for `provider` under `per_minute` calls/minute
    ///
    /// A limit of zero disables limiting for the provider.
    pub fn try_acquire(&self, provider: &str, per_minute: u32) -> bool {
        if per_minute == 0 {
            return true;
        }

        let mut entry = self
            .limiters
            .entry(provider.to_string())
            .or_insert_with(|| ProviderLimiter::new(per_minute));

        if entry.per_minute != per_minute {
            debug!(provider, from = entry.per_minute, to = per_minute, "Rebuilding rate limiter");
            *entry = ProviderLimiter::new(per_minute);
        }

        entry.limiter.check().is_ok()
    }
}
