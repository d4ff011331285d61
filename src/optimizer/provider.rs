//! Tunable per-provider call settings

use serde::{Deserialize, Serialize};

/// Upper bound for `timeout_ms`
pub const MAX_TIMEOUT_MS: u64 = 60_000;
/// Upper bound for `max_retries`
pub const MAX_RETRIES: u32 = 6;
/// Upper bound for `cache_ttl_ms`
pub const MAX_CACHE_TTL_MS: u64 = 3_600_000;
/// `rate_limit_per_minute` may grow to this multiple of its baseline
pub const RATE_LIMIT_CEILING_FACTOR: u32 = 4;

/// Settings applied to every call to one provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Per-attempt timeout
    pub timeout_ms: u64,
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Calls admitted per minute
    pub rate_limit_per_minute: u32,
    /// How long cacheable provider responses are reused
    pub cache_ttl_ms: u64,
}

impl ProviderConfig {
    /// Known starting point for a provider id
    #[must_use]
    pub fn base_for(provider: &str) -> Self {
        let (timeout_ms, rate_limit_per_minute, cache_ttl_ms) = match provider {
            "mpesa" => (10_000, 100, 300_000),
            "paystack" => (8_000, 300, 60_000),
            "mtn_momo" | "airtel_money" => (15_000, 60, 120_000),
            "intasend" => (12_000, 120, 120_000),
            _ => (10_000, 100, 60_000),
        };
        Self {
            timeout_ms,
            max_retries: 3,
            rate_limit_per_minute,
            cache_ttl_ms,
        }
    }

    /// Overlay the set fields of `update`
    #[must_use]
    pub fn merged(self, update: &ProviderConfigUpdate) -> Self {
        Self {
            timeout_ms: update.timeout_ms.unwrap_or(self.timeout_ms),
            max_retries: update.max_retries.unwrap_or(self.max_retries),
            rate_limit_per_minute: update.rate_limit_per_minute.unwrap_or(self.rate_limit_per_minute),
            cache_ttl_ms: update.cache_ttl_ms.unwrap_or(self.cache_ttl_ms),
        }
    }

    /// Clamp every field to its ceiling; the rate limit is bounded relative
    /// to `baseline`
    #[must_use]
    pub fn clamped(self, baseline: &Self) -> Self {
        Self {
            timeout_ms: self.timeout_ms.clamp(1, MAX_TIMEOUT_MS),
            max_retries: self.max_retries.min(MAX_RETRIES),
            rate_limit_per_minute: self
                .rate_limit_per_minute
                .min(rate_limit_ceiling(baseline)),
            cache_ttl_ms: self.cache_ttl_ms.min(MAX_CACHE_TTL_MS),
        }
    }

    /// Fields that differ from `other`, as `(category, self, other)`
    pub(crate) fn diff(&self, other: &Self) -> Vec<(super::OptimizationCategory, u64, u64)> {
        use super::OptimizationCategory as C;
        [
            (C::Timeout, self.timeout_ms, other.timeout_ms),
            (C::Retry, u64::from(self.max_retries), u64::from(other.max_retries)),
            (
                C::RateLimit,
                u64::from(self.rate_limit_per_minute),
                u64::from(other.rate_limit_per_minute),
            ),
            (C::Cache, self.cache_ttl_ms, other.cache_ttl_ms),
        ]
        .into_iter()
        .filter(|(_, a, b)| a != b)
        .collect()
    }
}

/// Highest rate limit the optimizer may reach for a provider
#[must_use]
pub fn rate_limit_ceiling(baseline: &ProviderConfig) -> u32 {
    baseline
        .rate_limit_per_minute
        .saturating_mul(RATE_LIMIT_CEILING_FACTOR)
        .max(1)
}

/// Partial [`ProviderConfig`]; unset fields are left unchanged
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfigUpdate {
    /// New per-attempt timeout
    pub timeout_ms: Option<u64>,
    /// New retry budget
    pub max_retries: Option<u32>,
    /// New rate limit
    pub rate_limit_per_minute: Option<u32>,
    /// New cache TTL
    pub cache_ttl_ms: Option<u64>,
}

impl ProviderConfigUpdate {
    /// Whether no field is set
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
