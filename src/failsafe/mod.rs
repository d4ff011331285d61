//! Failsafe mechanisms: circuit breakers, health checks, rate limiting,
//! retries, and the [`ProviderGuard`] that combines them on the call path

mod circuit_breaker;
mod guard;
mod health;
mod rate_limiter;
mod retry;

pub use circuit_breaker::{
    Admission, BreakerTransition, CircuitBreaker, CircuitBreakerRegistry, CircuitBreakerState, CircuitState,
};
pub use guard::{ProviderGuard, categorize};
pub use health::{
    CheckResult, FnCheck, HealthChange, HealthCheck, HealthMonitor, HealthSnapshot, HealthStatus, ProviderHealth,
};
pub use rate_limiter::RateLimiter;
pub use retry::{RetryPolicy, with_retry};
