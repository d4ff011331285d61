//! Per-provider circuit breakers
//!
//! One breaker per provider id, created lazily the first time an outcome is
//! recorded for it. Breakers are never removed, only reset.
//!
//! Transitions:
//!
//! ```text
//! closed    --failures >= threshold-->  open
//! open      --cooldown elapsed------->  half_open   (single trial call admitted)
//! half_open --success---------------->  closed
//! half_open --failure---------------->  open        (cooldown backs off, capped)
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::CircuitBreakerConfig;
use crate::events::EventBus;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Circuit is closed (allowing requests)
    Closed,
    /// Circuit is open (blocking requests)
    Open,
    /// Circuit is half-open (allowing a single trial request)
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Snapshot of one provider's breaker
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitBreakerState {
    /// Provider id
    pub provider: String,
    /// Current state
    pub state: CircuitState,
    /// Failures since the last success
    pub consecutive_failures: u32,
    /// Most recent failure
    pub last_failure_time: Option<DateTime<Utc>>,
    /// When an open breaker admits its trial call
    pub next_retry_time: Option<DateTime<Utc>>,
    /// Cooldown that applies to the current (or next) open period
    pub current_cooldown_ms: u64,
    /// A half-open trial call has been admitted and not yet reported
    pub trial_in_flight: bool,
    /// How many times the breaker has opened
    pub opened_count: u64,
}

impl CircuitBreakerState {
    /// Human-readable status line
    #[must_use]
    pub fn status_message(&self) -> String {
        match self.state {
            CircuitState::Closed => format!("Provider '{}' circuit breaker is closed", self.provider),
            CircuitState::HalfOpen => format!(
                "Provider '{}' circuit breaker is half-open, probing recovery",
                self.provider
            ),
            CircuitState::Open => {
                let remaining = self
                    .next_retry_time
                    .map_or(0, |t| (t - Utc::now()).num_seconds().max(0));
                format!(
                    "Provider '{}' circuit breaker is open after {} failures, retry in {} seconds",
                    self.provider, self.consecutive_failures, remaining
                )
            }
        }
    }
}

/// A state change published on the registry's event bus
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerTransition {
    /// Provider id
    pub provider: String,
    /// State before the change
    pub from: CircuitState,
    /// State after the change
    pub to: CircuitState,
    /// Failures at the time of the change
    pub consecutive_failures: u32,
    /// When the change happened
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct BreakerRecord {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure_time: Option<DateTime<Utc>>,
    next_retry_time: Option<DateTime<Utc>>,
    cooldown: Duration,
    trial_started_at: Option<DateTime<Utc>>,
    opened_count: u64,
    /// Bumped on every mutation; used for compare-and-set
    generation: u64,
}

impl BreakerRecord {
    fn new(cooldown: Duration) -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure_time: None,
            next_retry_time: None,
            cooldown,
            trial_started_at: None,
            opened_count: 0,
            generation: 0,
        }
    }
}

/// Result of asking a breaker for permission to call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Breaker closed or disabled
    Allowed,
    /// Breaker open, or a trial call is already in flight
    Rejected,
    /// The caller holds the single half-open trial
    Trial {
        /// The breaker moved from open to half-open for this call
        transitioned: bool,
    },
}

impl Admission {
    /// Whether the call may proceed
    #[must_use]
    pub fn is_allowed(self) -> bool {
        !matches!(self, Self::Rejected)
    }
}

/// Circuit breaker for a single provider
#[derive(Debug)]
pub struct CircuitBreaker {
    provider: String,
    config: Arc<CircuitBreakerConfig>,
    record: RwLock<BreakerRecord>,
}

impl CircuitBreaker {
    /// Create a closed breaker
    #[must_use]
    pub fn new(provider: &str, config: Arc<CircuitBreakerConfig>) -> Self {
        let cooldown = config.reset_timeout;
        Self {
            provider: provider.to_string(),
            config,
            record: RwLock::new(BreakerRecord::new(cooldown)),
        }
    }

    /// Check if a call may proceed
    ///
    /// While open and before `next_retry_time` this only takes a read lock.
    /// Once the cooldown has elapsed the first caller wins the half-open trial
    /// via compare-and-set; concurrent callers are rejected.
    #[tracing::instrument(skip(self), fields(provider = %self.provider))]
    pub fn can_call(&self) -> Admission {
        if !self.config.enabled {
            return Admission::Allowed;
        }

        loop {
            let now = Utc::now();
            let (state, next_retry, trial_started, generation) = {
                let record = self.record.read();
                (
                    record.state,
                    record.next_retry_time,
                    record.trial_started_at,
                    record.generation,
                )
            };

            match state {
                CircuitState::Closed => {
                    tracing::trace!("Circuit closed, allowing request");
                    return Admission::Allowed;
                }
                CircuitState::Open => {
                    if next_retry.is_some_and(|t| now < t) {
                        tracing::trace!("Circuit open, rejecting request");
                        return Admission::Rejected;
                    }
                    if self.compare_and_set(generation, |r| {
                        r.state = CircuitState::HalfOpen;
                        r.trial_started_at = Some(now);
                    }) {
                        debug!(provider = %self.provider, "Cooldown elapsed, admitting trial call");
                        return Admission::Trial { transitioned: true };
                    }
                }
                CircuitState::HalfOpen => {
                    // A trial that never reported back is abandoned after one cooldown
                    let stale = trial_started.is_none_or(|started| {
                        now - started >= to_chrono(self.record.read().cooldown)
                    });
                    if !stale {
                        tracing::trace!("Trial call already in flight, rejecting request");
                        return Admission::Rejected;
                    }
                    if self.compare_and_set(generation, |r| r.trial_started_at = Some(now)) {
                        debug!(provider = %self.provider, "Re-admitting abandoned trial call");
                        return Admission::Trial { transitioned: false };
                    }
                }
            }
        }
    }

    /// Record the outcome of a call, returning the transition it caused
    #[tracing::instrument(skip(self), fields(provider = %self.provider))]
    pub fn record_outcome(&self, success: bool) -> Option<BreakerTransition> {
        if !self.config.enabled {
            return None;
        }

        let now = Utc::now();
        let mut record = self.record.write();
        let from = record.state;
        record.generation += 1;

        if success {
            match from {
                CircuitState::Closed => {
                    record.consecutive_failures = 0;
                }
                CircuitState::HalfOpen => {
                    record.state = CircuitState::Closed;
                    record.consecutive_failures = 0;
                    record.next_retry_time = None;
                    record.trial_started_at = None;
                    record.cooldown = self.config.reset_timeout;
                }
                CircuitState::Open => {
                    tracing::trace!("Success recorded in open state (ignored)");
                }
            }
        } else {
            record.consecutive_failures = record.consecutive_failures.saturating_add(1);
            record.last_failure_time = Some(now);
            match from {
                CircuitState::Closed => {
                    if record.consecutive_failures >= self.config.failure_threshold {
                        record.cooldown = self.config.reset_timeout;
                        Self::open(&mut record, now);
                    }
                }
                CircuitState::HalfOpen => {
                    let backed_off = record.cooldown.mul_f64(self.config.backoff_multiplier.max(1.0));
                    record.cooldown = backed_off.min(self.config.max_cooldown);
                    Self::open(&mut record, now);
                }
                CircuitState::Open => {
                    tracing::trace!("Failure recorded in open state (ignored)");
                }
            }
        }

        let to = record.state;
        if from == to {
            return None;
        }

        let transition = BreakerTransition {
            provider: self.provider.clone(),
            from,
            to,
            consecutive_failures: record.consecutive_failures,
            at: now,
        };
        drop(record);

        match to {
            CircuitState::Open => warn!(
                provider = %self.provider,
                failures = transition.consecutive_failures,
                "Circuit breaker opened"
            ),
            CircuitState::Closed => info!(provider = %self.provider, "Circuit breaker closed"),
            CircuitState::HalfOpen => debug!(provider = %self.provider, "Circuit breaker half-open"),
        }
        Some(transition)
    }

    /// Snapshot of the breaker
    #[must_use]
    pub fn snapshot(&self) -> CircuitBreakerState {
        let record = self.record.read();
        CircuitBreakerState {
            provider: self.provider.clone(),
            state: record.state,
            consecutive_failures: record.consecutive_failures,
            last_failure_time: record.last_failure_time,
            next_retry_time: record.next_retry_time,
            current_cooldown_ms: record.cooldown.as_millis() as u64,
            trial_in_flight: record.state == CircuitState::HalfOpen
                && record.trial_started_at.is_some(),
            opened_count: record.opened_count,
        }
    }

    /// Return to a fresh closed state
    pub fn reset(&self) {
        let mut record = self.record.write();
        let generation = record.generation + 1;
        let opened_count = record.opened_count;
        *record = BreakerRecord::new(self.config.reset_timeout);
        record.generation = generation;
        record.opened_count = opened_count;
        info!(provider = %self.provider, "Circuit breaker reset");
    }

    fn open(record: &mut BreakerRecord, now: DateTime<Utc>) {
        record.state = CircuitState::Open;
        record.next_retry_time = Some(now + to_chrono(record.cooldown));
        record.trial_started_at = None;
        record.opened_count += 1;
    }

    /// Apply `mutate` only if nobody changed the record since `expected` was read
    fn compare_and_set(&self, expected: u64, mutate: impl FnOnce(&mut BreakerRecord)) -> bool {
        let mut record = self.record.write();
        if record.generation != expected {
            return false;
        }
        mutate(&mut record);
        record.generation += 1;
        true
    }
}

fn to_chrono(duration: Duration) -> ChronoDuration {
    ChronoDuration::from_std(duration).unwrap_or_else(|_| ChronoDuration::days(365))
}

/// Registry of per-provider breakers sharing one configuration
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    config: Arc<CircuitBreakerConfig>,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    events: EventBus<BreakerTransition>,
}

impl CircuitBreakerRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new(config: &CircuitBreakerConfig, event_capacity: usize) -> Self {
        Self {
            config: Arc::new(config.clone()),
            breakers: DashMap::new(),
            events: EventBus::new("circuit_breaker", event_capacity),
        }
    }

    /// Whether a call to `provider` may proceed
    ///
    /// Unknown providers are closed and admitted without creating a record.
    pub fn can_call(&self, provider: &str) -> bool {
        let Some(breaker) = self.breakers.get(provider).map(|b| Arc::clone(&b)) else {
            return true;
        };
        let admission = breaker.can_call();
        if admission == (Admission::Trial { transitioned: true }) {
            self.events.publish(BreakerTransition {
                provider: provider.to_string(),
                from: CircuitState::Open,
                to: CircuitState::HalfOpen,
                consecutive_failures: breaker.snapshot().consecutive_failures,
                at: Utc::now(),
            });
        }
        admission.is_allowed()
    }

    /// Report a call outcome; returns the breaker's state afterwards
    pub fn record_outcome(&self, provider: &str, success: bool) -> CircuitState {
        let breaker = self.breaker(provider);
        if let Some(transition) = breaker.record_outcome(success) {
            self.events.publish(transition);
        }
        breaker.snapshot().state
    }

    /// Snapshot of a provider's breaker (closed defaults if never used)
    #[must_use]
    pub fn get_state(&self, provider: &str) -> CircuitBreakerState {
        self.breakers.get(provider).map_or_else(
            || CircuitBreaker::new(provider, Arc::clone(&self.config)).snapshot(),
            |b| b.snapshot(),
        )
    }

    /// Snapshots of every known breaker, sorted by provider
    #[must_use]
    pub fn all_states(&self) -> Vec<CircuitBreakerState> {
        let mut states: Vec<_> = self.breakers.iter().map(|b| b.snapshot()).collect();
        states.sort_by(|a, b| a.provider.cmp(&b.provider));
        states
    }

    /// Reset a provider's breaker to closed
    pub fn reset(&self, provider: &str) {
        if let Some(breaker) = self.breakers.get(provider) {
            breaker.reset();
        }
    }

    /// Subscribe to state transitions
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<BreakerTransition> {
        self.events.subscribe()
    }

    fn breaker(&self, provider: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(provider.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(provider, Arc::clone(&self.config))))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(threshold: u32, cooldown: Duration) -> CircuitBreakerRegistry {
        CircuitBreakerRegistry::new(
            &CircuitBreakerConfig {
                enabled: true,
                failure_threshold: threshold,
                reset_timeout: cooldown,
                max_cooldown: cooldown * 4,
                backoff_multiplier: 2.0,
            },
            16,
        )
    }

    #[test]
    fn opens_after_threshold_consecutive_failures() {
        // GIVEN: threshold of 5
        let registry = registry(5, Duration::from_secs(30));

        // WHEN: four failures
        for _ in 0..4 {
            registry.record_outcome("paystack", false);
        }

        // THEN: still closed
        assert!(registry.can_call("paystack"));
        assert_eq!(registry.get_state("paystack").state, CircuitState::Closed);

        // WHEN: fifth failure
        registry.record_outcome("paystack", false);

        // THEN: open, calls rejected
        let state = registry.get_state("paystack");
        assert_eq!(state.state, CircuitState::Open);
        assert!(state.next_retry_time.is_some());
        assert!(!registry.can_call("paystack"));
    }

    #[test]
    fn success_resets_consecutive_failures() {
        let registry = registry(3, Duration::from_secs(30));
        registry.record_outcome("mpesa", false);
        registry.record_outcome("mpesa", false);
        registry.record_outcome("mpesa", true);
        registry.record_outcome("mpesa", false);

        let state = registry.get_state("mpesa");
        assert_eq!(state.state, CircuitState::Closed);
        assert_eq!(state.consecutive_failures, 1);
    }

    #[test]
    fn rejected_call_while_open_does_not_mutate_state() {
        // GIVEN: an open breaker
        let registry = registry(1, Duration::from_secs(60));
        registry.record_outcome("mtn_momo", false);
        let before = registry.get_state("mtn_momo");

        // WHEN: can_call is polled repeatedly before the cooldown elapses
        for _ in 0..10 {
            assert!(!registry.can_call("mtn_momo"));
        }

        // THEN: the snapshot is unchanged
        assert_eq!(registry.get_state("mtn_momo"), before);
    }

    #[test]
    fn half_open_admits_exactly_one_trial() {
        // GIVEN: an open breaker whose cooldown has elapsed
        let registry = registry(1, Duration::from_millis(10));
        registry.record_outcome("airtel_money", false);
        std::thread::sleep(Duration::from_millis(20));

        // WHEN/THEN: first caller wins the trial, the second is rejected
        assert!(registry.can_call("airtel_money"));
        assert_eq!(registry.get_state("airtel_money").state, CircuitState::HalfOpen);
        assert!(registry.get_state("airtel_money").trial_in_flight);
        assert!(!registry.can_call("airtel_money"));
    }

    #[test]
    fn trial_success_closes_and_restores_base_cooldown() {
        let registry = registry(1, Duration::from_millis(10));
        registry.record_outcome("intasend", false);
        std::thread::sleep(Duration::from_millis(20));
        assert!(registry.can_call("intasend"));

        registry.record_outcome("intasend", true);

        let state = registry.get_state("intasend");
        assert_eq!(state.state, CircuitState::Closed);
        assert_eq!(state.consecutive_failures, 0);
        assert_eq!(state.current_cooldown_ms, 10);
        assert!(registry.can_call("intasend"));
    }

    #[test]
    fn trial_failure_reopens_with_backed_off_cooldown() {
        // GIVEN: cooldown 10ms, cap 40ms
        let registry = registry(1, Duration::from_millis(10));
        registry.record_outcome("paystack", false);

        // WHEN: two trial calls fail in a row
        for expected in [20, 40, 40] {
            std::thread::sleep(Duration::from_millis(expected + 5));
            assert!(registry.can_call("paystack"));
            registry.record_outcome("paystack", false);

            // THEN: cooldown doubles and is capped
            let state = registry.get_state("paystack");
            assert_eq!(state.state, CircuitState::Open);
            assert_eq!(state.current_cooldown_ms, expected);
        }
    }

    #[test]
    fn unknown_provider_is_closed_and_not_created() {
        let registry = registry(5, Duration::from_secs(30));
        assert!(registry.can_call("ghost"));
        assert_eq!(registry.get_state("ghost").state, CircuitState::Closed);
        assert!(registry.all_states().is_empty());
    }

    #[test]
    fn reset_closes_but_keeps_the_record() {
        let registry = registry(1, Duration::from_secs(60));
        registry.record_outcome("mpesa", false);
        registry.reset("mpesa");

        let state = registry.get_state("mpesa");
        assert_eq!(state.state, CircuitState::Closed);
        assert_eq!(state.opened_count, 1);
        assert_eq!(registry.all_states().len(), 1);
    }

    #[test]
    fn disabled_breaker_always_admits() {
        let registry = CircuitBreakerRegistry::new(
            &CircuitBreakerConfig {
                enabled: false,
                ..CircuitBreakerConfig::default()
            },
            4,
        );
        for _ in 0..100 {
            registry.record_outcome("mpesa", false);
        }
        assert!(registry.can_call("mpesa"));
        assert_eq!(registry.get_state("mpesa").state, CircuitState::Closed);
    }

    #[tokio::test]
    async fn transitions_are_published() {
        let registry = registry(2, Duration::from_secs(30));
        let mut rx = registry.subscribe();

        registry.record_outcome("paystack", false);
        registry.record_outcome("paystack", false);

        let transition = rx.recv().await.unwrap();
        assert_eq!(transition.provider, "paystack");
        assert_eq!(transition.from, CircuitState::Closed);
        assert_eq!(transition.to, CircuitState::Open);
    }

    #[test]
    fn concurrent_failures_are_not_lost() {
        // GIVEN: a high threshold hammered from many threads
        let registry = Arc::new(registry(1_000, Duration::from_secs(30)));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        registry.record_outcome("mpesa", false);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        // THEN: every failure was counted
        assert_eq!(registry.get_state("mpesa").consecutive_failures, 800);
    }
}
