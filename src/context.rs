//! Shared state handed to every control-plane component
//!
//! Components never reach for globals: the health monitor, breaker registry,
//! outcome store, load history and audit ledger live here and are passed in
//! as one `Arc<ReliabilityContext>`.

use std::sync::Arc;

use tracing::trace;

use crate::Result;
use crate::audit::AuditLedger;
use crate::config::Config;
use crate::failsafe::{CircuitBreakerRegistry, CircuitState, HealthMonitor};
use crate::load::LoadHistory;
use crate::outcomes::{CallOutcome, OutcomeStore};

/// Collaborators shared by the optimizer, predictor and scaler
#[derive(Debug)]
pub struct ReliabilityContext {
    config: Config,
    /// Provider health checks
    pub health: Arc<HealthMonitor>,
    /// Per-provider circuit breakers
    pub breakers: Arc<CircuitBreakerRegistry>,
    /// Recent call outcomes per provider
    pub outcomes: Arc<OutcomeStore>,
    /// Aggregate transaction load samples
    pub load: Arc<LoadHistory>,
    /// Tamper-evident action log
    pub audit: Arc<AuditLedger>,
}

impl ReliabilityContext {
    /// Build the shared collaborators from a validated config
    ///
    /// # Errors
    ///
    /// Returns an error if the config is invalid.
    pub fn new(config: &Config) -> Result<Self> {
        config.validate()?;
        let capacity = config.events.channel_capacity;
        Ok(Self {
            config: config.clone(),
            health: Arc::new(HealthMonitor::new(&config.health, capacity)),
            breakers: Arc::new(CircuitBreakerRegistry::new(&config.circuit_breaker, capacity)),
            outcomes: Arc::new(OutcomeStore::new(&config.outcomes)),
            load: Arc::new(LoadHistory::new(config.scaling.load_retention)),
            audit: Arc::new(AuditLedger::new(&config.audit)),
        })
    }

    /// Configuration the context was built from
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Feed one provider call result to the breakers and the outcome store
    ///
    /// Returns the provider's breaker state after the call.
    pub fn record_outcome(&self, outcome: &CallOutcome) -> CircuitState {
        self.outcomes.record(outcome);
        let state = self.breakers.record_outcome(&outcome.provider, outcome.success);
        trace!(
            provider = %outcome.provider,
            success = outcome.success,
            latency_ms = outcome.latency_ms,
            state = %state,
            "Outcome recorded"
        );
        state
    }

    /// Record an aggregate load sample
    pub fn record_load(&self, transactions_per_minute: f64) {
        self.load.record(transactions_per_minute);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcomes::ErrorCategory;
    use chrono::Utc;

    #[test]
    fn outcomes_reach_breakers_and_store() {
        // GIVEN: a context with the default breaker threshold of 5
        let ctx = ReliabilityContext::new(&Config::default()).unwrap();

        // WHEN: five failures are recorded
        let mut state = CircuitState::Closed;
        for _ in 0..5 {
            state = ctx.record_outcome(&CallOutcome::failure("mpesa", 120, ErrorCategory::ServerError));
        }

        // THEN: the breaker opens and the store has all samples
        assert_eq!(state, CircuitState::Open);
        let stats = ctx
            .outcomes
            .stats_since("mpesa", Utc::now() - chrono::Duration::minutes(1));
        assert_eq!(stats.total, 5);
        assert_eq!(stats.failures, 5);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = Config::default();
        config.scaling.min_instances = 0;
        assert!(ReliabilityContext::new(&config).is_err());
    }
}
