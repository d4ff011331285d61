//! The assembled control plane
//!
//! [`ReliabilityPlane`] builds the shared [`ReliabilityContext`] and every
//! component from one [`Config`], wires the predictor into the scaler as its
//! capacity forecast, and starts or stops all periodic loops together.

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

use crate::Result;
use crate::audit::AuditStats;
use crate::config::Config;
use crate::context::ReliabilityContext;
use crate::failsafe::{CheckResult, CircuitBreakerState, HealthSnapshot, ProviderGuard};
use crate::optimizer::{AutoOptimizer, ProviderOptimizationState};
use crate::outcomes::CallOutcome;
use crate::predictive::{PredictiveMaintenance, PredictiveStats};
use crate::scaling::{AutoScaler, ScalingStats};
use crate::scheduler::PeriodicTask;

/// How often the audit retention policy runs while the plane is started
const AUDIT_RETENTION_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Observation fed to the plane by the integration layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InboundEvent {
    /// One provider call
    Outcome(CallOutcome),
    /// Aggregate transaction rate
    Load {
        /// Transactions per minute
        transactions_per_minute: f64,
    },
    /// One health check result
    Health(CheckResult),
}

/// Point-in-time view of every component
#[derive(Debug, Clone, Serialize)]
pub struct PlaneStatus {
    /// When the status was taken
    pub generated_at: DateTime<Utc>,
    /// Provider health
    pub health: HealthSnapshot,
    /// Breaker per provider
    pub breakers: Vec<CircuitBreakerState>,
    /// Tuned config per provider
    pub providers: Vec<ProviderOptimizationState>,
    /// Predictor statistics
    pub predictive: PredictiveStats,
    /// Scaler statistics
    pub scaling: ScalingStats,
    /// Audit ledger statistics
    pub audit: AuditStats,
}

/// Every control-plane component, built from one config
#[derive(Debug)]
pub struct ReliabilityPlane {
    ctx: Arc<ReliabilityContext>,
    optimizer: Arc<AutoOptimizer>,
    predictor: Arc<PredictiveMaintenance>,
    scaler: Arc<AutoScaler>,
    guard: Arc<ProviderGuard>,
    retention: PeriodicTask,
}

impl ReliabilityPlane {
    /// Build the context and every component; nothing is started
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Config`] if the config is invalid.
    pub fn new(config: &Config) -> Result<Self> {
        let ctx = Arc::new(ReliabilityContext::new(config)?);
        let optimizer = Arc::new(AutoOptimizer::new(Arc::clone(&ctx), &config.optimizer));
        let predictor = Arc::new(PredictiveMaintenance::new(Arc::clone(&ctx), &config.predictive));
        let scaler = Arc::new(
            AutoScaler::new(Arc::clone(&ctx), &config.scaling).with_forecast(predictor.clone()),
        );
        let guard = Arc::new(ProviderGuard::new(Arc::clone(&ctx), Arc::clone(&optimizer)));

        Ok(Self {
            ctx,
            optimizer,
            predictor,
            scaler,
            guard,
            retention: PeriodicTask::new("audit_retention", AUDIT_RETENTION_INTERVAL),
        })
    }

    /// Shared context
    #[must_use]
    pub fn context(&self) -> &Arc<ReliabilityContext> {
        &self.ctx
    }

    /// Auto-optimizer
    #[must_use]
    pub fn optimizer(&self) -> &Arc<AutoOptimizer> {
        &self.optimizer
    }

    /// Predictive maintenance
    #[must_use]
    pub fn predictor(&self) -> &Arc<PredictiveMaintenance> {
        &self.predictor
    }

    /// Auto-scaler
    #[must_use]
    pub fn scaler(&self) -> &Arc<AutoScaler> {
        &self.scaler
    }

    /// Call wrapper applying the tuned provider config
    #[must_use]
    pub fn guard(&self) -> &Arc<ProviderGuard> {
        &self.guard
    }

    /// Start every enabled periodic loop
    ///
    /// Must be called from within a tokio runtime. Returns how many loops
    /// were started by this call.
    pub fn start_all(&self) -> usize {
        let ledger = Arc::downgrade(&self.ctx.audit);
        let started = [
            self.ctx.health.start(),
            self.optimizer.start(),
            self.predictor.start(),
            self.scaler.start(),
            self.retention.start(move || retention_tick(ledger.clone())),
        ];
        let count = started.iter().filter(|s| **s).count();
        info!(started = count, "Reliability plane started");
        count
    }

    /// Stop every periodic loop; in-flight ticks finish
    pub fn stop_all(&self) {
        self.ctx.health.stop();
        self.optimizer.stop();
        self.predictor.stop();
        self.scaler.stop();
        self.retention.stop();
        info!("Reliability plane stopped");
    }

    /// Route an observation to the component that consumes it
    pub fn ingest(&self, event: InboundEvent) {
        match event {
            InboundEvent::Outcome(outcome) => {
                if self.optimizer.get_optimized_config(&outcome.provider).is_none() {
                    self.optimizer.register_provider(&outcome.provider, None);
                }
                self.ctx.record_outcome(&outcome);
            }
            InboundEvent::Load {
                transactions_per_minute,
            } => self.scaler.set_transaction_rate(transactions_per_minute),
            InboundEvent::Health(result) => {
                trace!(provider = %result.provider, check = %result.name, passed = result.passed, "Health result ingested");
                self.ctx.health.record_result(result);
            }
        }
    }

    /// Snapshot of every component
    #[must_use]
    pub fn status(&self) -> PlaneStatus {
        PlaneStatus {
            generated_at: Utc::now(),
            health: self.ctx.health.snapshot(),
            breakers: self.ctx.breakers.all_states(),
            providers: self.optimizer.get_all_provider_states(),
            predictive: self.predictor.get_stats(),
            scaling: self.scaler.get_stats(),
            audit: self.ctx.audit.get_stats(),
        }
    }
}

async fn retention_tick(ledger: Weak<crate::audit::AuditLedger>) {
    if let Some(ledger) = ledger.upgrade() {
        let pruned = ledger.apply_retention_policy();
        debug!(pruned, "Audit retention applied");
    }
}
