//! Auto-optimizer: per-provider timeout, retry, rate-limit and cache tuning
//!
//! Every `analysis_interval` the optimizer looks at each registered
//! provider's outcomes within `analysis_window`:
//!
//! - struggling providers (success rate below threshold) get one more retry
//!   and, when timeouts are part of the problem, a 25% longer timeout;
//! - consistently perfect, fast and healthy providers have their rate limit
//!   raised 10% and cache TTL 25% after `stable_cycles_required` analyses.
//!
//! Providers whose breaker is open are left alone. Every change is kept as
//! an [`OptimizationRecord`].

mod provider;

pub use provider::{
    MAX_CACHE_TTL_MS, MAX_RETRIES, MAX_TIMEOUT_MS, ProviderConfig, ProviderConfigUpdate, RATE_LIMIT_CEILING_FACTOR,
    rate_limit_ceiling,
};

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audit::{Actor, AuditRecord, Resource, actions};
use crate::config::OptimizerConfig;
use crate::context::ReliabilityContext;
use crate::events::EventBus;
use crate::failsafe::CircuitState;
use crate::outcomes::{ErrorCategory, WindowStats};
use crate::scheduler::{PeriodicTask, TickGuard};
use crate::{Error, Result};

/// Actor recorded for operator-initiated changes
const OPERATOR: &str = "operator";
/// Rationale recorded for `force_config`
pub const MANUAL_OVERRIDE: &str = "manual override";

/// Which setting a record changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationCategory {
    /// `timeout_ms`
    Timeout,
    /// `max_retries`
    Retry,
    /// `rate_limit_per_minute`
    RateLimit,
    /// `cache_ttl_ms`
    Cache,
}

/// Lifecycle of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationStatus {
    /// Decided but not yet in effect
    Proposed,
    /// In effect
    Applied,
    /// Undone by `revert_to_default`
    Reverted,
}

/// One setting change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationRecord {
    /// Record id
    pub id: String,
    /// Provider id
    pub provider: String,
    /// Setting changed
    pub category: OptimizationCategory,
    /// Value before the change
    pub old_value: u64,
    /// Value after the change
    pub new_value: u64,
    /// Lifecycle status
    pub status: OptimizationStatus,
    /// When the change was decided
    pub created_at: DateTime<Utc>,
    /// Observations that justified the change
    pub rationale: String,
}

impl OptimizationRecord {
    fn new(
        provider: &str,
        (category, old_value, new_value): (OptimizationCategory, u64, u64),
        status: OptimizationStatus,
        rationale: &str,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            provider: provider.to_string(),
            category,
            old_value,
            new_value,
            status,
            created_at: Utc::now(),
            rationale: rationale.to_string(),
        }
    }
}

/// Tuning state of one registered provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderOptimizationState {
    /// Provider id
    pub provider: String,
    /// Settings currently in effect
    pub config: ProviderConfig,
    /// Provider defaults merged with registration overrides
    pub baseline: ProviderConfig,
    /// Samples seen in the last analysis window
    pub sample_count: usize,
    /// Analyses that changed at least one setting
    pub optimization_count: u64,
    /// When the provider was last analyzed
    pub last_analyzed_at: Option<DateTime<Utc>>,
    /// Success rate seen by the last analysis
    pub last_success_rate: Option<f64>,
    /// p95 latency seen by the last analysis
    pub last_p95_latency_ms: Option<u64>,
    /// Consecutive analyses at 100% success
    pub stable_cycles: u32,
}

impl ProviderOptimizationState {
    fn new(provider: &str, overrides: Option<&ProviderConfigUpdate>) -> Self {
        let base = ProviderConfig::base_for(provider);
        let baseline = overrides.map_or(base, |o| base.merged(o));
        let baseline = baseline.clamped(&baseline);
        Self {
            provider: provider.to_string(),
            config: baseline,
            baseline,
            sample_count: 0,
            optimization_count: 0,
            last_analyzed_at: None,
            last_success_rate: None,
            last_p95_latency_ms: None,
            stable_cycles: 0,
        }
    }
}

/// Query over optimization records; every set field must match
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizationFilter {
    /// Provider id
    pub provider: Option<String>,
    /// Setting
    pub category: Option<OptimizationCategory>,
    /// Lifecycle status
    pub status: Option<OptimizationStatus>,
    /// Inclusive lower bound on `created_at`
    pub since: Option<DateTime<Utc>>,
    /// Maximum records to return
    pub limit: Option<usize>,
}

impl OptimizationFilter {
    fn matches(&self, record: &OptimizationRecord) -> bool {
        self.provider.as_ref().is_none_or(|p| *p == record.provider)
            && self.category.is_none_or(|c| c == record.category)
            && self.status.is_none_or(|s| s == record.status)
            && self.since.is_none_or(|s| record.created_at >= s)
    }
}

/// Events published by the optimizer
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OptimizerEvent {
    /// A provider's settings changed
    ConfigChanged {
        /// Provider id
        provider: String,
        /// Settings now in effect
        config: ProviderConfig,
        /// Records describing the change
        records: Vec<OptimizationRecord>,
    },
    /// A provider was reset to its baseline
    Reverted {
        /// Provider id
        provider: String,
        /// Baseline now in effect
        config: ProviderConfig,
    },
    /// An analysis pass finished
    AnalysisCompleted {
        /// Providers with enough samples to analyze
        analyzed: usize,
        /// Records created by the pass
        changes: usize,
    },
}

/// What one analysis decided for one provider
struct Decision {
    config: ProviderConfig,
    stable_cycles: u32,
    rationale: String,
}

/// Tunes provider settings from rolling call outcomes
pub struct AutoOptimizer {
    ctx: Arc<ReliabilityContext>,
    config: OptimizerConfig,
    states: RwLock<BTreeMap<String, ProviderOptimizationState>>,
    records: RwLock<VecDeque<OptimizationRecord>>,
    task: PeriodicTask,
    guard: TickGuard,
    events: EventBus<OptimizerEvent>,
}

impl std::fmt::Debug for AutoOptimizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoOptimizer")
            .field("providers", &self.states.read().len())
            .field("records", &self.records.read().len())
            .field("running", &self.task.is_running())
            .finish_non_exhaustive()
    }
}

impl AutoOptimizer {
    /// Create an optimizer and register the providers named in `config`
    #[must_use]
    pub fn new(ctx: Arc<ReliabilityContext>, config: &OptimizerConfig) -> Self {
        let optimizer = Self {
            task: PeriodicTask::new("auto_optimizer", config.analysis_interval),
            guard: TickGuard::new(),
            events: EventBus::new("auto_optimizer", ctx.config().events.channel_capacity),
            config: config.clone(),
            states: RwLock::new(BTreeMap::new()),
            records: RwLock::new(VecDeque::new()),
            ctx,
        };
        for (provider, overrides) in &config.providers {
            optimizer.register_provider(provider, Some(overrides));
        }
        optimizer
    }

    /// Register a provider; registering again leaves existing state untouched
    ///
    /// Returns the settings in effect.
    pub fn register_provider(&self, provider: &str, overrides: Option<&ProviderConfigUpdate>) -> ProviderConfig {
        if let Some(state) = self.states.read().get(provider) {
            return state.config;
        }
        let mut states = self.states.write();
        let state = states.entry(provider.to_string()).or_insert_with(|| {
            let state = ProviderOptimizationState::new(provider, overrides);
            info!(
                provider,
                timeout_ms = state.config.timeout_ms,
                max_retries = state.config.max_retries,
                rate_limit_per_minute = state.config.rate_limit_per_minute,
                "Provider registered for optimization"
            );
            state
        });
        state.config
    }

    /// Settings in effect for a provider
    #[must_use]
    pub fn get_optimized_config(&self, provider: &str) -> Option<ProviderConfig> {
        self.states.read().get(provider).map(|s| s.config)
    }

    /// Tuning state of a provider
    #[must_use]
    pub fn get_provider_state(&self, provider: &str) -> Option<ProviderOptimizationState> {
        self.states.read().get(provider).cloned()
    }

    /// Tuning state of every registered provider, by provider id
    #[must_use]
    pub fn get_all_provider_states(&self) -> Vec<ProviderOptimizationState> {
        self.states.read().values().cloned().collect()
    }

    /// Records matching `filter`, newest first
    #[must_use]
    pub fn get_optimizations(&self, filter: &OptimizationFilter) -> Vec<OptimizationRecord> {
        let records = self.records.read();
        let matching = records.iter().rev().filter(|r| filter.matches(r));
        match filter.limit {
            Some(limit) => matching.take(limit).cloned().collect(),
            None => matching.cloned().collect(),
        }
    }

    /// Subscribe to optimizer events
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<OptimizerEvent> {
        self.events.subscribe()
    }

    /// Apply operator-chosen settings, clamped to the ceilings
    ///
    /// Forcing the settings already in effect records nothing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProviderNotRegistered`] for an unknown provider.
    pub fn force_config(&self, provider: &str, update: &ProviderConfigUpdate) -> Result<ProviderConfig> {
        let (config, records) = {
            let mut states = self.states.write();
            let state = states
                .get_mut(provider)
                .ok_or_else(|| Error::ProviderNotRegistered(provider.to_string()))?;
            let target = state.config.merged(update).clamped(&state.baseline);
            let records: Vec<OptimizationRecord> = target
                .diff(&state.config)
                .into_iter()
                .map(|(category, new, old)| {
                    OptimizationRecord::new(
                        provider,
                        (category, old, new),
                        OptimizationStatus::Applied,
                        MANUAL_OVERRIDE,
                    )
                })
                .collect();
            state.config = target;
            state.stable_cycles = 0;
            (target, records)
        };

        self.ctx.audit.log(
            AuditRecord::new(
                actions::CONFIG_FORCED,
                Actor::user(OPERATOR),
                Resource::new("provider", provider),
            )
            .with_details(json!({ "update": update, "config": config, "changes": records.len() })),
        );

        if records.is_empty() {
            debug!(provider, "Forced config already in effect");
        } else {
            info!(provider, changes = records.len(), "Provider config forced");
            self.push_records(&records);
            self.events.publish(OptimizerEvent::ConfigChanged {
                provider: provider.to_string(),
                config,
                records,
            });
        }
        Ok(config)
    }

    /// Restore a provider's baseline and mark its applied records reverted
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProviderNotRegistered`] for an unknown provider.
    pub fn revert_to_default(&self, provider: &str) -> Result<ProviderConfig> {
        let (baseline, reverted) = {
            let mut states = self.states.write();
            let state = states
                .get_mut(provider)
                .ok_or_else(|| Error::ProviderNotRegistered(provider.to_string()))?;
            let reverted: Vec<OptimizationRecord> = state
                .baseline
                .diff(&state.config)
                .into_iter()
                .map(|(category, new, old)| {
                    OptimizationRecord::new(
                        provider,
                        (category, old, new),
                        OptimizationStatus::Reverted,
                        "reverted to default",
                    )
                })
                .collect();
            state.config = state.baseline;
            state.stable_cycles = 0;
            (state.baseline, reverted)
        };

        let mut marked = 0usize;
        for record in self.records.write().iter_mut() {
            if record.provider == provider && record.status == OptimizationStatus::Applied {
                record.status = OptimizationStatus::Reverted;
                marked += 1;
            }
        }
        self.push_records(&reverted);

        self.ctx.audit.log(
            AuditRecord::new(
                actions::CONFIG_REVERTED,
                Actor::user(OPERATOR),
                Resource::new("provider", provider),
            )
            .with_details(json!({ "config": baseline, "records_reverted": marked })),
        );
        info!(provider, records_reverted = marked, "Provider config reverted to default");
        self.events.publish(OptimizerEvent::Reverted {
            provider: provider.to_string(),
            config: baseline,
        });
        Ok(baseline)
    }

    /// Analyze every registered provider once
    ///
    /// Returns the records created, or an empty list if another analysis
    /// was already running.
    pub fn analyze_now(&self) -> Vec<OptimizationRecord> {
        let Some(_permit) = self.guard.try_enter() else {
            debug!("Optimizer analysis already in progress, skipping");
            return Vec::new();
        };

        let now = Utc::now();
        let window = ChronoDuration::from_std(self.config.analysis_window)
            .unwrap_or_else(|_| ChronoDuration::minutes(15));
        let providers: Vec<String> = self.states.read().keys().cloned().collect();

        let mut analyzed = 0usize;
        let mut created = Vec::new();
        for provider in providers {
            let stats = self.ctx.outcomes.stats_since(&provider, now - window);
            let breaker = self.ctx.breakers.get_state(&provider).state;
            let healthy = self.ctx.health.is_healthy(&provider);

            let mut states = self.states.write();
            let Some(state) = states.get_mut(&provider) else { continue };
            state.sample_count = stats.total;
            state.last_analyzed_at = Some(now);
            state.last_success_rate = Some(stats.success_rate);
            state.last_p95_latency_ms = stats.latency_p95_ms;

            if stats.total < self.config.min_samples_for_optimization {
                debug!(provider = %provider, samples = stats.total, "Not enough samples to optimize");
                continue;
            }
            analyzed += 1;
            if breaker == CircuitState::Open {
                debug!(provider = %provider, "Circuit open, skipping optimization");
                continue;
            }

            let decision = self.decide(state, &stats, healthy);
            state.stable_cycles = decision.stable_cycles;
            let changes = decision.config.diff(&state.config);
            if changes.is_empty() {
                continue;
            }

            let records: Vec<OptimizationRecord> = changes
                .into_iter()
                .map(|(category, new, old)| {
                    OptimizationRecord::new(
                        &provider,
                        (category, old, new),
                        OptimizationStatus::Applied,
                        &decision.rationale,
                    )
                })
                .collect();
            state.config = decision.config;
            state.optimization_count += 1;
            drop(states);

            info!(
                provider = %provider,
                changes = records.len(),
                rationale = %decision.rationale,
                "Provider config optimized"
            );
            self.push_records(&records);
            self.events.publish(OptimizerEvent::ConfigChanged {
                provider: provider.clone(),
                config: decision.config,
                records: records.clone(),
            });
            created.extend(records);
        }

        self.events.publish(OptimizerEvent::AnalysisCompleted {
            analyzed,
            changes: created.len(),
        });
        created
    }

    fn decide(&self, state: &ProviderOptimizationState, stats: &WindowStats, healthy: bool) -> Decision {
        let current = state.config;
        let p95 = stats.latency_p95_ms.unwrap_or(0) as f64;
        let timeout = current.timeout_ms as f64;

        if stats.success_rate < self.config.success_rate_threshold {
            let timeouts = stats
                .errors_by_category
                .get(&ErrorCategory::Timeout)
                .copied()
                .unwrap_or(0);
            let mut next = current;
            next.max_retries = current.max_retries.saturating_add(1);
            if timeouts > 0 || p95 >= timeout * 0.8 {
                next.timeout_ms = (timeout * 1.25).round() as u64;
            }
            return Decision {
                config: next.clamped(&state.baseline),
                stable_cycles: 0,
                rationale: format!(
                    "success rate {:.1}% below {:.1}%, p95 {}ms, {} timeouts",
                    stats.success_rate * 100.0,
                    self.config.success_rate_threshold * 100.0,
                    p95,
                    timeouts
                ),
            };
        }

        if stats.success_rate >= 1.0 && p95 < timeout * 0.5 && healthy {
            let stable_cycles = state.stable_cycles + 1;
            if stable_cycles >= self.config.stable_cycles_required {
                let mut next = current;
                next.rate_limit_per_minute = ((f64::from(current.rate_limit_per_minute) * 1.10).round() as u32)
                    .max(current.rate_limit_per_minute.saturating_add(1));
                next.cache_ttl_ms = (current.cache_ttl_ms as f64 * 1.25).round() as u64;
                return Decision {
                    config: next.clamped(&state.baseline),
                    stable_cycles: 0,
                    rationale: format!(
                        "{stable_cycles} stable cycles at 100% success, p95 {p95}ms under half of {}ms timeout",
                        current.timeout_ms
                    ),
                };
            }
            return Decision {
                config: current,
                stable_cycles,
                rationale: String::new(),
            };
        }

        Decision {
            config: current,
            stable_cycles: 0,
            rationale: String::new(),
        }
    }

    fn push_records(&self, new: &[OptimizationRecord]) {
        if new.is_empty() {
            return;
        }
        let mut records = self.records.write();
        records.extend(new.iter().cloned());
        while records.len() > self.config.max_records.max(1) {
            records.pop_front();
        }
    }

    /// Analyze every `analysis_interval` until stopped
    pub fn start(self: &Arc<Self>) -> bool {
        if !self.config.enabled {
            warn!("Auto-optimizer disabled, not starting");
            return false;
        }
        let optimizer: Weak<Self> = Arc::downgrade(self);
        self.task.start(move || {
            let optimizer = optimizer.clone();
            async move {
                if let Some(optimizer) = optimizer.upgrade() {
                    optimizer.analyze_now();
                }
            }
        })
    }

    /// Stop the periodic analysis
    pub fn stop(&self) -> bool {
        self.task.stop()
    }

    /// Whether the periodic analysis is active
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task.is_running()
    }
}
