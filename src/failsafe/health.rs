//! Provider health monitoring
//!
//! Named checks are registered per provider and run on demand or on a
//! timer. Results are aggregated into per-provider and overall status:
//!
//! - `healthy`: every check passes
//! - `degraded`: only non-critical checks fail
//! - `unhealthy`: at least one critical check fails
//!
//! A check that errors, times out or panics is recorded as failed; the
//! monitor itself never returns an error to the caller.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::HealthConfig;
use crate::events::EventBus;
use crate::scheduler::{PeriodicTask, TickGuard};

/// Aggregated health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// All checks pass
    Healthy,
    /// Only non-critical checks fail
    Degraded,
    /// A critical check fails
    Unhealthy,
}

/// A health probe for one provider
#[async_trait]
pub trait HealthCheck: Send + Sync {
    /// Check name, unique per provider
    fn name(&self) -> &str;

    /// Provider the check belongs to
    fn provider(&self) -> &str;

    /// Whether a failure makes the provider unhealthy rather than degraded
    fn critical(&self) -> bool {
        true
    }

    /// Run the probe
    async fn check(&self) -> Result<(), String>;
}

/// Adapts an async closure into a [`HealthCheck`]
pub struct FnCheck<F> {
    name: String,
    provider: String,
    critical: bool,
    probe: F,
}

impl<F> FnCheck<F> {
    /// Critical check backed by `probe`
    pub fn new(name: impl Into<String>, provider: impl Into<String>, probe: F) -> Self {
        Self {
            name: name.into(),
            provider: provider.into(),
            critical: true,
            probe,
        }
    }

    /// Mark the check as non-critical
    #[must_use]
    pub fn non_critical(mut self) -> Self {
        self.critical = false;
        self
    }
}

#[async_trait]
impl<F, Fut> HealthCheck for FnCheck<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), String>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn provider(&self) -> &str {
        &self.provider
    }

    fn critical(&self) -> bool {
        self.critical
    }

    async fn check(&self) -> Result<(), String> {
        (self.probe)().await
    }
}

/// Outcome of one check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    /// Check name
    pub name: String,
    /// Provider id
    pub provider: String,
    /// Whether the check passed
    pub passed: bool,
    /// Whether a failure is critical
    #[serde(default = "default_critical")]
    pub critical: bool,
    /// Failure description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// How long the check took
    #[serde(default)]
    pub duration_ms: u64,
    /// When the check completed
    #[serde(default = "Utc::now")]
    pub checked_at: DateTime<Utc>,
}

fn default_critical() -> bool {
    true
}

impl CheckResult {
    /// Result reported by an external prober
    pub fn external(name: impl Into<String>, provider: impl Into<String>, passed: bool) -> Self {
        Self {
            name: name.into(),
            provider: provider.into(),
            passed,
            critical: true,
            message: None,
            duration_ms: 0,
            checked_at: Utc::now(),
        }
    }
}

/// Health of one provider
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderHealth {
    /// Provider id
    pub provider: String,
    /// Aggregated status
    pub status: HealthStatus,
    /// Latest result of every check
    pub checks: Vec<CheckResult>,
}

/// Health of every provider at a point in time
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthSnapshot {
    /// Worst provider status (healthy when no checks exist)
    pub status: HealthStatus,
    /// Per-provider health
    pub providers: BTreeMap<String, ProviderHealth>,
    /// When the snapshot was assembled
    pub generated_at: DateTime<Utc>,
}

/// A provider's aggregated status changed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthChange {
    /// Provider id
    pub provider: String,
    /// Previous status (`None` the first time a provider is seen)
    pub from: Option<HealthStatus>,
    /// New status
    pub to: HealthStatus,
}

fn aggregate<'a>(results: impl Iterator<Item = &'a CheckResult>) -> HealthStatus {
    results.fold(HealthStatus::Healthy, |status, result| {
        let this = match (result.passed, result.critical) {
            (true, _) => HealthStatus::Healthy,
            (false, false) => HealthStatus::Degraded,
            (false, true) => HealthStatus::Unhealthy,
        };
        status.max(this)
    })
}

/// Runs registered checks and keeps the latest result of each
pub struct HealthMonitor {
    checks: RwLock<Vec<Arc<dyn HealthCheck>>>,
    /// Latest result keyed by (provider, check name)
    results: RwLock<BTreeMap<(String, String), CheckResult>>,
    check_timeout: Duration,
    enabled: bool,
    task: PeriodicTask,
    guard: TickGuard,
    events: EventBus<HealthChange>,
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("checks", &self.checks.read().len())
            .field("results", &self.results.read().len())
            .field("check_timeout", &self.check_timeout)
            .finish_non_exhaustive()
    }
}

impl HealthMonitor {
    /// Create a monitor with no checks
    #[must_use]
    pub fn new(config: &HealthConfig, event_capacity: usize) -> Self {
        Self {
            checks: RwLock::new(Vec::new()),
            results: RwLock::new(BTreeMap::new()),
            check_timeout: config.check_timeout,
            enabled: config.enabled,
            task: PeriodicTask::new("health_monitor", config.interval),
            guard: TickGuard::new(),
            events: EventBus::new("health_monitor", event_capacity),
        }
    }

    /// Register a check; a check with the same provider and name is replaced
    pub fn register(&self, check: Arc<dyn HealthCheck>) {
        let mut checks = self.checks.write();
        checks.retain(|c| !(c.provider() == check.provider() && c.name() == check.name()));
        debug!(provider = check.provider(), check = check.name(), "Health check registered");
        checks.push(check);
    }

    /// Record a result produced outside the monitor
    pub fn record_result(&self, result: CheckResult) {
        let provider = result.provider.clone();
        let before = self.provider_status(&provider);
        self.results
            .write()
            .insert((result.provider.clone(), result.name.clone()), result);
        self.notify_change(&provider, before);
    }

    /// Run every registered check concurrently and return the new snapshot
    ///
    /// Overlapping runs are skipped; the caller then gets the current snapshot.
    pub async fn run_checks(&self) -> HealthSnapshot {
        let Some(_permit) = self.guard.try_enter() else {
            debug!("Health check run already in progress, skipping");
            return self.snapshot();
        };

        let checks: Vec<Arc<dyn HealthCheck>> = self.checks.read().clone();
        let timeout = self.check_timeout;

        let runs = checks.into_iter().map(|check| async move {
            let name = check.name().to_string();
            let provider = check.provider().to_string();
            let critical = check.critical();
            let started = Instant::now();

            // Each check runs in its own task so a panic stays contained
            let handle = tokio::spawn(async move { tokio::time::timeout(timeout, check.check()).await });
            let (passed, message) = match handle.await {
                Ok(Ok(Ok(()))) => (true, None),
                Ok(Ok(Err(e))) => (false, Some(e)),
                Ok(Err(_)) => (false, Some(format!("timed out after {}ms", timeout.as_millis()))),
                Err(e) => (false, Some(format!("check panicked: {e}"))),
            };

            CheckResult {
                name,
                provider,
                passed,
                critical,
                message,
                duration_ms: started.elapsed().as_millis() as u64,
                checked_at: Utc::now(),
            }
        });
        let results = futures::future::join_all(runs).await;

        let before: BTreeMap<String, HealthStatus> = self
            .snapshot()
            .providers
            .into_iter()
            .map(|(provider, health)| (provider, health.status))
            .collect();

        {
            let mut stored = self.results.write();
            for result in results {
                if !result.passed {
                    warn!(
                        provider = %result.provider,
                        check = %result.name,
                        critical = result.critical,
                        message = result.message.as_deref().unwrap_or(""),
                        "Health check failed"
                    );
                }
                stored.insert((result.provider.clone(), result.name.clone()), result);
            }
        }

        let snapshot = self.snapshot();
        for provider in snapshot.providers.keys() {
            self.notify_change(provider, before.get(provider).copied());
        }
        snapshot
    }

    /// Assemble the current snapshot from the latest results
    #[must_use]
    pub fn snapshot(&self) -> HealthSnapshot {
        let results = self.results.read();
        let mut providers: BTreeMap<String, ProviderHealth> = BTreeMap::new();

        for ((provider, _), result) in results.iter() {
            providers
                .entry(provider.clone())
                .or_insert_with(|| ProviderHealth {
                    provider: provider.clone(),
                    status: HealthStatus::Healthy,
                    checks: Vec::new(),
                })
                .checks
                .push(result.clone());
        }
        for health in providers.values_mut() {
            health.status = aggregate(health.checks.iter());
        }

        let status = providers
            .values()
            .map(|h| h.status)
            .max()
            .unwrap_or(HealthStatus::Healthy);

        HealthSnapshot {
            status,
            providers,
            generated_at: Utc::now(),
        }
    }

    /// Aggregated status of one provider, `None` if it has no results yet
    #[must_use]
    pub fn provider_status(&self, provider: &str) -> Option<HealthStatus> {
        let results = self.results.read();
        let mut matching = results
            .iter()
            .filter(|((p, _), _)| p == provider)
            .map(|(_, r)| r)
            .peekable();
        matching.peek()?;
        Some(aggregate(matching))
    }

    /// Whether a provider is healthy; providers without results count as healthy
    #[must_use]
    pub fn is_healthy(&self, provider: &str) -> bool {
        self.provider_status(provider)
            .is_none_or(|s| s == HealthStatus::Healthy)
    }

    /// Subscribe to provider status changes
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<HealthChange> {
        self.events.subscribe()
    }

    /// Run checks every configured interval until stopped
    pub fn start(self: &Arc<Self>) -> bool {
        if !self.enabled {
            warn!("Health monitor disabled, not starting");
            return false;
        }
        let monitor: Weak<Self> = Arc::downgrade(self);
        self.task.start(move || {
            let monitor = monitor.clone();
            async move {
                if let Some(monitor) = monitor.upgrade() {
                    monitor.run_checks().await;
                }
            }
        })
    }

    /// Stop the periodic run
    pub fn stop(&self) -> bool {
        self.task.stop()
    }

    /// Whether the periodic run is active
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task.is_running()
    }

    fn notify_change(&self, provider: &str, before: Option<HealthStatus>) {
        let Some(after) = self.provider_status(provider) else {
            return;
        };
        if before == Some(after) {
            return;
        }
        match after {
            HealthStatus::Healthy => info!(provider, "Provider healthy"),
            HealthStatus::Degraded => warn!(provider, "Provider degraded"),
            HealthStatus::Unhealthy => warn!(provider, "Provider unhealthy"),
        }
        self.events.publish(HealthChange {
            provider: provider.to_string(),
            from: before,
            to: after,
        });
    }
}
