//! Predictive maintenance
//!
//! Each analysis splits the trend window into buckets, fits a line through
//! the per-bucket error rates of every provider and projects it a few
//! buckets ahead. Providers trending past the error-rate threshold (or with
//! an open breaker) are scored; scores above the effective confidence
//! threshold become [`Prediction`]s. High-confidence failure predictions
//! schedule a [`MaintenanceWindow`].
//!
//! The same bucketing over the load history yields `capacity` predictions,
//! which the auto-scaler reads through [`CapacityForecast`].

mod confidence;
mod maintenance;
mod trend;

pub use confidence::{effective_threshold, score};
pub use maintenance::{MaintenanceFilter, MaintenanceStatus, MaintenanceWindow};
pub use trend::{Trend, analyze, least_squares_slope};

use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audit::{Actor, AuditRecord, Resource, actions};
use crate::config::PredictiveConfig;
use crate::context::ReliabilityContext;
use crate::events::EventBus;
use crate::failsafe::CircuitState;
use crate::scheduler::{PeriodicTask, TickGuard};

/// Provider id used for fleet-wide capacity predictions
pub const ALL_PROVIDERS: &str = "*";

/// Source of expected load for capacity planning
pub trait CapacityForecast: Send + Sync {
    /// Highest transactions-per-minute currently forecast, if any
    fn expected_load(&self) -> Option<f64>;
}

/// What a prediction forecasts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionType {
    /// Provider is about to fail outright
    Failure,
    /// Provider is getting worse
    Degradation,
    /// Load is about to exceed the alert level
    Capacity,
}

/// Lifecycle of a prediction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionStatus {
    /// Awaiting review or expiry
    Active,
    /// Operator confirmed it came true
    Confirmed,
    /// Operator marked it wrong
    FalsePositive,
    /// Outlived `prediction_ttl` without review
    Expired,
}

impl PredictionStatus {
    /// Whether no further transition is allowed
    #[must_use]
    pub fn is_terminal(self) -> bool {
        self != Self::Active
    }
}

/// Observations a prediction was derived from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceWindow {
    /// Window start
    pub start: DateTime<Utc>,
    /// Window end
    pub end: DateTime<Utc>,
    /// Samples inside the window
    pub samples: usize,
    /// Error rate (or load, for capacity) of the latest bucket
    pub error_rate: f64,
    /// Slope per bucket
    pub slope: f64,
}

/// A forecast about one provider, or the fleet for capacity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Prediction id
    pub id: String,
    /// Provider id, or [`ALL_PROVIDERS`]
    pub provider: String,
    /// What is forecast
    #[serde(rename = "type")]
    pub prediction_type: PredictionType,
    /// Confidence in `[0, 1]`
    pub confidence: f64,
    /// Lifecycle status
    pub status: PredictionStatus,
    /// When the prediction was made
    pub created_at: DateTime<Utc>,
    /// When an unreviewed prediction expires
    pub expires_at: DateTime<Utc>,
    /// Supporting observations
    pub evidence_window: EvidenceWindow,
    /// Projected transactions per minute (capacity only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_load: Option<f64>,
}

/// Query over predictions; every set field must match
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictionFilter {
    /// Provider id
    pub provider: Option<String>,
    /// Prediction type
    #[serde(rename = "type")]
    pub prediction_type: Option<PredictionType>,
    /// Lifecycle status
    pub status: Option<PredictionStatus>,
    /// Maximum predictions to return
    pub limit: Option<usize>,
}

impl PredictionFilter {
    fn matches(&self, prediction: &Prediction) -> bool {
        self.provider.as_ref().is_none_or(|p| *p == prediction.provider)
            && self.prediction_type.is_none_or(|t| t == prediction.prediction_type)
            && self.status.is_none_or(|s| s == prediction.status)
    }
}

/// Predictor statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictiveStats {
    /// Predictions retained
    pub total_predictions: usize,
    /// Predictions still active
    pub active_predictions: usize,
    /// Predictions confirmed by an operator
    pub accurate_predictions: u64,
    /// Predictions rejected by an operator
    pub false_positives: u64,
    /// `accurate / (accurate + false_positives)`, once any were reviewed
    pub accuracy: Option<f64>,
    /// Windows waiting to start
    pub scheduled_windows: usize,
    /// Windows in progress
    pub active_windows: usize,
    /// Completed analysis passes
    pub analyses_run: u64,
    /// When the last pass completed
    pub last_analysis_at: Option<DateTime<Utc>>,
}

/// Events published by the predictor
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PredictiveEvent {
    /// A prediction was materialized
    PredictionCreated(Prediction),
    /// A prediction changed status
    PredictionStatusChanged {
        /// Prediction id
        id: String,
        /// Previous status
        from: PredictionStatus,
        /// New status
        to: PredictionStatus,
    },
    /// A maintenance window was created
    MaintenanceScheduled(MaintenanceWindow),
    /// A maintenance window changed status
    MaintenanceStatusChanged {
        /// Window id
        id: String,
        /// Provider id
        provider: String,
        /// Previous status
        from: MaintenanceStatus,
        /// New status
        to: MaintenanceStatus,
    },
}

#[derive(Debug, Default)]
struct PredictorState {
    predictions: VecDeque<Prediction>,
    windows: Vec<MaintenanceWindow>,
    accurate: u64,
    false_positives: u64,
    analyses_run: u64,
    last_analysis_at: Option<DateTime<Utc>>,
}

impl PredictorState {
    fn has_active(&self, provider: &str, prediction_type: PredictionType) -> bool {
        self.predictions.iter().any(|p| {
            p.status == PredictionStatus::Active && p.provider == provider && p.prediction_type == prediction_type
        })
    }
}

/// Forecasts provider failures and load surges
pub struct PredictiveMaintenance {
    ctx: Arc<ReliabilityContext>,
    config: PredictiveConfig,
    state: RwLock<PredictorState>,
    task: PeriodicTask,
    guard: TickGuard,
    events: EventBus<PredictiveEvent>,
}

impl std::fmt::Debug for PredictiveMaintenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("PredictiveMaintenance")
            .field("predictions", &state.predictions.len())
            .field("windows", &state.windows.len())
            .field("running", &self.task.is_running())
            .finish_non_exhaustive()
    }
}

impl PredictiveMaintenance {
    /// Create a stopped predictor
    #[must_use]
    pub fn new(ctx: Arc<ReliabilityContext>, config: &PredictiveConfig) -> Self {
        Self {
            task: PeriodicTask::new("predictive_maintenance", config.analysis_interval),
            guard: TickGuard::new(),
            events: EventBus::new("predictive_maintenance", ctx.config().events.channel_capacity),
            config: config.clone(),
            state: RwLock::new(PredictorState::default()),
            ctx,
        }
    }

    /// Predictions matching `filter`, newest first
    #[must_use]
    pub fn get_predictions(&self, filter: &PredictionFilter) -> Vec<Prediction> {
        let state = self.state.read();
        let matching = state.predictions.iter().rev().filter(|p| filter.matches(p));
        match filter.limit {
            Some(limit) => matching.take(limit).cloned().collect(),
            None => matching.cloned().collect(),
        }
    }

    /// Predictions still active, newest first
    #[must_use]
    pub fn get_active_predictions(&self) -> Vec<Prediction> {
        self.get_predictions(&PredictionFilter {
            status: Some(PredictionStatus::Active),
            ..PredictionFilter::default()
        })
    }

    /// Windows matching `filter`, soonest first
    #[must_use]
    pub fn get_maintenance_windows(&self, filter: &MaintenanceFilter) -> Vec<MaintenanceWindow> {
        let state = self.state.read();
        let mut windows: Vec<MaintenanceWindow> = state
            .windows
            .iter()
            .filter(|w| filter.matches(w))
            .cloned()
            .collect();
        windows.sort_by_key(|w| w.scheduled_at);
        if let Some(limit) = filter.limit {
            windows.truncate(limit);
        }
        windows
    }

    /// Review an active prediction
    ///
    /// Returns `false` for unknown ids, predictions that are no longer
    /// active, or a target of `Active`.
    pub fn update_prediction_status(&self, id: &str, status: PredictionStatus) -> bool {
        if !status.is_terminal() {
            return false;
        }
        let (provider, from) = {
            let mut state = self.state.write();
            let Some(prediction) = state.predictions.iter_mut().find(|p| p.id == id) else {
                debug!(prediction_id = id, "Unknown prediction, ignoring status update");
                return false;
            };
            if prediction.status.is_terminal() {
                return false;
            }
            let from = prediction.status;
            prediction.status = status;
            let provider = prediction.provider.clone();
            match status {
                PredictionStatus::Confirmed => state.accurate += 1,
                PredictionStatus::FalsePositive => state.false_positives += 1,
                PredictionStatus::Active | PredictionStatus::Expired => {}
            }
            (provider, from)
        };

        info!(prediction_id = id, provider = %provider, status = ?status, "Prediction reviewed");
        self.ctx.audit.log(
            AuditRecord::new(
                actions::PREDICTION_REVIEWED,
                Actor::user("operator"),
                Resource::new("prediction", id),
            )
            .with_details(json!({ "provider": provider, "status": status })),
        );
        self.events.publish(PredictiveEvent::PredictionStatusChanged {
            id: id.to_string(),
            from,
            to: status,
        });
        true
    }

    /// Cancel a window that has not started
    ///
    /// Returns `false` for unknown ids or windows that already started.
    pub fn cancel_maintenance_window(&self, id: &str) -> bool {
        let provider = {
            let mut state = self.state.write();
            let Some(window) = state.windows.iter_mut().find(|w| w.id == id) else {
                return false;
            };
            if !window.cancel() {
                return false;
            }
            window.provider.clone()
        };

        info!(window_id = id, provider = %provider, "Maintenance window cancelled");
        self.ctx.audit.log(
            AuditRecord::new(
                actions::MAINTENANCE_CANCELLED,
                Actor::user("operator"),
                Resource::new("maintenance_window", id),
            )
            .with_details(json!({ "provider": provider })),
        );
        self.events.publish(PredictiveEvent::MaintenanceStatusChanged {
            id: id.to_string(),
            provider,
            from: MaintenanceStatus::Scheduled,
            to: MaintenanceStatus::Cancelled,
        });
        true
    }

    /// Predictor statistics
    #[must_use]
    pub fn get_stats(&self) -> PredictiveStats {
        let state = self.state.read();
        let reviewed = state.accurate + state.false_positives;
        PredictiveStats {
            total_predictions: state.predictions.len(),
            active_predictions: state
                .predictions
                .iter()
                .filter(|p| p.status == PredictionStatus::Active)
                .count(),
            accurate_predictions: state.accurate,
            false_positives: state.false_positives,
            accuracy: (reviewed > 0).then(|| state.accurate as f64 / reviewed as f64),
            scheduled_windows: state
                .windows
                .iter()
                .filter(|w| w.status == MaintenanceStatus::Scheduled)
                .count(),
            active_windows: state
                .windows
                .iter()
                .filter(|w| w.status == MaintenanceStatus::Active)
                .count(),
            analyses_run: state.analyses_run,
            last_analysis_at: state.last_analysis_at,
        }
    }

    /// Subscribe to predictor events
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<PredictiveEvent> {
        self.events.subscribe()
    }

    /// Run one analysis pass now
    ///
    /// Returns the predictions created, or an empty list if a pass was
    /// already running.
    pub fn force_analysis(&self) -> Vec<Prediction> {
        let Some(_permit) = self.guard.try_enter() else {
            debug!("Predictive analysis already in progress, skipping");
            return Vec::new();
        };

        let now = Utc::now();
        self.housekeeping(now);

        let mut created = Vec::new();
        for provider in self.ctx.outcomes.providers() {
            if let Some(prediction) = self.assess_provider(&provider, now) {
                created.push(prediction);
            }
        }
        if let Some(prediction) = self.assess_capacity(now) {
            created.push(prediction);
        }

        let windows: Vec<MaintenanceWindow> = created
            .iter()
            .filter_map(|p| self.maybe_schedule_maintenance(p, now))
            .collect();

        {
            let mut state = self.state.write();
            state.analyses_run += 1;
            state.last_analysis_at = Some(now);
        }

        for prediction in &created {
            info!(
                provider = %prediction.provider,
                prediction_type = ?prediction.prediction_type,
                confidence = prediction.confidence,
                "Prediction created"
            );
            self.events
                .publish(PredictiveEvent::PredictionCreated(prediction.clone()));
        }
        for window in windows {
            self.events.publish(PredictiveEvent::MaintenanceScheduled(window));
        }
        created
    }

    /// Expire stale predictions and advance maintenance windows
    fn housekeeping(&self, now: DateTime<Utc>) {
        let mut changes = Vec::new();
        {
            let mut state = self.state.write();
            for prediction in &mut state.predictions {
                if prediction.status == PredictionStatus::Active && prediction.expires_at <= now {
                    prediction.status = PredictionStatus::Expired;
                    changes.push(PredictiveEvent::PredictionStatusChanged {
                        id: prediction.id.clone(),
                        from: PredictionStatus::Active,
                        to: PredictionStatus::Expired,
                    });
                }
            }
            for window in &mut state.windows {
                if let Some(from) = window.advance(now) {
                    debug!(window_id = %window.id, provider = %window.provider, ?from, to = ?window.status, "Maintenance window advanced");
                    changes.push(PredictiveEvent::MaintenanceStatusChanged {
                        id: window.id.clone(),
                        provider: window.provider.clone(),
                        from,
                        to: window.status,
                    });
                }
            }
        }
        for event in changes {
            self.events.publish(event);
        }
    }

    fn assess_provider(&self, provider: &str, now: DateTime<Utc>) -> Option<Prediction> {
        let window = to_chrono(self.config.trend_window, ChronoDuration::minutes(30));
        let start = now - window;
        let points = self
            .ctx
            .outcomes
            .samples_since(provider, start)
            .into_iter()
            .map(|s| (s.at, if s.success { 0.0 } else { 1.0 }));
        let trend = analyze(points, start, now, self.config.trend_buckets, self.config.horizon_buckets);
        let breaker = self.ctx.breakers.get_state(provider).state;

        let trending = trend.samples >= self.config.min_samples
            && trend.slope > 0.0
            && trend.projected >= self.config.error_rate_threshold;
        if !trending && breaker != CircuitState::Open {
            return None;
        }

        let healthy = self.ctx.health.is_healthy(provider);
        let confidence = score(
            &self.config.confidence_weights,
            &trend,
            self.config.error_rate_threshold,
            breaker,
            healthy,
        );
        let threshold = effective_threshold(&self.config);
        if confidence < threshold {
            debug!(provider, confidence, threshold, "Candidate below confidence threshold");
            return None;
        }

        let prediction_type = if breaker == CircuitState::Open || trend.projected >= self.config.failure_error_rate {
            PredictionType::Failure
        } else {
            PredictionType::Degradation
        };

        let prediction = Prediction {
            id: Uuid::new_v4().to_string(),
            provider: provider.to_string(),
            prediction_type,
            confidence,
            status: PredictionStatus::Active,
            created_at: now,
            expires_at: now + to_chrono(self.config.prediction_ttl, ChronoDuration::hours(1)),
            evidence_window: EvidenceWindow {
                start,
                end: now,
                samples: trend.samples,
                error_rate: trend.current,
                slope: trend.slope,
            },
            expected_load: None,
        };
        self.insert(prediction)
    }

    fn assess_capacity(&self, now: DateTime<Utc>) -> Option<Prediction> {
        let window = to_chrono(self.config.trend_window, ChronoDuration::minutes(30));
        let start = now - window;
        let points = self
            .ctx
            .load
            .since(start)
            .into_iter()
            .map(|s| (s.timestamp, s.transactions_per_minute));
        let trend = analyze(points, start, now, self.config.trend_buckets, self.config.horizon_buckets);
        if trend.slope <= 0.0 || trend.projected < self.config.capacity_alert_tpm {
            return None;
        }

        // Confidence grows with how much of the window has data.
        let confidence = trend.filled_buckets() as f64 / self.config.trend_buckets.max(1) as f64;
        let threshold = effective_threshold(&self.config);
        if confidence < threshold {
            debug!(confidence, threshold, projected = trend.projected, "Capacity trend below confidence threshold");
            return None;
        }

        let prediction = Prediction {
            id: Uuid::new_v4().to_string(),
            provider: ALL_PROVIDERS.to_string(),
            prediction_type: PredictionType::Capacity,
            confidence,
            status: PredictionStatus::Active,
            created_at: now,
            expires_at: now + to_chrono(self.config.prediction_ttl, ChronoDuration::hours(1)),
            evidence_window: EvidenceWindow {
                start,
                end: now,
                samples: trend.samples,
                error_rate: trend.current,
                slope: trend.slope,
            },
            expected_load: Some(trend.projected),
        };
        self.insert(prediction)
    }

    /// Store a prediction unless an active one of the same provider and type exists
    fn insert(&self, prediction: Prediction) -> Option<Prediction> {
        let mut state = self.state.write();
        if state.has_active(&prediction.provider, prediction.prediction_type) {
            debug!(
                provider = %prediction.provider,
                prediction_type = ?prediction.prediction_type,
                "Active prediction already exists"
            );
            return None;
        }
        state.predictions.push_back(prediction.clone());
        while state.predictions.len() > self.config.max_predictions.max(1) {
            state.predictions.pop_front();
        }
        Some(prediction)
    }

    fn maybe_schedule_maintenance(&self, prediction: &Prediction, now: DateTime<Utc>) -> Option<MaintenanceWindow> {
        if !self.config.auto_schedule_maintenance
            || prediction.prediction_type != PredictionType::Failure
            || prediction.confidence < self.config.maintenance_confidence
        {
            return None;
        }

        let window = {
            let mut state = self.state.write();
            if state
                .windows
                .iter()
                .any(|w| w.provider == prediction.provider && w.status.is_open())
            {
                return None;
            }
            let window = MaintenanceWindow::scheduled(
                prediction.provider.clone(),
                now + to_chrono(self.config.maintenance_lead_time, ChronoDuration::minutes(15)),
                self.config.maintenance_duration,
                Some(prediction.id.clone()),
            );
            state.windows.push(window.clone());
            window
        };

        info!(
            provider = %window.provider,
            window_id = %window.id,
            scheduled_at = %window.scheduled_at,
            "Maintenance scheduled"
        );
        self.ctx.audit.log(
            AuditRecord::new(
                actions::MAINTENANCE_SCHEDULED,
                Actor::system("predictive_maintenance"),
                Resource::new("maintenance_window", window.id.clone()),
            )
            .with_details(json!({
                "provider": window.provider,
                "scheduled_at": window.scheduled_at,
                "prediction_id": prediction.id,
                "confidence": prediction.confidence,
            })),
        );
        Some(window)
    }

    /// Analyze every `analysis_interval` until stopped
    pub fn start(self: &Arc<Self>) -> bool {
        if !self.config.enabled {
            warn!("Predictive maintenance disabled, not starting");
            return false;
        }
        let predictor: Weak<Self> = Arc::downgrade(self);
        self.task.start(move || {
            let predictor = predictor.clone();
            async move {
                if let Some(predictor) = predictor.upgrade() {
                    predictor.force_analysis();
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

    #[cfg(test)]
    fn backdate_prediction(&self, id: &str, expires_at: DateTime<Utc>) {
        if let Some(p) = self.state.write().predictions.iter_mut().find(|p| p.id == id) {
            p.expires_at = expires_at;
        }
    }
}

impl CapacityForecast for PredictiveMaintenance {
    fn expected_load(&self) -> Option<f64> {
        self.state
            .read()
            .predictions
            .iter()
            .filter(|p| p.status == PredictionStatus::Active && p.prediction_type == PredictionType::Capacity)
            .filter_map(|p| p.expected_load)
            .reduce(f64::max)
    }
}

fn to_chrono(duration: std::time::Duration, fallback: ChronoDuration) -> ChronoDuration {
    ChronoDuration::from_std(duration).unwrap_or(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, Sensitivity};
    use crate::outcomes::{CallOutcome, ErrorCategory};

    fn predictor(config: PredictiveConfig) -> PredictiveMaintenance {
        let ctx = Arc::new(ReliabilityContext::new(&Config::default()).unwrap());
        PredictiveMaintenance::new(ctx, &config)
    }

    /// Schedules maintenance for any prediction at or above 0.75
    fn eager() -> PredictiveConfig {
        PredictiveConfig {
            maintenance_confidence: 0.75,
            ..PredictiveConfig::default()
        }
    }

    /// Error rate climbing by `step` per 5-minute bucket over the last 30 minutes
    fn feed_rising_errors(p: &PredictiveMaintenance, provider: &str, per_bucket: usize, step: f64) {
        let now = Utc::now();
        for bucket in 0..6i64 {
            let at = now - ChronoDuration::minutes(30) + ChronoDuration::minutes(bucket * 5 + 2);
            let failures = ((bucket as f64 * step) * per_bucket as f64).round() as usize;
            for i in 0..per_bucket {
                let outcome = if i < failures {
                    CallOutcome::failure(provider, 100, ErrorCategory::ServerError)
                } else {
                    CallOutcome::success(provider, 100)
                };
                p.ctx.outcomes.record(&outcome.at(at));
            }
        }
    }

    #[test]
    fn rising_error_rate_predicts_failure_and_schedules_maintenance() {
        // GIVEN: mpesa's error rate climbing 10 points per bucket
        let p = predictor(eager());
        feed_rising_errors(&p, "mpesa", 40, 0.1);

        // WHEN: analyzed
        let created = p.force_analysis();

        // THEN: a failure prediction (slope, error and sample terms saturated) and a maintenance window
        assert_eq!(created.len(), 1);
        let prediction = &created[0];
        assert_eq!(prediction.provider, "mpesa");
        assert_eq!(prediction.prediction_type, PredictionType::Failure);
        assert!((prediction.confidence - 0.80).abs() < 1e-9);
        assert_eq!(prediction.evidence_window.samples, 240);

        let windows = p.get_maintenance_windows(&MaintenanceFilter::default());
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].status, MaintenanceStatus::Scheduled);
        assert_eq!(windows[0].triggering_prediction_id.as_deref(), Some(prediction.id.as_str()));
        assert!(windows[0].scheduled_at > Utc::now());
    }

    #[test]
    fn active_prediction_is_not_duplicated() {
        let p = predictor(eager());
        feed_rising_errors(&p, "mpesa", 40, 0.1);

        assert_eq!(p.force_analysis().len(), 1);
        assert!(p.force_analysis().is_empty());
        assert_eq!(p.get_predictions(&PredictionFilter::default()).len(), 1);
        assert_eq!(p.get_maintenance_windows(&MaintenanceFilter::default()).len(), 1);
    }

    #[test]
    fn maintenance_needs_its_own_confidence() {
        // GIVEN: the default 0.85 maintenance bar and a 0.80 prediction
        let p = predictor(PredictiveConfig::default());
        feed_rising_errors(&p, "mpesa", 40, 0.1);

        // WHEN: analyzed
        assert_eq!(p.force_analysis().len(), 1);

        // THEN: no window is scheduled
        assert!(p.get_maintenance_windows(&MaintenanceFilter::default()).is_empty());
    }

    #[test]
    fn flat_error_rate_predicts_nothing() {
        let p = predictor(PredictiveConfig::default());
        feed_rising_errors(&p, "paystack", 40, 0.0);
        assert!(p.force_analysis().is_empty());
        assert_eq!(p.get_stats().analyses_run, 1);
    }

    #[test]
    fn too_few_samples_is_not_a_candidate() {
        let p = predictor(PredictiveConfig {
            min_samples: 1_000,
            ..PredictiveConfig::default()
        });
        feed_rising_errors(&p, "mpesa", 40, 0.1);
        assert!(p.force_analysis().is_empty());
    }

    #[test]
    fn open_breaker_alone_is_a_candidate() {
        // GIVEN: a high-sensitivity predictor and a tripped breaker with few samples
        let p = predictor(PredictiveConfig {
            sensitivity: Sensitivity::High,
            confidence_threshold: 0.5,
            ..PredictiveConfig::default()
        });
        for _ in 0..5 {
            p.ctx
                .record_outcome(&CallOutcome::failure("airtel_money", 100, ErrorCategory::Network));
        }

        // WHEN: analyzed
        let created = p.force_analysis();

        // THEN: a failure prediction driven by breaker state and error rate
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].prediction_type, PredictionType::Failure);
    }

    #[test]
    fn review_updates_accuracy_and_is_terminal() {
        let p = predictor(PredictiveConfig::default());
        feed_rising_errors(&p, "mpesa", 40, 0.1);
        let id = p.force_analysis()[0].id.clone();

        assert!(p.update_prediction_status(&id, PredictionStatus::Confirmed));
        assert!(!p.update_prediction_status(&id, PredictionStatus::FalsePositive));
        assert!(!p.update_prediction_status("missing", PredictionStatus::Confirmed));

        let stats = p.get_stats();
        assert_eq!(stats.accurate_predictions, 1);
        assert_eq!(stats.false_positives, 0);
        assert_eq!(stats.accuracy, Some(1.0));
        assert_eq!(stats.active_predictions, 0);
    }

    #[test]
    fn expired_predictions_allow_a_new_one() {
        let p = predictor(PredictiveConfig::default());
        feed_rising_errors(&p, "mpesa", 40, 0.1);
        let first = p.force_analysis()[0].id.clone();

        p.backdate_prediction(&first, Utc::now() - ChronoDuration::seconds(1));
        let second = p.force_analysis();

        assert_eq!(second.len(), 1);
        let expired = p.get_predictions(&PredictionFilter {
            status: Some(PredictionStatus::Expired),
            ..PredictionFilter::default()
        });
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, first);
    }

    #[test]
    fn cancel_only_scheduled_windows() {
        let p = predictor(eager());
        feed_rising_errors(&p, "mpesa", 40, 0.1);
        p.force_analysis();
        let id = p.get_maintenance_windows(&MaintenanceFilter::default())[0].id.clone();

        assert!(p.cancel_maintenance_window(&id));
        assert!(!p.cancel_maintenance_window(&id));
        assert!(!p.cancel_maintenance_window("missing"));
        assert_eq!(p.get_stats().scheduled_windows, 0);
    }

    #[test]
    fn rising_load_produces_capacity_forecast() {
        // GIVEN: load climbing 200 tpm per bucket up to 1100
        let p = predictor(PredictiveConfig::default());
        let now = Utc::now();
        for bucket in 0..6i64 {
            let at = now - ChronoDuration::minutes(30) + ChronoDuration::minutes(bucket * 5 + 2);
            p.ctx.load.record_at(100.0 + 200.0 * bucket as f64, at);
        }

        // WHEN: analyzed
        let created = p.force_analysis();

        // THEN: one fleet-wide capacity prediction projecting 1100 + 3 × 200
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].provider, ALL_PROVIDERS);
        assert_eq!(created[0].prediction_type, PredictionType::Capacity);
        let expected = p.expected_load().unwrap();
        assert!((expected - 1_700.0).abs() < 1e-6);
    }

    #[test]
    fn limit_caps_results() {
        let p = predictor(PredictiveConfig::default());
        feed_rising_errors(&p, "mpesa", 40, 0.1);
        feed_rising_errors(&p, "paystack", 40, 0.1);
        p.force_analysis();

        let limited = p.get_predictions(&PredictionFilter {
            limit: Some(1),
            ..PredictionFilter::default()
        });
        assert_eq!(limited.len(), 1);
    }
}
