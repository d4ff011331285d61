//! Auto-scaler
//!
//! Sizes the instance pool from the latest transaction rate:
//!
//! ```text
//! load_factor = tpm / (target_transactions_per_instance × current)
//! desired     = ceil(tpm / (target_transactions_per_instance × target_load_factor))
//! ```
//!
//! `desired` is only acted on when the load factor leaves the
//! `[scale_down_threshold, scale_up_threshold]` band. With predictive
//! scaling enabled, active [`ScheduleEntry`] floors and capacity forecasts
//! can raise it further. Every result is clamped to
//! `[min_instances, max_instances]`.

mod schedule;

pub use schedule::ScheduleEntry;

use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::Result;
use crate::audit::{Actor, AuditRecord, Resource, actions};
use crate::config::ScalingConfig;
use crate::context::ReliabilityContext;
use crate::events::EventBus;
use crate::load::LoadSample;
use crate::predictive::CapacityForecast;
use crate::scheduler::{PeriodicTask, TickGuard};

const OPERATOR: &str = "operator";
const COMPONENT: &str = "auto_scaler";

/// Direction of a scaling decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingEventType {
    /// Instances added
    ScaleUp,
    /// Instances removed
    ScaleDown,
    /// Target equalled the current count
    NoOp,
}

/// What caused a scaling decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingTrigger {
    /// Load factor left the threshold band
    Reactive,
    /// A schedule floor applied
    Scheduled,
    /// A capacity forecast applied
    Predictive,
    /// Operator `force_scale`
    Manual,
    /// New bounds from `update_config`
    Config,
}

/// One scaling decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingEvent {
    /// Event id
    pub id: String,
    /// Direction
    #[serde(rename = "type")]
    pub event_type: ScalingEventType,
    /// Instances before
    pub from_instances: u32,
    /// Instances after (already clamped)
    pub to_instances: u32,
    /// Human-readable cause
    pub reason: String,
    /// Cause category
    pub trigger: ScalingTrigger,
    /// Load factor at decision time, against `from_instances`
    pub load_factor: f64,
    /// When the decision was made
    pub timestamp: DateTime<Utc>,
}

impl ScalingEvent {
    fn new(from: u32, to: u32, reason: impl Into<String>, trigger: ScalingTrigger, load_factor: f64) -> Self {
        let event_type = match to.cmp(&from) {
            std::cmp::Ordering::Greater => ScalingEventType::ScaleUp,
            std::cmp::Ordering::Less => ScalingEventType::ScaleDown,
            std::cmp::Ordering::Equal => ScalingEventType::NoOp,
        };
        Self {
            id: Uuid::new_v4().to_string(),
            event_type,
            from_instances: from,
            to_instances: to,
            reason: reason.into(),
            trigger,
            load_factor,
            timestamp: Utc::now(),
        }
    }
}

/// Partial scaler settings; unset fields keep their current value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScalingConfigUpdate {
    /// Lower instance bound
    pub min_instances: Option<u32>,
    /// Upper instance bound
    pub max_instances: Option<u32>,
    /// Transactions per minute one instance is sized for
    pub target_transactions_per_instance: Option<f64>,
    /// Scale-up load factor
    pub scale_up_threshold: Option<f64>,
    /// Scale-down load factor
    pub scale_down_threshold: Option<f64>,
    /// Load factor aimed for after a change
    pub target_load_factor: Option<f64>,
    /// Minimum time between automatic scale-ups
    #[serde(with = "humantime_serde::option")]
    pub scale_up_cooldown: Option<Duration>,
    /// Minimum time between automatic scale-downs
    #[serde(with = "humantime_serde::option")]
    pub scale_down_cooldown: Option<Duration>,
    /// Interval between evaluations (applies on the next start)
    #[serde(with = "humantime_serde::option")]
    pub evaluation_interval: Option<Duration>,
    /// Consult schedules and capacity forecasts
    pub predictive_scaling_enabled: Option<bool>,
    /// Load sample retention
    #[serde(with = "humantime_serde::option")]
    pub load_retention: Option<Duration>,
    /// Scaling events kept in memory
    pub max_events: Option<usize>,
}

impl ScalingConfigUpdate {
    /// `base` with every set field replaced
    #[must_use]
    pub fn merged_into(&self, base: &ScalingConfig) -> ScalingConfig {
        ScalingConfig {
            min_instances: self.min_instances.unwrap_or(base.min_instances),
            max_instances: self.max_instances.unwrap_or(base.max_instances),
            target_transactions_per_instance: self
                .target_transactions_per_instance
                .unwrap_or(base.target_transactions_per_instance),
            scale_up_threshold: self.scale_up_threshold.unwrap_or(base.scale_up_threshold),
            scale_down_threshold: self.scale_down_threshold.unwrap_or(base.scale_down_threshold),
            target_load_factor: self.target_load_factor.unwrap_or(base.target_load_factor),
            scale_up_cooldown: self.scale_up_cooldown.unwrap_or(base.scale_up_cooldown),
            scale_down_cooldown: self.scale_down_cooldown.unwrap_or(base.scale_down_cooldown),
            evaluation_interval: self.evaluation_interval.unwrap_or(base.evaluation_interval),
            predictive_scaling_enabled: self
                .predictive_scaling_enabled
                .unwrap_or(base.predictive_scaling_enabled),
            load_retention: self.load_retention.unwrap_or(base.load_retention),
            max_events: self.max_events.unwrap_or(base.max_events),
            ..base.clone()
        }
    }
}

/// Query over scaling history; every set field must match
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScalingFilter {
    /// Direction
    #[serde(rename = "type")]
    pub event_type: Option<ScalingEventType>,
    /// Cause category
    pub trigger: Option<ScalingTrigger>,
    /// Only events at or after this time
    pub since: Option<DateTime<Utc>>,
    /// Maximum events to return
    pub limit: Option<usize>,
}

impl ScalingFilter {
    fn matches(&self, event: &ScalingEvent) -> bool {
        self.event_type.is_none_or(|t| t == event.event_type)
            && self.trigger.is_none_or(|t| t == event.trigger)
            && self.since.is_none_or(|s| event.timestamp >= s)
    }
}

/// Scaler statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingStats {
    /// Instances in effect
    pub current_instances: u32,
    /// Lower bound
    pub min_instances: u32,
    /// Upper bound
    pub max_instances: u32,
    /// Latest transactions per minute, if any was reported
    pub current_transactions_per_minute: Option<f64>,
    /// Load factor against the current instance count
    pub load_factor: f64,
    /// Scale-ups recorded
    pub total_scale_ups: u64,
    /// Scale-downs recorded
    pub total_scale_downs: u64,
    /// Completed evaluations
    pub evaluations: u64,
    /// Last change of any kind
    pub last_scaled_at: Option<DateTime<Utc>>,
    /// Names of schedules active now
    pub active_schedules: Vec<String>,
    /// Expected load from capacity forecasts
    pub predicted_transactions_per_minute: Option<f64>,
}

#[derive(Debug)]
struct ScalerState {
    config: ScalingConfig,
    current: u32,
    history: VecDeque<ScalingEvent>,
    last_automatic_change: Option<DateTime<Utc>>,
    last_scaled_at: Option<DateTime<Utc>>,
    scale_ups: u64,
    scale_downs: u64,
    evaluations: u64,
}

impl ScalerState {
    fn clamp(&self, target: u32) -> u32 {
        let min = self.config.min_instances;
        target.clamp(min, self.config.max_instances.max(min))
    }

    fn load_factor(&self, tpm: f64) -> f64 {
        let capacity = self.config.target_transactions_per_instance * f64::from(self.current.max(1));
        if capacity > 0.0 { tpm / capacity } else { 0.0 }
    }

    /// Instances needed to serve `tpm` at the target load factor
    fn instances_for(&self, tpm: f64) -> u32 {
        let per_instance = self.config.target_transactions_per_instance * self.config.target_load_factor;
        if per_instance <= 0.0 {
            return self.current;
        }
        (tpm / per_instance).ceil().clamp(0.0, f64::from(u32::MAX)) as u32
    }

    /// Record an effective change and return the event
    fn apply(&mut self, event: ScalingEvent) -> ScalingEvent {
        self.current = event.to_instances;
        self.last_scaled_at = Some(event.timestamp);
        match event.event_type {
            ScalingEventType::ScaleUp => self.scale_ups += 1,
            ScalingEventType::ScaleDown => self.scale_downs += 1,
            ScalingEventType::NoOp => {}
        }
        self.history.push_back(event.clone());
        while self.history.len() > self.config.max_events.max(1) {
            self.history.pop_front();
        }
        event
    }
}

/// Adjusts the instance count from load, schedules and capacity forecasts
pub struct AutoScaler {
    ctx: Arc<ReliabilityContext>,
    state: Mutex<ScalerState>,
    forecast: RwLock<Option<Arc<dyn CapacityForecast>>>,
    task: PeriodicTask,
    guard: TickGuard,
    events: EventBus<ScalingEvent>,
}

impl std::fmt::Debug for AutoScaler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("AutoScaler")
            .field("current_instances", &state.current)
            .field("events", &state.history.len())
            .field("running", &self.task.is_running())
            .finish_non_exhaustive()
    }
}

impl AutoScaler {
    /// Create a stopped scaler at `initial_instances` (or `min_instances`)
    #[must_use]
    pub fn new(ctx: Arc<ReliabilityContext>, config: &ScalingConfig) -> Self {
        let mut config = config.clone();
        for entry in &mut config.schedules {
            entry.ensure_id();
        }
        let current = config
            .initial_instances
            .unwrap_or(config.min_instances)
            .clamp(config.min_instances, config.max_instances.max(config.min_instances));
        ctx.load.set_retention(config.load_retention);

        Self {
            task: PeriodicTask::new("auto_scaler", config.evaluation_interval),
            guard: TickGuard::new(),
            events: EventBus::new("auto_scaler", ctx.config().events.channel_capacity),
            forecast: RwLock::new(None),
            state: Mutex::new(ScalerState {
                config,
                current,
                history: VecDeque::new(),
                last_automatic_change: None,
                last_scaled_at: None,
                scale_ups: 0,
                scale_downs: 0,
                evaluations: 0,
            }),
            ctx,
        }
    }

    /// Use `forecast` for predictive scaling
    #[must_use]
    pub fn with_forecast(self, forecast: Arc<dyn CapacityForecast>) -> Self {
        self.set_forecast(forecast);
        self
    }

    /// Replace the capacity forecast source
    pub fn set_forecast(&self, forecast: Arc<dyn CapacityForecast>) {
        *self.forecast.write() = Some(forecast);
    }

    /// Instances in effect
    #[must_use]
    pub fn current_instances(&self) -> u32 {
        self.state.lock().current
    }

    /// Current settings
    #[must_use]
    pub fn get_config(&self) -> ScalingConfig {
        self.state.lock().config.clone()
    }

    /// Merge `update` into the settings
    ///
    /// The current instance count is re-clamped to the new bounds; a change
    /// is recorded as a [`ScalingTrigger::Config`] event.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Config`] if the merged settings are invalid;
    /// nothing changes in that case.
    pub fn update_config(&self, update: &ScalingConfigUpdate) -> Result<ScalingConfig> {
        let (config, event) = {
            let mut state = self.state.lock();
            let merged = update.merged_into(&state.config);
            merged.validate()?;
            state.config = merged;

            let tpm = self.latest_tpm().unwrap_or(0.0);
            let target = state.clamp(state.current);
            let event = (target != state.current).then(|| {
                let event = ScalingEvent::new(
                    state.current,
                    target,
                    format!(
                        "instance bounds changed to [{}, {}]",
                        state.config.min_instances, state.config.max_instances
                    ),
                    ScalingTrigger::Config,
                    state.load_factor(tpm),
                );
                state.apply(event)
            });
            (state.config.clone(), event)
        };

        self.ctx.load.set_retention(config.load_retention);
        self.task.set_interval(config.evaluation_interval);

        info!(
            min_instances = config.min_instances,
            max_instances = config.max_instances,
            "Scaling config updated"
        );
        self.ctx.audit.log(
            AuditRecord::new(
                actions::SCALING_CONFIG_UPDATED,
                Actor::user(OPERATOR),
                Resource::new("scaling_config", COMPONENT),
            )
            .with_details(json!({ "update": update })),
        );
        if let Some(event) = event {
            self.events.publish(event);
        }
        Ok(config)
    }

    /// Scaler statistics
    #[must_use]
    pub fn get_stats(&self) -> ScalingStats {
        let now = Utc::now();
        let tpm = self.latest_tpm();
        let predicted = self.expected_load();
        let state = self.state.lock();
        ScalingStats {
            current_instances: state.current,
            min_instances: state.config.min_instances,
            max_instances: state.config.max_instances,
            current_transactions_per_minute: tpm,
            load_factor: state.load_factor(tpm.unwrap_or(0.0)),
            total_scale_ups: state.scale_ups,
            total_scale_downs: state.scale_downs,
            evaluations: state.evaluations,
            last_scaled_at: state.last_scaled_at,
            active_schedules: state
                .config
                .schedules
                .iter()
                .filter(|s| s.is_active(now))
                .map(|s| s.name.clone())
                .collect(),
            predicted_transactions_per_minute: predicted,
        }
    }

    /// Scaling history matching `filter`, newest first
    #[must_use]
    pub fn get_scaling_events(&self, filter: &ScalingFilter) -> Vec<ScalingEvent> {
        let state = self.state.lock();
        let matching = state.history.iter().rev().filter(|e| filter.matches(e));
        match filter.limit {
            Some(limit) => matching.take(limit).cloned().collect(),
            None => matching.cloned().collect(),
        }
    }

    /// Load samples from the last `minutes` (everything retained when `None`)
    #[must_use]
    pub fn get_load_history(&self, minutes: Option<u32>) -> Vec<LoadSample> {
        self.ctx.load.last_minutes(minutes)
    }

    /// Report the current transactions per minute
    pub fn set_transaction_rate(&self, transactions_per_minute: f64) {
        self.ctx.record_load(transactions_per_minute);
    }

    /// Add a schedule, replacing one with the same id
    pub fn add_schedule(&self, mut entry: ScheduleEntry) -> ScheduleEntry {
        entry.ensure_id();
        let mut state = self.state.lock();
        state.config.schedules.retain(|s| s.id != entry.id);
        state.config.schedules.push(entry.clone());
        debug!(schedule = %entry.name, id = %entry.id, "Schedule added");
        entry
    }

    /// Remove a schedule; `false` if the id is unknown
    pub fn remove_schedule(&self, id: &str) -> bool {
        let mut state = self.state.lock();
        let before = state.config.schedules.len();
        state.config.schedules.retain(|s| s.id != id);
        state.config.schedules.len() != before
    }

    /// Known schedules
    #[must_use]
    pub fn get_schedules(&self) -> Vec<ScheduleEntry> {
        self.state.lock().config.schedules.clone()
    }

    /// Subscribe to scaling events
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ScalingEvent> {
        self.events.subscribe()
    }

    /// Set the instance count, clamped to the bounds
    ///
    /// Cooldowns do not apply. Forcing the current count returns a
    /// [`ScalingEventType::NoOp`] event that is not kept in history.
    pub fn force_scale(&self, target: u32, reason: &str) -> ScalingEvent {
        let tpm = self.latest_tpm().unwrap_or(0.0);
        let (event, applied) = {
            let mut state = self.state.lock();
            let clamped = state.clamp(target);
            let event = ScalingEvent::new(
                state.current,
                clamped,
                reason,
                ScalingTrigger::Manual,
                state.load_factor(tpm),
            );
            if event.event_type == ScalingEventType::NoOp {
                (event, false)
            } else {
                (state.apply(event), true)
            }
        };

        self.ctx.audit.log(
            AuditRecord::new(
                actions::SCALE_FORCED,
                Actor::user(OPERATOR),
                Resource::new("instances", COMPONENT),
            )
            .with_details(json!({
                "requested": target,
                "from": event.from_instances,
                "to": event.to_instances,
                "reason": reason,
            })),
        );

        if applied {
            info!(
                from = event.from_instances,
                to = event.to_instances,
                requested = target,
                reason,
                "Instance count forced"
            );
            self.events.publish(event.clone());
        } else {
            debug!(instances = event.to_instances, requested = target, "Forced scale is a no-op");
        }
        event
    }

    /// Evaluate load once and apply the decision
    ///
    /// Returns the event for an effective change; `None` when nothing
    /// changed, a cooldown applied, or an evaluation was already running.
    pub fn evaluate_now(&self) -> Option<ScalingEvent> {
        let Some(_permit) = self.guard.try_enter() else {
            debug!("Scaling evaluation already in progress, skipping");
            return None;
        };

        let now = Utc::now();
        let tpm = self.latest_tpm();
        let expected = self.expected_load();

        let event = {
            let mut state = self.state.lock();
            state.evaluations += 1;
            let event = Self::decide(&state, tpm, expected, now)?;
            state.last_automatic_change = Some(now);
            state.apply(event)
        };

        info!(
            from = event.from_instances,
            to = event.to_instances,
            trigger = ?event.trigger,
            load_factor = event.load_factor,
            reason = %event.reason,
            "Scaling applied"
        );
        self.ctx.audit.log(
            AuditRecord::new(
                actions::SCALE_APPLIED,
                Actor::system(COMPONENT),
                Resource::new("instances", COMPONENT),
            )
            .with_details(json!({
                "from": event.from_instances,
                "to": event.to_instances,
                "trigger": event.trigger,
                "load_factor": event.load_factor,
                "reason": event.reason,
            })),
        );
        self.events.publish(event.clone());
        Some(event)
    }

    fn decide(
        state: &ScalerState,
        tpm: Option<f64>,
        expected: Option<f64>,
        now: DateTime<Utc>,
    ) -> Option<ScalingEvent> {
        let config = &state.config;
        let load_factor = state.load_factor(tpm.unwrap_or(0.0));

        let mut desired = state.current;
        let mut trigger = ScalingTrigger::Reactive;
        let mut reason = String::new();

        if let Some(tpm) = tpm
            && (load_factor > config.scale_up_threshold || load_factor < config.scale_down_threshold)
        {
            desired = state.instances_for(tpm);
            reason = format!("load factor {load_factor:.2} at {tpm:.0} tpm");
        }

        if config.predictive_scaling_enabled {
            if let Some(floor) = config
                .schedules
                .iter()
                .filter(|s| s.is_active(now))
                .max_by_key(|s| s.min_instances)
                && floor.min_instances > desired
            {
                desired = floor.min_instances;
                trigger = ScalingTrigger::Scheduled;
                reason = format!("schedule '{}' requires {}", floor.name, floor.min_instances);
            }
            if let Some(expected) = expected {
                let needed = state.instances_for(expected);
                if needed > desired {
                    desired = needed;
                    trigger = ScalingTrigger::Predictive;
                    reason = format!("forecast load {expected:.0} tpm");
                }
            }
        }

        let target = state.clamp(desired);
        if target == state.current {
            return None;
        }

        let cooldown = if target > state.current {
            config.scale_up_cooldown
        } else {
            config.scale_down_cooldown
        };
        let cooldown = ChronoDuration::from_std(cooldown).unwrap_or_else(|_| ChronoDuration::hours(1));
        if let Some(last) = state.last_automatic_change
            && now - last < cooldown
        {
            debug!(
                current = state.current,
                target,
                since_last_change_ms = (now - last).num_milliseconds(),
                "Scaling suppressed by cooldown"
            );
            return None;
        }

        Some(ScalingEvent::new(state.current, target, reason, trigger, load_factor))
    }

    fn latest_tpm(&self) -> Option<f64> {
        self.ctx.load.latest().map(|s| s.transactions_per_minute)
    }

    fn expected_load(&self) -> Option<f64> {
        self.forecast.read().as_ref().and_then(|f| f.expected_load())
    }

    /// Evaluate every `evaluation_interval` until stopped
    pub fn start(self: &Arc<Self>) -> bool {
        if !self.state.lock().config.enabled {
            warn!("Auto-scaler disabled, not starting");
            return false;
        }
        let scaler: Weak<Self> = Arc::downgrade(self);
        self.task.start(move || {
            let scaler = scaler.clone();
            async move {
                if let Some(scaler) = scaler.upgrade() {
                    scaler.evaluate_now();
                }
            }
        })
    }

    /// Stop the periodic evaluation
    pub fn stop(&self) -> bool {
        self.task.stop()
    }

    /// Whether the periodic evaluation is active
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task.is_running()
    }
}
