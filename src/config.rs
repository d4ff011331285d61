//! Configuration management

use std::{collections::HashMap, path::Path, path::PathBuf, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::optimizer::ProviderConfigUpdate;
use crate::scaling::ScheduleEntry;
use crate::{Error, Result};

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "PAYMENTS_RELIABILITY_";

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct Config {
    /// Health monitor configuration
    pub health: HealthConfig,
    /// Circuit breaker configuration (shared by every provider)
    pub circuit_breaker: CircuitBreakerConfig,
    /// Rolling call-outcome store
    pub outcomes: OutcomeConfig,
    /// Audit ledger configuration
    pub audit: AuditConfig,
    /// Auto-optimizer configuration
    pub optimizer: OptimizerConfig,
    /// Predictive maintenance configuration
    pub predictive: PredictiveConfig,
    /// Auto-scaler configuration
    pub scaling: ScalingConfig,
    /// Event channel configuration
    pub events: EventsConfig,
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist, cannot be parsed,
    /// or fails validation.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints that serde cannot express
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first violated constraint.
    pub fn validate(&self) -> Result<()> {
        let intervals = [
            ("health.interval", self.health.interval),
            ("optimizer.analysis_interval", self.optimizer.analysis_interval),
            ("predictive.analysis_interval", self.predictive.analysis_interval),
            ("scaling.evaluation_interval", self.scaling.evaluation_interval),
        ];
        for (name, interval) in intervals {
            if interval.is_zero() {
                return Err(Error::Config(format!("{name} must be greater than zero")));
            }
        }

        if self.circuit_breaker.failure_threshold == 0 {
            return Err(Error::Config(
                "circuit_breaker.failure_threshold must be at least 1".to_string(),
            ));
        }

        if self.predictive.trend_buckets < 2 {
            return Err(Error::Config(
                "predictive.trend_buckets must be at least 2".to_string(),
            ));
        }

        self.scaling.validate()
    }
}

/// Health monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Run registered checks periodically
    pub enabled: bool,
    /// Interval between check runs
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Upper bound for a single check
    #[serde(with = "humantime_serde")]
    pub check_timeout: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(30),
            check_timeout: Duration::from_secs(5),
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Enable circuit breaker
    pub enabled: bool,
    /// Consecutive failures before opening
    pub failure_threshold: u32,
    /// Initial cooldown before the half-open trial call
    #[serde(with = "humantime_serde")]
    pub reset_timeout: Duration,
    /// Upper bound for the backed-off cooldown
    #[serde(with = "humantime_serde")]
    pub max_cooldown: Duration,
    /// Cooldown multiplier applied when a trial call fails
    pub backoff_multiplier: f64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            max_cooldown: Duration::from_secs(300),
            backoff_multiplier: 2.0,
        }
    }
}

/// Rolling call-outcome store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutcomeConfig {
    /// How long samples are retained
    #[serde(with = "humantime_serde")]
    pub retention: Duration,
    /// Hard cap on samples kept per provider
    pub max_samples_per_provider: usize,
}

impl Default for OutcomeConfig {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(2 * 60 * 60),
            max_samples_per_provider: 10_000,
        }
    }
}

/// Audit ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Enable audit logging
    pub enabled: bool,
    /// Redact sensitive keys in `details` before hashing
    pub redact_sensitive: bool,
    /// Truncate actor IP addresses to a coarser network
    pub truncate_ip: bool,
    /// Additional key patterns (regex, case-insensitive) treated as sensitive
    pub sensitive_keys: Vec<String>,
    /// Directory for monthly line-delimited audit files (memory only when unset)
    pub storage_dir: Option<PathBuf>,
    /// Entries older than this are pruned by the retention policy
    #[serde(with = "humantime_serde")]
    pub retention: Duration,
    /// Maximum number of retained entries
    pub max_entries: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            redact_sensitive: true,
            truncate_ip: true,
            sensitive_keys: Vec::new(),
            storage_dir: None,
            retention: Duration::from_secs(90 * 24 * 60 * 60),
            max_entries: 100_000,
        }
    }
}

/// Auto-optimizer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Run the periodic analysis loop
    pub enabled: bool,
    /// Interval between analyses
    #[serde(with = "humantime_serde")]
    pub analysis_interval: Duration,
    /// Outcomes younger than this feed the analysis
    #[serde(with = "humantime_serde")]
    pub analysis_window: Duration,
    /// Samples required before any tuning happens
    pub min_samples_for_optimization: usize,
    /// Success rate below which retries/timeouts are loosened
    pub success_rate_threshold: f64,
    /// Consecutive perfect analyses before rate limit/cache are relaxed
    pub stable_cycles_required: u32,
    /// Optimization records kept in memory
    pub max_records: usize,
    /// Providers registered at startup, with optional overrides
    pub providers: HashMap<String, ProviderConfigUpdate>,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            analysis_interval: Duration::from_secs(5 * 60),
            analysis_window: Duration::from_secs(15 * 60),
            min_samples_for_optimization: 50,
            success_rate_threshold: 0.95,
            stable_cycles_required: 2,
            max_records: 1_000,
            providers: HashMap::new(),
        }
    }
}

/// How eagerly the predictor materializes predictions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Sensitivity {
    /// Raise the confidence bar
    Low,
    /// Use the configured threshold as is
    #[default]
    Medium,
    /// Lower the confidence bar
    High,
}

impl Sensitivity {
    /// Multiplier applied to the confidence threshold
    #[must_use]
    pub fn threshold_factor(self) -> f64 {
        match self {
            Self::Low => 1.15,
            Self::Medium => 1.0,
            Self::High => 0.85,
        }
    }
}

/// Weights of the confidence score
///
/// Each term is normalized to `[0, 1]` before weighting; the weighted sum is
/// clamped to `[0, 1]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceWeights {
    /// Weight of the error-rate slope term
    pub slope: f64,
    /// Weight of the current error-rate term
    pub error_rate: f64,
    /// Weight of the sample-count term
    pub samples: f64,
    /// Weight of the breaker-state term
    pub breaker: f64,
    /// Slope (error rate per bucket) at which the slope term saturates
    pub slope_saturation: f64,
    /// Sample count at which the sample term saturates
    pub sample_saturation: usize,
    /// Added when the health monitor reports the provider unhealthy
    pub health_penalty: f64,
}

impl Default for ConfidenceWeights {
    fn default() -> Self {
        Self {
            slope: 0.35,
            error_rate: 0.30,
            samples: 0.15,
            breaker: 0.20,
            slope_saturation: 0.05,
            sample_saturation: 200,
            health_penalty: 0.10,
        }
    }
}

/// Predictive maintenance configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictiveConfig {
    /// Run the periodic analysis loop
    pub enabled: bool,
    /// Interval between analyses
    #[serde(with = "humantime_serde")]
    pub analysis_interval: Duration,
    /// Span over which trends are computed
    #[serde(with = "humantime_serde")]
    pub trend_window: Duration,
    /// Number of sub-windows the trend window is split into
    pub trend_buckets: usize,
    /// How many buckets ahead the trend is projected
    pub horizon_buckets: f64,
    /// Samples required inside the trend window
    pub min_samples: usize,
    /// Projected error rate that makes a provider a candidate
    pub error_rate_threshold: f64,
    /// Projected error rate classified as an impending failure
    pub failure_error_rate: f64,
    /// Minimum confidence for a prediction to be recorded
    pub confidence_threshold: f64,
    /// Scales the confidence threshold
    pub sensitivity: Sensitivity,
    /// Confidence scoring policy
    pub confidence_weights: ConfidenceWeights,
    /// Schedule maintenance for high-confidence failure predictions
    pub auto_schedule_maintenance: bool,
    /// Confidence required before maintenance is scheduled
    pub maintenance_confidence: f64,
    /// Delay between the prediction and the maintenance start
    #[serde(with = "humantime_serde")]
    pub maintenance_lead_time: Duration,
    /// Estimated maintenance duration
    #[serde(with = "humantime_serde")]
    pub maintenance_duration: Duration,
    /// Active predictions expire after this long
    #[serde(with = "humantime_serde")]
    pub prediction_ttl: Duration,
    /// Projected transactions per minute that triggers a capacity prediction
    pub capacity_alert_tpm: f64,
    /// Predictions kept in memory
    pub max_predictions: usize,
}

impl Default for PredictiveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            analysis_interval: Duration::from_secs(5 * 60),
            trend_window: Duration::from_secs(30 * 60),
            trend_buckets: 6,
            horizon_buckets: 3.0,
            min_samples: 20,
            error_rate_threshold: 0.10,
            failure_error_rate: 0.30,
            confidence_threshold: 0.70,
            sensitivity: Sensitivity::Medium,
            confidence_weights: ConfidenceWeights::default(),
            auto_schedule_maintenance: true,
            maintenance_confidence: 0.85,
            maintenance_lead_time: Duration::from_secs(15 * 60),
            maintenance_duration: Duration::from_secs(30 * 60),
            prediction_ttl: Duration::from_secs(60 * 60),
            capacity_alert_tpm: 1_000.0,
            max_predictions: 1_000,
        }
    }
}

/// Auto-scaler configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScalingConfig {
    /// Run the periodic evaluation loop
    pub enabled: bool,
    /// Interval between evaluations
    #[serde(with = "humantime_serde")]
    pub evaluation_interval: Duration,
    /// Lower instance bound
    pub min_instances: u32,
    /// Upper instance bound
    pub max_instances: u32,
    /// Starting instance count (defaults to `min_instances`)
    pub initial_instances: Option<u32>,
    /// Transactions per minute one instance is sized for
    pub target_transactions_per_instance: f64,
    /// Load factor above which the scaler adds instances
    pub scale_up_threshold: f64,
    /// Load factor below which the scaler removes instances
    pub scale_down_threshold: f64,
    /// Load factor the scaler aims for after a change
    pub target_load_factor: f64,
    /// Minimum time between automatic scale-ups
    #[serde(with = "humantime_serde")]
    pub scale_up_cooldown: Duration,
    /// Minimum time between automatic scale-downs
    #[serde(with = "humantime_serde")]
    pub scale_down_cooldown: Duration,
    /// Consult schedules and capacity predictions
    pub predictive_scaling_enabled: bool,
    /// How long load samples are retained
    #[serde(with = "humantime_serde")]
    pub load_retention: Duration,
    /// Scaling events kept in memory
    pub max_events: usize,
    /// Known load schedules
    pub schedules: Vec<ScheduleEntry>,
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            evaluation_interval: Duration::from_secs(30),
            min_instances: 1,
            max_instances: 10,
            initial_instances: None,
            target_transactions_per_instance: 100.0,
            scale_up_threshold: 0.8,
            scale_down_threshold: 0.3,
            target_load_factor: 0.6,
            scale_up_cooldown: Duration::from_secs(60),
            scale_down_cooldown: Duration::from_secs(5 * 60),
            predictive_scaling_enabled: true,
            load_retention: Duration::from_secs(24 * 60 * 60),
            max_events: 1_000,
            schedules: Vec::new(),
        }
    }
}

impl ScalingConfig {
    /// Check instance bounds and thresholds
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when bounds or thresholds are inconsistent.
    pub fn validate(&self) -> Result<()> {
        if self.evaluation_interval.is_zero() {
            return Err(Error::Config(
                "scaling.evaluation_interval must be greater than zero".to_string(),
            ));
        }
        if self.min_instances == 0 {
            return Err(Error::Config(
                "scaling.min_instances must be at least 1".to_string(),
            ));
        }
        if self.min_instances > self.max_instances {
            return Err(Error::Config(format!(
                "scaling.min_instances ({}) exceeds scaling.max_instances ({})",
                self.min_instances, self.max_instances
            )));
        }
        if self.target_transactions_per_instance <= 0.0 {
            return Err(Error::Config(
                "scaling.target_transactions_per_instance must be positive".to_string(),
            ));
        }
        if self.scale_down_threshold >= self.scale_up_threshold {
            return Err(Error::Config(format!(
                "scaling.scale_down_threshold ({}) must be below scaling.scale_up_threshold ({})",
                self.scale_down_threshold, self.scale_up_threshold
            )));
        }
        if self.target_load_factor <= 0.0 {
            return Err(Error::Config(
                "scaling.target_load_factor must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Event channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Buffered events per component channel before slow subscribers lag
    pub channel_capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn zero_interval_is_rejected() {
        // GIVEN: a config with a zero optimizer interval
        let mut config = Config::default();
        config.optimizer.analysis_interval = Duration::ZERO;

        // WHEN/THEN: validation names the offending field
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("optimizer.analysis_interval"));
    }

    #[test]
    fn inverted_instance_bounds_are_rejected() {
        let mut config = Config::default();
        config.scaling.min_instances = 5;
        config.scaling.max_instances = 2;

        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn yaml_sections_override_defaults() {
        // GIVEN: a YAML document touching a few nested fields
        let yaml = r"
circuit_breaker:
  failure_threshold: 3
  reset_timeout: 10s
scaling:
  min_instances: 2
  max_instances: 8
predictive:
  sensitivity: high
optimizer:
  providers:
    mpesa:
      timeout_ms: 20000
";

        // WHEN: extracting through figment
        let config: Config = Figment::new()
            .merge(Yaml::string(yaml))
            .extract()
            .unwrap();

        // THEN: overridden values are applied, the rest keep defaults
        assert_eq!(config.circuit_breaker.failure_threshold, 3);
        assert_eq!(config.circuit_breaker.reset_timeout, Duration::from_secs(10));
        assert_eq!(config.circuit_breaker.max_cooldown, Duration::from_secs(300));
        assert_eq!(config.scaling.min_instances, 2);
        assert_eq!(config.predictive.sensitivity, Sensitivity::High);
        assert_eq!(config.optimizer.providers["mpesa"].timeout_ms, Some(20_000));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let result = Config::load(Some(Path::new("/nonexistent/reliability.yaml")));
        assert!(matches!(result, Err(Error::Config(msg)) if msg.contains("not found")));
    }
}
