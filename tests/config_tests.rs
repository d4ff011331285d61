//! Configuration loading tests - YAML files through figment

use std::io::Write;
use std::time::Duration;

use payments_reliability::Error;
use payments_reliability::config::{Config, Sensitivity};
use payments_reliability::plane::ReliabilityPlane;

fn write_config(yaml: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    file.write_all(yaml.as_bytes()).unwrap();
    file
}

#[test]
fn test_full_config_file_loads() {
    let file = write_config(
        r"
circuit_breaker:
  failure_threshold: 4
  reset_timeout: 15s
  max_cooldown: 2m
audit:
  sensitive_keys: ['^msisdn$']
  retention: 30days
optimizer:
  analysis_interval: 1m
  providers:
    mpesa:
      timeout_ms: 12000
    paystack: {}
predictive:
  sensitivity: low
  confidence_weights:
    slope: 0.5
scaling:
  min_instances: 2
  max_instances: 12
  schedules:
    - name: salary run
      days: [Fri]
      start_hour: 6
      end_hour: 14
      min_instances: 8
",
    );

    let config = Config::load(Some(file.path())).unwrap();

    assert_eq!(config.circuit_breaker.failure_threshold, 4);
    assert_eq!(config.circuit_breaker.max_cooldown, Duration::from_secs(120));
    assert_eq!(config.audit.retention, Duration::from_secs(30 * 24 * 60 * 60));
    assert_eq!(config.optimizer.providers.len(), 2);
    assert_eq!(config.predictive.sensitivity, Sensitivity::Low);
    assert!((config.predictive.confidence_weights.slope - 0.5).abs() < f64::EPSILON);
    assert_eq!(config.scaling.schedules.len(), 1);
    assert_eq!(config.scaling.schedules[0].days, vec![chrono::Weekday::Fri]);

    // Registered providers come up with their overrides
    let plane = ReliabilityPlane::new(&config).unwrap();
    assert_eq!(
        plane.optimizer().get_optimized_config("mpesa").unwrap().timeout_ms,
        12_000
    );
    assert_eq!(plane.scaler().current_instances(), 2);
    assert!(!plane.scaler().get_schedules()[0].id.is_empty());
}

#[test]
fn test_invalid_bounds_fail_to_load() {
    let file = write_config(
        r"
scaling:
  min_instances: 9
  max_instances: 3
",
    );

    let err = Config::load(Some(file.path())).unwrap_err();
    assert!(matches!(err, Error::Config(msg) if msg.contains("min_instances")));
}

#[test]
fn test_unparseable_file_is_a_config_error() {
    let file = write_config("circuit_breaker: [unclosed");
    assert!(matches!(Config::load(Some(file.path())), Err(Error::Config(_))));
}
