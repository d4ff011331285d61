//! Confidence scoring for failure and degradation predictions

use crate::config::{ConfidenceWeights, PredictiveConfig};
use crate::failsafe::CircuitState;

use super::trend::Trend;

/// Weighted confidence that a provider is heading for trouble, in `[0, 1]`
#[must_use]
pub fn score(
    weights: &ConfidenceWeights,
    trend: &Trend,
    error_rate_threshold: f64,
    breaker: CircuitState,
    healthy: bool,
) -> f64 {
    let slope = if trend.slope > 0.0 && weights.slope_saturation > 0.0 {
        (trend.slope / weights.slope_saturation).min(1.0)
    } else {
        0.0
    };
    let error = if error_rate_threshold > 0.0 {
        (trend.current / (2.0 * error_rate_threshold)).min(1.0)
    } else {
        1.0
    };
    let samples = if weights.sample_saturation > 0 {
        (trend.samples as f64 / weights.sample_saturation as f64).min(1.0)
    } else {
        1.0
    };
    let breaker = match breaker {
        CircuitState::Open => 1.0,
        CircuitState::HalfOpen => 0.5,
        CircuitState::Closed => 0.0,
    };
    let penalty = if healthy { 0.0 } else { weights.health_penalty };

    (weights.slope * slope + weights.error_rate * error + weights.samples * samples + weights.breaker * breaker + penalty)
        .clamp(0.0, 1.0)
}

/// Confidence a prediction needs before it is materialized
#[must_use]
pub fn effective_threshold(config: &PredictiveConfig) -> f64 {
    (config.confidence_threshold * config.sensitivity.threshold_factor()).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Sensitivity;

    fn trend(samples: usize, current: f64, slope: f64) -> Trend {
        Trend {
            samples,
            buckets: Vec::new(),
            current,
            slope,
            projected: current + slope * 3.0,
        }
    }

    #[test]
    fn saturated_signals_reach_full_confidence() {
        let weights = ConfidenceWeights::default();
        let c = score(&weights, &trend(500, 0.5, 0.2), 0.1, CircuitState::Open, true);
        assert!((c - 1.0).abs() < 1e-9);
    }

    #[test]
    fn quiet_provider_scores_low() {
        let weights = ConfidenceWeights::default();
        let c = score(&weights, &trend(20, 0.0, 0.0), 0.1, CircuitState::Closed, true);
        assert!(c < 0.05);
    }

    #[test]
    fn unhealthy_provider_adds_penalty() {
        let weights = ConfidenceWeights::default();
        let t = trend(100, 0.1, 0.02);
        let healthy = score(&weights, &t, 0.1, CircuitState::Closed, true);
        let unhealthy = score(&weights, &t, 0.1, CircuitState::Closed, false);
        assert!((unhealthy - healthy - weights.health_penalty).abs() < 1e-9);
    }

    #[test]
    fn half_open_counts_half() {
        let weights = ConfidenceWeights::default();
        let t = trend(0, 0.0, 0.0);
        let c = score(&weights, &t, 0.1, CircuitState::HalfOpen, true);
        assert!((c - weights.breaker * 0.5).abs() < 1e-9);
    }

    #[test]
    fn sensitivity_scales_threshold_and_caps_at_one() {
        let mut config = PredictiveConfig {
            confidence_threshold: 0.7,
            sensitivity: Sensitivity::High,
            ..PredictiveConfig::default()
        };
        assert!((effective_threshold(&config) - 0.595).abs() < 1e-9);

        config.confidence_threshold = 0.95;
        config.sensitivity = Sensitivity::Low;
        assert!((effective_threshold(&config) - 1.0).abs() < 1e-9);
    }
}
