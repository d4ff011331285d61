//! Rolling per-provider call outcomes
//!
//! Every provider call reported by the adapter layer lands here as an
//! [`CallOutcome`]. The optimizer derives success rates and latency
//! percentiles from it; the predictor derives error-rate trends.
//!
//! Each provider owns a bounded window that keeps at most
//! `max_samples_per_provider` entries and drops entries older than
//! `retention`. Old entries are evicted lazily on each `record` call.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::OutcomeConfig;

/// Coarse classification of a failed provider call
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// The call did not complete in time
    Timeout,
    /// Connection-level failure
    Network,
    /// The provider throttled us
    RateLimited,
    /// Provider-side 5xx or equivalent
    ServerError,
    /// Request rejected as invalid
    ClientError,
    /// Credentials rejected
    Authentication,
    /// Anything the adapter could not classify
    Unknown,
}

/// One provider call as reported by the adapter layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallOutcome {
    /// Provider id
    pub provider: String,
    /// Whether the call succeeded
    pub success: bool,
    /// Observed latency
    pub latency_ms: u64,
    /// Failure classification (failures only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_category: Option<ErrorCategory>,
    /// When the call completed
    #[serde(default = "Utc::now")]
    pub observed_at: DateTime<Utc>,
}

impl CallOutcome {
    /// A successful call observed now
    pub fn success(provider: impl Into<String>, latency_ms: u64) -> Self {
        Self {
            provider: provider.into(),
            success: true,
            latency_ms,
            error_category: None,
            observed_at: Utc::now(),
        }
    }

    /// A failed call observed now
    pub fn failure(provider: impl Into<String>, latency_ms: u64, category: ErrorCategory) -> Self {
        Self {
            provider: provider.into(),
            success: false,
            latency_ms,
            error_category: Some(category),
            observed_at: Utc::now(),
        }
    }

    /// Override the observation time
    #[must_use]
    pub fn at(mut self, observed_at: DateTime<Utc>) -> Self {
        self.observed_at = observed_at;
        self
    }
}

/// Stored sample, without the provider id
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OutcomeSample {
    /// When the call completed
    pub at: DateTime<Utc>,
    /// Whether the call succeeded
    pub success: bool,
    /// Observed latency
    pub latency_ms: u64,
    /// Failure classification
    pub error_category: Option<ErrorCategory>,
}

/// Aggregates over a slice of a provider's window
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WindowStats {
    /// Samples in the slice
    pub total: usize,
    /// Failed samples in the slice
    pub failures: usize,
    /// `1 - failures/total` (1.0 for an empty slice)
    pub success_rate: f64,
    /// 50th percentile latency
    pub latency_p50_ms: Option<u64>,
    /// 95th percentile latency
    pub latency_p95_ms: Option<u64>,
    /// Failures per category
    pub errors_by_category: BTreeMap<ErrorCategory, usize>,
}

impl WindowStats {
    /// Failure fraction (0.0 for an empty slice)
    #[must_use]
    pub fn error_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.failures as f64 / self.total as f64
        }
    }

    fn from_samples<'a>(samples: impl Iterator<Item = &'a OutcomeSample>) -> Self {
        let mut stats = Self::default();
        let mut latencies = Vec::new();

        for sample in samples {
            stats.total += 1;
            latencies.push(sample.latency_ms);
            if !sample.success {
                stats.failures += 1;
                let category = sample.error_category.unwrap_or(ErrorCategory::Unknown);
                *stats.errors_by_category.entry(category).or_default() += 1;
            }
        }

        stats.success_rate = 1.0 - stats.error_rate();
        latencies.sort_unstable();
        stats.latency_p50_ms = percentile(&latencies, 0.50);
        stats.latency_p95_ms = percentile(&latencies, 0.95);
        stats
    }
}

/// Nearest-rank percentile over sorted samples
fn percentile(sorted: &[u64], p: f64) -> Option<u64> {
    if sorted.is_empty() {
        return None;
    }
    let index = ((sorted.len() as f64) * p).floor() as usize;
    Some(sorted[index.min(sorted.len() - 1)])
}

/// Bounded, time-ordered samples of one provider
#[derive(Debug)]
struct OutcomeWindow {
    samples: VecDeque<OutcomeSample>,
    max_samples: usize,
    retention: ChronoDuration,
    lifetime_total: u64,
}

impl OutcomeWindow {
    fn new(max_samples: usize, retention: ChronoDuration) -> Self {
        Self {
            samples: VecDeque::new(),
            max_samples,
            retention,
            lifetime_total: 0,
        }
    }

    fn record(&mut self, sample: OutcomeSample) {
        self.lifetime_total += 1;

        // Backdated samples are inserted in order so slices stay sorted
        let position = self
            .samples
            .iter()
            .rposition(|s| s.at <= sample.at)
            .map_or(0, |i| i + 1);
        self.samples.insert(position, sample);

        // Retention never runs ahead of the wall clock
        let newest = self.samples.back().map_or(sample.at, |s| s.at);
        let cutoff = newest.min(Utc::now()) - self.retention;
        while self.samples.front().is_some_and(|s| s.at < cutoff) {
            self.samples.pop_front();
        }
        while self.samples.len() > self.max_samples {
            self.samples.pop_front();
        }
    }

    fn since(&self, since: DateTime<Utc>) -> impl Iterator<Item = &OutcomeSample> {
        self.samples.iter().filter(move |s| s.at >= since)
    }
}

/// Concurrent store of rolling call outcomes keyed by provider
#[derive(Debug)]
pub struct OutcomeStore {
    windows: DashMap<String, Arc<Mutex<OutcomeWindow>>>,
    max_samples: usize,
    retention: ChronoDuration,
}

impl OutcomeStore {
    /// Create an empty store
    #[must_use]
    pub fn new(config: &OutcomeConfig) -> Self {
        Self {
            windows: DashMap::new(),
            max_samples: config.max_samples_per_provider.max(1),
            retention: ChronoDuration::from_std(config.retention)
                .unwrap_or_else(|_| ChronoDuration::hours(2)),
        }
    }

    /// Append an outcome to its provider's window
    pub fn record(&self, outcome: &CallOutcome) {
        let window = self
            .windows
            .entry(outcome.provider.clone())
            .or_insert_with(|| {
                Arc::new(Mutex::new(OutcomeWindow::new(self.max_samples, self.retention)))
            })
            .clone();

        window.lock().record(OutcomeSample {
            at: outcome.observed_at,
            success: outcome.success,
            latency_ms: outcome.latency_ms,
            error_category: outcome.error_category,
        });
    }

    /// Providers that have reported at least one outcome
    #[must_use]
    pub fn providers(&self) -> Vec<String> {
        let mut providers: Vec<String> = self.windows.iter().map(|e| e.key().clone()).collect();
        providers.sort();
        providers
    }

    /// Aggregate a provider's samples observed at or after `since`
    #[must_use]
    pub fn stats_since(&self, provider: &str, since: DateTime<Utc>) -> WindowStats {
        self.windows
            .get(provider)
            .map(|w| WindowStats::from_samples(w.lock().since(since)))
            .unwrap_or_else(|| WindowStats {
                success_rate: 1.0,
                ..WindowStats::default()
            })
    }

    /// Copy a provider's samples observed at or after `since`, oldest first
    #[must_use]
    pub fn samples_since(&self, provider: &str, since: DateTime<Utc>) -> Vec<OutcomeSample> {
        self.windows
            .get(provider)
            .map(|w| w.lock().since(since).copied().collect())
            .unwrap_or_default()
    }

    /// Outcomes ever recorded for a provider, including evicted ones
    #[must_use]
    pub fn lifetime_total(&self, provider: &str) -> u64 {
        self.windows
            .get(provider)
            .map_or(0, |w| w.lock().lifetime_total)
    }

    /// Drop all samples of a provider
    pub fn clear(&self, provider: &str) {
        self.windows.remove(provider);
    }
}
