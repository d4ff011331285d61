//! Rolling transaction-volume history

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Observed transaction volume at a point in time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoadSample {
    /// When the rate was reported
    pub timestamp: DateTime<Utc>,
    /// Reported transactions per minute
    pub transactions_per_minute: f64,
}

/// Time-ordered load samples, pruned to a retention horizon
#[derive(Debug)]
pub struct LoadHistory {
    samples: RwLock<VecDeque<LoadSample>>,
    retention: RwLock<ChronoDuration>,
}

impl LoadHistory {
    /// Create an empty history
    #[must_use]
    pub fn new(retention: Duration) -> Self {
        Self {
            samples: RwLock::new(VecDeque::new()),
            retention: RwLock::new(to_chrono(retention)),
        }
    }

    /// Append a sample reported now
    pub fn record(&self, transactions_per_minute: f64) -> LoadSample {
        self.record_at(transactions_per_minute, Utc::now())
    }

    /// Append a sample with an explicit timestamp
    pub fn record_at(&self, transactions_per_minute: f64, timestamp: DateTime<Utc>) -> LoadSample {
        let sample = LoadSample {
            timestamp,
            transactions_per_minute: transactions_per_minute.max(0.0),
        };
        let retention = *self.retention.read();

        let mut samples = self.samples.write();
        let position = samples
            .iter()
            .rposition(|s| s.timestamp <= timestamp)
            .map_or(0, |i| i + 1);
        samples.insert(position, sample);

        let newest = samples.back().map_or(timestamp, |s| s.timestamp);
        let cutoff = newest.min(Utc::now()) - retention;
        while samples.front().is_some_and(|s| s.timestamp < cutoff) {
            samples.pop_front();
        }
        sample
    }

    /// Most recent sample
    #[must_use]
    pub fn latest(&self) -> Option<LoadSample> {
        self.samples.read().back().copied()
    }

    /// Samples from the last `minutes` minutes (all retained when `None`)
    #[must_use]
    pub fn last_minutes(&self, minutes: Option<u32>) -> Vec<LoadSample> {
        match minutes {
            Some(m) => self.since(Utc::now() - ChronoDuration::minutes(i64::from(m))),
            None => self.samples.read().iter().copied().collect(),
        }
    }

    /// Samples at or after `since`, oldest first
    #[must_use]
    pub fn since(&self, since: DateTime<Utc>) -> Vec<LoadSample> {
        self.samples
            .read()
            .iter()
            .filter(|s| s.timestamp >= since)
            .copied()
            .collect()
    }

    /// Mean transactions per minute at or after `since`
    #[must_use]
    pub fn average_since(&self, since: DateTime<Utc>) -> Option<f64> {
        let samples = self.since(since);
        if samples.is_empty() {
            return None;
        }
        Some(samples.iter().map(|s| s.transactions_per_minute).sum::<f64>() / samples.len() as f64)
    }

    /// Change the retention horizon for subsequent writes
    pub fn set_retention(&self, retention: Duration) {
        *self.retention.write() = to_chrono(retention);
    }
}

fn to_chrono(retention: Duration) -> ChronoDuration {
    ChronoDuration::from_std(retention).unwrap_or_else(|_| ChronoDuration::hours(24))
}
