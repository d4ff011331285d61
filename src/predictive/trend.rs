//! Bucketed trend estimation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Trend of a series over a fixed window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trend {
    /// Points that fell inside the window
    pub samples: usize,
    /// Mean value per bucket, oldest first (`None` for empty buckets)
    pub buckets: Vec<Option<f64>>,
    /// Mean of the most recent non-empty bucket
    pub current: f64,
    /// Least-squares slope per bucket over the non-empty buckets
    pub slope: f64,
    /// `current + slope × horizon`
    pub projected: f64,
}

impl Trend {
    /// Non-empty buckets
    #[must_use]
    pub fn filled_buckets(&self) -> usize {
        self.buckets.iter().filter(|b| b.is_some()).count()
    }
}

/// Split `[start, end]` into `buckets` equal slices and estimate the trend
/// of `points` across them
#[must_use]
pub fn analyze(
    points: impl IntoIterator<Item = (DateTime<Utc>, f64)>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    buckets: usize,
    horizon: f64,
) -> Trend {
    let buckets = buckets.max(1);
    let span_ms = (end - start).num_milliseconds().max(1);
    let mut sums = vec![0.0_f64; buckets];
    let mut counts = vec![0usize; buckets];
    let mut samples = 0usize;

    for (at, value) in points {
        if at < start || at > end {
            continue;
        }
        let offset_ms = (at - start).num_milliseconds();
        let idx = ((offset_ms as f64 / span_ms as f64) * buckets as f64) as usize;
        let idx = idx.min(buckets - 1);
        sums[idx] += value;
        counts[idx] += 1;
        samples += 1;
    }

    let means: Vec<Option<f64>> = sums
        .iter()
        .zip(&counts)
        .map(|(sum, &n)| (n > 0).then(|| sum / n as f64))
        .collect();

    let filled: Vec<(f64, f64)> = means
        .iter()
        .enumerate()
        .filter_map(|(i, m)| m.map(|m| (i as f64, m)))
        .collect();

    let current = filled.last().map_or(0.0, |&(_, m)| m);
    let slope = least_squares_slope(&filled);

    Trend {
        samples,
        buckets: means,
        current,
        slope,
        projected: current + slope * horizon,
    }
}

/// Slope of the ordinary least-squares line through `points`
///
/// Fewer than two points, or points with no spread in x, have slope 0.
#[must_use]
pub fn least_squares_slope(points: &[(f64, f64)]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }
    let n = points.len() as f64;
    let mean_x = points.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_y = points.iter().map(|p| p.1).sum::<f64>() / n;
    let (num, den) = points.iter().fold((0.0, 0.0), |(num, den), &(x, y)| {
        let dx = x - mean_x;
        (num + dx * (y - mean_y), den + dx * dx)
    });
    if den == 0.0 { 0.0 } else { num / den }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn slope_of_a_line_is_exact() {
        let points = [(0.0, 1.0), (1.0, 3.0), (2.0, 5.0), (3.0, 7.0)];
        assert!((least_squares_slope(&points) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn degenerate_inputs_have_zero_slope() {
        assert_eq!(least_squares_slope(&[]), 0.0);
        assert_eq!(least_squares_slope(&[(1.0, 5.0)]), 0.0);
        assert_eq!(least_squares_slope(&[(1.0, 5.0), (1.0, 9.0)]), 0.0);
    }

    #[test]
    fn rising_error_rate_projects_forward() {
        // GIVEN: a 60 minute window in 6 buckets with error rate 0.0, 0.1, ..., 0.5
        let end = Utc::now();
        let start = end - Duration::minutes(60);
        let mut points = Vec::new();
        for bucket in 0..6i64 {
            let at = start + Duration::minutes(bucket * 10 + 5);
            for i in 0..10 {
                let failed = i < bucket;
                points.push((at, if failed { 1.0 } else { 0.0 }));
            }
        }

        // WHEN: analyzed with a 3-bucket horizon
        let trend = analyze(points, start, end, 6, 3.0);

        // THEN: slope 0.1 per bucket, projection 0.5 + 0.3
        assert_eq!(trend.samples, 60);
        assert_eq!(trend.filled_buckets(), 6);
        assert!((trend.slope - 0.1).abs() < 1e-9);
        assert!((trend.current - 0.5).abs() < 1e-9);
        assert!((trend.projected - 0.8).abs() < 1e-9);
    }

    #[test]
    fn empty_buckets_are_skipped_and_outliers_ignored() {
        let end = Utc::now();
        let start = end - Duration::minutes(30);
        let points = vec![
            (start + Duration::minutes(1), 10.0),
            (start + Duration::minutes(29), 30.0),
            (start - Duration::minutes(5), 1_000.0),
        ];

        let trend = analyze(points, start, end, 3, 1.0);

        assert_eq!(trend.samples, 2);
        assert_eq!(trend.buckets, vec![Some(10.0), None, Some(30.0)]);
        assert!((trend.slope - 10.0).abs() < 1e-9);
        assert!((trend.projected - 40.0).abs() < 1e-9);
    }

    #[test]
    fn point_at_window_end_lands_in_last_bucket() {
        let end = Utc::now();
        let start = end - Duration::minutes(10);
        let trend = analyze([(end, 1.0)], start, end, 5, 1.0);
        assert_eq!(trend.buckets[4], Some(1.0));
    }
}
