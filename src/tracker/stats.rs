//! Derived metric types and the math behind snapshots and trends

use crate::events::Timestamp;
use serde::{Deserialize, Serialize};

/// Point-in-time view over one application's metric window
///
/// Derived on demand, never stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PerformanceSnapshot {
    pub tenant_id: String,
    pub app_id: String,
    /// Width of the window the snapshot covers, in hours
    pub window_hours: f64,
    pub response_time_p50: f64,
    pub response_time_p90: f64,
    pub response_time_p95: f64,
    pub response_time_p99: f64,
    /// Errors as a percentage of requests
    pub error_rate_pct: f64,
    /// Requests per minute over the window
    pub throughput_per_minute: f64,
    /// Entries with at least one detected issue, as a percentage of requests
    pub issue_rate_pct: f64,
    /// Composite 0-100 health indicator
    pub quality_score: f64,
    pub avg_token_usage: f64,
    pub total_token_usage: f64,
    pub request_count: u64,
    pub generated_at: Timestamp,
}

/// Direction a metric moved over a trend window
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Improving,
    Stable,
    Degrading,
}

/// One fixed-width time slice of a trend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrendBucket {
    pub start: Timestamp,
    pub end: Timestamp,
    pub average: f64,
    pub sample_count: usize,
}

/// Movement of one metric type across a bucketed window
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PerformanceTrend {
    pub metric_type: String,
    pub buckets: Vec<TrendBucket>,
    pub direction: TrendDirection,
    /// Second-half average relative to first-half average, in percent
    pub change_pct: f64,
}

/// Percentile over a pre-sorted series, indexing at the fractional rank
///
/// Returns 0 for an empty series so sparse windows degrade instead of
/// erroring.
pub fn percentile(sorted: &[f64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = ((pct / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

/// Whether a lower value of this metric type is the healthy direction
pub fn lower_is_better(metric_type: &str) -> bool {
    matches!(
        metric_type,
        "response_time" | "error_rate" | "error_count" | "issue_count"
    )
}

/// Bucket a metric series and judge its direction of movement
///
/// The window `[since, until)` is split into `bucket_count` equal slices and
/// each slice averaged. The mean of the non-empty first-half buckets is then
/// compared to the mean of the non-empty second-half buckets: a move of more
/// than 10% in the unhealthy direction is `Degrading`, more than 10% in the
/// healthy direction is `Improving`, anything else is `Stable`.
pub fn compute_trend(
    metric_type: &str,
    samples: &[(Timestamp, f64)],
    since: Timestamp,
    until: Timestamp,
    bucket_count: usize,
) -> PerformanceTrend {
    let bucket_count = bucket_count.max(1);
    let window = until - since;
    let bucket_width = window / bucket_count as i32;

    let mut buckets = Vec::with_capacity(bucket_count);
    for i in 0..bucket_count {
        let start = since + bucket_width * i as i32;
        let end = if i + 1 == bucket_count {
            until
        } else {
            since + bucket_width * (i as i32 + 1)
        };

        let values: Vec<f64> = samples
            .iter()
            .filter(|(ts, _)| *ts >= start && *ts < end)
            .map(|(_, v)| *v)
            .collect();

        let average = if values.is_empty() {
            0.0
        } else {
            values.iter().sum::<f64>() / values.len() as f64
        };
        buckets.push(TrendBucket {
            start,
            end,
            average,
            sample_count: values.len(),
        });
    }

    let half = bucket_count / 2;
    let first_half = half_average(&buckets[..half]);
    let second_half = half_average(&buckets[half..]);

    let (direction, change_pct) = match (first_half, second_half) {
        (Some(first), Some(second)) if first.abs() > f64::EPSILON => {
            let change_pct = (second - first) / first * 100.0;
            let direction = judge_direction(metric_type, change_pct);
            (direction, change_pct)
        }
        _ => (TrendDirection::Stable, 0.0),
    };

    PerformanceTrend {
        metric_type: metric_type.to_string(),
        buckets,
        direction,
        change_pct,
    }
}

fn half_average(buckets: &[TrendBucket]) -> Option<f64> {
    let populated: Vec<f64> = buckets
        .iter()
        .filter(|b| b.sample_count > 0)
        .map(|b| b.average)
        .collect();
    if populated.is_empty() {
        None
    } else {
        Some(populated.iter().sum::<f64>() / populated.len() as f64)
    }
}

fn judge_direction(metric_type: &str, change_pct: f64) -> TrendDirection {
    let threshold = 10.0;
    if change_pct.abs() <= threshold {
        return TrendDirection::Stable;
    }
    let grew = change_pct > 0.0;
    if lower_is_better(metric_type) == grew {
        TrendDirection::Degrading
    } else {
        TrendDirection::Improving
    }
}


// Property-based tests
#[cfg(test)]
mod property_tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    // Percentiles never decrease as the requested rank grows
    #[quickcheck]
    fn prop_percentile_monotonic_in_rank(mut values: Vec<u16>) -> bool {
        if values.is_empty() {
            return true;
        }
        values.sort_unstable();
        let sorted: Vec<f64> = values.iter().map(|v| *v as f64).collect();

        [50.0, 90.0, 95.0, 99.0].windows(2).all(|pair| {
            percentile(&sorted, pair[0]) <= percentile(&sorted, pair[1])
        })
    }

    // A percentile always returns one of the observed values
    #[quickcheck]
    fn prop_percentile_is_observed_value(mut values: Vec<u16>, pct: u8) -> bool {
        if values.is_empty() {
            return true;
        }
        values.sort_unstable();
        let sorted: Vec<f64> = values.iter().map(|v| *v as f64).collect();
        let pct = (pct % 100) as f64 + 1.0;
        sorted.contains(&percentile(&sorted, pct))
    }
}
