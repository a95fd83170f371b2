//! Metric derivation, buffering, and the query side of the pipeline
//!
//! The tracker turns log entries into metric facts, buffers them per
//! application key, and flushes to the store either when a buffer fills or on
//! the background timer. Query methods compute snapshots, trends, alerts, and
//! the composed dashboard from persisted metrics.

use crate::error::StoreError;
use crate::events::{AppKey, IssueSeverity, LogEntry, LogLevel, PerformanceMetric, Timestamp};
use crate::store::MetricStore;
use crate::tracker::stats::{
    compute_trend, percentile, PerformanceSnapshot, PerformanceTrend, TrendDirection,
};
use chrono::{Duration, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Buffer size at which a per-key flush is forced
const DEFAULT_FLUSH_THRESHOLD: usize = 50;

/// How many buckets trend queries issued internally use
const TREND_BUCKETS: usize = 12;

/// Metric types examined for degrading 24-hour trends
const TREND_ALERT_METRICS: &[&str] = &["response_time", "error_count", "issue_count"];

/// Static alert threshold table, upper bounds (strictly above raises)
const RESPONSE_TIME_WARNING_MS: f64 = 2000.0;
const RESPONSE_TIME_CRITICAL_MS: f64 = 5000.0;
const ERROR_RATE_WARNING_PCT: f64 = 5.0;
const ERROR_RATE_CRITICAL_PCT: f64 = 15.0;
const ISSUE_RATE_WARNING_PCT: f64 = 10.0;
const ISSUE_RATE_CRITICAL_PCT: f64 = 25.0;
/// Quality score bounds are lower bounds (strictly below raises)
const QUALITY_SCORE_WARNING: f64 = 70.0;
const QUALITY_SCORE_CRITICAL: f64 = 50.0;

/// Kind of performance alert
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    ThresholdExceeded,
    AnomalyDetected,
    TrendDegradation,
}

/// Ephemeral alert produced by `check_alerts`; consumed, never persisted
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PerformanceAlert {
    pub alert_type: AlertType,
    pub severity: IssueSeverity,
    pub message: String,
    pub metric_type: String,
    pub current_value: f64,
    pub threshold: Option<f64>,
    pub timestamp: Timestamp,
    pub acknowledged: bool,
}

/// How much a recurring issue type is hurting the application
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ImpactLevel {
    High,
    Medium,
    Low,
}

/// One row of the dashboard's top-issues ranking
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IssueTypeRanking {
    pub issue_type: String,
    pub occurrences: u64,
    pub impact: ImpactLevel,
}

/// Composed view served to external consumers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PerformanceDashboard {
    pub snapshot: PerformanceSnapshot,
    pub trends: Vec<PerformanceTrend>,
    pub alerts: Vec<PerformanceAlert>,
    pub top_issues: Vec<IssueTypeRanking>,
    pub recommendations: Vec<String>,
}

/// Derives, buffers, and serves performance metrics
///
/// Construct once per process and share via `Arc`; all mutability is
/// internal. Buffer appends never fail from the caller's perspective: store
/// errors during a flush re-queue the batch and are retried on the next
/// cycle.
pub struct PerformanceTracker {
    store: Arc<dyn MetricStore>,
    buffers: Mutex<HashMap<AppKey, Vec<PerformanceMetric>>>,
    flush_threshold: usize,
}

impl PerformanceTracker {
    pub fn new(store: Arc<dyn MetricStore>) -> Self {
        Self::with_flush_threshold(store, DEFAULT_FLUSH_THRESHOLD)
    }

    pub fn with_flush_threshold(store: Arc<dyn MetricStore>, flush_threshold: usize) -> Self {
        Self {
            store,
            buffers: Mutex::new(HashMap::new()),
            flush_threshold: flush_threshold.max(1),
        }
    }

    /// Derive metric facts from one log entry and buffer them
    ///
    /// Up to five families per entry: response time, token usage, an error
    /// tick for error-level entries, issue ticks when issues were detected,
    /// and a request tick for throughput.
    pub async fn track_from_log_entry(&self, entry: &LogEntry) {
        let mut metrics = Vec::new();
        let at = entry.timestamp;

        if let Some(context) = &entry.context {
            if let Some(response_time_ms) = context.response_time_ms {
                let mut metric = self.metric_for(entry, "response_time", response_time_ms, at);
                if let Some(model) = &context.model {
                    metric.metadata = Some(serde_json::json!({ "model": model }));
                }
                metrics.push(metric);
            }
            if let Some(token_count) = context.token_count {
                metrics.push(self.metric_for(entry, "token_usage", token_count as f64, at));
            }
        }

        if entry.level == LogLevel::Error {
            metrics.push(self.metric_for(entry, "error_count", 1.0, at));
        }

        if let Some(issues) = &entry.detected_issues {
            if !issues.is_empty() {
                metrics.push(self.metric_for(entry, "issue_count", 1.0, at));
                for issue in issues {
                    let metric_type = format!("issue_{}", issue.issue_type.as_str());
                    metrics.push(self.metric_for(entry, &metric_type, 1.0, at));
                }
            }
        }

        metrics.push(self.metric_for(entry, "request_count", 1.0, at));

        self.buffer_metrics(entry.key(), metrics).await;
    }

    /// Append a metric that is not derived from a log entry
    pub async fn track_custom_metric(
        &self,
        tenant_id: &str,
        app_id: &str,
        metric_type: &str,
        value: f64,
        metadata: Option<serde_json::Value>,
    ) {
        let metric = PerformanceMetric {
            tenant_id: tenant_id.to_string(),
            app_id: app_id.to_string(),
            metric_type: metric_type.to_string(),
            value,
            timestamp: Utc::now(),
            metadata,
        };
        self.buffer_metrics(metric.key(), vec![metric]).await;
    }

    fn metric_for(
        &self,
        entry: &LogEntry,
        metric_type: &str,
        value: f64,
        at: Timestamp,
    ) -> PerformanceMetric {
        PerformanceMetric {
            tenant_id: entry.tenant_id.clone(),
            app_id: entry.app_id.clone(),
            metric_type: metric_type.to_string(),
            value,
            timestamp: at,
            metadata: None,
        }
    }

    /// Append under the key's buffer entry and force-flush on threshold
    ///
    /// The batch is swapped out under the lock and written without it, so
    /// store latency never blocks concurrent appends for other keys (or this
    /// one).
    async fn buffer_metrics(&self, key: AppKey, metrics: Vec<PerformanceMetric>) {
        let batch = {
            let mut buffers = self.buffers.lock().unwrap();
            let buffer = buffers.entry(key.clone()).or_default();
            buffer.extend(metrics);
            if buffer.len() >= self.flush_threshold {
                Some(std::mem::take(buffer))
            } else {
                None
            }
        };

        if let Some(batch) = batch {
            self.flush_batch(key, batch).await;
        }
    }

    /// Write one swapped-out batch; on failure, restore it at the buffer front
    async fn flush_batch(&self, key: AppKey, batch: Vec<PerformanceMetric>) {
        match self.store.append_metrics(&batch).await {
            Ok(()) => {
                debug!("flushed {} metrics for {}", batch.len(), key);
            }
            Err(e) => {
                warn!(
                    "metric flush failed for {} ({} metrics kept for retry): {}",
                    key,
                    batch.len(),
                    e
                );
                let mut buffers = self.buffers.lock().unwrap();
                let buffer = buffers.entry(key).or_default();
                let mut restored = batch;
                restored.append(buffer);
                *buffer = restored;
            }
        }
    }

    /// Flush every buffered key regardless of size
    pub async fn flush_all(&self) {
        let batches: Vec<(AppKey, Vec<PerformanceMetric>)> = {
            let mut buffers = self.buffers.lock().unwrap();
            buffers
                .iter_mut()
                .filter(|(_, buffer)| !buffer.is_empty())
                .map(|(key, buffer)| (key.clone(), std::mem::take(buffer)))
                .collect()
        };

        for (key, batch) in batches {
            self.flush_batch(key, batch).await;
        }
    }

    /// Number of metrics currently buffered for a key
    pub fn buffered_len(&self, key: &AppKey) -> usize {
        self.buffers
            .lock()
            .unwrap()
            .get(key)
            .map_or(0, |buffer| buffer.len())
    }

    /// Spawn the periodic flush task
    ///
    /// Runs until the shutdown signal flips, then performs one final flush so
    /// clean shutdowns do not strand buffered metrics.
    pub fn spawn_flush_loop(
        self: Arc<Self>,
        interval: std::time::Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let tracker = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        tracker.flush_all().await;
                    }
                    _ = shutdown.changed() => {
                        tracker.flush_all().await;
                        break;
                    }
                }
            }
        })
    }

    /// Compute the point-in-time snapshot for a window of `hours`
    ///
    /// # Errors
    ///
    /// Returns `StoreError` when the metric store cannot be queried.
    pub async fn snapshot(
        &self,
        key: &AppKey,
        hours: u64,
    ) -> Result<PerformanceSnapshot, StoreError> {
        let until = Utc::now();
        let since = until - Duration::hours(hours as i64);
        let metrics = self.store.fetch_metrics(key, None, since, until).await?;

        let mut response_times = Vec::new();
        let mut token_values = Vec::new();
        let mut error_count = 0.0;
        let mut issue_count = 0.0;
        let mut request_count = 0.0;

        for metric in &metrics {
            match metric.metric_type.as_str() {
                "response_time" => response_times.push(metric.value),
                "token_usage" => token_values.push(metric.value),
                "error_count" => error_count += metric.value,
                "issue_count" => issue_count += metric.value,
                "request_count" => request_count += metric.value,
                _ => {}
            }
        }

        response_times.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let error_rate_pct = if request_count > 0.0 {
            error_count / request_count * 100.0
        } else {
            0.0
        };
        let issue_rate_pct = if request_count > 0.0 {
            issue_count / request_count * 100.0
        } else {
            0.0
        };
        let total_tokens: f64 = token_values.iter().sum();
        let avg_tokens = if token_values.is_empty() {
            0.0
        } else {
            total_tokens / token_values.len() as f64
        };

        Ok(PerformanceSnapshot {
            tenant_id: key.tenant_id.clone(),
            app_id: key.app_id.clone(),
            window_hours: hours as f64,
            response_time_p50: percentile(&response_times, 50.0),
            response_time_p90: percentile(&response_times, 90.0),
            response_time_p95: percentile(&response_times, 95.0),
            response_time_p99: percentile(&response_times, 99.0),
            error_rate_pct,
            throughput_per_minute: request_count / (hours as f64 * 60.0),
            issue_rate_pct,
            quality_score: (100.0 - 2.0 * error_rate_pct - 1.5 * issue_rate_pct).max(0.0),
            avg_token_usage: avg_tokens,
            total_token_usage: total_tokens,
            request_count: request_count as u64,
            generated_at: until,
        })
    }

    /// Compute the bucketed trend of one metric type over a window of `hours`
    ///
    /// # Errors
    ///
    /// Returns `StoreError` when the metric store cannot be queried.
    pub async fn trends(
        &self,
        key: &AppKey,
        metric_type: &str,
        hours: u64,
        buckets: usize,
    ) -> Result<PerformanceTrend, StoreError> {
        let until = Utc::now();
        let since = until - Duration::hours(hours as i64);
        let metrics = self
            .store
            .fetch_metrics(key, Some(metric_type), since, until)
            .await?;
        let samples: Vec<(Timestamp, f64)> = metrics
            .iter()
            .map(|metric| (metric.timestamp, metric.value))
            .collect();
        Ok(compute_trend(metric_type, &samples, since, until, buckets))
    }

    /// Evaluate the static alert table and the 24-hour trend movement
    ///
    /// # Errors
    ///
    /// Returns `StoreError` when the metric store cannot be queried.
    pub async fn check_alerts(&self, key: &AppKey) -> Result<Vec<PerformanceAlert>, StoreError> {
        let snapshot = self.snapshot(key, 1).await?;
        let mut alerts = threshold_alerts(&snapshot);

        for metric_type in TREND_ALERT_METRICS {
            let trend = self.trends(key, metric_type, 24, TREND_BUCKETS).await?;
            if trend.direction == TrendDirection::Degrading && trend.change_pct.abs() > 25.0 {
                let severity = if trend.change_pct.abs() > 50.0 {
                    IssueSeverity::High
                } else {
                    IssueSeverity::Medium
                };
                alerts.push(PerformanceAlert {
                    alert_type: AlertType::TrendDegradation,
                    severity,
                    message: format!(
                        "{} degraded {:.0}% over the last 24 hours",
                        metric_type,
                        trend.change_pct.abs()
                    ),
                    metric_type: metric_type.to_string(),
                    current_value: trend.change_pct,
                    threshold: Some(25.0),
                    timestamp: Utc::now(),
                    acknowledged: false,
                });
            }
        }

        Ok(alerts)
    }

    /// Compose snapshot, trends, alerts, top issues, and recommendations
    ///
    /// # Errors
    ///
    /// Returns `StoreError` when the metric store cannot be queried.
    pub async fn dashboard(
        &self,
        key: &AppKey,
        hours: u64,
    ) -> Result<PerformanceDashboard, StoreError> {
        let snapshot = self.snapshot(key, hours).await?;

        let mut trends = Vec::new();
        for metric_type in ["response_time", "error_count", "issue_count", "token_usage"] {
            trends.push(self.trends(key, metric_type, hours, TREND_BUCKETS).await?);
        }

        let alerts = self.check_alerts(key).await?;
        let top_issues = self.top_issue_types(key, hours).await?;
        let recommendations = recommendations(&snapshot, &trends, &alerts);

        Ok(PerformanceDashboard {
            snapshot,
            trends,
            alerts,
            top_issues,
            recommendations,
        })
    }

    /// Rank issue types by frequency over the window, top five
    async fn top_issue_types(
        &self,
        key: &AppKey,
        hours: u64,
    ) -> Result<Vec<IssueTypeRanking>, StoreError> {
        let until = Utc::now();
        let since = until - Duration::hours(hours as i64);
        let metrics = self.store.fetch_metrics(key, None, since, until).await?;

        let mut counts: HashMap<String, u64> = HashMap::new();
        for metric in &metrics {
            if let Some(issue_type) = metric.metric_type.strip_prefix("issue_") {
                if issue_type != "count" {
                    *counts.entry(issue_type.to_string()).or_default() += 1;
                }
            }
        }

        let mut ranking: Vec<IssueTypeRanking> = counts
            .into_iter()
            .map(|(issue_type, occurrences)| {
                let impact = if occurrences > 10 {
                    ImpactLevel::High
                } else if occurrences > 5 {
                    ImpactLevel::Medium
                } else {
                    ImpactLevel::Low
                };
                IssueTypeRanking {
                    issue_type,
                    occurrences,
                    impact,
                }
            })
            .collect();
        ranking.sort_by(|a, b| {
            b.occurrences
                .cmp(&a.occurrences)
                .then_with(|| a.issue_type.cmp(&b.issue_type))
        });
        ranking.truncate(5);
        Ok(ranking)
    }
}

/// Evaluate the snapshot against the static threshold table
///
/// Upper-bound metrics raise strictly above their threshold; the quality
/// score raises strictly below its lower bound.
fn threshold_alerts(snapshot: &PerformanceSnapshot) -> Vec<PerformanceAlert> {
    let mut alerts = Vec::new();
    let now = Utc::now();

    let mut push_upper = |metric_type: &str, value: f64, warning: f64, critical: f64, unit: &str| {
        if value > critical {
            alerts.push(PerformanceAlert {
                alert_type: AlertType::ThresholdExceeded,
                severity: IssueSeverity::Critical,
                message: format!(
                    "{} is {:.1}{}, above the critical threshold of {:.1}{}",
                    metric_type, value, unit, critical, unit
                ),
                metric_type: metric_type.to_string(),
                current_value: value,
                threshold: Some(critical),
                timestamp: now,
                acknowledged: false,
            });
        } else if value > warning {
            alerts.push(PerformanceAlert {
                alert_type: AlertType::ThresholdExceeded,
                severity: IssueSeverity::Medium,
                message: format!(
                    "{} is {:.1}{}, above the warning threshold of {:.1}{}",
                    metric_type, value, unit, warning, unit
                ),
                metric_type: metric_type.to_string(),
                current_value: value,
                threshold: Some(warning),
                timestamp: now,
                acknowledged: false,
            });
        }
    };

    push_upper(
        "response_time",
        snapshot.response_time_p95,
        RESPONSE_TIME_WARNING_MS,
        RESPONSE_TIME_CRITICAL_MS,
        "ms",
    );
    push_upper(
        "error_rate",
        snapshot.error_rate_pct,
        ERROR_RATE_WARNING_PCT,
        ERROR_RATE_CRITICAL_PCT,
        "%",
    );
    push_upper(
        "issue_rate",
        snapshot.issue_rate_pct,
        ISSUE_RATE_WARNING_PCT,
        ISSUE_RATE_CRITICAL_PCT,
        "%",
    );

    if snapshot.quality_score < QUALITY_SCORE_CRITICAL {
        alerts.push(PerformanceAlert {
            alert_type: AlertType::ThresholdExceeded,
            severity: IssueSeverity::Critical,
            message: format!(
                "quality_score fell to {:.1}, below the critical floor of {:.1}",
                snapshot.quality_score, QUALITY_SCORE_CRITICAL
            ),
            metric_type: "quality_score".to_string(),
            current_value: snapshot.quality_score,
            threshold: Some(QUALITY_SCORE_CRITICAL),
            timestamp: now,
            acknowledged: false,
        });
    } else if snapshot.quality_score < QUALITY_SCORE_WARNING {
        alerts.push(PerformanceAlert {
            alert_type: AlertType::ThresholdExceeded,
            severity: IssueSeverity::Medium,
            message: format!(
                "quality_score fell to {:.1}, below the warning floor of {:.1}",
                snapshot.quality_score, QUALITY_SCORE_WARNING
            ),
            metric_type: "quality_score".to_string(),
            current_value: snapshot.quality_score,
            threshold: Some(QUALITY_SCORE_WARNING),
            timestamp: now,
            acknowledged: false,
        });
    }

    alerts
}

/// Static rule-based guidance keyed off the composed dashboard inputs
fn recommendations(
    snapshot: &PerformanceSnapshot,
    trends: &[PerformanceTrend],
    alerts: &[PerformanceAlert],
) -> Vec<String> {
    let mut out = Vec::new();

    if snapshot.quality_score < QUALITY_SCORE_WARNING {
        out.push(format!(
            "Quality score is {:.0}; review the highest-frequency issue types and their sample entries",
            snapshot.quality_score
        ));
    }
    if snapshot.error_rate_pct > ERROR_RATE_WARNING_PCT {
        out.push(format!(
            "Error rate is {:.1}%; inspect recent error-level entries for a common failure",
            snapshot.error_rate_pct
        ));
    }
    if snapshot.response_time_p95 > RESPONSE_TIME_WARNING_MS {
        out.push(format!(
            "p95 response time is {:.0}ms; consider a smaller model, shorter prompts, or caching",
            snapshot.response_time_p95
        ));
    }
    if snapshot.issue_rate_pct > ISSUE_RATE_WARNING_PCT {
        out.push(format!(
            "{:.1}% of requests carry detected issues; tighten prompts or add output validation",
            snapshot.issue_rate_pct
        ));
    }
    if snapshot.avg_token_usage > 4000.0 {
        out.push(format!(
            "Average token usage is {:.0}; trim prompt context to cut cost and latency",
            snapshot.avg_token_usage
        ));
    }
    for trend in trends {
        if trend.direction == TrendDirection::Degrading {
            out.push(format!(
                "{} has been degrading across the window; compare against recent prompt or model changes",
                trend.metric_type
            ));
        }
    }
    if alerts
        .iter()
        .any(|alert| alert.severity == IssueSeverity::Critical)
    {
        out.push(
            "Critical alerts are active; page the owning team rather than waiting for trends"
                .to_string(),
        );
    }

    out.truncate(5);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{DetectedIssue, IssueType, LogContext};
    use crate::store::MemoryStore;

    fn tracker_with_store() -> (Arc<MemoryStore>, PerformanceTracker) {
        let store = Arc::new(MemoryStore::new());
        let tracker = PerformanceTracker::new(Arc::clone(&store) as Arc<dyn MetricStore>);
        (store, tracker)
    }

    fn metric_at(
        key: &AppKey,
        metric_type: &str,
        value: f64,
        minutes_ago: i64,
    ) -> PerformanceMetric {
        PerformanceMetric {
            tenant_id: key.tenant_id.clone(),
            app_id: key.app_id.clone(),
            metric_type: metric_type.to_string(),
            value,
            timestamp: Utc::now() - Duration::minutes(minutes_ago),
            metadata: None,
        }
    }

    fn entry_with_issues(issues: Vec<DetectedIssue>) -> LogEntry {
        LogEntry {
            tenant_id: "t1".to_string(),
            app_id: "a1".to_string(),
            content: "content".to_string(),
            timestamp: Utc::now(),
            level: LogLevel::Error,
            context: Some(LogContext {
                response_time_ms: Some(900.0),
                token_count: Some(120),
                model: Some("gpt-4o".to_string()),
                ..Default::default()
            }),
            detected_issues: Some(issues),
        }
    }

    #[tokio::test]
    async fn test_track_from_log_entry_derives_expected_families() {
        let (_, tracker) = tracker_with_store();
        let entry = entry_with_issues(vec![
            DetectedIssue::new(IssueType::Hallucination, IssueSeverity::High, "a", 0.9),
            DetectedIssue::new(IssueType::StructureError, IssueSeverity::Medium, "b", 0.6),
        ]);

        tracker.track_from_log_entry(&entry).await;

        let key = entry.key();
        // response_time, token_usage, error_count, issue_count,
        // two per-type ticks, request_count
        assert_eq!(tracker.buffered_len(&key), 7);
    }

    #[tokio::test]
    async fn test_forced_flush_at_threshold_leaves_remainder() {
        let (store, tracker) = tracker_with_store();
        let key = AppKey::new("t1", "a1");

        for i in 0..60 {
            tracker
                .track_custom_metric("t1", "a1", "response_time", i as f64, None)
                .await;
        }

        // The 50th append forced a flush of exactly that batch
        assert_eq!(store.metric_count().await, 50);
        assert_eq!(tracker.buffered_len(&key), 10);
    }

    #[tokio::test]
    async fn test_flush_failure_requeues_batch() {
        let (store, tracker) = tracker_with_store();
        let key = AppKey::new("t1", "a1");

        store.set_fail_writes(true);
        for i in 0..50 {
            tracker
                .track_custom_metric("t1", "a1", "response_time", i as f64, None)
                .await;
        }

        // Flush was attempted and failed; nothing lost, nothing persisted
        assert_eq!(store.metric_count().await, 0);
        assert_eq!(tracker.buffered_len(&key), 50);

        store.set_fail_writes(false);
        tracker.flush_all().await;
        assert_eq!(store.metric_count().await, 50);
        assert_eq!(tracker.buffered_len(&key), 0);
    }

    #[tokio::test]
    async fn test_requeue_preserves_arrival_order() {
        let (store, tracker) = tracker_with_store();

        store.set_fail_writes(true);
        for i in 0..3 {
            tracker
                .track_custom_metric("t1", "a1", "response_time", i as f64, None)
                .await;
        }
        tracker.flush_all().await;
        // New metric arrives while the failed batch waits for retry
        tracker
            .track_custom_metric("t1", "a1", "response_time", 3.0, None)
            .await;

        store.set_fail_writes(false);
        tracker.flush_all().await;

        let key = AppKey::new("t1", "a1");
        let until = Utc::now() + Duration::seconds(1);
        let since = until - Duration::hours(1);
        let persisted = store
            .fetch_metrics(&key, Some("response_time"), since, until)
            .await
            .unwrap();
        let values: Vec<f64> = persisted.iter().map(|m| m.value).collect();
        assert_eq!(values, vec![0.0, 1.0, 2.0, 3.0]);
    }

    #[tokio::test]
    async fn test_snapshot_math() {
        let (store, tracker) = tracker_with_store();
        let key = AppKey::new("t1", "a1");

        let mut seed = Vec::new();
        for value in [100.0, 200.0, 300.0, 400.0] {
            seed.push(metric_at(&key, "response_time", value, 10));
        }
        for _ in 0..10 {
            seed.push(metric_at(&key, "request_count", 1.0, 10));
        }
        seed.push(metric_at(&key, "error_count", 1.0, 10));
        seed.push(metric_at(&key, "issue_count", 2.0, 10));
        seed.push(metric_at(&key, "token_usage", 1000.0, 10));
        seed.push(metric_at(&key, "token_usage", 3000.0, 10));
        store.append_metrics(&seed).await.unwrap();

        let snapshot = tracker.snapshot(&key, 1).await.unwrap();
        assert_eq!(snapshot.request_count, 10);
        assert_eq!(snapshot.response_time_p50, 200.0);
        assert_eq!(snapshot.response_time_p99, 400.0);
        assert!((snapshot.error_rate_pct - 10.0).abs() < 1e-9);
        assert!((snapshot.issue_rate_pct - 20.0).abs() < 1e-9);
        // 100 - 2*10 - 1.5*20 = 50
        assert!((snapshot.quality_score - 50.0).abs() < 1e-9);
        assert!((snapshot.avg_token_usage - 2000.0).abs() < 1e-9);
        assert!((snapshot.total_token_usage - 4000.0).abs() < 1e-9);
        assert!((snapshot.throughput_per_minute - 10.0 / 60.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_snapshot_percentiles_ignore_input_order() {
        let (store, tracker) = tracker_with_store();
        let key = AppKey::new("t1", "a1");

        let ascending: Vec<PerformanceMetric> = (1..=20)
            .map(|i| metric_at(&key, "response_time", (i * 10) as f64, 10))
            .collect();
        store.append_metrics(&ascending).await.unwrap();
        let first = tracker.snapshot(&key, 1).await.unwrap();

        let (store2, tracker2) = tracker_with_store();
        let descending: Vec<PerformanceMetric> = (1..=20)
            .rev()
            .map(|i| metric_at(&key, "response_time", (i * 10) as f64, 10))
            .collect();
        store2.append_metrics(&descending).await.unwrap();
        let second = tracker2.snapshot(&key, 1).await.unwrap();

        assert_eq!(first.response_time_p50, second.response_time_p50);
        assert_eq!(first.response_time_p90, second.response_time_p90);
        assert_eq!(first.response_time_p95, second.response_time_p95);
        assert_eq!(first.response_time_p99, second.response_time_p99);
    }

    #[tokio::test]
    async fn test_empty_window_snapshot_is_zeroed() {
        let (_, tracker) = tracker_with_store();
        let key = AppKey::new("t1", "a1");

        let snapshot = tracker.snapshot(&key, 1).await.unwrap();
        assert_eq!(snapshot.request_count, 0);
        assert_eq!(snapshot.response_time_p95, 0.0);
        assert_eq!(snapshot.error_rate_pct, 0.0);
        assert_eq!(snapshot.quality_score, 100.0);
    }

    #[tokio::test]
    async fn test_error_rate_boundary_is_strict() {
        let (store, tracker) = tracker_with_store();
        let key = AppKey::new("t1", "a1");

        // Exactly 5%: 100 requests, 5 errors
        let mut seed = Vec::new();
        for _ in 0..100 {
            seed.push(metric_at(&key, "request_count", 1.0, 10));
        }
        for _ in 0..5 {
            seed.push(metric_at(&key, "error_count", 1.0, 10));
        }
        store.append_metrics(&seed).await.unwrap();

        let alerts = tracker.check_alerts(&key).await.unwrap();
        assert!(!alerts.iter().any(|a| a.metric_type == "error_rate"));

        // One more error pushes it strictly above the warning threshold
        store
            .append_metrics(&[metric_at(&key, "error_count", 1.0, 10)])
            .await
            .unwrap();
        let alerts = tracker.check_alerts(&key).await.unwrap();
        let error_alert = alerts
            .iter()
            .find(|a| a.metric_type == "error_rate")
            .expect("error_rate alert");
        assert_eq!(error_alert.alert_type, AlertType::ThresholdExceeded);
        assert_eq!(error_alert.severity, IssueSeverity::Medium);
    }

    #[tokio::test]
    async fn test_critical_threshold_escalates() {
        let (store, tracker) = tracker_with_store();
        let key = AppKey::new("t1", "a1");

        // 20% error rate: above the 15% critical bound; quality score
        // lands at 100 - 40 = 60, tripping the warning floor too
        let mut seed = Vec::new();
        for _ in 0..10 {
            seed.push(metric_at(&key, "request_count", 1.0, 10));
        }
        for _ in 0..2 {
            seed.push(metric_at(&key, "error_count", 1.0, 10));
        }
        store.append_metrics(&seed).await.unwrap();

        let alerts = tracker.check_alerts(&key).await.unwrap();
        let error_alert = alerts
            .iter()
            .find(|a| a.metric_type == "error_rate")
            .unwrap();
        assert_eq!(error_alert.severity, IssueSeverity::Critical);
        assert!(alerts.iter().any(|a| a.metric_type == "quality_score"));
    }

    #[tokio::test]
    async fn test_degrading_trend_raises_alert() {
        let (store, tracker) = tracker_with_store();
        let key = AppKey::new("t1", "a1");

        // Response times jump 60% from the first half of the day to the second
        let mut seed = Vec::new();
        for hour in 0..24i64 {
            let value = if hour < 12 { 100.0 } else { 160.0 };
            seed.push(metric_at(&key, "response_time", value, (23 - hour) * 60 + 30));
        }
        store.append_metrics(&seed).await.unwrap();

        let alerts = tracker.check_alerts(&key).await.unwrap();
        let trend_alert = alerts
            .iter()
            .find(|a| a.alert_type == AlertType::TrendDegradation)
            .expect("trend alert");
        assert_eq!(trend_alert.metric_type, "response_time");
        assert_eq!(trend_alert.severity, IssueSeverity::High);
    }

    #[tokio::test]
    async fn test_dashboard_composition() {
        let (store, tracker) = tracker_with_store();
        let key = AppKey::new("t1", "a1");

        let mut seed = Vec::new();
        for _ in 0..20 {
            seed.push(metric_at(&key, "request_count", 1.0, 10));
        }
        for _ in 0..12 {
            seed.push(metric_at(&key, "issue_hallucination", 1.0, 10));
        }
        for _ in 0..6 {
            seed.push(metric_at(&key, "issue_structure_error", 1.0, 10));
        }
        seed.push(metric_at(&key, "issue_accuracy_issue", 1.0, 10));
        store.append_metrics(&seed).await.unwrap();

        let dashboard = tracker.dashboard(&key, 24).await.unwrap();
        assert_eq!(dashboard.trends.len(), 4);
        assert_eq!(dashboard.top_issues.len(), 3);
        assert_eq!(dashboard.top_issues[0].issue_type, "hallucination");
        assert_eq!(dashboard.top_issues[0].occurrences, 12);
        assert_eq!(dashboard.top_issues[0].impact, ImpactLevel::High);
        assert_eq!(dashboard.top_issues[1].impact, ImpactLevel::Medium);
        assert_eq!(dashboard.top_issues[2].impact, ImpactLevel::Low);
        assert!(dashboard.recommendations.len() <= 5);
    }

    #[tokio::test]
    async fn test_query_failure_propagates() {
        let key = AppKey::new("t1", "a1");

        // MemoryStore only fails writes, so verify propagation with a mock
        let mut mock = crate::store::MockMetricStore::new();
        mock.expect_fetch_metrics()
            .returning(|_, _, _, _| Err(StoreError::QueryFailed("backend down".to_string())));
        let tracker = PerformanceTracker::new(Arc::new(mock) as Arc<dyn MetricStore>);

        let result = tracker.snapshot(&key, 1).await;
        assert!(matches!(result, Err(StoreError::QueryFailed(_))));
    }
}
