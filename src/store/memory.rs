//! In-memory [`MetricStore`] implementation
//!
//! Backs tests and standalone runs. Record ids are assigned from a
//! monotonically increasing counter, and a failure switch lets tests exercise
//! the flush-retry paths without a real backend.

use crate::error::StoreError;
use crate::events::{
    AppKey, DetectedIssue, IssueSeverity, LogEntry, MonitoringConfig, PerformanceMetric, Timestamp,
};
use crate::store::{LogRecordId, MetricStore, StoredLogEntry};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use tokio::sync::Mutex;

/// In-memory store over tokio mutexes
#[derive(Debug, Default)]
pub struct MemoryStore {
    logs: Mutex<Vec<StoredLogEntry>>,
    metrics: Mutex<Vec<PerformanceMetric>>,
    configs: Mutex<HashMap<AppKey, MonitoringConfig>>,
    next_id: AtomicI64,
    /// When set, every write reports failure without persisting
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle induced write failures, for exercising retry paths in tests
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Total number of persisted metric facts
    pub async fn metric_count(&self) -> usize {
        self.metrics.lock().await.len()
    }

    /// Total number of persisted log records
    pub async fn log_count(&self) -> usize {
        self.logs.lock().await.len()
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(StoreError::WriteFailed("induced failure".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl MetricStore for MemoryStore {
    async fn append_log(
        &self,
        entry: &LogEntry,
        severity: Option<IssueSeverity>,
    ) -> Result<LogRecordId, StoreError> {
        self.check_writable()?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let record = StoredLogEntry {
            id,
            entry: entry.clone(),
            severity,
            created_at: Utc::now(),
        };
        self.logs.lock().await.push(record);
        Ok(id)
    }

    async fn update_log_issues(
        &self,
        id: LogRecordId,
        issues: &[DetectedIssue],
        severity: Option<IssueSeverity>,
    ) -> Result<(), StoreError> {
        self.check_writable()?;
        let mut logs = self.logs.lock().await;
        let record = logs
            .iter_mut()
            .find(|record| record.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("log record {}", id)))?;
        record.entry.detected_issues = Some(issues.to_vec());
        record.severity = severity;
        Ok(())
    }

    async fn fetch_recent_logs(
        &self,
        key: &AppKey,
        limit: usize,
        since: Option<Timestamp>,
    ) -> Result<Vec<StoredLogEntry>, StoreError> {
        let logs = self.logs.lock().await;
        let mut matching: Vec<StoredLogEntry> = logs
            .iter()
            .filter(|record| record.entry.key() == *key)
            .filter(|record| since.is_none_or(|cutoff| record.created_at >= cutoff))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        matching.truncate(limit);
        Ok(matching)
    }

    async fn fetch_logs_with_issues(
        &self,
        key: &AppKey,
    ) -> Result<Vec<StoredLogEntry>, StoreError> {
        let logs = self.logs.lock().await;
        Ok(logs
            .iter()
            .filter(|record| record.entry.key() == *key)
            .filter(|record| {
                record
                    .entry
                    .detected_issues
                    .as_ref()
                    .is_some_and(|issues| !issues.is_empty())
            })
            .cloned()
            .collect())
    }

    async fn append_metrics(&self, metrics: &[PerformanceMetric]) -> Result<(), StoreError> {
        self.check_writable()?;
        self.metrics.lock().await.extend_from_slice(metrics);
        Ok(())
    }

    async fn fetch_metrics<'a>(
        &self,
        key: &AppKey,
        metric_type: Option<&'a str>,
        since: Timestamp,
        until: Timestamp,
    ) -> Result<Vec<PerformanceMetric>, StoreError> {
        let metrics = self.metrics.lock().await;
        Ok(metrics
            .iter()
            .filter(|metric| metric.key() == *key)
            .filter(|metric| metric.timestamp >= since && metric.timestamp < until)
            .filter(|metric| metric_type.is_none_or(|wanted| metric.metric_type == wanted))
            .cloned()
            .collect())
    }

    async fn save_config(&self, config: &MonitoringConfig) -> Result<(), StoreError> {
        self.check_writable()?;
        self.configs
            .lock()
            .await
            .insert(config.key(), config.clone());
        Ok(())
    }

    async fn delete_config(&self, key: &AppKey) -> Result<(), StoreError> {
        self.check_writable()?;
        self.configs.lock().await.remove(key);
        Ok(())
    }

    async fn load_configs(&self) -> Result<Vec<MonitoringConfig>, StoreError> {
        Ok(self.configs.lock().await.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{DetectionThresholds, IssueType, LogLevel, NotificationSettings};

    fn test_entry(tenant: &str, app: &str, content: &str) -> LogEntry {
        LogEntry {
            tenant_id: tenant.to_string(),
            app_id: app.to_string(),
            content: content.to_string(),
            timestamp: Utc::now(),
            level: LogLevel::Info,
            context: None,
            detected_issues: None,
        }
    }

    fn test_metric(tenant: &str, app: &str, metric_type: &str, value: f64) -> PerformanceMetric {
        PerformanceMetric {
            tenant_id: tenant.to_string(),
            app_id: app.to_string(),
            metric_type: metric_type.to_string(),
            value,
            timestamp: Utc::now(),
            metadata: None,
        }
    }

    #[tokio::test]
    async fn test_append_log_assigns_increasing_ids() {
        let store = MemoryStore::new();
        let id1 = store
            .append_log(&test_entry("t1", "a1", "first"), None)
            .await
            .unwrap();
        let id2 = store
            .append_log(&test_entry("t1", "a1", "second"), None)
            .await
            .unwrap();
        assert!(id2 > id1);
    }

    #[tokio::test]
    async fn test_update_log_issues() {
        let store = MemoryStore::new();
        let id = store
            .append_log(&test_entry("t1", "a1", "content"), None)
            .await
            .unwrap();

        let issues = vec![DetectedIssue::new(
            IssueType::Hallucination,
            IssueSeverity::High,
            "made something up",
            0.9,
        )];
        store
            .update_log_issues(id, &issues, Some(IssueSeverity::High))
            .await
            .unwrap();

        let key = AppKey::new("t1", "a1");
        let with_issues = store.fetch_logs_with_issues(&key).await.unwrap();
        assert_eq!(with_issues.len(), 1);
        assert_eq!(with_issues[0].severity, Some(IssueSeverity::High));
        assert_eq!(
            with_issues[0].entry.detected_issues.as_ref().unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_update_missing_record_is_not_found() {
        let store = MemoryStore::new();
        let result = store.update_log_issues(42, &[], None).await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_fetch_recent_logs_newest_first_with_limit() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store
                .append_log(&test_entry("t1", "a1", &format!("entry {}", i)), None)
                .await
                .unwrap();
        }
        // Another key must not leak into results
        store
            .append_log(&test_entry("t2", "a1", "other tenant"), None)
            .await
            .unwrap();

        let key = AppKey::new("t1", "a1");
        let recent = store.fetch_recent_logs(&key, 3, None).await.unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].entry.content, "entry 4");
        assert_eq!(recent[2].entry.content, "entry 2");
    }

    #[tokio::test]
    async fn test_fetch_metrics_filters_by_type_and_window() {
        let store = MemoryStore::new();
        store
            .append_metrics(&[
                test_metric("t1", "a1", "response_time", 100.0),
                test_metric("t1", "a1", "response_time", 200.0),
                test_metric("t1", "a1", "token_usage", 512.0),
            ])
            .await
            .unwrap();

        let key = AppKey::new("t1", "a1");
        let now = Utc::now();
        let since = now - chrono::Duration::hours(1);
        let until = now + chrono::Duration::seconds(1);

        let response_times = store
            .fetch_metrics(&key, Some("response_time"), since, until)
            .await
            .unwrap();
        assert_eq!(response_times.len(), 2);

        let everything = store.fetch_metrics(&key, None, since, until).await.unwrap();
        assert_eq!(everything.len(), 3);
    }

    #[tokio::test]
    async fn test_config_round_trip() {
        let store = MemoryStore::new();
        let config = MonitoringConfig {
            tenant_id: "t1".to_string(),
            app_id: "a1".to_string(),
            real_time_processing: false,
            thresholds: DetectionThresholds::default(),
            notification: NotificationSettings::default(),
        };

        store.save_config(&config).await.unwrap();
        let loaded = store.load_configs().await.unwrap();
        assert_eq!(loaded, vec![config.clone()]);

        store.delete_config(&config.key()).await.unwrap();
        assert!(store.load_configs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_induced_failure_blocks_writes() {
        let store = MemoryStore::new();
        store.set_fail_writes(true);

        let result = store
            .append_metrics(&[test_metric("t1", "a1", "response_time", 1.0)])
            .await;
        assert!(matches!(result, Err(StoreError::WriteFailed(_))));
        assert_eq!(store.metric_count().await, 0);

        store.set_fail_writes(false);
        store
            .append_metrics(&[test_metric("t1", "a1", "response_time", 1.0)])
            .await
            .unwrap();
        assert_eq!(store.metric_count().await, 1);
    }
}
