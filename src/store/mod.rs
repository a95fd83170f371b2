//! Persistence seam for log records, metric facts, and monitoring configs
//!
//! The pipeline treats durable storage as an external collaborator reached
//! through the [`MetricStore`] trait. The logical schema is three append-mostly
//! tables: `monitoring_logs`, `performance_metrics`, and `monitoring_configs`.
//! [`MemoryStore`] implements the trait in process for tests and standalone
//! runs; production deployments supply their own backend.

mod memory;

pub use memory::MemoryStore;

use crate::error::StoreError;
use crate::events::{
    AppKey, DetectedIssue, IssueSeverity, LogEntry, MonitoringConfig, PerformanceMetric, Timestamp,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Identifier assigned to a log record when it is persisted
pub type LogRecordId = i64;

/// A log entry as persisted, with its storage identity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredLogEntry {
    pub id: LogRecordId,
    pub entry: LogEntry,
    /// Highest severity among detected issues, `None` until detection ran
    pub severity: Option<IssueSeverity>,
    pub created_at: Timestamp,
}

/// Durable append-only storage for the telemetry pipeline
///
/// Implementations must support safe concurrent appends; the pipeline never
/// holds in-process locks across calls into the store.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MetricStore: Send + Sync {
    /// Persist a raw log entry, returning its record id
    async fn append_log(
        &self,
        entry: &LogEntry,
        severity: Option<IssueSeverity>,
    ) -> Result<LogRecordId, StoreError>;

    /// Fill in the detected issues of an already-persisted record
    async fn update_log_issues(
        &self,
        id: LogRecordId,
        issues: &[DetectedIssue],
        severity: Option<IssueSeverity>,
    ) -> Result<(), StoreError>;

    /// Most recent log records for a key, newest first
    async fn fetch_recent_logs(
        &self,
        key: &AppKey,
        limit: usize,
        since: Option<Timestamp>,
    ) -> Result<Vec<StoredLogEntry>, StoreError>;

    /// All log records for a key that carry at least one detected issue
    async fn fetch_logs_with_issues(&self, key: &AppKey)
        -> Result<Vec<StoredLogEntry>, StoreError>;

    /// Append a batch of metric facts
    async fn append_metrics(&self, metrics: &[PerformanceMetric]) -> Result<(), StoreError>;

    /// Metric facts for a key within `[since, until)`, optionally filtered by type
    async fn fetch_metrics<'a>(
        &self,
        key: &AppKey,
        metric_type: Option<&'a str>,
        since: Timestamp,
        until: Timestamp,
    ) -> Result<Vec<PerformanceMetric>, StoreError>;

    /// Upsert a monitoring config
    async fn save_config(&self, config: &MonitoringConfig) -> Result<(), StoreError>;

    /// Delete the monitoring config for a key, if present
    async fn delete_config(&self, key: &AppKey) -> Result<(), StoreError>;

    /// All persisted monitoring configs, for startup recovery
    async fn load_configs(&self) -> Result<Vec<MonitoringConfig>, StoreError>;
}
