//! Core data model for the telemetry pipeline
//!
//! This module defines the fundamental data structures used throughout the
//! application for representing ingested log entries, detected quality issues,
//! per-application monitoring configuration, and performance metric facts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Timestamp type for consistent time handling across the application
pub type Timestamp = DateTime<Utc>;

/// Identifies one monitored application instance
///
/// Every piece of state in the pipeline (configs, buffers, persisted records)
/// is keyed by the `(tenant_id, app_id)` pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct AppKey {
    pub tenant_id: String,
    pub app_id: String,
}

impl AppKey {
    pub fn new(tenant_id: impl Into<String>, app_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            app_id: app_id.into(),
        }
    }
}

impl std::fmt::Display for AppKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.tenant_id, self.app_id)
    }
}

/// Free-form execution log entry ingested from a monitored application
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
    /// Tenant that owns the monitored application
    pub tenant_id: String,
    /// Application the entry was emitted by
    pub app_id: String,
    /// Raw log content, typically containing model output
    pub content: String,
    /// When the entry was produced by the application
    pub timestamp: Timestamp,
    /// Log level reported by the application
    pub level: LogLevel,
    /// Optional execution context attached by the application
    pub context: Option<LogContext>,
    /// Issues found by the detector; `None` until detection has run
    pub detected_issues: Option<Vec<DetectedIssue>>,
}

impl LogEntry {
    /// The `(tenant_id, app_id)` key this entry belongs to
    pub fn key(&self) -> AppKey {
        AppKey::new(self.tenant_id.clone(), self.app_id.clone())
    }
}

/// Log level reported by the monitored application
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    Debug,
}

/// Execution context attached to a log entry by the monitored application
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LogContext {
    /// Model the application invoked for this request
    pub model: Option<String>,
    /// Application-side request correlation id
    pub request_id: Option<String>,
    /// Wall-clock latency of the model call in milliseconds
    pub response_time_ms: Option<f64>,
    /// Token count reported for the model call
    pub token_count: Option<u64>,
}

/// Category of quality issue detected in a log entry
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    Hallucination,
    StructureError,
    AccuracyIssue,
    PerformanceDegradation,
}

impl IssueType {
    /// Stable name used as a metric-type suffix and in notification payloads
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueType::Hallucination => "hallucination",
            IssueType::StructureError => "structure_error",
            IssueType::AccuracyIssue => "accuracy_issue",
            IssueType::PerformanceDegradation => "performance_degradation",
        }
    }
}

/// Severity of a detected issue or raised alert
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    /// Worth recording, no action expected
    Low,
    /// Should be looked at during normal review
    Medium,
    /// Requires attention, pushed to notification channels
    High,
    /// Requires immediate attention
    Critical,
}

/// One quality issue found in a log entry
///
/// Pure value produced by the detector; never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DetectedIssue {
    /// Category of the issue
    pub issue_type: IssueType,
    /// How urgent the issue is
    pub severity: IssueSeverity,
    /// Human-readable description of what was found
    pub description: String,
    /// Detector confidence in the finding, always within `[0, 1]`
    pub confidence: f64,
    /// Detector-specific details (matched excerpt, measured values, ...)
    pub metadata: Option<serde_json::Value>,
}

impl DetectedIssue {
    pub fn new(
        issue_type: IssueType,
        severity: IssueSeverity,
        description: impl Into<String>,
        confidence: f64,
    ) -> Self {
        Self {
            issue_type,
            severity,
            description: description.into(),
            confidence: confidence.clamp(0.0, 1.0),
            metadata: None,
        }
    }

    /// Attach detector-specific metadata to the issue
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Per-application detection thresholds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DetectionThresholds {
    /// Minimum confidence for an issue to be reported
    pub hallucination_confidence: f64,
    /// Response time above which performance degradation is flagged
    pub performance_threshold_ms: f64,
    /// Error-rate percentage considered unhealthy for this application
    pub error_rate_threshold_pct: f64,
}

impl Default for DetectionThresholds {
    fn default() -> Self {
        Self {
            hallucination_confidence: 0.5,
            performance_threshold_ms: 5000.0,
            error_rate_threshold_pct: 5.0,
        }
    }
}

/// Notification targets for one monitored application
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NotificationSettings {
    /// Generic webhook receiving the JSON issue payload
    pub webhook_url: Option<String>,
    /// Chat-ops relay receiving a formatted attachment message
    pub chat_webhook: Option<String>,
    /// Whether issue events should be forwarded to the email pipeline
    pub email_alerts_enabled: bool,
}

/// Monitoring configuration for one `(tenant_id, app_id)` key
///
/// One config exists per monitored application; removal disables both
/// real-time and background processing for that key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MonitoringConfig {
    pub tenant_id: String,
    pub app_id: String,
    /// Run detection synchronously during the ingest call instead of queueing
    pub real_time_processing: bool,
    pub thresholds: DetectionThresholds,
    pub notification: NotificationSettings,
}

impl MonitoringConfig {
    pub fn key(&self) -> AppKey {
        AppKey::new(self.tenant_id.clone(), self.app_id.clone())
    }
}

/// One atomic metric fact, append-only
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PerformanceMetric {
    pub tenant_id: String,
    pub app_id: String,
    /// Metric family, e.g. `response_time` or `issue_hallucination`
    pub metric_type: String,
    pub value: f64,
    pub timestamp: Timestamp,
    pub metadata: Option<serde_json::Value>,
}

impl PerformanceMetric {
    pub fn key(&self) -> AppKey {
        AppKey::new(self.tenant_id.clone(), self.app_id.clone())
    }
}
