//! Ingestion front door for the telemetry pipeline
//!
//! The monitor holds the per-application config registry, persists every
//! incoming log entry, routes entries to synchronous or background issue
//! detection, feeds the performance tracker, and hands detections with
//! issues to the notification dispatcher.

use crate::detector::IssueDetector;
use crate::error::StoreError;
use crate::events::{AppKey, DetectedIssue, IssueSeverity, LogEntry, MonitoringConfig, Timestamp};
use crate::monitor::notifications::NotificationDispatcher;
use crate::store::{LogRecordId, MetricStore, StoredLogEntry};
use crate::tracker::PerformanceTracker;
use log::{debug, error, info, warn};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Default cap on the background detection queue
const DEFAULT_MAX_QUEUE_SIZE: usize = 10_000;

/// An entry persisted raw and waiting for background detection
struct QueuedEntry {
    record_id: LogRecordId,
    entry: LogEntry,
}

/// Ingestion front door
///
/// Construct once per process and share via `Arc`. The config registry and
/// the background queue are the only mutable state; both are internal and
/// guarded.
pub struct LogMonitor {
    store: Arc<dyn MetricStore>,
    detector: Arc<IssueDetector>,
    tracker: Arc<PerformanceTracker>,
    dispatcher: Arc<NotificationDispatcher>,
    configs: Mutex<HashMap<AppKey, MonitoringConfig>>,
    queue: Mutex<VecDeque<QueuedEntry>>,
    max_queue_size: usize,
}

impl LogMonitor {
    pub fn new(
        store: Arc<dyn MetricStore>,
        detector: Arc<IssueDetector>,
        tracker: Arc<PerformanceTracker>,
        dispatcher: Arc<NotificationDispatcher>,
    ) -> Self {
        Self::with_queue_limit(store, detector, tracker, dispatcher, DEFAULT_MAX_QUEUE_SIZE)
    }

    /// Create a monitor with an explicit cap on the background detection queue
    pub fn with_queue_limit(
        store: Arc<dyn MetricStore>,
        detector: Arc<IssueDetector>,
        tracker: Arc<PerformanceTracker>,
        dispatcher: Arc<NotificationDispatcher>,
        max_queue_size: usize,
    ) -> Self {
        Self {
            store,
            detector,
            tracker,
            dispatcher,
            configs: Mutex::new(HashMap::new()),
            queue: Mutex::new(VecDeque::new()),
            max_queue_size: max_queue_size.max(1),
        }
    }

    /// Reload persisted monitoring configs into the registry
    ///
    /// Called once at startup so restarts recover the configured
    /// applications.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` when the config table cannot be read.
    pub async fn restore_configs(&self) -> Result<usize, StoreError> {
        let stored = self.store.load_configs().await?;
        let count = stored.len();
        let mut configs = self.configs.lock().unwrap();
        for config in stored {
            configs.insert(config.key(), config);
        }
        info!("restored {} monitoring configs", count);
        Ok(count)
    }

    /// Upsert the monitoring config for a key
    ///
    /// # Errors
    ///
    /// Returns `StoreError` when the config cannot be persisted; the registry
    /// is only updated after the write succeeds.
    pub async fn add_monitoring_config(&self, config: MonitoringConfig) -> Result<(), StoreError> {
        self.store.save_config(&config).await?;
        let key = config.key();
        self.configs.lock().unwrap().insert(key.clone(), config);
        info!("monitoring config added for {}", key);
        Ok(())
    }

    /// Remove the monitoring config for a key
    ///
    /// Disables both real-time and background processing for the key;
    /// entries already queued are skipped at drain time.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` when the delete cannot be persisted.
    pub async fn remove_monitoring_config(
        &self,
        tenant_id: &str,
        app_id: &str,
    ) -> Result<(), StoreError> {
        let key = AppKey::new(tenant_id, app_id);
        self.store.delete_config(&key).await?;
        self.configs.lock().unwrap().remove(&key);
        info!("monitoring config removed for {}", key);
        Ok(())
    }

    fn config_for(&self, key: &AppKey) -> Option<MonitoringConfig> {
        self.configs.lock().unwrap().get(key).cloned()
    }

    /// Ingest one log entry
    ///
    /// The raw entry is always persisted. With no config for the key the
    /// entry is stored as-is and detection is skipped; with real-time
    /// processing enabled, detection runs before this call returns;
    /// otherwise the entry is queued for the background drain loop.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` only for persistence failures. Detection and
    /// notification problems degrade internally and never fail the call.
    pub async fn ingest_log_entry(&self, mut entry: LogEntry) -> Result<(), StoreError> {
        let key = entry.key();

        let Some(config) = self.config_for(&key) else {
            warn!("no monitoring config for {}, persisting raw entry", key);
            self.store.append_log(&entry, None).await?;
            self.tracker.track_from_log_entry(&entry).await;
            return Ok(());
        };

        if config.real_time_processing {
            let issues = self
                .detector
                .detect_issues(&entry, &config.thresholds)
                .await;
            entry.detected_issues = Some(issues.clone());
            let severity = severity_rollup(&issues);
            self.store.append_log(&entry, severity).await?;
            self.tracker.track_from_log_entry(&entry).await;
            if !issues.is_empty() {
                self.dispatcher
                    .dispatch(&config.notification, &entry, &issues)
                    .await;
            }
        } else {
            let record_id = self.store.append_log(&entry, None).await?;
            self.tracker.track_from_log_entry(&entry).await;
            self.enqueue(QueuedEntry { record_id, entry });
        }

        Ok(())
    }

    /// Ingest a batch of entries with per-entry error isolation
    ///
    /// Every entry is attempted; one entry's persistence failure never
    /// aborts its siblings. Results are returned in input order.
    pub async fn ingest_batch(&self, entries: Vec<LogEntry>) -> Vec<Result<(), StoreError>> {
        let mut results = Vec::with_capacity(entries.len());
        for entry in entries {
            let key = entry.key();
            let result = self.ingest_log_entry(entry).await;
            if let Err(e) = &result {
                error!("batch ingestion failed for {}: {}", key, e);
            }
            results.push(result);
        }
        results
    }

    fn enqueue(&self, queued: QueuedEntry) {
        let mut queue = self.queue.lock().unwrap();
        if queue.len() >= self.max_queue_size {
            if let Some(dropped) = queue.pop_front() {
                warn!(
                    "detection queue full, dropping deferred analysis for record {}",
                    dropped.record_id
                );
            }
        }
        queue.push_back(queued);
    }

    /// Entries currently awaiting background detection
    pub fn queued_len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    /// Process up to `batch_size` queued entries
    ///
    /// Entries whose config was removed, or switched to real-time in the
    /// meantime, are skipped: their raw record is already persisted. Returns
    /// the number of entries actually analyzed.
    pub async fn drain_queue(&self, batch_size: usize) -> usize {
        let batch: Vec<QueuedEntry> = {
            let mut queue = self.queue.lock().unwrap();
            let take = batch_size.min(queue.len());
            queue.drain(..take).collect()
        };
        if batch.is_empty() {
            return 0;
        }

        let mut processed = 0;
        for queued in batch {
            let key = queued.entry.key();
            let Some(config) = self.config_for(&key) else {
                debug!("config for {} gone, skipping deferred detection", key);
                continue;
            };
            if config.real_time_processing {
                debug!("config for {} switched to real-time, skipping", key);
                continue;
            }

            let mut entry = queued.entry;
            let issues = self
                .detector
                .detect_issues(&entry, &config.thresholds)
                .await;
            let severity = severity_rollup(&issues);
            if let Err(e) = self
                .store
                .update_log_issues(queued.record_id, &issues, severity)
                .await
            {
                error!(
                    "failed to update issues on record {}: {}",
                    queued.record_id, e
                );
                continue;
            }
            processed += 1;

            if !issues.is_empty() {
                entry.detected_issues = Some(issues.clone());
                self.dispatcher
                    .dispatch(&config.notification, &entry, &issues)
                    .await;
            }
        }
        processed
    }

    /// Spawn the background detection drain task
    pub fn spawn_drain_loop(
        self: Arc<Self>,
        interval: std::time::Duration,
        batch_size: usize,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let monitor = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let processed = monitor.drain_queue(batch_size).await;
                        if processed > 0 {
                            debug!("background detection processed {} entries", processed);
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
        })
    }

    /// Most recent log records for a key
    ///
    /// # Errors
    ///
    /// Returns `StoreError` when the store cannot be queried.
    pub async fn recent_logs(
        &self,
        tenant_id: &str,
        app_id: &str,
        limit: usize,
        since: Option<Timestamp>,
    ) -> Result<Vec<StoredLogEntry>, StoreError> {
        self.store
            .fetch_recent_logs(&AppKey::new(tenant_id, app_id), limit, since)
            .await
    }

    /// All log records for a key that carry detected issues
    ///
    /// # Errors
    ///
    /// Returns `StoreError` when the store cannot be queried.
    pub async fn logs_with_issues(
        &self,
        tenant_id: &str,
        app_id: &str,
    ) -> Result<Vec<StoredLogEntry>, StoreError> {
        self.store
            .fetch_logs_with_issues(&AppKey::new(tenant_id, app_id))
            .await
    }
}

/// Highest severity among the issues, for the persisted rollup column
fn severity_rollup(issues: &[DetectedIssue]) -> Option<IssueSeverity> {
    issues.iter().map(|issue| issue.severity).max()
}
