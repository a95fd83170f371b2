//! Outbound notification delivery and the typed event fan-out
//!
//! High and critical issues are pushed to the webhook and chat targets named
//! in the owning application's config; every detection with at least one
//! issue is also broadcast as a [`MonitorEvent`] for out-of-process
//! subscribers such as the email pipeline. Delivery failures are logged and
//! swallowed: notifications must never affect ingestion success.

use crate::error::NotifyError;
use crate::events::{
    AppKey, DetectedIssue, IssueSeverity, LogEntry, NotificationSettings, Timestamp,
};
use crate::monitor::rate_limiter::RateLimiter;
use chrono::Utc;
use log::{debug, info, warn};
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::broadcast;

/// Webhook payloads include at most this much log content
const LOG_CONTENT_PREVIEW_LEN: usize = 500;

/// Buffered events per subscriber before the oldest are dropped
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Typed event published to subscribers on every detection with issues
#[derive(Debug, Clone)]
pub enum MonitorEvent {
    IssuesDetected {
        key: AppKey,
        issues: Vec<DetectedIssue>,
        log_content: String,
        email_alerts_enabled: bool,
        timestamp: Timestamp,
    },
}

/// One push captured instead of delivered, in testing mode
#[derive(Debug, Clone)]
pub struct CapturedPush {
    pub url: String,
    pub payload: Value,
}

enum Transport {
    Http(Client),
    /// Record pushes instead of delivering them
    Capture(Mutex<Vec<CapturedPush>>),
}

/// Delivers issue notifications for the log monitor
pub struct NotificationDispatcher {
    transport: Transport,
    events: broadcast::Sender<MonitorEvent>,
    rate_limiter: Mutex<RateLimiter>,
}

impl NotificationDispatcher {
    /// Create a dispatcher that delivers over HTTP
    pub fn new(rate_limit_per_minute: usize) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to create HTTP client");
        Self {
            transport: Transport::Http(client),
            events: broadcast::channel(EVENT_CHANNEL_CAPACITY).0,
            rate_limiter: Mutex::new(RateLimiter::new(rate_limit_per_minute)),
        }
    }

    /// Create a dispatcher that captures pushes instead of sending them
    pub fn new_for_testing(rate_limit_per_minute: usize) -> Self {
        Self {
            transport: Transport::Capture(Mutex::new(Vec::new())),
            events: broadcast::channel(EVENT_CHANNEL_CAPACITY).0,
            rate_limiter: Mutex::new(RateLimiter::new(rate_limit_per_minute)),
        }
    }

    /// Subscribe to monitor events
    ///
    /// Subscribers that fall behind lose the oldest events; the channel is
    /// emit-and-forget by design.
    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.events.subscribe()
    }

    /// Pushes captured in testing mode
    pub fn captured(&self) -> Vec<CapturedPush> {
        match &self.transport {
            Transport::Capture(pushes) => pushes.lock().unwrap().clone(),
            Transport::Http(_) => Vec::new(),
        }
    }

    /// Publish the event and push high/critical issues to configured targets
    ///
    /// Medium and low issues are recorded with the log entry but never
    /// pushed. All delivery failures are logged here and do not propagate.
    pub async fn dispatch(
        &self,
        settings: &NotificationSettings,
        entry: &LogEntry,
        issues: &[DetectedIssue],
    ) {
        if issues.is_empty() {
            return;
        }

        // Emit-and-forget: a send error only means nobody is subscribed
        let _ = self.events.send(MonitorEvent::IssuesDetected {
            key: entry.key(),
            issues: issues.to_vec(),
            log_content: entry.content.clone(),
            email_alerts_enabled: settings.email_alerts_enabled,
            timestamp: Utc::now(),
        });

        let pushable: Vec<&DetectedIssue> = issues
            .iter()
            .filter(|issue| issue.severity >= IssueSeverity::High)
            .collect();
        if pushable.is_empty() {
            debug!(
                "no high/critical issues for {}, skipping push",
                entry.key()
            );
            return;
        }
        if settings.webhook_url.is_none() && settings.chat_webhook.is_none() {
            return;
        }

        if !self.rate_limiter.lock().unwrap().can_send() {
            warn!(
                "notification rate limit reached, dropping push for {}",
                entry.key()
            );
            return;
        }

        let mut delivered = false;
        if let Some(url) = &settings.webhook_url {
            match self.post(url, webhook_payload(entry, &pushable)).await {
                Ok(()) => {
                    info!("webhook notification sent for {}", entry.key());
                    delivered = true;
                }
                Err(e) => warn!("webhook delivery failed for {}: {}", entry.key(), e),
            }
        }
        if let Some(url) = &settings.chat_webhook {
            match self.post(url, chat_payload(entry, &pushable)).await {
                Ok(()) => {
                    info!("chat notification sent for {}", entry.key());
                    delivered = true;
                }
                Err(e) => warn!("chat delivery failed for {}: {}", entry.key(), e),
            }
        }

        if delivered {
            self.rate_limiter.lock().unwrap().record();
        }
    }

    async fn post(&self, url: &str, payload: Value) -> Result<(), NotifyError> {
        match &self.transport {
            Transport::Capture(pushes) => {
                pushes.lock().unwrap().push(CapturedPush {
                    url: url.to_string(),
                    payload,
                });
                Ok(())
            }
            Transport::Http(client) => {
                let response = client.post(url).json(&payload).send().await?;
                if !response.status().is_success() {
                    return Err(NotifyError::DeliveryFailed(format!(
                        "{} returned {}",
                        url,
                        response.status()
                    )));
                }
                Ok(())
            }
        }
    }
}

/// JSON payload for the generic webhook target
fn webhook_payload(entry: &LogEntry, issues: &[&DetectedIssue]) -> Value {
    json!({
        "timestamp": Utc::now(),
        "event": "issues_detected",
        "app": entry.app_id,
        "issues": issues
            .iter()
            .map(|issue| json!({
                "type": issue.issue_type,
                "severity": issue.severity,
                "description": issue.description,
                "confidence": issue.confidence,
            }))
            .collect::<Vec<_>>(),
        "logContent": content_preview(&entry.content),
    })
}

/// Attachment-style message for the chat relay
fn chat_payload(entry: &LogEntry, issues: &[&DetectedIssue]) -> Value {
    let critical_count = issues
        .iter()
        .filter(|issue| issue.severity == IssueSeverity::Critical)
        .count();
    let high_count = issues.len() - critical_count;
    let color = if critical_count > 0 {
        "danger"
    } else {
        "warning"
    };

    let bullet_list = issues
        .iter()
        .map(|issue| format!("• [{}] {}", issue.issue_type.as_str(), issue.description))
        .collect::<Vec<_>>()
        .join("\n");

    json!({
        "attachments": [{
            "color": color,
            "title": format!("Issues detected in {}", entry.app_id),
            "fields": [
                { "title": "Application", "value": entry.key().to_string(), "short": true },
                {
                    "title": "Severity",
                    "value": format!("{} critical, {} high", critical_count, high_count),
                    "short": true
                },
            ],
            "text": bullet_list,
        }]
    })
}

/// First part of the log content, cut on a character boundary
fn content_preview(content: &str) -> &str {
    if content.len() <= LOG_CONTENT_PREVIEW_LEN {
        return content;
    }
    let mut end = LOG_CONTENT_PREVIEW_LEN;
    while end > 0 && !content.is_char_boundary(end) {
        end -= 1;
    }
    &content[..end]
}
