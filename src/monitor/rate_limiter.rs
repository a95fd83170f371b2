use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;

/// Sliding-window limiter for outbound notification pushes
///
/// Tracks recent push timestamps and enforces a per-minute cap so an issue
/// storm cannot flood the webhook and chat targets.
#[derive(Debug)]
pub struct RateLimiter {
    /// Maximum number of pushes allowed per minute
    max_per_minute: usize,
    /// Timestamps of pushes within the current window
    recent_pushes: VecDeque<DateTime<Utc>>,
}

impl RateLimiter {
    pub fn new(max_per_minute: usize) -> Self {
        Self {
            max_per_minute,
            recent_pushes: VecDeque::new(),
        }
    }

    /// Whether a push can go out now without exceeding the cap
    pub fn can_send(&mut self) -> bool {
        self.cleanup();
        self.recent_pushes.len() < self.max_per_minute
    }

    /// Record a push at the current time
    pub fn record(&mut self) {
        self.record_at(Utc::now());
    }

    /// Record a push at a specific time, for tests with controlled clocks
    pub fn record_at(&mut self, timestamp: DateTime<Utc>) {
        self.recent_pushes.push_back(timestamp);
        self.cleanup();
    }

    /// Number of pushes inside the current window
    pub fn current_count(&mut self) -> usize {
        self.cleanup();
        self.recent_pushes.len()
    }

    fn cleanup(&mut self) {
        let cutoff = Utc::now() - Duration::minutes(1);
        self.recent_pushes.retain(|&time| time > cutoff);
    }
}
