//! Ingestion front door, notification delivery, and the config registry

mod log_monitor;
mod notifications;
mod rate_limiter;

pub use log_monitor::LogMonitor;
pub use notifications::{CapturedPush, MonitorEvent, NotificationDispatcher};
pub use rate_limiter::RateLimiter;
