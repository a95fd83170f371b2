/// Error types for the telemetry pipeline
pub mod error;

/// Core data model: log entries, issues, configs, metrics
pub mod events;

/// Rule- and model-assisted issue detection
pub mod detector;

/// Metric derivation, buffering, and query-side computation
pub mod tracker;

/// Ingestion front door and notification delivery
pub mod monitor;

/// Persistence seam and the in-memory store
pub mod store;

/// Service configuration
pub mod config;

// Re-export commonly used types
pub use error::{ConfigError, DetectionError, NotifyError, StoreError};
