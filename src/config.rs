//! Service configuration loaded from a TOML file
//!
//! Every section has a sensible default so the pipeline can run without any
//! configuration file at all; an invalid file is reported and replaced by
//! defaults rather than aborting startup.

use crate::error::ConfigError;
use serde::Deserialize;
use std::path::Path;

/// Top-level service configuration
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub ingest: IngestConfig,
    pub tracker: TrackerConfig,
    pub model: ModelConfig,
    pub notifications: NotificationConfig,
}

/// Ingestion front-door settings
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct IngestConfig {
    /// Seconds between background detection drain cycles
    pub drain_interval_seconds: u64,
    /// Maximum queued entries processed per drain cycle
    pub drain_batch_size: usize,
    /// Maximum entries held in the background detection queue
    pub max_queue_size: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            drain_interval_seconds: 5,
            drain_batch_size: 10,
            max_queue_size: 10_000,
        }
    }
}

/// Performance-tracker buffering settings
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrackerConfig {
    /// Seconds between background buffer flush cycles
    pub flush_interval_seconds: u64,
    /// Buffer size at which a per-key flush is forced
    pub flush_threshold: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            flush_interval_seconds: 30,
            flush_threshold: 50,
        }
    }
}

/// Model-assisted detection backend selection
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ModelBackendKind {
    /// Skip the model-assisted pass entirely
    Disabled,
    /// Deterministic canned responses, for tests and dry runs
    Mock,
    /// Any OpenAI-compatible chat-completions endpoint
    Chat,
}

/// Model-assisted detection settings
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
    pub backend: ModelBackendKind,
    /// Chat-completions endpoint, required when `backend = "chat"`
    pub endpoint: String,
    /// Model name, required when `backend = "chat"`
    pub model: String,
    pub api_key: Option<String>,
    /// Hard cap on one model-assisted detection call, in seconds
    pub timeout_seconds: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            backend: ModelBackendKind::Disabled,
            endpoint: String::new(),
            model: String::new(),
            api_key: None,
            timeout_seconds: 15,
        }
    }
}

/// Outbound notification settings
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct NotificationConfig {
    /// Maximum webhook/chat pushes per minute across all applications
    pub rate_limit_per_minute: usize,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            rate_limit_per_minute: 30,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ReadError` if the file cannot be read,
    /// `ConfigError::TomlError` if it is not valid TOML, and
    /// `ConfigError::ValidationError` if a value is out of range.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;
        let config: Config = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ingest.drain_batch_size == 0 {
            return Err(ConfigError::ValidationError(
                "ingest.drain_batch_size must be > 0".to_string(),
            ));
        }
        if self.tracker.flush_threshold == 0 {
            return Err(ConfigError::ValidationError(
                "tracker.flush_threshold must be > 0".to_string(),
            ));
        }
        if self.model.timeout_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "model.timeout_seconds must be > 0".to_string(),
            ));
        }
        if self.model.backend == ModelBackendKind::Chat
            && (self.model.endpoint.is_empty() || self.model.model.is_empty())
        {
            return Err(ConfigError::ValidationError(
                "model.endpoint and model.model must be set for the chat backend".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.ingest.drain_interval_seconds, 5);
        assert_eq!(config.ingest.drain_batch_size, 10);
        assert_eq!(config.tracker.flush_interval_seconds, 30);
        assert_eq!(config.tracker.flush_threshold, 50);
        assert_eq!(config.model.backend, ModelBackendKind::Disabled);
        assert_eq!(config.notifications.rate_limit_per_minute, 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_full_config() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[ingest]
drain_interval_seconds = 2
drain_batch_size = 25

[tracker]
flush_interval_seconds = 10
flush_threshold = 100

[model]
backend = "chat"
endpoint = "http://localhost:11434/v1"
model = "llama3"
timeout_seconds = 20

[notifications]
rate_limit_per_minute = 5
"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.ingest.drain_interval_seconds, 2);
        assert_eq!(config.ingest.drain_batch_size, 25);
        assert_eq!(config.tracker.flush_threshold, 100);
        assert_eq!(config.model.timeout_seconds, 20);
        assert_eq!(config.notifications.rate_limit_per_minute, 5);
        assert_eq!(config.model.backend, ModelBackendKind::Chat);
        assert_eq!(config.model.endpoint, "http://localhost:11434/v1");
        assert_eq!(config.model.model, "llama3");
        assert!(config.model.api_key.is_none());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[tracker]
flush_threshold = 75
"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.tracker.flush_threshold, 75);
        // Everything else falls back to defaults
        assert_eq!(config.tracker.flush_interval_seconds, 30);
        assert_eq!(config.ingest.drain_batch_size, 10);
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let result = Config::from_file(Path::new("/nonexistent/argus.toml"));
        assert!(matches!(result, Err(ConfigError::ReadError(_))));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[ingest]
drain_batch_size = 0
"#
        )
        .unwrap();

        let result = Config::from_file(file.path());
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_invalid_toml_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "this is not toml [").unwrap();

        let result = Config::from_file(file.path());
        assert!(matches!(result, Err(ConfigError::TomlError(_))));
    }
}
