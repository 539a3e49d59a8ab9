//! Run configuration.
//!
//! Settings come from an optional YAML file; command-line flags override
//! individual values afterwards.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

use color_eyre::eyre::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::analysis::dispatcher::DEFAULT_QUEUE_CAPACITY;

/// Top-level configuration structure that mirrors the YAML configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Capacity of each per-category event queue
    pub queue_capacity: usize,
    /// (Optional) Stop watching after this long (e.g., "2m", "90s")
    #[serde(with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub test_duration: Option<Duration>,
    /// Interval between status log lines while watching
    #[serde(with = "humantime_serde")]
    pub report_interval: Duration,
    /// Default log filter, used when RUST_LOG is unset
    pub log_level: String,
    /// Directory the reports are written to
    pub output_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            test_duration: None,
            report_interval: Duration::from_secs(15),
            log_level: "info".to_string(),
            output_dir: PathBuf::from("."),
        }
    }
}

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::InvalidQueueCapacity);
        }

        if self.report_interval.is_zero() {
            return Err(ConfigError::InvalidDuration(
                "report_interval must be greater than zero".to_string(),
            ));
        }

        if self.test_duration.is_some_and(|d| d.is_zero()) {
            return Err(ConfigError::InvalidDuration(
                "test_duration must be greater than zero".to_string(),
            ));
        }

        if self.log_level.trim().is_empty() {
            return Err(ConfigError::InvalidLogLevel(self.log_level.clone()));
        }

        Ok(())
    }
}

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("queue_capacity must be greater than zero")]
    InvalidQueueCapacity,
    #[error("Invalid duration: {0}")]
    InvalidDuration(String),
    #[error("Invalid log level: '{0}'")]
    InvalidLogLevel(String),
}

/// Load and parse configuration from a YAML file
pub fn load_config(config_path: &Path) -> Result<Config> {
    let file = File::open(config_path)
        .with_context(|| format!("Failed to open config file {}", config_path.display()))?;

    let config: Config = serde_yaml::from_reader(file)
        .with_context(|| format!("Failed to parse config file {}", config_path.display()))?;

    config.validate()?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(yaml: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.queue_capacity, 100);
        assert_eq!(config.test_duration, None);
        assert_eq!(config.report_interval, Duration::from_secs(15));
        assert_eq!(config.log_level, "info");
        assert_eq!(config.output_dir, PathBuf::from("."));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_full_config() {
        let file = write_config(
            r#"
queue_capacity: 250
test_duration: "2m"
report_interval: "30s"
log_level: debug
output_dir: /tmp/peerscore
"#,
        );

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.queue_capacity, 250);
        assert_eq!(config.test_duration, Some(Duration::from_secs(120)));
        assert_eq!(config.report_interval, Duration::from_secs(30));
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.output_dir, PathBuf::from("/tmp/peerscore"));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let file = write_config("test_duration: 90s\n");

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.test_duration, Some(Duration::from_secs(90)));
        assert_eq!(config.queue_capacity, DEFAULT_QUEUE_CAPACITY);
        assert_eq!(config.report_interval, Duration::from_secs(15));
    }

    #[test]
    fn test_zero_queue_capacity_rejected() {
        let file = write_config("queue_capacity: 0\n");
        let err = load_config(file.path()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::InvalidQueueCapacity)
        ));
    }

    #[test]
    fn test_zero_report_interval_rejected() {
        let config = Config {
            report_interval: Duration::ZERO,
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidDuration(_))
        ));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let file = write_config("queue_size: 10\n");
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn test_missing_file() {
        assert!(load_config(Path::new("/nonexistent/peerscore.yaml")).is_err());
    }
}
