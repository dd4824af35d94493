//! Service configuration.
//!
//! Every section may be omitted; missing values take their defaults.
//!
//! ```toml
//! [sampling]
//! poll_interval_secs = 2
//! read_timeout_ms = 1500
//!
//! [smoothing]
//! window = 3
//!
//! [storage]
//! path = "/var/lib/atmos/samples"
//! utc_offset_minutes = 60
//!
//! [retention]
//! max_age_days = 90
//! interval_secs = 86400
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::UtcOffset;

use atmos_core::{
    AlertThresholds, CompensationConfig, ConfigIssue, IndexConfig, SmoothingConfig,
};
use atmos_store::{RetentionPolicy, StoreOptions};

/// Service configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Polling settings.
    pub sampling: SamplingConfig,
    /// Gas compensation and baseline tracking.
    pub compensation: CompensationConfig,
    /// Smoothing filter.
    pub smoothing: SmoothingConfig,
    /// Index breakpoint tables.
    pub indices: IndexConfig,
    /// Alert thresholds.
    pub alerts: AlertThresholds,
    /// Sample store.
    pub storage: StorageConfig,
    /// Retention policy and schedule.
    pub retention: RetentionConfig,
    /// Shutdown behaviour.
    pub shutdown: ShutdownConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Save configuration to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Write {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Validate the configuration, collecting every error.
    ///
    /// # Example
    ///
    /// ```
    /// use atmos_service::Config;
    ///
    /// let config = Config::default();
    /// config.validate().expect("Default config should be valid");
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        errors.extend(self.sampling.validate());
        errors.extend(section("compensation", self.compensation.validate()));
        errors.extend(section("smoothing", self.smoothing.validate()));
        errors.extend(section("indices", self.indices.validate()));
        errors.extend(section("alerts", self.alerts.validate()));
        errors.extend(self.storage.validate());
        errors.extend(self.retention.validate());
        errors.extend(self.shutdown.validate());

        if self.sampling.read_timeout_ms > self.sampling.poll_interval_secs.saturating_mul(1000) {
            errors.push(ValidationError {
                field: "sampling.read_timeout_ms".to_string(),
                message: "read timeout cannot exceed the poll interval".to_string(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

fn section(name: &str, issues: Vec<ConfigIssue>) -> impl Iterator<Item = ValidationError> + '_ {
    issues
        .into_iter()
        .map(move |issue| ValidationError::in_section(name, issue))
}

/// Polling configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Seconds between sensor polls.
    pub poll_interval_secs: u64,
    /// Milliseconds to wait for one poll before treating it as missing.
    pub read_timeout_ms: u64,
}

/// Minimum poll interval in seconds.
pub const MIN_POLL_INTERVAL: u64 = 1;
/// Maximum poll interval in seconds (10 minutes).
pub const MAX_POLL_INTERVAL: u64 = 600;

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 2,
            read_timeout_ms: 1500,
        }
    }
}

impl SamplingConfig {
    /// Poll interval as a duration.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Read timeout as a duration.
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Validate sampling configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.poll_interval_secs < MIN_POLL_INTERVAL {
            errors.push(ValidationError {
                field: "sampling.poll_interval_secs".to_string(),
                message: format!(
                    "poll interval {} is too short (minimum {} second)",
                    self.poll_interval_secs, MIN_POLL_INTERVAL
                ),
            });
        } else if self.poll_interval_secs > MAX_POLL_INTERVAL {
            errors.push(ValidationError {
                field: "sampling.poll_interval_secs".to_string(),
                message: format!(
                    "poll interval {} is too long (maximum {} seconds)",
                    self.poll_interval_secs, MAX_POLL_INTERVAL
                ),
            });
        }

        if self.read_timeout_ms == 0 {
            errors.push(ValidationError {
                field: "sampling.read_timeout_ms".to_string(),
                message: "read timeout must be greater than 0".to_string(),
            });
        }

        errors
    }
}

/// Storage configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Store root directory.
    pub path: PathBuf,
    /// Offset from UTC, in minutes, of the day boundaries of partitions.
    pub utc_offset_minutes: i32,
    /// Extra attempts after a failed append.
    pub write_retries: u32,
    /// Flush every append to disk.
    pub sync_writes: bool,
    /// Baseline state file. Relative paths are resolved against `path`.
    pub baseline_file: PathBuf,
    /// Save the baseline state every this many readings.
    pub baseline_save_every: u32,
}

/// Largest accepted UTC offset, in minutes.
pub const MAX_UTC_OFFSET_MINUTES: i32 = 18 * 60;

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: atmos_store::default_data_dir(),
            utc_offset_minutes: 0,
            write_retries: 3,
            sync_writes: true,
            baseline_file: PathBuf::from("baseline.json"),
            baseline_save_every: 30,
        }
    }
}

impl StorageConfig {
    /// The partition offset.
    pub fn utc_offset(&self) -> UtcOffset {
        UtcOffset::from_whole_seconds(self.utc_offset_minutes.saturating_mul(60))
            .unwrap_or(UtcOffset::UTC)
    }

    /// Options for opening the store.
    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            utc_offset: self.utc_offset(),
            write_retries: self.write_retries,
            sync_writes: self.sync_writes,
        }
    }

    /// Resolved path of the baseline state file.
    pub fn baseline_path(&self) -> PathBuf {
        self.path.join(&self.baseline_file)
    }

    /// Validate storage configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.path.as_os_str().is_empty() {
            errors.push(ValidationError {
                field: "storage.path".to_string(),
                message: "store path cannot be empty".to_string(),
            });
        }
        if self.utc_offset_minutes.abs() > MAX_UTC_OFFSET_MINUTES {
            errors.push(ValidationError {
                field: "storage.utc_offset_minutes".to_string(),
                message: format!(
                    "offset {} is beyond ±{} minutes",
                    self.utc_offset_minutes, MAX_UTC_OFFSET_MINUTES
                ),
            });
        }
        if self.baseline_file.as_os_str().is_empty() {
            errors.push(ValidationError {
                field: "storage.baseline_file".to_string(),
                message: "baseline file cannot be empty".to_string(),
            });
        }
        if self.baseline_save_every == 0 {
            errors.push(ValidationError {
                field: "storage.baseline_save_every".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        errors
    }
}

/// Retention configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Delete partitions older than this many days.
    pub max_age_days: Option<u32>,
    /// Keep the store below this many bytes.
    pub max_total_bytes: Option<u64>,
    /// Seconds between retention passes.
    pub interval_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        let policy = RetentionPolicy::default();
        Self {
            max_age_days: policy.max_age_days,
            max_total_bytes: policy.max_total_bytes,
            interval_secs: 86_400,
        }
    }
}

impl RetentionConfig {
    /// The policy to enforce.
    pub fn policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            max_age_days: self.max_age_days,
            max_total_bytes: self.max_total_bytes,
        }
    }

    /// Interval between passes.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Validate retention configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if let Err(atmos_store::StoreError::InvalidPolicy(message)) = self.policy().validate() {
            errors.push(ValidationError {
                field: "retention".to_string(),
                message,
            });
        }
        if self.interval_secs == 0 {
            errors.push(ValidationError {
                field: "retention.interval_secs".to_string(),
                message: "interval must be greater than 0".to_string(),
            });
        }

        errors
    }
}

/// Shutdown configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Seconds to wait for background tasks after a stop request.
    pub grace_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self { grace_secs: 5 }
    }
}

impl ShutdownConfig {
    /// Grace period as a duration.
    pub fn grace(&self) -> Duration {
        Duration::from_secs(self.grace_secs)
    }

    /// Validate shutdown configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        if self.grace_secs == 0 {
            vec![ValidationError {
                field: "shutdown.grace_secs".to_string(),
                message: "grace period must be greater than 0".to_string(),
            }]
        } else {
            Vec::new()
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// The field path (e.g., `sampling.poll_interval_secs` or `indices.iaq[2]`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl ValidationError {
    /// Place a section-relative issue under its section name.
    pub fn in_section(section: &str, issue: ConfigIssue) -> Self {
        Self {
            field: format!("{}.{}", section, issue.field),
            message: issue.message,
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("atmos")
        .join("atmosd.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use atmos_core::Breakpoints;

    fn validation_errors(config: &Config) -> Vec<ValidationError> {
        match config.validate() {
            Err(ConfigError::Validation(errors)) => errors,
            other => panic!("expected validation errors, got {other:?}"),
        }
    }

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.sampling.poll_interval_secs, 2);
        assert_eq!(config.sampling.read_timeout_ms, 1500);
        assert_eq!(config.smoothing.window, 3);
        assert_eq!(config.alerts.iaq, 150);
        assert_eq!(config.storage.path, atmos_store::default_data_dir());
        assert_eq!(config.retention.max_age_days, Some(90));
        assert_eq!(config.retention.max_total_bytes, None);
        assert_eq!(config.shutdown.grace_secs, 5);
    }

    #[test]
    fn test_default_config_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let toml = r#"
            [sampling]
            poll_interval_secs = 5

            [compensation]
            warmup_secs = 600

            [storage]
            path = "/data/atmos"
            utc_offset_minutes = -300
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.sampling.poll_interval_secs, 5);
        assert_eq!(config.sampling.read_timeout_ms, 1500);
        assert_eq!(config.compensation.warmup_secs, 600);
        assert_eq!(
            config.compensation.baseline_time_constant_secs,
            CompensationConfig::default().baseline_time_constant_secs
        );
        assert_eq!(config.storage.path, PathBuf::from("/data/atmos"));
        assert_eq!(config.storage.utc_offset().whole_hours(), -5);
        assert_eq!(
            config.storage.baseline_path(),
            PathBuf::from("/data/atmos/baseline.json")
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_breakpoints_from_toml() {
        let toml = r#"
            [indices]
            voc = [[0.0, 0.0], [0.5, 250.0], [1.0, 500.0]]
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(
            config.indices.voc,
            Breakpoints::new(vec![(0.0, 0.0), (0.5, 250.0), (1.0, 500.0)])
        );
        assert_eq!(config.indices.iaq, IndexConfig::default().iaq);
    }

    #[test]
    fn test_config_save_and_load() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("nested").join("atmosd.toml");

        let mut config = Config::default();
        config.sampling.poll_interval_secs = 10;
        config.storage.path = PathBuf::from("/tmp/atmos");
        config.retention.max_total_bytes = Some(1 << 30);

        config.save(&config_path).unwrap();
        let loaded = Config::load(&config_path).unwrap();
        loaded.validate().unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_config_load_nonexistent() {
        let result = Config::load("/nonexistent/path/atmosd.toml");
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_config_load_invalid_toml() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("invalid.toml");
        std::fs::write(&config_path, "this is not valid { toml").unwrap();

        let result = Config::load(&config_path);
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_default_config_path() {
        assert!(default_config_path().ends_with("atmos/atmosd.toml"));
    }

    #[test]
    fn test_sampling_validation() {
        let zero = SamplingConfig {
            poll_interval_secs: 0,
            read_timeout_ms: 0,
        };
        let errors = zero.validate();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].message.contains("too short"));

        let long = SamplingConfig {
            poll_interval_secs: 3600,
            ..Default::default()
        };
        assert!(long.validate()[0].message.contains("too long"));
    }

    #[test]
    fn test_timeout_longer_than_interval() {
        let mut config = Config::default();
        config.sampling.read_timeout_ms = 5000;
        let errors = validation_errors(&config);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "sampling.read_timeout_ms");
    }

    #[test]
    fn test_section_errors_are_prefixed() {
        let mut config = Config::default();
        config.smoothing.window = 9;
        config.compensation.min_correction = 2.0;
        config.indices.iaq = Breakpoints::new(vec![]);
        config.alerts.iaq = 900;

        let errors = validation_errors(&config);
        assert!(errors.iter().any(|e| e.field == "smoothing.window"));
        assert!(errors.iter().any(|e| e.field.starts_with("compensation.")));
        assert!(errors.iter().any(|e| e.field.starts_with("indices.iaq")));
        assert!(errors.iter().any(|e| e.field == "alerts.iaq"));
    }

    #[test]
    fn test_storage_validation() {
        let bad = StorageConfig {
            path: PathBuf::new(),
            utc_offset_minutes: 20 * 60,
            baseline_file: PathBuf::new(),
            baseline_save_every: 0,
            ..Default::default()
        };
        assert_eq!(bad.validate().len(), 4);
    }

    #[test]
    fn test_retention_validation() {
        let unbounded = RetentionConfig {
            max_age_days: None,
            max_total_bytes: None,
            interval_secs: 0,
        };
        let errors = unbounded.validate();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].field, "retention");
    }

    #[test]
    fn test_shutdown_validation() {
        assert_eq!(ShutdownConfig { grace_secs: 0 }.validate().len(), 1);
        assert!(ShutdownConfig::default().validate().is_empty());
    }

    #[test]
    fn test_config_validation_error_display() {
        let error = ConfigError::Validation(vec![
            ValidationError {
                field: "sampling.poll_interval_secs".to_string(),
                message: "too short".to_string(),
            },
            ValidationError {
                field: "indices.voc[1]".to_string(),
                message: "not increasing".to_string(),
            },
        ]);
        let display = error.to_string();
        assert!(display.contains("  - sampling.poll_interval_secs: too short"));
        assert!(display.contains("  - indices.voc[1]: not increasing"));
    }
}
