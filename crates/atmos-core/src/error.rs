//! Error types for atmos-core.
//!
//! Sensor faults are not errors: a missing or out-of-range channel is
//! recovered by substitution and surfaced as a [`crate::SensorFault`] on the
//! compensated signal. The variants here cover the failures that cannot be
//! degraded locally.
//!
//! | Error Type | Strategy |
//! |------------|----------|
//! | [`Error::SensorTimeout`] | Treat the poll as an all-missing reading |
//! | [`Error::SensorUnavailable`] | Treat the poll as an all-missing reading |
//! | [`Error::InvalidConfig`] | Fix configuration and restart |
//! | [`Error::Io`] | Log; baseline persistence is retried on the next save |
//! | [`Error::Serialization`] | Discard the persisted baseline and start fresh |

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur in the atmos signal core.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The sample source did not answer within the read timeout.
    #[error("Sensor read timed out after {duration:?}")]
    SensorTimeout {
        /// The timeout that elapsed.
        duration: Duration,
    },

    /// The sample source reported a failure.
    #[error("Sensor unavailable: {0}")]
    SensorUnavailable(String),

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Baseline state could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Create a timeout error.
    pub fn timeout(duration: Duration) -> Self {
        Self::SensorTimeout { duration }
    }

    /// Create a configuration error from a list of issues.
    pub fn invalid_config(issues: &[ConfigIssue]) -> Self {
        let joined = issues
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        Self::InvalidConfig(joined)
    }
}

/// Result type alias using atmos-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// A single problem found while validating a configuration section.
///
/// `field` is relative to the section (e.g. `window`), so callers embedding
/// the section in a larger file can prefix it with the section name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigIssue {
    /// Field that failed validation.
    pub field: String,
    /// Description of the problem.
    pub message: String,
}

impl ConfigIssue {
    pub(crate) fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_display() {
        let err = Error::timeout(Duration::from_millis(1500));
        assert_eq!(err.to_string(), "Sensor read timed out after 1.5s");
    }

    #[test]
    fn test_invalid_config_joins_issues() {
        let err = Error::invalid_config(&[
            ConfigIssue::new("window", "must be between 1 and 5"),
            ConfigIssue::new("warmup_secs", "must be greater than 0"),
        ]);
        assert_eq!(
            err.to_string(),
            "Invalid configuration: window: must be between 1 and 5; warmup_secs: must be greater than 0"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
