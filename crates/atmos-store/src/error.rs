//! Error types for atmos-store.

use std::path::PathBuf;

use time::{Date, OffsetDateTime};

/// Result type for atmos-store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in atmos-store.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum StoreError {
    /// Appending a sample failed after every retry. The partition was rolled
    /// back to its length before the attempt.
    #[error("Failed to append to {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The sample is not newer than the last stored sample.
    #[error("Sample at {attempted} is not after the last stored sample at {last}")]
    OutOfOrder {
        last: OffsetDateTime,
        attempted: OffsetDateTime,
    },

    /// The sample belongs to a day retention has already compressed or
    /// deleted. Nothing was written.
    #[error("Partition for {date} was closed by retention ({path})")]
    PartitionClosed { date: Date, path: PathBuf },

    /// A partition holds content that is not a valid sample log.
    #[error("Corrupt partition {path} at line {line}: {reason}")]
    Corruption {
        path: PathBuf,
        line: u64,
        reason: String,
    },

    /// Failed to create the store directory.
    #[error("Failed to create store directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    /// CSV encoding error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// The retention policy is unusable.
    #[error("Invalid retention policy: {0}")]
    InvalidPolicy(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
