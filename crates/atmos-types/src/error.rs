//! Error types for data parsing in atmos-types.

use thiserror::Error;

/// Errors that can occur when parsing atmos values from text.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ParseError {
    /// The string does not name a quality flag.
    #[error("Unknown quality flag: {0}")]
    UnknownQualityFlag(String),
}

/// Result type alias using atmos-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
