//! Error types for data parsing in atmolog-types.

use thiserror::Error;

/// Errors that can occur when parsing persisted or device-provided data.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// A timestamp was neither RFC 3339 nor offset-less ISO 8601.
    #[error("Invalid timestamp '{0}'")]
    InvalidTimestamp(String),

    /// Structurally invalid data.
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// Result type alias using atmolog-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
