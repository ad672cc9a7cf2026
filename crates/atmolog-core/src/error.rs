//! Error types for atmolog-core.
//!
//! # Error Classification
//!
//! The orchestrator treats device errors in two groups:
//!
//! | Error | Transient | Handling |
//! |-------|-----------|----------|
//! | [`Error::Unreachable`] | yes | Retried next cycle, logged as a warning |
//! | [`Error::Timeout`] | yes | Retried next cycle, logged as a warning |
//! | [`Error::Http`] | depends | Connect/timeout failures are transient |
//! | [`Error::InvalidResponse`] | no | Reported for the affected channel |
//! | [`Error::InvalidConfig`] | no | Fix configuration and restart |
//! | [`Error::Parse`] | no | Reported for the affected value |
//!
//! Out-of-range and unavailable setpoints are not errors at all; they are
//! [`SetOutcome`](atmolog_types::SetOutcome) values.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur when talking to the device.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The device did not accept a connection.
    #[error("Device unreachable at {url}: {reason}")]
    Unreachable { url: String, reason: String },

    /// Operation timed out.
    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The timeout duration.
        duration: Duration,
    },

    /// The device answered with something that could not be understood.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Failed to parse a value.
    #[error(transparent)]
    Parse(#[from] atmolog_types::ParseError),
}

impl Error {
    /// Create an unreachable error.
    pub fn unreachable(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unreachable {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Create a timeout error with operation context.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Whether the failure is expected to clear up on its own (device offline,
    /// network congestion) and the operation should simply be tried again later.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Unreachable { .. } | Error::Timeout { .. } => true,
            Error::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Error::InvalidResponse(_) | Error::InvalidConfig(_) | Error::Parse(_) => false,
        }
    }
}

/// Result type alias using atmolog-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;
