//! Error types for atmolog-store.

use std::path::PathBuf;
use std::time::Duration;

/// Result type for atmolog-store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in atmolog-store.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Reading or writing a file failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A file exists but does not contain what it should.
    #[error("Corrupt file {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The schedule file does not exist.
    #[error("Schedule file not found: {0}")]
    ScheduleMissing(PathBuf),

    /// Another invocation held the lock for longer than we were willing to wait.
    #[error("Timed out after {waited:?} waiting for lock {path}")]
    LockTimeout { path: PathBuf, waited: Duration },
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Corrupt {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
