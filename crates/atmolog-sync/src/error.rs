//! Error types for atmolog-sync.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while synchronising with the remote store.
///
/// None of these are fatal to a cycle: the orchestrator reports them and the
/// next cycle starts the ladder from scratch.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The version-control command could not be started.
    #[error("Failed to run {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    /// A command exited unsuccessfully.
    #[error("`{command}` failed: {stderr}")]
    Command { command: String, stderr: String },

    /// A command did not finish in time and was killed.
    #[error("`{command}` timed out after {duration:?}")]
    Timeout { command: String, duration: Duration },

    /// The store reported a conflict where none was expected.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Copying files in or out of the holding area failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Writing a restored file failed.
    #[error(transparent)]
    Store(#[from] atmolog_store::Error),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the failure came from diverged histories rather than from the
    /// environment (network, disk, missing binary).
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }
}

/// Result type alias using atmolog-sync's Error type.
pub type Result<T> = std::result::Result<T, Error>;
