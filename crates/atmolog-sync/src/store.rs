//! The versioned-store seam.
//!
//! [`VersionedStore`] names the handful of operations the recovery ladder
//! needs. [`GitStore`](crate::GitStore) maps them onto the git CLI;
//! [`FakeStore`](crate::FakeStore) implements them in memory so every rung can
//! be exercised in tests.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::Result;

/// Result of replaying local commits on top of the remote tip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Integration {
    /// Local history now sits on top of the remote tip.
    Integrated,
    /// The replay stopped on a conflict and is still in progress.
    Conflict(String),
}

/// Result of reapplying shelved changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unshelve {
    Applied,
    /// The changes clashed with the working tree; it now contains conflict
    /// markers and the shelved copy is kept.
    Conflicted,
}

/// Where a hard reset points the working tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetTarget {
    /// The local branch tip.
    Head,
    /// The freshly fetched remote tip.
    Remote,
}

/// Result of pushing local commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Publish {
    Published,
    /// The remote moved on since the last integration.
    Rejected(String),
}

/// Operations on a local checkout of a remote versioned store.
///
/// Paths are relative to [`root`](Self::root). Every operation is bounded in
/// time by the implementation.
#[async_trait]
pub trait VersionedStore: Send + Sync {
    /// The working tree.
    fn root(&self) -> &Path;

    /// Clean up an integration left half-done by an earlier crash.
    ///
    /// Fails with [`Error::Conflict`](crate::Error::Conflict) if the leftover
    /// integration cannot be abandoned.
    async fn prepare(&self) -> Result<()>;

    /// Whether any of `paths` differs from the last commit.
    async fn has_changes(&self, paths: &[PathBuf]) -> Result<bool>;

    /// Commit the current content of `paths`. Returns `false` if there was
    /// nothing to commit.
    async fn commit(&self, paths: &[PathBuf], message: &str) -> Result<bool>;

    /// Fetch the remote and replay local commits on top of it.
    async fn integrate(&self) -> Result<Integration>;

    /// Abandon an integration that stopped on a conflict.
    async fn abort_integration(&self) -> Result<()>;

    /// Set aside all uncommitted changes. Returns `false` if there were none.
    async fn shelve(&self) -> Result<bool>;

    /// Reapply the most recently shelved changes.
    async fn unshelve(&self) -> Result<Unshelve>;

    /// Throw away the most recently shelved changes. Used once a conflicted
    /// unshelve has been resolved some other way.
    async fn discard_shelf(&self) -> Result<()>;

    /// Discard local changes and point the working tree at `target`.
    async fn reset(&self, target: ResetTarget) -> Result<()>;

    /// Push local commits.
    async fn publish(&self) -> Result<Publish>;
}
