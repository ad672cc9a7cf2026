//! The escalating recovery ladder.
//!
//! One call to [`SyncController::sync`] is one cycle. Rungs are tried in
//! order and each is attempted only if the one before could not integrate:
//!
//! | Rung | Action |
//! |------|--------|
//! | Preserve | copy tracked files to a holding area |
//! | Commit | commit tracked files |
//! | Integrate | replay local commits on the remote tip |
//! | Shelve | set aside uncommitted changes, integrate again, reapply |
//! | Overwrite | reapply conflicted: reset to local head, write preserved files back, recommit |
//! | Reset | still diverged: reset to the remote tip, write preserved files back, recommit |
//!
//! A rejected push goes back to Integrate, up to
//! [`SyncConfig::max_push_retries`] times. No state carries over between
//! cycles other than the files themselves.
//!
//! Whatever rung ends the cycle, the tracked files in the working tree hold
//! at least what Preserve captured.

use std::fmt;
use std::path::PathBuf;

use time::OffsetDateTime;
use tracing::{info, warn};

use crate::error::Result;
use crate::snapshot::Snapshot;
use crate::store::{Integration, Publish, ResetTarget, Unshelve, VersionedStore};

/// Default number of re-integrations after a rejected push.
pub const DEFAULT_MAX_PUSH_RETRIES: u32 = 3;

/// Ladder configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Local-authoritative files, relative to the store root.
    pub tracked: Vec<PathBuf>,
    pub max_push_retries: u32,
}

impl SyncConfig {
    pub fn new(tracked: Vec<PathBuf>) -> Self {
        Self {
            tracked,
            max_push_retries: DEFAULT_MAX_PUSH_RETRIES,
        }
    }

    #[must_use]
    pub fn max_push_retries(mut self, retries: u32) -> Self {
        self.max_push_retries = retries;
        self
    }
}

/// Ladder rungs, in escalation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Rung {
    Preserve,
    Commit,
    Integrate,
    Shelve,
    Overwrite,
    Reset,
}

impl fmt::Display for Rung {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Rung::Preserve => "preserve",
            Rung::Commit => "commit",
            Rung::Integrate => "integrate",
            Rung::Shelve => "shelve",
            Rung::Overwrite => "overwrite",
            Rung::Reset => "reset",
        };
        f.write_str(name)
    }
}

/// Outcome of one sync cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// Highest rung the cycle had to reach.
    pub rung: Rung,
    /// Whether the remote now holds the local commits.
    pub published: bool,
    /// Integrate-then-publish attempts made.
    pub attempts: u32,
    /// Whether this cycle created at least one commit.
    pub committed: bool,
}

/// Drives a [`VersionedStore`] through the recovery ladder.
#[derive(Debug)]
pub struct SyncController<S> {
    store: S,
    config: SyncConfig,
}

impl<S: VersionedStore> SyncController<S> {
    pub fn new(store: S, config: SyncConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Run one sync cycle at `now`.
    ///
    /// Conflicts and rejected pushes are not errors: they are resolved by the
    /// ladder or reported with `published == false`. An `Err` means the store
    /// itself failed (missing binary, timeout, disk); the preserved files are
    /// written back before it is returned.
    pub async fn sync(&self, now: OffsetDateTime) -> Result<SyncReport> {
        self.store.prepare().await?;
        let snapshot = Snapshot::capture(self.store.root(), &self.config.tracked)?;

        match self.ladder(&snapshot, now).await {
            Ok(report) => {
                info!(
                    "Sync finished at rung {} after {} attempt(s), published: {}",
                    report.rung, report.attempts, report.published
                );
                Ok(report)
            }
            Err(e) => {
                warn!("Sync failed: {}", e);
                if let Err(restore) = snapshot.restore() {
                    warn!("Could not write back preserved files: {}", restore);
                }
                Err(e)
            }
        }
    }

    async fn ladder(&self, snapshot: &Snapshot, now: OffsetDateTime) -> Result<SyncReport> {
        let mut report = SyncReport {
            rung: Rung::Preserve,
            published: false,
            attempts: 0,
            committed: false,
        };

        report.committed = self.commit_tracked(now).await?;
        report.rung = Rung::Commit;

        loop {
            report.attempts += 1;
            let (reached, recommitted) = self.integrate(snapshot, now).await?;
            report.rung = report.rung.max(reached);
            report.committed |= recommitted;
            report.committed |= self.overwrite(snapshot, now).await?;

            match self.store.publish().await? {
                Publish::Published => {
                    report.published = true;
                    return Ok(report);
                }
                Publish::Rejected(reason) => {
                    warn!("Push rejected: {}", reason.trim());
                    if report.attempts > self.config.max_push_retries {
                        warn!(
                            "Giving up publishing after {} attempts; local data is kept",
                            report.attempts
                        );
                        return Ok(report);
                    }
                }
            }
        }
    }

    /// Integrate, escalating through Shelve, Overwrite and Reset as needed.
    /// Returns the rung reached and whether preserved files were recommitted.
    async fn integrate(&self, snapshot: &Snapshot, now: OffsetDateTime) -> Result<(Rung, bool)> {
        match self.store.integrate().await? {
            Integration::Integrated => return Ok((Rung::Integrate, false)),
            Integration::Conflict(reason) => {
                warn!("Integration conflict: {}", reason.trim());
            }
        }

        self.store.abort_integration().await?;
        let shelved = self.store.shelve().await?;
        info!("Shelved local changes: {}", shelved);

        match self.store.integrate().await? {
            Integration::Integrated => {
                if shelved && self.store.unshelve().await? == Unshelve::Conflicted {
                    warn!("Shelved changes conflict with the remote; restoring preserved files");
                    self.store.reset(ResetTarget::Head).await?;
                    let recommitted = self.overwrite(snapshot, now).await?;
                    self.store.discard_shelf().await?;
                    return Ok((Rung::Overwrite, recommitted));
                }
                Ok((Rung::Shelve, false))
            }
            Integration::Conflict(reason) => {
                warn!(
                    "Still diverged after shelving ({}); resetting to the remote",
                    reason.trim()
                );
                self.store.abort_integration().await?;
                self.store.reset(ResetTarget::Remote).await?;
                let recommitted = self.overwrite(snapshot, now).await?;
                Ok((Rung::Reset, recommitted))
            }
        }
    }

    /// Write back any preserved file that diverged and commit it.
    async fn overwrite(&self, snapshot: &Snapshot, now: OffsetDateTime) -> Result<bool> {
        let restored = snapshot.restore()?;
        if restored.is_empty() {
            return Ok(false);
        }
        self.commit_tracked(now).await
    }

    async fn commit_tracked(&self, now: OffsetDateTime) -> Result<bool> {
        if !self.store.has_changes(&self.config.tracked).await? {
            return Ok(false);
        }
        let message = format!("Update log: {}", atmolog_types::timestamp::format(now));
        let committed = self.store.commit(&self.config.tracked, &message).await?;
        if committed {
            info!("{}", message);
        }
        Ok(committed)
    }
}
