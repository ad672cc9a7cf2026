//! Exclusive lock over the working tree.
//!
//! The logging and scheduling cycles are started by independent timers and
//! may overlap. Both mutate files in the same checkout, so each holds a
//! [`FileLock`] for the whole mutation section. The lock is a file created
//! with `O_EXCL` semantics; it is removed when the guard is dropped, on every
//! exit path.
//!
//! A lock file older than the configured staleness threshold is assumed to be
//! left over from a crashed invocation and is broken. A live holder keeps its
//! file fresh from a heartbeat task, so a long cycle is never mistaken for a
//! crashed one. Release only removes the file while it still carries the
//! holder's own stamp.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use atmolog_types::timestamp;

use crate::error::{Error, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(250);
const MIN_HEARTBEAT: Duration = Duration::from_millis(50);
const MAX_HEARTBEAT: Duration = Duration::from_secs(60);

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// A held lock. Dropping it releases the lock.
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use std::time::Duration;
/// use atmolog_store::FileLock;
///
/// # async fn example() -> atmolog_store::Result<()> {
/// let _lock = FileLock::acquire(
///     Path::new("data/.atmolog.lock"),
///     Duration::from_secs(30),
///     Duration::from_secs(600),
/// )
/// .await?;
/// // mutate files...
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
    stamp: String,
    heartbeat: Option<JoinHandle<()>>,
}

impl FileLock {
    /// Try to take the lock once, without waiting.
    ///
    /// Returns `Ok(None)` if another holder has it. The returned guard has no
    /// heartbeat; call [`FileLock::refresh`] to keep it fresh.
    pub fn try_acquire(path: &Path, stale_after: Duration) -> Result<Option<Self>> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
        }

        if let Some(lock) = Self::create(path)? {
            return Ok(Some(lock));
        }
        if is_stale(path, stale_after) && break_if_stale(path, stale_after)? {
            return Self::create(path);
        }
        Ok(None)
    }

    /// Take the lock, polling until `wait` has elapsed.
    ///
    /// The lock file is touched every third of `stale_after` for as long as
    /// the guard lives.
    pub async fn acquire(path: &Path, wait: Duration, stale_after: Duration) -> Result<Self> {
        let started = tokio::time::Instant::now();
        loop {
            if let Some(mut lock) = Self::try_acquire(path, stale_after)? {
                let period = (stale_after / 3).clamp(MIN_HEARTBEAT, MAX_HEARTBEAT);
                lock.heartbeat = Some(tokio::spawn(heartbeat(
                    lock.path.clone(),
                    lock.stamp.clone(),
                    period,
                )));
                return Ok(lock);
            }
            let waited = started.elapsed();
            if waited >= wait {
                return Err(Error::LockTimeout {
                    path: path.to_path_buf(),
                    waited,
                });
            }
            debug!("Lock {} is held, waiting", path.display());
            tokio::time::sleep(POLL_INTERVAL.min(wait - waited)).await;
        }
    }

    /// Mark the lock as live. Returns `false` if the file no longer carries
    /// this holder's stamp.
    pub fn refresh(&self) -> Result<bool> {
        touch(&self.path, &self.stamp).map_err(|e| Error::io(&self.path, e))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn create(path: &Path) -> Result<Option<Self>> {
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(mut file) => {
                let stamp = format!(
                    "pid={} seq={} acquired={}\n",
                    std::process::id(),
                    SEQUENCE.fetch_add(1, Ordering::Relaxed),
                    timestamp::format(OffsetDateTime::now_utc())
                );
                file.write_all(stamp.as_bytes())
                    .map_err(|e| Error::io(path, e))?;
                debug!("Acquired lock {}", path.display());
                Ok(Some(Self {
                    path: path.to_path_buf(),
                    stamp,
                    heartbeat: None,
                }))
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(Error::io(path, e)),
        }
    }
}

async fn heartbeat(path: PathBuf, stamp: String, period: Duration) {
    let mut ticks = tokio::time::interval(period);
    loop {
        ticks.tick().await;
        match touch(&path, &stamp) {
            Ok(true) => {}
            Ok(false) => {
                warn!("Lock {} was taken over by another holder", path.display());
                return;
            }
            Err(e) => warn!("Failed to refresh lock {}: {}", path.display(), e),
        }
    }
}

/// Set the modification time to now if the file still holds `stamp`.
fn touch(path: &Path, stamp: &str) -> std::io::Result<bool> {
    if !holds(path, stamp) {
        return Ok(false);
    }
    OpenOptions::new()
        .write(true)
        .open(path)?
        .set_modified(SystemTime::now())?;
    Ok(true)
}

fn holds(path: &Path, stamp: &str) -> bool {
    std::fs::read_to_string(path).is_ok_and(|content| content == stamp)
}

fn is_stale(path: &Path, stale_after: Duration) -> bool {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|age| age > stale_after)
}

/// Move a stale lock file out of the way.
///
/// The file is first renamed aside and judged again, so a fresh lock created
/// between the staleness check and the rename is put back instead of deleted.
/// Returns `true` if the lock path is now free.
fn break_if_stale(path: &Path, stale_after: Duration) -> Result<bool> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "lock".to_string());
    let aside = path.with_file_name(format!(
        "{}.stale-{}-{}",
        name,
        std::process::id(),
        SEQUENCE.fetch_add(1, Ordering::Relaxed)
    ));

    match std::fs::rename(path, &aside) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(true),
        Err(e) => return Err(Error::io(path, e)),
    }

    if !is_stale(&aside, stale_after) {
        debug!("Lock {} was renewed while being broken", path.display());
        // hard_link never replaces an existing file
        match std::fs::hard_link(&aside, path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
            Err(e) => warn!("Failed to restore lock {}: {}", path.display(), e),
        }
        let _ = std::fs::remove_file(&aside);
        return Ok(false);
    }

    warn!(
        "Breaking stale lock {} (older than {:?})",
        path.display(),
        stale_after
    );
    std::fs::remove_file(&aside).map_err(|e| Error::io(&aside, e))?;
    Ok(true)
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Some(task) = self.heartbeat.take() {
            task.abort();
        }
        if !holds(&self.path, &self.stamp) {
            warn!(
                "Lock {} is no longer ours, leaving it in place",
                self.path.display()
            );
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Released lock {}", self.path.display()),
            Err(e) => warn!("Failed to remove lock {}: {}", self.path.display(), e),
        }
    }
}
