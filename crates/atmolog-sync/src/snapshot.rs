//! Preserve rung: a scoped copy of local-authoritative files.
//!
//! Before the ladder touches the working tree, every tracked file is copied
//! into a temporary holding directory. Whatever the later rungs do (rebase,
//! stash, hard reset) the copy can be written back. The holding directory is
//! deleted when the [`Snapshot`] is dropped at the end of the cycle.

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Copy of a set of working-tree files.
#[derive(Debug)]
pub struct Snapshot {
    root: PathBuf,
    holding: TempDir,
    /// Relative paths that existed at capture time.
    files: Vec<PathBuf>,
}

impl Snapshot {
    /// Copy `paths` (relative to `root`) into a fresh holding area.
    ///
    /// Paths that do not exist are skipped; there is nothing to preserve.
    pub fn capture(root: &Path, paths: &[PathBuf]) -> Result<Self> {
        let holding = tempfile::Builder::new()
            .prefix("atmolog-preserve-")
            .tempdir()
            .map_err(|e| Error::io(std::env::temp_dir(), e))?;

        let mut files = Vec::new();
        for rel in paths {
            let src = root.join(rel);
            let bytes = match std::fs::read(&src) {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(Error::io(src, e)),
            };
            let dst = holding.path().join(rel);
            if let Some(dir) = dst.parent() {
                std::fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
            }
            std::fs::write(&dst, bytes).map_err(|e| Error::io(&dst, e))?;
            files.push(rel.clone());
        }

        debug!(
            "Preserved {} files in {}",
            files.len(),
            holding.path().display()
        );
        Ok(Self {
            root: root.to_path_buf(),
            holding,
            files,
        })
    }

    /// Relative paths held by this snapshot.
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// The preserved content of `rel`.
    pub fn content(&self, rel: &Path) -> Result<Vec<u8>> {
        let path = self.holding.path().join(rel);
        std::fs::read(&path).map_err(|e| Error::io(path, e))
    }

    /// Relative paths whose working-tree content differs from the snapshot.
    pub fn diverged(&self) -> Result<Vec<PathBuf>> {
        let mut diverged = Vec::new();
        for rel in &self.files {
            let preserved = self.content(rel)?;
            let current = match std::fs::read(self.root.join(rel)) {
                Ok(bytes) => Some(bytes),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
                Err(e) => return Err(Error::io(self.root.join(rel), e)),
            };
            if current.as_deref() != Some(preserved.as_slice()) {
                diverged.push(rel.clone());
            }
        }
        Ok(diverged)
    }

    /// Whether the working tree still holds exactly the preserved content.
    pub fn matches(&self) -> Result<bool> {
        Ok(self.diverged()?.is_empty())
    }

    /// Write every diverged file back into the working tree. Returns the
    /// restored paths.
    pub fn restore(&self) -> Result<Vec<PathBuf>> {
        let diverged = self.diverged()?;
        for rel in &diverged {
            let bytes = self.content(rel)?;
            atmolog_store::atomic::write(&self.root.join(rel), &bytes)?;
            info!("Restored preserved {}", rel.display());
        }
        Ok(diverged)
    }
}
