//! In-memory [`VersionedStore`] for tests.
//!
//! The working tree is real (files under a temporary directory) so snapshot
//! and restore behave exactly as with git. Commit history and the remote live
//! in memory. A [`FakeRemote`] can be shared between several stores, or
//! advanced directly with [`FakeRemote::commit_as_other_writer`], to model
//! concurrent writers. Faults can be injected per operation.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tempfile::TempDir;

use crate::error::{Error, Result};
use crate::store::{Integration, Publish, ResetTarget, Unshelve, VersionedStore};

type Tree = BTreeMap<PathBuf, Vec<u8>>;

#[derive(Debug, Clone)]
struct Commit {
    message: String,
    tree: Tree,
    /// Paths whose content differs from the parent commit.
    changed: BTreeSet<PathBuf>,
}

fn tip(commits: &[Commit]) -> Tree {
    commits.last().map(|c| c.tree.clone()).unwrap_or_default()
}

fn changed_paths(before: &Tree, after: &Tree) -> BTreeSet<PathBuf> {
    before
        .keys()
        .chain(after.keys())
        .filter(|p| before.get(*p) != after.get(*p))
        .cloned()
        .collect()
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Shared remote history.
#[derive(Debug, Clone, Default)]
pub struct FakeRemote {
    commits: Arc<Mutex<Vec<Commit>>>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a commit that sets `path` to `content`, as another machine would.
    pub fn commit_as_other_writer(&self, path: impl Into<PathBuf>, content: &[u8], message: &str) {
        let mut commits = lock(&self.commits);
        let mut tree = tip(&commits);
        let path = path.into();
        tree.insert(path.clone(), content.to_vec());
        commits.push(Commit {
            message: message.to_string(),
            tree,
            changed: [path].into_iter().collect(),
        });
    }

    /// Content of `path` at the remote tip.
    pub fn file(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        lock(&self.commits).last()?.tree.get(path.as_ref()).cloned()
    }

    /// Number of commits on the remote.
    pub fn len(&self) -> usize {
        lock(&self.commits).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Commit messages, oldest first.
    pub fn messages(&self) -> Vec<String> {
        lock(&self.commits)
            .iter()
            .map(|c| c.message.clone())
            .collect()
    }

    fn history(&self) -> Vec<Commit> {
        lock(&self.commits).clone()
    }
}

#[derive(Debug, Default)]
struct Faults {
    integrate_conflicts: u32,
    push_rejections: u32,
    unshelve_conflicts: u32,
    stuck_rebase: bool,
}

#[derive(Debug)]
struct Shelved {
    /// Head content of each changed path when it was shelved.
    base: BTreeMap<PathBuf, Option<Vec<u8>>>,
    /// Working-tree content of each changed path (`None` = deleted).
    changes: BTreeMap<PathBuf, Option<Vec<u8>>>,
}

#[derive(Debug, Default)]
struct Local {
    /// Remote history as of the last integration.
    base: Vec<Commit>,
    /// Commits not yet published.
    ahead: Vec<Commit>,
    shelf: Vec<Shelved>,
    rebase_in_progress: bool,
}

impl Local {
    fn head(&self) -> Tree {
        if self.ahead.is_empty() {
            tip(&self.base)
        } else {
            tip(&self.ahead)
        }
    }
}

/// Fake checkout of a [`FakeRemote`].
#[derive(Debug)]
pub struct FakeStore {
    _dir: Option<TempDir>,
    root: PathBuf,
    remote: FakeRemote,
    local: Mutex<Local>,
    faults: Mutex<Faults>,
}

impl FakeStore {
    /// Clone `remote` into a fresh temporary working tree.
    pub fn clone_from(remote: &FakeRemote) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("atmolog-fake-")
            .tempdir()
            .map_err(|e| Error::io(std::env::temp_dir(), e))?;
        let root = dir.path().to_path_buf();
        Self::clone_into(remote, root, Some(dir))
    }

    /// Clone `remote` into the existing directory `root`.
    pub fn clone_at(remote: &FakeRemote, root: impl Into<PathBuf>) -> Result<Self> {
        Self::clone_into(remote, root.into(), None)
    }

    fn clone_into(remote: &FakeRemote, root: PathBuf, dir: Option<TempDir>) -> Result<Self> {
        let base = remote.history();
        let store = Self {
            _dir: dir,
            root,
            remote: remote.clone(),
            local: Mutex::new(Local {
                base,
                ..Default::default()
            }),
            faults: Mutex::new(Faults::default()),
        };
        let head = lock(&store.local).head();
        store.checkout(&Tree::new(), &head)?;
        Ok(store)
    }

    /// Make the next `n` integrations stop on a conflict.
    pub fn fail_next_integrations(&self, n: u32) {
        lock(&self.faults).integrate_conflicts = n;
    }

    /// Make the next `n` pushes get rejected.
    pub fn reject_next_pushes(&self, n: u32) {
        lock(&self.faults).push_rejections = n;
    }

    /// Make the next `n` unshelves conflict.
    pub fn conflict_next_unshelves(&self, n: u32) {
        lock(&self.faults).unshelve_conflicts = n;
    }

    /// Leave a rebase behind that cannot be aborted.
    pub fn leave_stuck_rebase(&self) {
        lock(&self.local).rebase_in_progress = true;
        lock(&self.faults).stuck_rebase = true;
    }

    /// Number of commits not yet published.
    pub fn unpublished(&self) -> usize {
        lock(&self.local).ahead.len()
    }

    /// Number of shelved change sets.
    pub fn shelved(&self) -> usize {
        lock(&self.local).shelf.len()
    }

    fn read(&self, rel: &Path) -> Result<Option<Vec<u8>>> {
        let path = self.root.join(rel);
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::io(path, e)),
        }
    }

    fn write(&self, rel: &Path, content: Option<&[u8]>) -> Result<()> {
        let path = self.root.join(rel);
        match content {
            Some(bytes) => {
                if let Some(dir) = path.parent() {
                    std::fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
                }
                std::fs::write(&path, bytes).map_err(|e| Error::io(path, e))
            }
            None => match std::fs::remove_file(&path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(Error::io(path, e)),
            },
        }
    }

    /// Move the working tree from `from` to `to`, leaving untracked files.
    fn checkout(&self, from: &Tree, to: &Tree) -> Result<()> {
        for path in from.keys().filter(|p| !to.contains_key(*p)) {
            self.write(path, None)?;
        }
        for (path, bytes) in to {
            self.write(path, Some(bytes))?;
        }
        Ok(())
    }

    /// Uncommitted changes to tracked files (`None` = deleted). Untracked
    /// files are ignored, as git ignores them when rebasing and stashing.
    fn dirty(&self, head: &Tree) -> Result<BTreeMap<PathBuf, Option<Vec<u8>>>> {
        let mut dirty = BTreeMap::new();
        for (path, committed) in head {
            let current = self.read(path)?;
            if current.as_ref() != Some(committed) {
                dirty.insert(path.clone(), current);
            }
        }
        Ok(dirty)
    }
}

#[async_trait]
impl VersionedStore for FakeStore {
    fn root(&self) -> &Path {
        &self.root
    }

    async fn prepare(&self) -> Result<()> {
        let mut local = lock(&self.local);
        if local.rebase_in_progress && lock(&self.faults).stuck_rebase {
            return Err(Error::Conflict(
                "rebase left over from an earlier run cannot be aborted".to_string(),
            ));
        }
        local.rebase_in_progress = false;
        Ok(())
    }

    async fn has_changes(&self, paths: &[PathBuf]) -> Result<bool> {
        let head = lock(&self.local).head();
        for path in paths {
            if self.read(path)?.as_ref() != head.get(path) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn commit(&self, paths: &[PathBuf], message: &str) -> Result<bool> {
        let mut local = lock(&self.local);
        let head = local.head();
        let mut tree = head.clone();
        for path in paths {
            match self.read(path)? {
                Some(bytes) => tree.insert(path.clone(), bytes),
                None => tree.remove(path),
            };
        }

        let changed = changed_paths(&head, &tree);
        if changed.is_empty() {
            return Ok(false);
        }
        local.ahead.push(Commit {
            message: message.to_string(),
            tree,
            changed,
        });
        Ok(true)
    }

    async fn integrate(&self) -> Result<Integration> {
        let mut local = lock(&self.local);
        if local.rebase_in_progress {
            return Ok(Integration::Conflict("rebase already in progress".into()));
        }
        {
            let mut faults = lock(&self.faults);
            if faults.integrate_conflicts > 0 {
                faults.integrate_conflicts -= 1;
                local.rebase_in_progress = true;
                return Ok(Integration::Conflict("injected conflict".into()));
            }
        }

        let head = local.head();
        if !self.dirty(&head)?.is_empty() {
            return Ok(Integration::Conflict(
                "cannot rebase: you have unstaged changes".into(),
            ));
        }

        let remote = self.remote.history();
        let upstream: &[Commit] = remote.get(local.base.len()..).unwrap_or_default();
        if upstream.is_empty() {
            return Ok(Integration::Integrated);
        }

        let theirs: BTreeSet<&PathBuf> = upstream.iter().flat_map(|c| &c.changed).collect();
        let remote_tip = tip(&remote);
        let clash = local
            .ahead
            .iter()
            .flat_map(|c| &c.changed)
            .filter(|p| theirs.contains(p))
            .find(|p| remote_tip.get(*p) != head.get(*p))
            .cloned();
        if let Some(path) = clash {
            local.rebase_in_progress = true;
            return Ok(Integration::Conflict(format!(
                "CONFLICT (content): Merge conflict in {}",
                path.display()
            )));
        }

        let mut tree = remote_tip;
        let mut rebased = Vec::with_capacity(local.ahead.len());
        for commit in &local.ahead {
            let parent = tree.clone();
            for path in &commit.changed {
                match commit.tree.get(path) {
                    Some(bytes) => tree.insert(path.clone(), bytes.clone()),
                    None => tree.remove(path),
                };
            }
            rebased.push(Commit {
                message: commit.message.clone(),
                changed: changed_paths(&parent, &tree),
                tree: tree.clone(),
            });
        }

        local.base = remote;
        local.ahead = rebased;
        let new_head = local.head();
        self.checkout(&head, &new_head)?;
        Ok(Integration::Integrated)
    }

    async fn abort_integration(&self) -> Result<()> {
        lock(&self.local).rebase_in_progress = false;
        Ok(())
    }

    async fn shelve(&self) -> Result<bool> {
        let mut local = lock(&self.local);
        let head = local.head();
        let changes = self.dirty(&head)?;
        if changes.is_empty() {
            return Ok(false);
        }
        let base = changes
            .keys()
            .map(|p| (p.clone(), head.get(p).cloned()))
            .collect();
        for path in changes.keys() {
            self.write(path, head.get(path).map(Vec::as_slice))?;
        }
        local.shelf.push(Shelved { base, changes });
        Ok(true)
    }

    async fn unshelve(&self) -> Result<Unshelve> {
        let mut local = lock(&self.local);
        let Some(shelved) = local.shelf.pop() else {
            return Ok(Unshelve::Applied);
        };
        let head = local.head();

        let injected = {
            let mut faults = lock(&self.faults);
            let hit = faults.unshelve_conflicts > 0;
            faults.unshelve_conflicts = faults.unshelve_conflicts.saturating_sub(1);
            hit
        };
        let moved = shelved
            .base
            .iter()
            .any(|(path, before)| head.get(path) != before.as_ref());

        if injected || moved {
            for (path, stashed) in &shelved.changes {
                let mut marked = b"<<<<<<< Updated upstream\n".to_vec();
                marked.extend(head.get(path).cloned().unwrap_or_default());
                marked.extend_from_slice(b"\n=======\n");
                marked.extend(stashed.clone().unwrap_or_default());
                marked.extend_from_slice(b"\n>>>>>>> Stashed changes\n");
                self.write(path, Some(&marked))?;
            }
            local.shelf.push(shelved);
            return Ok(Unshelve::Conflicted);
        }

        for (path, content) in &shelved.changes {
            self.write(path, content.as_deref())?;
        }
        Ok(Unshelve::Applied)
    }

    async fn discard_shelf(&self) -> Result<()> {
        lock(&self.local).shelf.pop();
        Ok(())
    }

    async fn reset(&self, target: ResetTarget) -> Result<()> {
        let mut local = lock(&self.local);
        let head = local.head();
        local.rebase_in_progress = false;
        if target == ResetTarget::Remote {
            local.base = self.remote.history();
            local.ahead.clear();
        }
        let new_head = local.head();
        self.checkout(&head, &new_head)
    }

    async fn publish(&self) -> Result<Publish> {
        let mut local = lock(&self.local);
        {
            let mut faults = lock(&self.faults);
            if faults.push_rejections > 0 {
                faults.push_rejections -= 1;
                return Ok(Publish::Rejected("injected rejection".into()));
            }
        }

        let mut remote = lock(&self.remote.commits);
        if remote.len() != local.base.len() {
            return Ok(Publish::Rejected("! [rejected] (fetch first)".into()));
        }
        let ahead = std::mem::take(&mut local.ahead);
        remote.extend(ahead.iter().cloned());
        local.base.extend(ahead);
        Ok(Publish::Published)
    }
}
