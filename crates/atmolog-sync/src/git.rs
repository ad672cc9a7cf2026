//! [`VersionedStore`] backed by the `git` command-line tool.
//!
//! Credentials are never handled here: git uses whatever the environment
//! provides (SSH agent, credential helper). An optional private key path is
//! passed to child processes as `GIT_SSH_COMMAND`. Every command runs with a
//! timeout and is killed if it exceeds it.

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::store::{Integration, Publish, ResetTarget, Unshelve, VersionedStore};

/// Default bound on a single git command.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// Git checkout at `root` tracking `remote/branch`.
#[derive(Debug, Clone)]
pub struct GitStore {
    root: PathBuf,
    remote: String,
    branch: String,
    timeout: Duration,
    ssh_key: Option<PathBuf>,
    program: PathBuf,
}

impl GitStore {
    pub fn new(root: impl Into<PathBuf>, remote: &str, branch: &str) -> Self {
        Self {
            root: root.into(),
            remote: remote.to_string(),
            branch: branch.to_string(),
            timeout: DEFAULT_COMMAND_TIMEOUT,
            ssh_key: None,
            program: PathBuf::from("git"),
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_ssh_key(mut self, key: Option<PathBuf>) -> Self {
        self.ssh_key = key;
        self
    }

    /// Use a different git binary.
    #[must_use]
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    fn remote_ref(&self) -> String {
        format!("{}/{}", self.remote, self.branch)
    }

    /// Run git with `args`, returning its output whatever the exit status.
    async fn run(&self, args: &[&str]) -> Result<Output> {
        let rendered = format!("git {}", args.join(" "));
        debug!("Running {}", rendered);

        let mut cmd = Command::new(&self.program);
        cmd.args(args)
            .current_dir(&self.root)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(key) = &self.ssh_key {
            cmd.env(
                "GIT_SSH_COMMAND",
                format!(
                    "ssh -i {} -o IdentitiesOnly=yes -o StrictHostKeyChecking=accept-new",
                    key.display()
                ),
            );
        }

        match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(source)) => Err(Error::Spawn {
                program: self.program.display().to_string(),
                source,
            }),
            Err(_) => Err(Error::Timeout {
                command: rendered,
                duration: self.timeout,
            }),
        }
    }

    /// Run git and fail unless it exits successfully. Returns stdout.
    async fn run_ok(&self, args: &[&str]) -> Result<String> {
        let output = self.run(args).await?;
        if !output.status.success() {
            return Err(Error::Command {
                command: format!("git {}", args.join(" ")),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn git_dir(&self) -> Result<PathBuf> {
        let out = self.run_ok(&["rev-parse", "--git-dir"]).await?;
        Ok(self.root.join(out.trim()))
    }

    async fn rebase_in_progress(&self) -> Result<bool> {
        let git_dir = self.git_dir().await?;
        Ok(git_dir.join("rebase-merge").exists() || git_dir.join("rebase-apply").exists())
    }

    fn existing<'a>(&self, paths: &'a [PathBuf]) -> Vec<&'a str> {
        paths
            .iter()
            .filter(|p| self.root.join(p).exists())
            .filter_map(|p| p.to_str())
            .collect()
    }
}

fn combined(output: &Output) -> String {
    format!(
        "{}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    )
    .trim()
    .to_string()
}

#[async_trait]
impl VersionedStore for GitStore {
    fn root(&self) -> &Path {
        &self.root
    }

    async fn prepare(&self) -> Result<()> {
        if self.rebase_in_progress().await? {
            warn!("Aborting rebase left over from an earlier run");
            let output = self.run(&["rebase", "--abort"]).await?;
            if !output.status.success() {
                return Err(Error::Conflict(format!(
                    "rebase left over from an earlier run cannot be aborted: {}",
                    combined(&output).trim()
                )));
            }
        }
        let git_dir = self.git_dir().await?;
        if git_dir.join("MERGE_HEAD").exists() {
            warn!("Aborting merge left over from an earlier run");
            self.run_ok(&["merge", "--abort"]).await?;
        }
        Ok(())
    }

    async fn has_changes(&self, paths: &[PathBuf]) -> Result<bool> {
        let mut args = vec!["status", "--porcelain", "--"];
        args.extend(paths.iter().filter_map(|p| p.to_str()));
        Ok(!self.run_ok(&args).await?.trim().is_empty())
    }

    async fn commit(&self, paths: &[PathBuf], message: &str) -> Result<bool> {
        let existing = self.existing(paths);
        if existing.is_empty() {
            return Ok(false);
        }

        let mut add = vec!["add", "--"];
        add.extend(&existing);
        self.run_ok(&add).await?;

        let mut staged = vec!["diff", "--cached", "--quiet", "--"];
        staged.extend(&existing);
        if self.run(&staged).await?.status.success() {
            debug!("Nothing to commit");
            return Ok(false);
        }

        let mut commit = vec!["commit", "-m", message, "--"];
        commit.extend(&existing);
        self.run_ok(&commit).await?;
        Ok(true)
    }

    async fn integrate(&self) -> Result<Integration> {
        self.run_ok(&["fetch", self.remote.as_str(), self.branch.as_str()]).await?;

        let remote_ref = self.remote_ref();
        let output = self.run(&["rebase", remote_ref.as_str()]).await?;
        if output.status.success() {
            Ok(Integration::Integrated)
        } else {
            Ok(Integration::Conflict(combined(&output)))
        }
    }

    async fn abort_integration(&self) -> Result<()> {
        if self.rebase_in_progress().await? {
            self.run_ok(&["rebase", "--abort"]).await?;
        }
        Ok(())
    }

    async fn shelve(&self) -> Result<bool> {
        let out = self
            .run_ok(&["stash", "push", "-m", "atmolog shelve"])
            .await?;
        Ok(!out.contains("No local changes to save"))
    }

    async fn unshelve(&self) -> Result<Unshelve> {
        let output = self.run(&["stash", "pop"]).await?;
        if output.status.success() {
            Ok(Unshelve::Applied)
        } else {
            warn!("Reapplying shelved changes failed: {}", combined(&output));
            Ok(Unshelve::Conflicted)
        }
    }

    async fn discard_shelf(&self) -> Result<()> {
        self.run_ok(&["stash", "drop"]).await?;
        Ok(())
    }

    async fn reset(&self, target: ResetTarget) -> Result<()> {
        let target = match target {
            ResetTarget::Head => "HEAD".to_string(),
            ResetTarget::Remote => {
                self.run_ok(&["fetch", self.remote.as_str(), self.branch.as_str()]).await?;
                self.remote_ref()
            }
        };
        self.run_ok(&["reset", "--hard", target.as_str()]).await?;
        Ok(())
    }

    async fn publish(&self) -> Result<Publish> {
        let refspec = format!("HEAD:{}", self.branch);
        let output = self.run(&["push", self.remote.as_str(), refspec.as_str()]).await?;
        if output.status.success() {
            return Ok(Publish::Published);
        }

        let detail = combined(&output);
        let rejected = ["rejected", "non-fast-forward", "fetch first"]
            .iter()
            .any(|marker| detail.contains(marker));
        if rejected {
            Ok(Publish::Rejected(detail))
        } else {
            Err(Error::Command {
                command: format!("git push {} {}", self.remote, refspec),
                stderr: detail,
            })
        }
    }
}
