//! Conflict-tolerant publishing of atmolog data to a remote versioned store.
//!
//! The history and ledger files are local-authoritative: they must reach the
//! remote, and they must never be lost locally, even when another machine
//! pushed in the meantime. [`SyncController`] runs an escalating ladder of
//! recovery rungs (see [`controller`]) against any [`VersionedStore`].
//!
//! - [`GitStore`] drives the `git` CLI with a bounded timeout per command.
//! - [`FakeStore`] keeps history in memory with injectable faults, for tests.
//!
//! # Example
//!
//! ```no_run
//! use std::path::PathBuf;
//! use atmolog_sync::{GitStore, SyncConfig, SyncController};
//!
//! # async fn example() -> atmolog_sync::Result<()> {
//! let store = GitStore::new("/home/pi/lab-data", "origin", "main");
//! let config = SyncConfig::new(vec![
//!     PathBuf::from("data/log/incubator_history.json"),
//!     PathBuf::from("data/schedules/executed.json"),
//! ]);
//! let controller = SyncController::new(store, config);
//!
//! let report = controller.sync(time::OffsetDateTime::now_utc()).await?;
//! println!("published: {}", report.published);
//! # Ok(())
//! # }
//! ```

pub mod controller;
mod error;
pub mod fake;
mod git;
mod snapshot;
mod store;

pub use controller::{DEFAULT_MAX_PUSH_RETRIES, Rung, SyncConfig, SyncController, SyncReport};
pub use error::{Error, Result};
pub use fake::{FakeRemote, FakeStore};
pub use git::{DEFAULT_COMMAND_TIMEOUT, GitStore};
pub use snapshot::Snapshot;
pub use store::{Integration, Publish, ResetTarget, Unshelve, VersionedStore};
