//! File persistence for atmolog.
//!
//! Everything atmolog keeps between invocations lives in plain JSON files
//! inside the versioned-store checkout:
//!
//! - [`HistoryStore`]: rolling window of device readings
//! - [`ExecutionLedger`]: identities of schedule entries that already ran
//! - [`ScheduleFile`]: the setpoint schedule, edited externally
//!
//! All writes go through [`atomic::write`] (temp file, fsync, rename), and
//! [`FileLock`] serialises overlapping invocations.
//!
//! # Example
//!
//! ```no_run
//! use atmolog_store::{HistoryStore, history::DEFAULT_MAX_AGE};
//! use atmolog_types::Reading;
//! use time::OffsetDateTime;
//!
//! let now = OffsetDateTime::now_utc();
//! let mut history = HistoryStore::load(
//!     "data/log/incubator_history.json",
//!     "192.168.100.100",
//!     DEFAULT_MAX_AGE,
//!     now,
//! )?;
//! history.append(Reading::new(now).with_mode("Manual"), now);
//! history.save(now)?;
//! # Ok::<(), atmolog_store::Error>(())
//! ```

pub mod atomic;
mod error;
pub mod history;
pub mod ledger;
mod lock;
mod schedule_file;

pub use error::{Error, Result};
pub use history::{HistoryMetadata, HistoryStore};
pub use ledger::ExecutionLedger;
pub use lock::FileLock;
pub use schedule_file::ScheduleFile;

/// Default data directory following platform conventions.
///
/// - Linux: `~/.local/share/atmolog`
/// - macOS: `~/Library/Application Support/atmolog`
/// - Windows: `C:\Users\<user>\AppData\Local\atmolog`
pub fn default_data_dir() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("atmolog")
}
