//! Persistent record of executed schedule entries.
//!
//! Invocations are short-lived, so "already executed" has to survive process
//! exit. The ledger file lists each executed identity with the time it ran:
//!
//! ```json
//! {
//!   "executed": [
//!     { "timestamp": "2025-09-11T09:00:00Z", "channels": ["CO2Set", "TempSet"], "executed_at": "2025-09-11T09:00:31Z" }
//!   ]
//! }
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use tracing::{debug, info};

use atmolog_types::{EntryId, timestamp};

use crate::atomic;
use crate::error::{Error, Result};

/// Default retention for ledger records.
pub const DEFAULT_RETENTION: Duration = Duration::days(7);

#[derive(Serialize, Deserialize)]
struct LedgerRecord {
    #[serde(flatten)]
    id: EntryId,
    #[serde(with = "timestamp::lenient")]
    executed_at: OffsetDateTime,
}

#[derive(Serialize, Deserialize, Default)]
struct LedgerFile {
    #[serde(default)]
    executed: Vec<LedgerRecord>,
}

/// Set of executed schedule-entry identities.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionLedger {
    records: BTreeMap<EntryId, OffsetDateTime>,
}

impl ExecutionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the ledger at `path`; a missing file is an empty ledger.
    ///
    /// A file that exists but cannot be parsed is an error rather than an
    /// empty ledger, since forgetting what ran could apply an entry twice.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No execution ledger at {}", path.display());
                return Ok(Self::new());
            }
            Err(e) => return Err(Error::io(path, e)),
        };

        let file: LedgerFile =
            serde_json::from_slice(&bytes).map_err(|e| Error::corrupt(path, e))?;
        let records = file
            .executed
            .into_iter()
            .map(|r| (r.id, r.executed_at))
            .collect();
        Ok(Self { records })
    }

    /// Write the ledger atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        let file = LedgerFile {
            executed: self
                .records
                .iter()
                .map(|(id, at)| LedgerRecord {
                    id: id.clone(),
                    executed_at: *at,
                })
                .collect(),
        };
        atomic::write_json(path, &file)
    }

    pub fn contains(&self, id: &EntryId) -> bool {
        self.records.contains_key(id)
    }

    /// Record `id` as executed at `at`. Returns `false` if it already was.
    pub fn record(&mut self, id: EntryId, at: OffsetDateTime) -> bool {
        if self.records.contains_key(&id) {
            return false;
        }
        self.records.insert(id, at);
        true
    }

    /// When `id` was executed.
    pub fn executed_at(&self, id: &EntryId) -> Option<OffsetDateTime> {
        self.records.get(id).copied()
    }

    /// Drop records for entries scheduled before `now - retention`.
    ///
    /// `retention` must be at least the matcher's tolerance: an entry that old
    /// classifies as expired whether or not it is recorded, so forgetting it
    /// cannot cause a second execution.
    pub fn prune(&mut self, now: OffsetDateTime, retention: Duration) -> usize {
        // a cutoff before the representable range cannot match any record
        let Some(cutoff) = now.checked_sub(retention) else {
            return 0;
        };
        let before = self.records.len();
        self.records.retain(|id, _| id.timestamp >= cutoff);
        let pruned = before - self.records.len();
        if pruned > 0 {
            info!(
                "Pruned {} execution records older than {}",
                pruned,
                timestamp::format(cutoff)
            );
        }
        pruned
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &EntryId> {
        self.records.keys()
    }
}
