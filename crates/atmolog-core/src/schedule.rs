//! Matching schedule entries against the clock.
//!
//! Classification is stateless: an entry's state follows from the current
//! time, the tolerance window and whether its identity is in the execution
//! log.
//!
//! | State | Condition |
//! |-------|-----------|
//! | [`EntryState::Executed`] | identity recorded in the log |
//! | [`EntryState::Due`] | `|now - timestamp| <= tolerance` |
//! | [`EntryState::Pending`] | `timestamp > now + tolerance` |
//! | [`EntryState::Expired`] | `timestamp < now - tolerance` |
//!
//! Expired entries are never attempted, so a controller that comes back after
//! an outage does not replay a backlog of stale setpoints.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::io;

use serde::Serialize;
use time::{Duration, OffsetDateTime};
use tracing::{debug, info, warn};

use atmolog_types::{EntryId, ScheduleEntry, SetOutcome};

use crate::error::Error;
use crate::traits::DeviceInterface;

/// Default tolerance window.
pub const DEFAULT_TOLERANCE: Duration = Duration::seconds(60);

/// Where an entry stands relative to "now".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Pending,
    Due,
    Executed,
    Expired,
}

/// Record of schedule entries that have already run.
///
/// `record` is called only after every channel of an entry has been attempted.
/// File-backed implementations persist before returning so a crash right
/// after cannot lose the mark.
pub trait ExecutionLog {
    /// Whether the entry has run.
    fn contains(&self, id: &EntryId) -> bool;

    /// Mark the entry as run at `at`.
    fn record(&mut self, id: EntryId, at: OffsetDateTime) -> io::Result<()>;
}

impl ExecutionLog for BTreeSet<EntryId> {
    fn contains(&self, id: &EntryId) -> bool {
        BTreeSet::contains(self, id)
    }

    fn record(&mut self, id: EntryId, _at: OffsetDateTime) -> io::Result<()> {
        self.insert(id);
        Ok(())
    }
}

impl ExecutionLog for HashSet<EntryId> {
    fn contains(&self, id: &EntryId) -> bool {
        HashSet::contains(self, id)
    }

    fn record(&mut self, id: EntryId, _at: OffsetDateTime) -> io::Result<()> {
        self.insert(id);
        Ok(())
    }
}

/// What happened when one due entry was applied.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryExecution {
    pub id: EntryId,
    /// Outcome per channel, in channel order.
    pub outcomes: BTreeMap<String, SetOutcome>,
}

impl EntryExecution {
    /// Number of channels the device accepted.
    pub fn applied(&self) -> usize {
        self.outcomes.values().filter(|o| o.is_applied()).count()
    }

    /// Whether some, but not all, channels were accepted.
    pub fn is_partial(&self) -> bool {
        let applied = self.applied();
        applied > 0 && applied < self.outcomes.len()
    }
}

/// Counts of entries per state at a given instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScheduleSummary {
    pub pending: usize,
    pub due: usize,
    pub executed: usize,
    pub expired: usize,
}

/// Result of one matching pass.
#[derive(Debug, Default)]
pub struct MatchReport {
    /// Entries that were applied and recorded.
    pub executed: Vec<EntryExecution>,
    /// Due entries left unrecorded because the device could not be reached.
    pub deferred: Vec<(EntryId, String)>,
    /// State counts observed at the start of the pass.
    pub summary: ScheduleSummary,
}

/// Decides which schedule entries are due and applies them.
#[derive(Debug, Clone, Copy)]
pub struct ScheduleMatcher {
    tolerance: Duration,
}

impl Default for ScheduleMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_TOLERANCE)
    }
}

impl ScheduleMatcher {
    /// Create a matcher. Negative tolerances are treated as their magnitude.
    pub fn new(tolerance: Duration) -> Self {
        Self {
            tolerance: tolerance.abs(),
        }
    }

    /// The tolerance window.
    pub fn tolerance(&self) -> Duration {
        self.tolerance
    }

    /// Classify one entry at `now`.
    pub fn classify<L: ExecutionLog + ?Sized>(
        &self,
        entry: &ScheduleEntry,
        log: &L,
        now: OffsetDateTime,
    ) -> EntryState {
        if log.contains(&entry.id()) {
            return EntryState::Executed;
        }
        let offset = now - entry.timestamp;
        if offset.abs() <= self.tolerance {
            EntryState::Due
        } else if offset < Duration::ZERO {
            EntryState::Pending
        } else {
            EntryState::Expired
        }
    }

    /// Due entries in execution order: ascending timestamp, then channel set.
    pub fn due_entries<'a, L: ExecutionLog + ?Sized>(
        &self,
        entries: &'a [ScheduleEntry],
        log: &L,
        now: OffsetDateTime,
    ) -> Vec<&'a ScheduleEntry> {
        let mut due: Vec<(EntryId, &ScheduleEntry)> = entries
            .iter()
            .filter(|e| self.classify(*e, log, now) == EntryState::Due)
            .map(|e| (e.id(), e))
            .collect();
        due.sort_by(|a, b| a.0.cmp(&b.0));
        due.dedup_by(|a, b| a.0 == b.0);
        due.into_iter().map(|(_, e)| e).collect()
    }

    /// The earliest entry that is still pending.
    pub fn next_pending<'a>(
        &self,
        entries: &'a [ScheduleEntry],
        now: OffsetDateTime,
    ) -> Option<&'a ScheduleEntry> {
        entries
            .iter()
            .filter(|e| e.timestamp - now > self.tolerance)
            .min_by_key(|e| e.timestamp)
    }

    /// Count entries per state.
    pub fn summarize<L: ExecutionLog + ?Sized>(
        &self,
        entries: &[ScheduleEntry],
        log: &L,
        now: OffsetDateTime,
    ) -> ScheduleSummary {
        let mut summary = ScheduleSummary::default();
        for entry in entries {
            match self.classify(entry, log, now) {
                EntryState::Pending => summary.pending += 1,
                EntryState::Due => summary.due += 1,
                EntryState::Executed => summary.executed += 1,
                EntryState::Expired => summary.expired += 1,
            }
        }
        summary
    }

    /// Apply every channel of one entry.
    ///
    /// Channels are validated against the device's declared range before
    /// being written; a rejected channel does not stop its siblings. An error
    /// means the device stopped answering part way, and the entry must not be
    /// recorded.
    pub async fn execute_entry<D: DeviceInterface + ?Sized>(
        &self,
        device: &D,
        entry: &ScheduleEntry,
    ) -> Result<EntryExecution, Error> {
        let id = entry.id();
        let mut outcomes = BTreeMap::new();

        for (channel, &target) in &entry.setpoints {
            let outcome = match device.valid_range(channel).await? {
                Some(range) if !range.contains(target) => SetOutcome::OutOfRange {
                    requested: target,
                    range,
                },
                _ => device.set(channel, target).await?,
            };

            if outcome.is_applied() {
                info!("{}: {}", channel, outcome);
            } else {
                warn!("{}: {}", channel, outcome);
            }
            outcomes.insert(channel.clone(), outcome);
        }

        Ok(EntryExecution { id, outcomes })
    }

    /// Apply all due entries and record them in `log`.
    ///
    /// Entries are recorded one by one, immediately after their channels have
    /// been attempted. If the device becomes unreachable the current entry
    /// stays unrecorded and the remaining ones are deferred; they will be due
    /// again next cycle unless they expire first. A failure to persist the log
    /// aborts the pass.
    pub async fn run<D, L>(
        &self,
        device: &D,
        entries: &[ScheduleEntry],
        log: &mut L,
        now: OffsetDateTime,
    ) -> io::Result<MatchReport>
    where
        D: DeviceInterface + ?Sized,
        L: ExecutionLog + ?Sized,
    {
        let mut report = MatchReport {
            summary: self.summarize(entries, log, now),
            ..Default::default()
        };
        let due = self.due_entries(entries, log, now);

        if due.is_empty() {
            debug!("No schedule entries due");
        }

        let mut remaining = due.into_iter();
        for entry in remaining.by_ref() {
            let id = entry.id();
            info!("Executing schedule entry {}", id);

            match self.execute_entry(device, entry).await {
                Ok(execution) => {
                    log.record(id.clone(), now)?;
                    info!(
                        "Entry {} done: applied {}/{}",
                        id,
                        execution.applied(),
                        execution.outcomes.len()
                    );
                    report.executed.push(execution);
                }
                Err(e) => {
                    warn!("Entry {} not completed, will retry: {}", id, e);
                    report.deferred.push((id, e.to_string()));
                    break;
                }
            }
        }
        for entry in remaining {
            report
                .deferred
                .push((entry.id(), "device unreachable".to_string()));
        }

        Ok(report)
    }
}
