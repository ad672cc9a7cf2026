//! One invocation: sample, record, apply the schedule, publish.
//!
//! A [`Cycle`] holds no state between runs; everything it needs is read from
//! and written back to files, so running it from a timer or from
//! [`crate::runner`] behaves the same. Each stage reports a [`StageOutcome`]
//! and the cycle decides from those whether later stages still run.

use std::fmt;
use std::io;
use std::path::Path;

use time::OffsetDateTime;
use tracing::{Instrument, debug, error, info, info_span, warn};

use atmolog_core::{DeviceInterface, ExecutionLog, SampleChannels, ScheduleMatcher, sample_reading};
use atmolog_store::{ExecutionLedger, FileLock, HistoryStore, ScheduleFile};
use atmolog_sync::{SyncConfig, SyncController, VersionedStore};
use atmolog_types::{EntryId, Reading, timestamp};

use crate::config::Config;

/// Which paths of the cycle to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    /// Logging and control paths, then sync.
    Full,
    /// Sample and record only, then sync.
    Log,
    /// Apply the schedule only, then sync.
    Schedule,
    /// Sync only.
    Sync,
}

impl Task {
    fn logs(self) -> bool {
        matches!(self, Task::Full | Task::Log)
    }

    fn schedules(self) -> bool {
        matches!(self, Task::Full | Task::Schedule)
    }
}

/// Run-time switches that do not belong in the configuration file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Report due entries without writing to the device, updating the ledger
    /// or publishing.
    pub dry_run: bool,
    /// Skip the sync stage.
    pub no_publish: bool,
}

/// Stages of a cycle, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Sample,
    Lock,
    History,
    Schedule,
    Sync,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Sample => "sample",
            Stage::Lock => "lock",
            Stage::History => "history",
            Stage::Schedule => "schedule",
            Stage::Sync => "sync",
        };
        f.write_str(name)
    }
}

/// How a stage ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    Completed(String),
    /// Nothing to do, or disabled.
    Skipped(String),
    /// Failed for a reason expected to clear up by itself; retried next cycle.
    Transient(String),
    /// Local failure that needs attention; the cycle exits nonzero.
    Fatal(String),
}

impl StageOutcome {
    pub fn is_fatal(&self) -> bool {
        matches!(self, StageOutcome::Fatal(_))
    }

    pub fn message(&self) -> &str {
        match self {
            StageOutcome::Completed(m)
            | StageOutcome::Skipped(m)
            | StageOutcome::Transient(m)
            | StageOutcome::Fatal(m) => m,
        }
    }

    fn log(&self, stage: Stage) {
        match self {
            StageOutcome::Completed(m) => info!("{}: {}", stage, m),
            StageOutcome::Skipped(m) => info!("{} skipped: {}", stage, m),
            StageOutcome::Transient(m) => warn!("{} will retry next cycle: {}", stage, m),
            StageOutcome::Fatal(m) => error!("{} failed: {}", stage, m),
        }
    }
}

/// Outcomes of every stage that ran, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub stages: Vec<(Stage, StageOutcome)>,
}

impl CycleReport {
    fn push(&mut self, stage: Stage, outcome: StageOutcome) {
        outcome.log(stage);
        self.stages.push((stage, outcome));
    }

    pub fn outcome(&self, stage: Stage) -> Option<&StageOutcome> {
        self.stages.iter().find(|(s, _)| *s == stage).map(|(_, o)| o)
    }

    /// Whether any stage failed fatally.
    pub fn is_fatal(&self) -> bool {
        self.stages.iter().any(|(_, o)| o.is_fatal())
    }

    /// Process exit code: 1 on a local fatal failure, else 0. Sync problems
    /// never change it.
    pub fn exit_code(&self) -> u8 {
        u8::from(self.is_fatal())
    }
}

/// Ledger wrapper that persists every record before returning.
pub(crate) struct LedgerFile<'a> {
    ledger: &'a mut ExecutionLedger,
    path: &'a Path,
}

impl<'a> LedgerFile<'a> {
    pub(crate) fn new(ledger: &'a mut ExecutionLedger, path: &'a Path) -> Self {
        Self { ledger, path }
    }
}

impl ExecutionLog for LedgerFile<'_> {
    fn contains(&self, id: &EntryId) -> bool {
        self.ledger.contains(id)
    }

    fn record(&mut self, id: EntryId, at: OffsetDateTime) -> io::Result<()> {
        if self.ledger.record(id, at) {
            self.ledger.save(self.path).map_err(io::Error::other)?;
        }
        Ok(())
    }
}

/// One invocation over a device and an optional versioned store.
pub struct Cycle<D, S> {
    config: Config,
    options: RunOptions,
    device: D,
    sync: Option<SyncController<S>>,
    channels: SampleChannels,
    matcher: ScheduleMatcher,
}

impl<D, S> Cycle<D, S>
where
    D: DeviceInterface,
    S: VersionedStore,
{
    /// Build a cycle. Pass `None` for `store` to run without publishing.
    pub fn new(config: Config, options: RunOptions, device: D, store: Option<S>) -> Self {
        let sync = store.map(|store| {
            let sync_config = SyncConfig::new(config.tracked_paths())
                .max_push_retries(config.sync.max_push_retries);
            SyncController::new(store, sync_config)
        });
        let channels = SampleChannels {
            readings: config.device.read_channels.clone(),
            setpoints: config.device.setpoint_channels.clone(),
        };
        let matcher = ScheduleMatcher::new(config.schedule.tolerance());
        Self {
            config,
            options,
            device,
            sync,
            channels,
            matcher,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn sync_controller(&self) -> Option<&SyncController<S>> {
        self.sync.as_ref()
    }

    /// Run `task` once at `now`.
    pub async fn run(&self, task: Task, now: OffsetDateTime) -> CycleReport {
        let mut report = CycleReport::default();
        info!("Starting {:?} cycle at {}", task, timestamp::format(now));

        // Sampling only reads the device, so it happens before the lock.
        let reading = if task.logs() {
            let reading = self
                .sample(now)
                .instrument(info_span!("stage", name = %Stage::Sample))
                .await;
            let outcome = match &reading.error {
                None => StageOutcome::Completed(format!(
                    "{} readings, {} setpoints",
                    reading.readings.values().filter(|v| v.is_some()).count(),
                    reading.setpoints.values().filter(|v| v.is_some()).count()
                )),
                Some(e) => StageOutcome::Transient(format!("device: {}", e)),
            };
            report.push(Stage::Sample, outcome);
            Some(reading)
        } else {
            None
        };

        let _lock = match self.lock().await {
            Ok(lock) => lock,
            Err(e) => {
                if let Some(reading) = &reading {
                    error!("Working tree locked; unrecorded reading: {:?}", reading);
                }
                report.push(Stage::Lock, StageOutcome::Fatal(e.to_string()));
                return report;
            }
        };

        if let Some(reading) = reading {
            let outcome = self
                .record(reading, now)
                .instrument(info_span!("stage", name = %Stage::History))
                .await;
            report.push(Stage::History, outcome);
        }

        if task.schedules() {
            let outcome = self
                .apply_schedule(now)
                .instrument(info_span!("stage", name = %Stage::Schedule))
                .await;
            report.push(Stage::Schedule, outcome);
        }

        let outcome = self
            .publish(now)
            .instrument(info_span!("stage", name = %Stage::Sync))
            .await;
        report.push(Stage::Sync, outcome);

        report
    }

    async fn sample(&self, now: OffsetDateTime) -> Reading {
        sample_reading(&self.device, &self.channels, now).await
    }

    async fn lock(&self) -> atmolog_store::Result<FileLock> {
        let path = self.config.lock_path();
        debug!("Acquiring lock {}", path.display());
        FileLock::acquire(&path, self.config.lock.wait(), self.config.lock.stale_after()).await
    }

    async fn record(&self, reading: Reading, now: OffsetDateTime) -> StageOutcome {
        let path = self.config.history_path();
        let mut history = match HistoryStore::load(
            &path,
            self.device.identity(),
            self.config.history.max_age(),
            now,
        ) {
            Ok(history) => history,
            Err(e) => {
                error!("Could not load history; unrecorded reading: {:?}", reading);
                return StageOutcome::Fatal(e.to_string());
            }
        };

        let evicted = history.append(reading, now);
        if let Err(e) = history.save(now) {
            error!(
                "Could not save history; latest reading kept only in memory: {:?}",
                history.last()
            );
            return StageOutcome::Fatal(e.to_string());
        }

        let metrics = history.metrics();
        StageOutcome::Completed(format!(
            "{} entries over {:.2} h, {} evicted",
            metrics.total_entries,
            metrics.time_span_hours(),
            evicted
        ))
    }

    async fn apply_schedule(&self, now: OffsetDateTime) -> StageOutcome {
        let schedule = match ScheduleFile::load(&self.config.schedule_path()) {
            Ok(schedule) => schedule,
            Err(atmolog_store::Error::ScheduleMissing(path)) => {
                return StageOutcome::Skipped(format!("no schedule at {}", path.display()));
            }
            Err(e) => return StageOutcome::Fatal(e.to_string()),
        };
        let entries = schedule.entries();

        let ledger_path = self.config.ledger_path();
        let mut ledger = match ExecutionLedger::load(&ledger_path) {
            Ok(ledger) => ledger,
            Err(e) => return StageOutcome::Fatal(e.to_string()),
        };

        if let Some(next) = self.matcher.next_pending(entries, now) {
            info!(
                "Next schedule entry {} at {}",
                next.id(),
                timestamp::format(next.timestamp)
            );
        }

        if self.options.dry_run {
            let log = LedgerFile::new(&mut ledger, &ledger_path);
            let due = self.matcher.due_entries(entries, &log, now);
            for entry in &due {
                info!("Dry run: would apply {}", entry.id());
                for (channel, value) in &entry.setpoints {
                    info!("Dry run:   {} = {}", channel, value);
                }
            }
            return StageOutcome::Completed(format!("dry run, {} entries due", due.len()));
        }

        let pruned = ledger.prune(now, self.config.schedule.ledger_retention());
        if pruned > 0 {
            if let Err(e) = ledger.save(&ledger_path) {
                return StageOutcome::Fatal(e.to_string());
            }
        }

        let mut log = LedgerFile::new(&mut ledger, &ledger_path);
        let report = match self.matcher.run(&self.device, entries, &mut log, now).await {
            Ok(report) => report,
            Err(e) => return StageOutcome::Fatal(format!("ledger: {}", e)),
        };

        let summary = format!(
            "{} executed, {} pending, {} expired",
            report.executed.len(),
            report.summary.pending,
            report.summary.expired
        );
        if report.deferred.is_empty() {
            if report.executed.is_empty() {
                StageOutcome::Completed(format!("nothing due; {}", summary))
            } else {
                StageOutcome::Completed(summary)
            }
        } else {
            StageOutcome::Transient(format!(
                "{} entries deferred; {}",
                report.deferred.len(),
                summary
            ))
        }
    }

    async fn publish(&self, now: OffsetDateTime) -> StageOutcome {
        if self.options.dry_run {
            return StageOutcome::Skipped("dry run".into());
        }
        if self.options.no_publish {
            return StageOutcome::Skipped("publishing disabled".into());
        }
        let Some(sync) = &self.sync else {
            return StageOutcome::Skipped("sync disabled".into());
        };

        match sync.sync(now).await {
            Ok(report) if report.published => StageOutcome::Completed(format!(
                "published at rung {} after {} attempt(s)",
                report.rung, report.attempts
            )),
            Ok(report) => StageOutcome::Transient(format!(
                "not published after {} attempts, local data kept",
                report.attempts
            )),
            Err(e) => StageOutcome::Transient(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_ignores_sync() {
        let mut report = CycleReport::default();
        report.push(Stage::Sample, StageOutcome::Transient("unreachable".into()));
        report.push(Stage::Sync, StageOutcome::Transient("rejected".into()));
        assert_eq!(report.exit_code(), 0);

        report.push(Stage::Schedule, StageOutcome::Fatal("corrupt".into()));
        assert_eq!(report.exit_code(), 1);
        assert_eq!(
            report.outcome(Stage::Schedule).map(StageOutcome::message),
            Some("corrupt")
        );
    }

    #[test]
    fn test_task_stages() {
        assert!(Task::Full.logs() && Task::Full.schedules());
        assert!(Task::Log.logs() && !Task::Log.schedules());
        assert!(!Task::Sync.logs() && !Task::Sync.schedules());
    }

    #[test]
    fn test_ledger_file_persists_each_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("executed.json");
        let mut ledger = ExecutionLedger::new();
        let now = OffsetDateTime::from_unix_timestamp(1_757_577_600).unwrap();
        let id = EntryId::new(now, ["TempSet".to_string()]);

        let mut log = LedgerFile::new(&mut ledger, &path);
        log.record(id.clone(), now).unwrap();
        assert!(log.contains(&id));
        assert!(ExecutionLedger::load(&path).unwrap().contains(&id));
    }
}
