//! Machine-readable snapshot for the `status` subcommand.

use std::path::PathBuf;

use serde::Serialize;
use time::OffsetDateTime;

use atmolog_core::{ScheduleMatcher, ScheduleSummary};
use atmolog_store::{ExecutionLedger, HistoryStore, ScheduleFile};
use atmolog_types::{Reading, timestamp};

use crate::config::Config;
use crate::orchestrator::LedgerFile;

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub generated_at: String,
    pub device: String,
    pub history: HistoryStatus,
    pub schedule: ScheduleStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryStatus {
    pub path: PathBuf,
    pub entries: usize,
    pub time_span_hours: f64,
    pub max_age_hours: f64,
    pub last_reading: Option<Reading>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScheduleStatus {
    pub path: PathBuf,
    /// Why the schedule or ledger could not be read, if so.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub summary: ScheduleSummary,
    pub next_pending: Option<String>,
    pub executed_records: usize,
}

/// Gather the current state of the data files. Nothing is written, so no
/// lock is taken; an unreadable history is reported as empty and left as is.
pub fn collect(config: &Config, now: OffsetDateTime) -> atmolog_store::Result<StatusReport> {
    let history = HistoryStore::read(
        config.history_path(),
        &config.device.address,
        config.history.max_age(),
        now,
    )?;
    let metrics = history.metrics();

    let matcher = ScheduleMatcher::new(config.schedule.tolerance());
    let mut schedule = ScheduleStatus {
        path: config.schedule_path(),
        error: None,
        summary: ScheduleSummary::default(),
        next_pending: None,
        executed_records: 0,
    };
    let ledger_path = config.ledger_path();
    match (
        ScheduleFile::load(&schedule.path),
        ExecutionLedger::load(&ledger_path),
    ) {
        (Ok(file), Ok(mut ledger)) => {
            schedule.executed_records = ledger.len();
            let log = LedgerFile::new(&mut ledger, &ledger_path);
            schedule.summary = matcher.summarize(file.entries(), &log, now);
            schedule.next_pending = matcher
                .next_pending(file.entries(), now)
                .map(|e| timestamp::format(e.timestamp));
        }
        (Err(e), _) | (_, Err(e)) => schedule.error = Some(e.to_string()),
    }

    Ok(StatusReport {
        generated_at: timestamp::format(now),
        device: config.device.address.clone(),
        history: HistoryStatus {
            path: history.path().to_path_buf(),
            entries: metrics.total_entries,
            time_span_hours: metrics.time_span_hours(),
            max_age_hours: config.history.max_age_hours,
            last_reading: history.last().cloned(),
        },
        schedule,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use atmolog_types::ScheduleEntry;
    use time::Duration;

    #[test]
    fn test_status_of_fresh_tree() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.sync.repo_path = dir.path().to_path_buf();
        let now = OffsetDateTime::from_unix_timestamp(1_757_577_600).unwrap();

        let status = collect(&config, now).unwrap();
        assert_eq!(status.history.entries, 0);
        assert!(status.history.last_reading.is_none());
        assert!(status.schedule.error.is_some());

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["generated_at"], "2025-09-11T08:00:00Z");
        assert_eq!(json["history"]["entries"], 0);
    }

    #[test]
    fn test_status_counts_schedule_states() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.sync.repo_path = dir.path().to_path_buf();
        let now = OffsetDateTime::from_unix_timestamp(1_757_577_600).unwrap();

        let file = ScheduleFile {
            metadata: serde_json::Value::Null,
            schedule: vec![
                ScheduleEntry::new(now - Duration::hours(1)).with_setpoint("TempSet", 30.0),
                ScheduleEntry::new(now).with_setpoint("TempSet", 37.0),
                ScheduleEntry::new(now + Duration::hours(2)).with_setpoint("TempSet", 25.0),
            ],
        };
        file.save(&config.schedule_path()).unwrap();

        let status = collect(&config, now).unwrap();
        assert_eq!(status.schedule.error, None);
        assert_eq!(
            status.schedule.summary,
            ScheduleSummary {
                pending: 1,
                due: 1,
                executed: 0,
                expired: 1,
            }
        );
        assert_eq!(
            status.schedule.next_pending.as_deref(),
            Some("2025-09-11T10:00:00Z")
        );
    }

    #[test]
    fn test_status_leaves_corrupt_history_alone() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.sync.repo_path = dir.path().to_path_buf();
        let now = OffsetDateTime::from_unix_timestamp(1_757_577_600).unwrap();
        let path = config.history_path();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{\"data\": [ {\"timest").unwrap();

        let status = collect(&config, now).unwrap();
        assert_eq!(status.history.entries, 0);
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "{\"data\": [ {\"timest"
        );
        let corrupt = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter(|e| {
                let name = e.as_ref().unwrap().file_name();
                name.to_string_lossy().ends_with(".corrupt")
            })
            .count();
        assert_eq!(corrupt, 0);
    }
}
