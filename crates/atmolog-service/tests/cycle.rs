//! End-to-end cycles against a mock device and the in-memory versioned store.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use atmolog_core::{DeviceInterface, MockDevice};
use atmolog_service::{Config, Cycle, RunOptions, Stage, StageOutcome, Task, run_every};
use atmolog_store::history::DEFAULT_MAX_AGE;
use atmolog_store::{ExecutionLedger, FileLock, HistoryStore, ScheduleFile};
use atmolog_sync::{FakeRemote, FakeStore};
use atmolog_types::{Reading, ScheduleEntry};
use tempfile::TempDir;
use time::OffsetDateTime;

const LOG: &str = "data/log/incubator_history.json";
const LEDGER: &str = "data/schedules/executed.json";
const SCHEDULE: &str = "data/schedules/setpoint_schedule.json";

fn t(secs: i64) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp(1_757_577_600 + secs).unwrap()
}

fn schedule_bytes(entries: Vec<ScheduleEntry>) -> Vec<u8> {
    serde_json::to_vec_pretty(&ScheduleFile {
        metadata: serde_json::json!({ "description": "test ramp" }),
        schedule: entries,
    })
    .unwrap()
}

fn remote_with_schedule(entries: Vec<ScheduleEntry>) -> FakeRemote {
    let remote = FakeRemote::new();
    remote.commit_as_other_writer(SCHEDULE, &schedule_bytes(entries), "Add schedule");
    remote
}

fn config_for(root: &Path) -> Config {
    let mut config = Config::default();
    config.sync.repo_path = root.to_path_buf();
    config.lock.wait_secs = 0;
    config
}

fn setup(remote: &FakeRemote, options: RunOptions) -> (TempDir, Cycle<MockDevice, FakeStore>) {
    let dir = tempfile::tempdir().unwrap();
    let store = FakeStore::clone_at(remote, dir.path()).unwrap();
    let cycle = Cycle::new(
        config_for(dir.path()),
        options,
        MockDevice::incubator("incubator-1"),
        Some(store),
    );
    (dir, cycle)
}

fn local_history(cycle: &Cycle<MockDevice, FakeStore>, now: OffsetDateTime) -> Vec<Reading> {
    HistoryStore::load(cycle.config().history_path(), "", DEFAULT_MAX_AGE, now)
        .unwrap()
        .entries()
        .cloned()
        .collect()
}

fn is_completed(outcome: Option<&StageOutcome>) -> bool {
    matches!(outcome, Some(StageOutcome::Completed(_)))
}

#[tokio::test]
async fn test_full_cycle_records_and_publishes() {
    let remote = remote_with_schedule(Vec::new());
    let (_dir, cycle) = setup(&remote, RunOptions::default());

    let report = cycle.run(Task::Full, t(0)).await;

    assert_eq!(report.exit_code(), 0);
    assert!(is_completed(report.outcome(Stage::Sample)));
    assert!(is_completed(report.outcome(Stage::History)));
    assert!(is_completed(report.outcome(Stage::Schedule)));
    assert!(is_completed(report.outcome(Stage::Sync)));

    let history = local_history(&cycle, t(0));
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].readings["Temp1Read"], Some(36.9));

    let published = remote.file(LOG).expect("history published");
    assert_eq!(published, std::fs::read(cycle.config().history_path()).unwrap());
    assert_eq!(
        remote.messages().last().map(String::as_str),
        Some("Update log: 2025-09-11T08:00:00Z")
    );
    assert!(!cycle.config().lock_path().exists());
}

#[tokio::test]
async fn test_schedule_entry_runs_once_across_cycles() {
    let remote = remote_with_schedule(vec![
        ScheduleEntry::new(t(1000)).with_setpoint("TempSet", 36.5),
    ]);
    let (_dir, cycle) = setup(&remote, RunOptions::default());

    let report = cycle.run(Task::Full, t(1030)).await;
    assert!(is_completed(report.outcome(Stage::Schedule)));
    assert_eq!(
        cycle.device().writes().await,
        vec![("TempSet".to_string(), 36.5)]
    );

    // Still inside the tolerance window, and once it has passed.
    for now in [t(1050), t(1090)] {
        let report = cycle.run(Task::Full, now).await;
        assert_eq!(report.exit_code(), 0);
        assert_eq!(cycle.device().writes().await.len(), 1);
    }

    let ledger = ExecutionLedger::load(&cycle.config().ledger_path()).unwrap();
    assert_eq!(ledger.len(), 1);
    assert!(remote.file(LEDGER).is_some());
    assert_eq!(local_history(&cycle, t(1090)).len(), 3);
}

#[tokio::test]
async fn test_unreachable_device_still_logs_and_retries_schedule() {
    let remote = remote_with_schedule(vec![
        ScheduleEntry::new(t(1000)).with_setpoint("TempSet", 36.5),
    ]);
    let (_dir, cycle) = setup(&remote, RunOptions::default());
    cycle.device().set_offline(true);

    let report = cycle.run(Task::Full, t(1000)).await;
    assert_eq!(report.exit_code(), 0);
    assert!(matches!(
        report.outcome(Stage::Sample),
        Some(StageOutcome::Transient(_))
    ));
    assert!(matches!(
        report.outcome(Stage::Schedule),
        Some(StageOutcome::Transient(_))
    ));
    assert!(is_completed(report.outcome(Stage::Sync)));

    let history = local_history(&cycle, t(1000));
    assert_eq!(history.len(), 1);
    assert!(history[0].error.is_some());
    assert!(
        ExecutionLedger::load(&cycle.config().ledger_path())
            .unwrap()
            .is_empty()
    );

    cycle.device().set_offline(false);
    let report = cycle.run(Task::Full, t(1040)).await;
    assert!(is_completed(report.outcome(Stage::Schedule)));
    assert_eq!(cycle.device().value("TempSet").await, Some(36.5));
}

#[tokio::test]
async fn test_corrupt_schedule_is_fatal_but_history_is_published() {
    let remote = FakeRemote::new();
    remote.commit_as_other_writer(SCHEDULE, b"{ \"schedule\": [ {", "Broken edit");
    let (_dir, cycle) = setup(&remote, RunOptions::default());

    let report = cycle.run(Task::Full, t(0)).await;

    assert_eq!(report.exit_code(), 1);
    assert!(matches!(
        report.outcome(Stage::Schedule),
        Some(StageOutcome::Fatal(_))
    ));
    assert!(is_completed(report.outcome(Stage::History)));
    assert!(is_completed(report.outcome(Stage::Sync)));
    assert!(remote.file(LOG).is_some());
}

#[tokio::test]
async fn test_missing_schedule_is_skipped() {
    let (_dir, cycle) = setup(&FakeRemote::new(), RunOptions::default());

    let report = cycle.run(Task::Schedule, t(0)).await;

    assert_eq!(report.exit_code(), 0);
    assert!(report.outcome(Stage::Sample).is_none());
    assert!(matches!(
        report.outcome(Stage::Schedule),
        Some(StageOutcome::Skipped(_))
    ));
}

#[tokio::test]
async fn test_dry_run_writes_nothing_but_history() {
    let remote = remote_with_schedule(vec![
        ScheduleEntry::new(t(1000)).with_setpoint("TempSet", 36.5),
    ]);
    let before = remote.len();
    let options = RunOptions {
        dry_run: true,
        ..Default::default()
    };
    let (_dir, cycle) = setup(&remote, options);

    let report = cycle.run(Task::Full, t(1030)).await;

    assert_eq!(report.exit_code(), 0);
    assert!(
        report
            .outcome(Stage::Schedule)
            .is_some_and(|o| o.message().contains("1 entries due"))
    );
    assert!(matches!(
        report.outcome(Stage::Sync),
        Some(StageOutcome::Skipped(_))
    ));
    assert!(cycle.device().writes().await.is_empty());
    assert!(!cycle.config().ledger_path().exists());
    assert_eq!(local_history(&cycle, t(1030)).len(), 1);
    assert_eq!(remote.len(), before);
}

#[tokio::test]
async fn test_no_publish_keeps_data_local() {
    let remote = FakeRemote::new();
    let options = RunOptions {
        no_publish: true,
        ..Default::default()
    };
    let (_dir, cycle) = setup(&remote, options);

    let report = cycle.run(Task::Log, t(0)).await;

    assert!(matches!(
        report.outcome(Stage::Sync),
        Some(StageOutcome::Skipped(_))
    ));
    assert_eq!(local_history(&cycle, t(0)).len(), 1);
    assert!(remote.is_empty());
}

#[tokio::test]
async fn test_rejected_push_does_not_change_exit_code() {
    let remote = remote_with_schedule(Vec::new());
    let (_dir, cycle) = setup(&remote, RunOptions::default());
    let store = cycle.sync_controller().unwrap().store();
    store.reject_next_pushes(10);

    let report = cycle.run(Task::Log, t(0)).await;
    assert_eq!(report.exit_code(), 0);
    assert!(matches!(
        report.outcome(Stage::Sync),
        Some(StageOutcome::Transient(_))
    ));
    assert!(remote.file(LOG).is_none());

    store.reject_next_pushes(0);
    let report = cycle.run(Task::Sync, t(60)).await;
    assert!(is_completed(report.outcome(Stage::Sync)));
    assert!(remote.file(LOG).is_some());
    assert_eq!(store.unpublished(), 0);
}

#[tokio::test]
async fn test_held_lock_is_fatal_and_touches_nothing() {
    let remote = remote_with_schedule(Vec::new());
    let (_dir, cycle) = setup(&remote, RunOptions::default());
    let _held = FileLock::try_acquire(&cycle.config().lock_path(), Duration::from_secs(900))
        .unwrap()
        .expect("lock is free");

    let report = cycle.run(Task::Full, t(0)).await;

    assert_eq!(report.exit_code(), 1);
    assert!(is_completed(report.outcome(Stage::Sample)));
    assert!(matches!(
        report.outcome(Stage::Lock),
        Some(StageOutcome::Fatal(_))
    ));
    assert!(report.outcome(Stage::History).is_none());
    assert!(report.outcome(Stage::Sync).is_none());
    assert!(!cycle.config().history_path().exists());
}

#[tokio::test]
async fn test_concurrent_history_writer_does_not_lose_local_readings() {
    let remote = remote_with_schedule(Vec::new());
    let (_dir, cycle) = setup(&remote, RunOptions::default());
    for secs in [0, 60, 120] {
        cycle.run(Task::Log, t(secs)).await;
    }

    remote.commit_as_other_writer(LOG, b"{\"metadata\":{},\"data\":[]}", "Other host");
    for secs in [180, 240] {
        let report = cycle.run(Task::Log, t(secs)).await;
        assert_eq!(report.exit_code(), 0);
    }

    let history = local_history(&cycle, t(240));
    assert_eq!(history.len(), 5);
    assert_eq!(
        remote.file(LOG).unwrap(),
        std::fs::read(cycle.config().history_path()).unwrap()
    );
}

#[tokio::test(start_paused = true)]
async fn test_continuous_mode_runs_the_same_cycle() {
    let remote = remote_with_schedule(Vec::new());
    let (_dir, cycle) = setup(&remote, RunOptions::default());
    let clock = Arc::new(AtomicI64::new(0));

    let cycle_ref = &cycle;
    let last = run_every(
        Duration::from_secs(60),
        Some(Duration::from_secs(150)),
        std::future::pending(),
        move || {
            let now = t(clock.fetch_add(60, Ordering::SeqCst));
            cycle_ref.run(Task::Log, now)
        },
    )
    .await;

    assert_eq!(last.map(|r| r.exit_code()), Some(0));
    assert_eq!(local_history(&cycle, t(120)).len(), 3);
    assert_eq!(cycle.device().identity(), "incubator-1");
}
