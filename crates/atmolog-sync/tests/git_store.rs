//! Ladder runs against a real git binary and a bare repository on disk.
//!
//! Run with: `cargo test -p atmolog-sync --test git_store -- --ignored`

use std::path::{Path, PathBuf};
use std::process::Command;

use atmolog_sync::{GitStore, Rung, SyncConfig, SyncController};
use time::OffsetDateTime;

const LOG: &str = "data/log/incubator_history.json";

fn git(dir: &Path, args: &[&str]) -> String {
    let out = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("git is installed");
    assert!(
        out.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&out.stderr)
    );
    String::from_utf8_lossy(&out.stdout).into_owned()
}

fn clone(bare: &Path, into: &Path) {
    git(
        into.parent().unwrap(),
        &["clone", bare.to_str().unwrap(), into.to_str().unwrap()],
    );
    git(into, &["config", "user.name", "atmolog test"]);
    git(into, &["config", "user.email", "atmolog@example.invalid"]);
}

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

fn commit_and_push(root: &Path, rel: &str, content: &str) {
    write(root, rel, content);
    git(root, &["add", rel]);
    git(root, &["commit", "-m", "other writer"]);
    git(root, &["push", "origin", "HEAD:main"]);
}

/// A bare remote seeded with a history file, plus two clones.
fn setup(dir: &Path) -> (PathBuf, PathBuf) {
    let bare = dir.join("remote.git");
    std::fs::create_dir_all(&bare).unwrap();
    git(&bare, &["init", "--bare", "--initial-branch=main"]);

    let seed = dir.join("seed");
    clone(&bare, &seed);
    commit_and_push(&seed, LOG, "{\"data\":[0]}\n");

    let local = dir.join("local");
    clone(&bare, &local);
    (local, seed)
}

fn controller(local: &Path) -> SyncController<GitStore> {
    let store = GitStore::new(local, "origin", "main");
    SyncController::new(store, SyncConfig::new(vec![PathBuf::from(LOG)]))
}

#[tokio::test]
#[ignore = "requires a git binary"]
async fn test_git_publish_over_unrelated_remote_commits() {
    let dir = tempfile::tempdir().unwrap();
    let (local, other) = setup(dir.path());

    write(&local, LOG, "{\"data\":[0,1,2,3,4,5]}\n");
    commit_and_push(&other, "data/schedules/setpoint_schedule.json", "{\"schedule\":[]}\n");
    commit_and_push(&other, "README.md", "lab data\n");

    let report = controller(&local)
        .sync(OffsetDateTime::now_utc())
        .await
        .unwrap();
    assert!(report.published);
    assert_eq!(report.rung, Rung::Integrate);
    assert!(local.join("README.md").exists());

    git(&other, &["pull", "--rebase", "origin", "main"]);
    assert_eq!(
        std::fs::read_to_string(other.join(LOG)).unwrap(),
        "{\"data\":[0,1,2,3,4,5]}\n"
    );
}

#[tokio::test]
#[ignore = "requires a git binary"]
async fn test_git_conflicting_history_keeps_local_data() {
    let dir = tempfile::tempdir().unwrap();
    let (local, other) = setup(dir.path());

    write(&local, LOG, "{\"data\":[0,1,2,3,4,5]}\n");
    commit_and_push(&other, LOG, "{\"data\":[0,9]}\n");

    let report = controller(&local)
        .sync(OffsetDateTime::now_utc())
        .await
        .unwrap();
    assert!(report.published);
    assert!(report.rung >= Rung::Shelve);
    assert_eq!(
        std::fs::read_to_string(local.join(LOG)).unwrap(),
        "{\"data\":[0,1,2,3,4,5]}\n"
    );
    assert!(git(&local, &["status", "--porcelain"]).trim().is_empty());

    let again = controller(&local)
        .sync(OffsetDateTime::now_utc())
        .await
        .unwrap();
    assert!(again.published);
    assert!(!again.committed);
}
