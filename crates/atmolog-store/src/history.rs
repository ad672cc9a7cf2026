//! Rolling history of device readings.
//!
//! The history file is a single JSON document:
//!
//! ```json
//! {
//!   "metadata": {
//!     "created": "2025-09-11T08:35:12Z",
//!     "device_id": "192.168.100.100",
//!     "max_age_hours": 3.0,
//!     "last_updated": "2025-09-11T11:35:12Z",
//!     "total_entries": 180,
//!     "time_span_hours": 2.98
//!   },
//!   "data": [ { "timestamp": "...", "mode": "Manual", "readings": {...}, "setpoints": {...} } ]
//! }
//! ```
//!
//! Entries are kept in non-decreasing timestamp order, so removing everything
//! older than `now - max_age` is always a prefix trim.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use tracing::{debug, info, warn};

use atmolog_types::{HistoryMetrics, Reading, timestamp};

use crate::atomic;
use crate::error::{Error, Result};

/// Default retention window.
pub const DEFAULT_MAX_AGE: Duration = Duration::hours(3);

/// Descriptive header of the history file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryMetadata {
    #[serde(with = "timestamp::lenient")]
    pub created: OffsetDateTime,
    #[serde(alias = "device_ip", default)]
    pub device_id: String,
    #[serde(alias = "max_hours", default)]
    pub max_age_hours: f64,
    #[serde(with = "timestamp::lenient", default = "epoch")]
    pub last_updated: OffsetDateTime,
    #[serde(default)]
    pub total_entries: usize,
    #[serde(default)]
    pub time_span_hours: f64,
}

fn epoch() -> OffsetDateTime {
    OffsetDateTime::UNIX_EPOCH
}

impl HistoryMetadata {
    fn fresh(device_id: &str, max_age: Duration, now: OffsetDateTime) -> Self {
        Self {
            created: now,
            device_id: device_id.to_string(),
            max_age_hours: max_age.as_seconds_f64() / 3600.0,
            last_updated: now,
            total_entries: 0,
            time_span_hours: 0.0,
        }
    }
}

#[derive(Serialize)]
struct HistoryFileRef<'a> {
    metadata: &'a HistoryMetadata,
    data: &'a VecDeque<Reading>,
}

#[derive(Deserialize)]
struct RawHistoryFile {
    #[serde(default)]
    metadata: Option<serde_json::Value>,
    #[serde(default)]
    data: Vec<serde_json::Value>,
}

/// Time-ordered, age-bounded sequence of readings backed by a JSON file.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    path: PathBuf,
    metadata: HistoryMetadata,
    entries: VecDeque<Reading>,
    max_age: Duration,
}

impl HistoryStore {
    /// Create an empty history that will be saved to `path`.
    pub fn new(
        path: impl Into<PathBuf>,
        device_id: &str,
        max_age: Duration,
        now: OffsetDateTime,
    ) -> Self {
        Self {
            path: path.into(),
            metadata: HistoryMetadata::fresh(device_id, max_age, now),
            entries: VecDeque::new(),
            max_age,
        }
    }

    /// Load the history at `path`.
    ///
    /// A missing file yields an empty history. So does a file that is not
    /// valid JSON; it is first moved aside to `<name>.corrupt` so its content
    /// can still be inspected. Individual entries that fail to parse are
    /// dropped and the rest kept. Any other I/O failure is an error.
    ///
    /// `max_age` and a non-empty `device_id` override what the file recorded.
    pub fn load(
        path: impl Into<PathBuf>,
        device_id: &str,
        max_age: Duration,
        now: OffsetDateTime,
    ) -> Result<Self> {
        Self::open(path, device_id, max_age, now, true)
    }

    /// Like [`HistoryStore::load`], but an unreadable file is left where it is.
    /// For callers that do not hold the working tree lock.
    pub fn read(
        path: impl Into<PathBuf>,
        device_id: &str,
        max_age: Duration,
        now: OffsetDateTime,
    ) -> Result<Self> {
        Self::open(path, device_id, max_age, now, false)
    }

    fn open(
        path: impl Into<PathBuf>,
        device_id: &str,
        max_age: Duration,
        now: OffsetDateTime,
        quarantine: bool,
    ) -> Result<Self> {
        let mut store = Self::new(path, device_id, max_age, now);

        let bytes = match std::fs::read(&store.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No history at {}, starting fresh", store.path.display());
                return Ok(store);
            }
            Err(e) => return Err(Error::io(&store.path, e)),
        };

        let raw: RawHistoryFile = match serde_json::from_slice(&bytes) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(
                    "History {} is unreadable ({}), starting fresh",
                    store.path.display(),
                    e
                );
                if quarantine {
                    store.quarantine();
                }
                return Ok(store);
            }
        };

        if let Some(value) = raw.metadata {
            match serde_json::from_value::<HistoryMetadata>(value) {
                Ok(mut metadata) => {
                    if !device_id.is_empty() {
                        metadata.device_id = device_id.to_string();
                    }
                    metadata.max_age_hours = store.metadata.max_age_hours;
                    store.metadata = metadata;
                }
                Err(e) => warn!("Ignoring unreadable history metadata: {}", e),
            }
        }

        let total = raw.data.len();
        let mut entries: Vec<Reading> = raw
            .data
            .into_iter()
            .filter_map(|value| match serde_json::from_value::<Reading>(value) {
                Ok(reading) => Some(reading),
                Err(e) => {
                    debug!("Dropping unreadable history entry: {}", e);
                    None
                }
            })
            .collect();
        if entries.len() < total {
            warn!(
                "Dropped {} unreadable entries from {}",
                total - entries.len(),
                store.path.display()
            );
        }
        entries.sort_by_key(|r| r.timestamp);
        store.entries = entries.into();

        debug!(
            "Loaded {} history entries from {}",
            store.entries.len(),
            store.path.display()
        );
        Ok(store)
    }

    fn quarantine(&self) {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".corrupt");
        let backup = self.path.with_file_name(name);
        if let Err(e) = std::fs::rename(&self.path, &backup) {
            warn!("Could not move corrupt history aside: {}", e);
        }
    }

    /// Append a reading, then evict everything older than `now - max_age`.
    ///
    /// A reading older than the last retained one (the clock stepped back) is
    /// inserted at its ordered position. Returns the number of evicted entries.
    pub fn append(&mut self, reading: Reading, now: OffsetDateTime) -> usize {
        match self.entries.back() {
            Some(last) if reading.timestamp < last.timestamp => {
                warn!(
                    "Reading at {} is older than the last entry ({}), inserting in order",
                    timestamp::format(reading.timestamp),
                    timestamp::format(last.timestamp)
                );
                let at = self
                    .entries
                    .partition_point(|r| r.timestamp <= reading.timestamp);
                self.entries.insert(at, reading);
            }
            _ => self.entries.push_back(reading),
        }
        self.evict(now)
    }

    /// Remove entries with `timestamp < now - max_age`. Returns how many.
    pub fn evict(&mut self, now: OffsetDateTime) -> usize {
        let cutoff = now - self.max_age;
        let expired = self.entries.partition_point(|r| r.timestamp < cutoff);
        if expired > 0 {
            self.entries.drain(..expired);
            debug!(
                "Evicted {} entries older than {}",
                expired,
                timestamp::format(cutoff)
            );
        }
        expired
    }

    /// Entry count and covered time span.
    pub fn metrics(&self) -> HistoryMetrics {
        let time_span = match (self.entries.front(), self.entries.back()) {
            (Some(first), Some(last)) => last.timestamp - first.timestamp,
            _ => Duration::ZERO,
        };
        HistoryMetrics {
            total_entries: self.entries.len(),
            time_span,
        }
    }

    /// Refresh the metadata and write the file atomically.
    pub fn save(&mut self, now: OffsetDateTime) -> Result<()> {
        let metrics = self.metrics();
        self.metadata.last_updated = now;
        self.metadata.total_entries = metrics.total_entries;
        self.metadata.time_span_hours = metrics.time_span_hours();

        atomic::write_json(
            &self.path,
            &HistoryFileRef {
                metadata: &self.metadata,
                data: &self.entries,
            },
        )?;
        debug!(
            "Saved {} entries to {}",
            self.entries.len(),
            self.path.display()
        );
        Ok(())
    }

    pub fn entries(&self) -> impl ExactSizeIterator<Item = &Reading> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&Reading> {
        self.entries.back()
    }

    pub fn metadata(&self) -> &HistoryMetadata {
        &self.metadata
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atmolog_types::channels;

    fn t(secs: i64) -> OffsetDateTime {
        OffsetDateTime::UNIX_EPOCH + Duration::seconds(1_757_000_000 + secs)
    }

    fn reading(secs: i64) -> Reading {
        Reading::new(t(secs))
            .with_mode("Manual")
            .with_reading(channels::TEMP_READ, Some(37.0))
    }

    #[test]
    fn test_scenario_window_of_three_hours() {
        let mut store = HistoryStore::new("unused.json", "dev", Duration::seconds(10_800), t(0));

        // 181 readings a minute apart; nothing is older than three hours yet
        let mut evicted = 0;
        for i in 0..181 {
            let secs = i * 60;
            evicted += store.append(reading(secs), t(secs));
        }
        assert_eq!(evicted, 0);
        assert_eq!(store.len(), 181);

        // the next reading pushes only the t=0 reading out of the window
        assert_eq!(store.append(reading(10_860), t(10_860)), 1);
        assert_eq!(store.len(), 181);
        assert_eq!(store.entries().next().unwrap().timestamp, t(60));
        assert_eq!(store.last().unwrap().timestamp, t(10_860));
    }

    #[test]
    fn test_boundary_entry_is_retained() {
        let mut store = HistoryStore::new("unused.json", "dev", Duration::seconds(100), t(0));
        store.append(reading(0), t(0));
        assert_eq!(store.append(reading(50), t(100)), 0);
        assert_eq!(store.append(reading(101), t(101)), 1);
    }

    #[test]
    fn test_out_of_order_reading_inserted_in_place() {
        let mut store = HistoryStore::new("unused.json", "dev", DEFAULT_MAX_AGE, t(0));
        store.append(reading(0), t(0));
        store.append(reading(120), t(120));
        store.append(reading(60), t(130));

        let times: Vec<_> = store.entries().map(|r| r.timestamp).collect();
        assert_eq!(times, vec![t(0), t(60), t(120)]);
    }

    #[test]
    fn test_metrics() {
        let mut store = HistoryStore::new("unused.json", "dev", DEFAULT_MAX_AGE, t(0));
        assert_eq!(store.metrics().time_span, Duration::ZERO);
        store.append(reading(0), t(0));
        store.append(reading(5400), t(5400));
        let metrics = store.metrics();
        assert_eq!(metrics.total_entries, 2);
        assert_eq!(metrics.time_span_hours(), 1.5);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log/history.json");
        let mut store = HistoryStore::new(&path, "192.168.100.100", DEFAULT_MAX_AGE, t(0));
        store.append(reading(0), t(0));
        store.append(Reading::failed(t(60), "device unreachable"), t(60));
        store.save(t(60)).unwrap();

        let loaded = HistoryStore::load(&path, "", DEFAULT_MAX_AGE, t(120)).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.metadata().device_id, "192.168.100.100");
        assert_eq!(loaded.metadata().total_entries, 2);
        assert_eq!(loaded.metadata().created, t(0));
        assert_eq!(
            loaded.last().unwrap().error.as_deref(),
            Some("device unreachable")
        );
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store =
            HistoryStore::load(dir.path().join("none.json"), "dev", DEFAULT_MAX_AGE, t(0)).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_corrupt_file_is_empty_and_moved_aside() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        std::fs::write(&path, "{\"data\": [ {\"timest").unwrap();

        let store = HistoryStore::load(&path, "dev", DEFAULT_MAX_AGE, t(0)).unwrap();
        assert!(store.is_empty());
        assert!(dir.path().join("history.json.corrupt").exists());
    }

    #[test]
    fn test_read_leaves_corrupt_file_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        std::fs::write(&path, "{\"data\": [ {\"timest").unwrap();

        let store = HistoryStore::read(&path, "dev", DEFAULT_MAX_AGE, t(0)).unwrap();
        assert!(store.is_empty());
        assert!(path.exists());
        assert!(!dir.path().join("history.json.corrupt").exists());
    }

    #[test]
    fn test_legacy_file_with_bad_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        let legacy = r#"{
            "metadata": {"created": "2025-09-11T08:00:00.123456", "device_ip": "192.168.100.100:80", "max_hours": 3.0},
            "data": [
                {"timestamp": "2025-09-11T08:35:12.000001", "mode": "Manual", "readings": {"Temp1Read": 37.0}, "setpoints": {}},
                {"timestamp": "not a time", "readings": {}},
                {"timestamp": "2025-09-11T08:34:12", "readings": {"Temp1Read": null}, "setpoints": {"TempSet": 37.0}}
            ]
        }"#;
        std::fs::write(&path, legacy).unwrap();

        let store = HistoryStore::load(&path, "", DEFAULT_MAX_AGE, t(0)).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.metadata().device_id, "192.168.100.100:80");
        let first = store.entries().next().unwrap();
        assert_eq!(first.mode, atmolog_types::UNKNOWN_MODE);
    }
}
