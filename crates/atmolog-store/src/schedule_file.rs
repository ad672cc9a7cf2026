//! The setpoint schedule file.
//!
//! Schedules are written by people (or by tools on another machine) and pulled
//! in through the versioned store. Top-level keys other than `metadata` and
//! `schedule` are ignored, so files carrying extra sections such as
//! `configuration` or `statistics` load fine.
//!
//! ```json
//! {
//!   "metadata": { "description": "CO2 ramp" },
//!   "schedule": [
//!     { "timestamp": "2025-09-11T09:00:00Z", "setpoints": { "TempSet": 37.0, "CO2Set": 5.0 } }
//!   ]
//! }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use atmolog_types::ScheduleEntry;

use crate::atomic;
use crate::error::{Error, Result};

/// Parsed schedule file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScheduleFile {
    /// Free-form description, carried through untouched.
    #[serde(default)]
    pub metadata: serde_json::Value,
    /// Entries in file order.
    #[serde(default)]
    pub schedule: Vec<ScheduleEntry>,
}

impl ScheduleFile {
    /// Load and parse the schedule at `path`.
    ///
    /// Unlike history, a schedule that cannot be parsed is an error: silently
    /// treating it as empty would skip setpoint changes the operator asked for.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::ScheduleMissing(path.to_path_buf()));
            }
            Err(e) => return Err(Error::io(path, e)),
        };
        serde_json::from_slice(&bytes).map_err(|e| Error::corrupt(path, e))
    }

    /// Write the schedule atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        atomic::write_json(path, self)
    }

    pub fn entries(&self) -> &[ScheduleEntry] {
        &self.schedule
    }
}
