//! Schedule entries and their execution identity.

use core::fmt;
use std::collections::BTreeMap;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// A time-triggered set of channel targets, as written in the schedule file.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ScheduleEntry {
    /// When the setpoints should take effect (UTC).
    #[cfg_attr(feature = "serde", serde(with = "crate::timestamp::lenient"))]
    pub timestamp: OffsetDateTime,
    /// Target value per setpoint channel.
    #[cfg_attr(feature = "serde", serde(default))]
    pub setpoints: BTreeMap<String, f64>,
}

impl ScheduleEntry {
    /// Create an entry with no setpoints.
    pub fn new(timestamp: OffsetDateTime) -> Self {
        Self {
            timestamp,
            setpoints: BTreeMap::new(),
        }
    }

    /// Add a channel target.
    #[must_use]
    pub fn with_setpoint(mut self, channel: impl Into<String>, value: f64) -> Self {
        self.setpoints.insert(channel.into(), value);
        self
    }

    /// The identity under which this entry is recorded once executed.
    pub fn id(&self) -> EntryId {
        EntryId::new(self.timestamp, self.setpoints.keys().cloned())
    }
}

/// Identity of a schedule entry: its timestamp plus its sorted channel set.
///
/// The derived ordering (timestamp first, then lexicographic channel list) is
/// the execution order for entries that fall due in the same cycle.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EntryId {
    #[cfg_attr(feature = "serde", serde(with = "crate::timestamp::lenient"))]
    pub timestamp: OffsetDateTime,
    pub channels: Vec<String>,
}

impl EntryId {
    /// Build an identity; channels are sorted and deduplicated.
    pub fn new(timestamp: OffsetDateTime, channels: impl IntoIterator<Item = String>) -> Self {
        let mut channels: Vec<String> = channels.into_iter().collect();
        channels.sort();
        channels.dedup();
        Self {
            timestamp: timestamp.to_offset(time::UtcOffset::UTC),
            channels,
        }
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}]",
            crate::timestamp::format(self.timestamp),
            self.channels.join(",")
        )
    }
}
