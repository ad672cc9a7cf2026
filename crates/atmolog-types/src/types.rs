//! Core types for incubator sensor data.

use core::fmt;
use std::collections::BTreeMap;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Mapping of channel name to value; `None` when the channel is unsupported
/// or could not be read this cycle.
///
/// A `BTreeMap` keeps serialized output stable across runs, which keeps
/// diffs in the versioned store small.
pub type ChannelValues = BTreeMap<String, Option<f64>>;

/// Mode reported when the device does not answer the mode query.
pub const UNKNOWN_MODE: &str = "Unknown";

#[cfg(feature = "serde")]
fn unknown_mode() -> String {
    UNKNOWN_MODE.to_string()
}

/// One sampling cycle's snapshot of the device.
///
/// Readings are immutable once written to history. A reading taken while the
/// device was wholly unreachable has empty channel maps and an `error` message;
/// it is still recorded so gaps are visible.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Reading {
    /// When the sample was taken (UTC).
    #[cfg_attr(feature = "serde", serde(with = "crate::timestamp::lenient"))]
    pub timestamp: OffsetDateTime,
    /// Device operating mode (e.g. `Manual`, `Program`).
    #[cfg_attr(feature = "serde", serde(default = "unknown_mode"))]
    pub mode: String,
    /// Measured values per read channel.
    #[cfg_attr(feature = "serde", serde(default))]
    pub readings: ChannelValues,
    /// Active setpoints per setpoint channel.
    #[cfg_attr(feature = "serde", serde(default))]
    pub setpoints: ChannelValues,
    /// Device-level failure message, if the whole read failed.
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "Option::is_none")
    )]
    pub error: Option<String>,
}

impl Reading {
    /// Create an empty reading at `timestamp` with an unknown mode.
    pub fn new(timestamp: OffsetDateTime) -> Self {
        Self {
            timestamp,
            mode: UNKNOWN_MODE.to_string(),
            readings: ChannelValues::new(),
            setpoints: ChannelValues::new(),
            error: None,
        }
    }

    /// Create a reading that records a device-level failure.
    pub fn failed(timestamp: OffsetDateTime, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(timestamp)
        }
    }

    /// Set the operating mode.
    #[must_use]
    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = mode.into();
        self
    }

    /// Add a measured value.
    #[must_use]
    pub fn with_reading(mut self, channel: impl Into<String>, value: Option<f64>) -> Self {
        self.readings.insert(channel.into(), value);
        self
    }

    /// Add a setpoint value.
    #[must_use]
    pub fn with_setpoint(mut self, channel: impl Into<String>, value: Option<f64>) -> Self {
        self.setpoints.insert(channel.into(), value);
        self
    }

    /// Whether the device returned no usable value at all.
    pub fn is_empty(&self) -> bool {
        self.readings.values().all(Option::is_none) && self.setpoints.values().all(Option::is_none)
    }
}

/// Valid range a device declares for a setpoint channel (inclusive).
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ValueRange {
    pub min: f64,
    pub max: f64,
}

impl ValueRange {
    /// Create a new range. Bounds given in the wrong order are swapped.
    pub fn new(min: f64, max: f64) -> Self {
        if min <= max {
            Self { min, max }
        } else {
            Self { min: max, max: min }
        }
    }

    /// Whether `value` lies within the range, bounds included.
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

impl fmt::Display for ValueRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.min, self.max)
    }
}

/// Result of asking the device to apply one setpoint.
///
/// Transport failures are not represented here; they surface as errors so the
/// caller can tell "the device said no" from "the device did not answer".
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "outcome", rename_all = "snake_case"))]
pub enum SetOutcome {
    /// The device accepted the value. `actual` is what it echoed back, which
    /// may differ from the request after device-side rounding.
    Applied { requested: f64, actual: Option<f64> },
    /// The value lies outside the channel's declared range.
    OutOfRange { requested: f64, range: ValueRange },
    /// The channel is not supported or was rejected by the controller.
    Unavailable { requested: f64 },
}

impl SetOutcome {
    /// Whether the device applied the value.
    pub fn is_applied(&self) -> bool {
        matches!(self, SetOutcome::Applied { .. })
    }
}

impl fmt::Display for SetOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetOutcome::Applied {
                requested,
                actual: Some(actual),
            } => write!(f, "applied {} (device reports {})", requested, actual),
            SetOutcome::Applied {
                requested,
                actual: None,
            } => write!(f, "applied {}", requested),
            SetOutcome::OutOfRange { requested, range } => {
                write!(f, "{} is outside valid range {}", requested, range)
            }
            SetOutcome::Unavailable { requested } => {
                write!(f, "{} rejected: channel not available", requested)
            }
        }
    }
}

/// Aggregate view of a history window.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HistoryMetrics {
    /// Number of retained readings.
    pub total_entries: usize,
    /// `last.timestamp - first.timestamp`; zero for fewer than two entries.
    #[cfg_attr(feature = "serde", serde(with = "duration_secs"))]
    pub time_span: time::Duration,
}

impl HistoryMetrics {
    /// Time span in hours, rounded to two decimals.
    pub fn time_span_hours(&self) -> f64 {
        (self.time_span.as_seconds_f64() / 3600.0 * 100.0).round() / 100.0
    }
}

#[cfg(feature = "serde")]
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &time::Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_seconds_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<time::Duration, D::Error> {
        f64::deserialize(d).map(time::Duration::saturating_seconds_f64)
    }
}
