//! Shared data model for the atmolog incubator control loop.
//!
//! This crate holds the types exchanged between the device adapter
//! (atmolog-core), file persistence (atmolog-store) and the orchestrating
//! service: sampled [`Reading`]s, [`ScheduleEntry`] targets and their
//! execution identity [`EntryId`], and the outcome of a setpoint write.
//!
//! # Example
//!
//! ```
//! use atmolog_types::{Reading, ScheduleEntry, channels, timestamp};
//!
//! let now = timestamp::parse("2025-01-01T12:00:00Z").unwrap();
//! let reading = Reading::new(now)
//!     .with_mode("Manual")
//!     .with_reading(channels::TEMP_READ, Some(37.0));
//! assert!(!reading.is_empty());
//!
//! let entry = ScheduleEntry::new(now)
//!     .with_setpoint(channels::TEMP_SET, 37.0)
//!     .with_setpoint(channels::CO2_SET, 5.0);
//! assert_eq!(entry.id().channels, vec!["CO2Set", "TempSet"]);
//! ```

pub mod channels;
pub mod error;
pub mod schedule;
pub mod timestamp;
pub mod types;

pub use error::{ParseError, ParseResult};
pub use schedule::{EntryId, ScheduleEntry};
pub use types::{ChannelValues, HistoryMetrics, Reading, SetOutcome, UNKNOWN_MODE, ValueRange};

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> time::OffsetDateTime {
        timestamp::parse(s).unwrap()
    }

    #[test]
    fn test_reading_roundtrips_with_null_channels() {
        let reading = Reading::new(at("2025-09-11T08:35:12Z"))
            .with_mode("Manual")
            .with_reading(channels::TEMP_READ, Some(37.1))
            .with_reading(channels::O2_READ, None);

        let json = serde_json::to_string(&reading).unwrap();
        assert!(json.contains("\"O2Read\":null"));
        assert!(!json.contains("error"));

        let back: Reading = serde_json::from_str(&json).unwrap();
        assert_eq!(back, reading);
    }

    #[test]
    fn test_reading_accepts_legacy_naive_timestamp() {
        let json = r#"{"timestamp":"2025-09-11T08:35:12.123456","mode":"Manual",
            "readings":{"Temp1Read":37.0},"setpoints":{"TempSet":37.0}}"#;
        let reading: Reading = serde_json::from_str(json).unwrap();
        assert_eq!(reading.timestamp.unix_timestamp(), 1_757_579_712);
        assert_eq!(reading.setpoints.get("TempSet"), Some(&Some(37.0)));
    }

    #[test]
    fn test_reading_missing_fields_default() {
        let json = r#"{"timestamp":"2025-09-11T08:35:12Z","error":"timeout","readings":{},"setpoints":{}}"#;
        let reading: Reading = serde_json::from_str(json).unwrap();
        assert_eq!(reading.mode, UNKNOWN_MODE);
        assert_eq!(reading.error.as_deref(), Some("timeout"));
        assert!(reading.is_empty());
    }

    #[test]
    fn test_failed_reading_is_empty() {
        let reading = Reading::failed(at("2025-09-11T08:35:12Z"), "connection refused");
        assert!(reading.is_empty());
        assert_eq!(reading.error.as_deref(), Some("connection refused"));
    }

    #[test]
    fn test_entry_id_ignores_offset_and_channel_order() {
        let a = ScheduleEntry::new(at("2025-01-01T12:00:00Z"))
            .with_setpoint("TempSet", 37.0)
            .with_setpoint("HumSet", 50.0);
        let b = ScheduleEntry::new(at("2025-01-01T13:00:00+01:00"))
            .with_setpoint("HumSet", 40.0)
            .with_setpoint("TempSet", 30.0);
        assert_eq!(a.id(), b.id());
    }

    #[test]
    fn test_entry_id_ordering_timestamp_then_channels() {
        let t = at("2025-01-01T12:00:00Z");
        let later = EntryId::new(t + time::Duration::seconds(1), vec!["A".to_string()]);
        let fan = EntryId::new(t, vec!["FanSet".to_string()]);
        let temp = EntryId::new(t, vec!["TempSet".to_string()]);

        let mut ids = vec![later.clone(), temp.clone(), fan.clone()];
        ids.sort();
        assert_eq!(ids, vec![fan, temp, later]);
    }

    #[test]
    fn test_schedule_entry_parses_integer_setpoints() {
        let json = r#"{"timestamp":"2025-09-11T08:35:12.000Z","setpoints":{"CO2Set":400,"TempSet":25.0}}"#;
        let entry: ScheduleEntry = serde_json::from_str(json).unwrap();
        assert_eq!(entry.setpoints.get("CO2Set"), Some(&400.0));
    }

    #[test]
    fn test_value_range_contains_bounds() {
        let range = ValueRange::new(40.0, 18.0);
        assert_eq!(range.min, 18.0);
        assert!(range.contains(18.0));
        assert!(range.contains(40.0));
        assert!(!range.contains(40.1));
    }

    #[test]
    fn test_set_outcome_display() {
        let outcome = SetOutcome::OutOfRange {
            requested: 90.0,
            range: ValueRange::new(18.0, 70.0),
        };
        assert_eq!(outcome.to_string(), "90 is outside valid range [18, 70]");
        assert!(!outcome.is_applied());
    }

    #[test]
    fn test_unavailable_markers() {
        assert!(channels::is_unavailable_marker(" n/a "));
        assert!(channels::is_unavailable_marker("Unknown"));
        assert!(!channels::is_unavailable_marker("37.0"));
    }

    #[test]
    fn test_metrics_hours_rounding() {
        let metrics = HistoryMetrics {
            total_entries: 3,
            time_span: time::Duration::seconds(10_836),
        };
        assert_eq!(metrics.time_span_hours(), 3.01);
    }
}
