//! Timestamp parsing and formatting.
//!
//! Every timestamp atmolog writes is RFC 3339 in UTC. On the way in we are
//! more forgiving: schedule files written by hand and history files written
//! by older loggers frequently carry offset-less ISO 8601 strings such as
//! `2025-09-11T08:35:12.123456`. Those are interpreted as UTC.

use time::format_description::well_known::{Iso8601, Rfc3339};
use time::{OffsetDateTime, PrimitiveDateTime, UtcOffset};

use crate::error::{ParseError, ParseResult};

/// Parse a timestamp string.
///
/// Accepts RFC 3339 (`2025-01-01T12:00:00Z`, `2025-01-01T12:00:00.000+02:00`)
/// and offset-less ISO 8601, which is taken to be UTC. The result is always
/// normalized to UTC.
///
/// # Examples
///
/// ```
/// use atmolog_types::timestamp;
///
/// let a = timestamp::parse("2025-09-11T08:35:12Z").unwrap();
/// let b = timestamp::parse("2025-09-11T10:35:12+02:00").unwrap();
/// let c = timestamp::parse("2025-09-11T08:35:12").unwrap();
/// assert_eq!(a, b);
/// assert_eq!(a, c);
/// ```
pub fn parse(s: &str) -> ParseResult<OffsetDateTime> {
    let trimmed = s.trim();

    if let Ok(t) = OffsetDateTime::parse(trimmed, &Rfc3339) {
        return Ok(t.to_offset(UtcOffset::UTC));
    }
    if let Ok(t) = OffsetDateTime::parse(trimmed, &Iso8601::DEFAULT) {
        return Ok(t.to_offset(UtcOffset::UTC));
    }
    PrimitiveDateTime::parse(trimmed, &Iso8601::DEFAULT)
        .map(PrimitiveDateTime::assume_utc)
        .map_err(|_| ParseError::InvalidTimestamp(s.to_string()))
}

/// Format a timestamp as RFC 3339 in UTC.
///
/// Years outside `0..=9999` cannot be expressed in RFC 3339; those fall back
/// to the Unix timestamp so formatting never fails.
pub fn format(t: OffsetDateTime) -> String {
    t.to_offset(UtcOffset::UTC)
        .format(&Rfc3339)
        .unwrap_or_else(|_| t.unix_timestamp().to_string())
}

/// Serde adapter for `#[serde(with = ...)]`: serialize as RFC 3339 UTC, deserialize leniently via [`parse`].
#[cfg(feature = "serde")]
pub mod lenient {
    use serde::{Deserialize, Deserializer, Serializer};
    use time::OffsetDateTime;

    pub fn serialize<S: Serializer>(t: &OffsetDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format(*t))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<OffsetDateTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse(&raw).map_err(serde::de::Error::custom)
    }
}
