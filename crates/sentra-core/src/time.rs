//! UTC timestamp helpers with microsecond precision.
//!
//! Audit event hashing depends on a byte-stable timestamp rendering, so the
//! format is pinned here: `YYYY-MM-DDTHH:MM:SS.ffffffZ`, always UTC, always
//! six subsecond digits.

use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime, UtcOffset};

use crate::error::SentraError;

/// Microsecond UTC format used for audit event hashing and storage.
const EVENT_TIMESTAMP_FORMAT: &[BorrowedFormatItem<'static>] = format_description!(
    "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:6]Z"
);

/// Returns the current instant in UTC.
#[must_use]
pub fn now_utc() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

/// Formats a timestamp as `YYYY-MM-DDTHH:MM:SS.ffffffZ` in UTC.
#[must_use]
pub fn format_event_timestamp(timestamp: OffsetDateTime) -> String {
    timestamp
        .to_offset(UtcOffset::UTC)
        .format(&EVENT_TIMESTAMP_FORMAT)
        .unwrap_or_default()
}

/// Parses a timestamp previously produced by [`format_event_timestamp`].
///
/// # Errors
///
/// Returns an `Internal` error when the input does not match the pinned
/// format.
pub fn parse_event_timestamp(input: &str) -> Result<OffsetDateTime, SentraError> {
    PrimitiveDateTime::parse(input, &EVENT_TIMESTAMP_FORMAT)
        .map(PrimitiveDateTime::assume_utc)
        .map_err(|e| SentraError::internal(format!("invalid event timestamp '{input}': {e}")))
}

/// Serde adapter serializing timestamps in the pinned microsecond format.
///
/// ```ignore
/// #[serde(with = "sentra_core::time::serde_micros")]
/// pub timestamp: OffsetDateTime,
/// ```
pub mod serde_micros {
    use serde::{Deserialize, Deserializer, Serializer};
    use time::OffsetDateTime;

    use super::{format_event_timestamp, parse_event_timestamp};

    /// Serializes `timestamp` as a microsecond UTC string.
    ///
    /// # Errors
    ///
    /// Never fails for representable timestamps.
    pub fn serialize<S>(timestamp: &OffsetDateTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format_event_timestamp(*timestamp))
    }

    /// Deserializes a microsecond UTC string.
    ///
    /// # Errors
    ///
    /// Fails when the string does not match the pinned format.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<OffsetDateTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse_event_timestamp(&raw).map_err(serde::de::Error::custom)
    }
}
