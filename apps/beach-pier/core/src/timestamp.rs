use std::fmt;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use time::format_description::well_known::{Iso8601, Rfc3339};
use time::{OffsetDateTime, PrimitiveDateTime};

/// Numbers below this are epoch seconds (the server falls back to float
/// seconds when the client omitted a timestamp); anything above is millis.
const SECONDS_CUTOFF: f64 = 1e11;

/// Milliseconds since the Unix epoch, normalised from whatever encoding the
/// server used for a given field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimestampMs(pub i64);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimestampError {
    #[error("timestamp is not a finite, non-negative number")]
    OutOfRange,
    #[error("unrecognised timestamp format: {0}")]
    Format(String),
}

impl TimestampMs {
    pub fn now() -> Self {
        Self::from_datetime(OffsetDateTime::now_utc())
    }

    pub fn from_datetime(at: OffsetDateTime) -> Self {
        TimestampMs((at.unix_timestamp_nanos() / 1_000_000) as i64)
    }

    pub fn as_millis(self) -> i64 {
        self.0
    }

    pub fn from_number(value: f64) -> Result<Self, TimestampError> {
        if !value.is_finite() || value < 0.0 {
            return Err(TimestampError::OutOfRange);
        }
        let millis = if value < SECONDS_CUTOFF {
            value * 1000.0
        } else {
            value
        };
        Ok(TimestampMs(millis.round() as i64))
    }

    /// Accepts numeric strings, RFC 3339 and offset-less ISO 8601 (taken as UTC).
    pub fn parse(text: &str) -> Result<Self, TimestampError> {
        let trimmed = text.trim();
        if let Ok(number) = trimmed.parse::<f64>() {
            return Self::from_number(number);
        }
        if let Ok(at) = OffsetDateTime::parse(trimmed, &Rfc3339) {
            return Ok(Self::from_datetime(at));
        }
        if let Ok(at) = PrimitiveDateTime::parse(trimmed, &Iso8601::DEFAULT) {
            return Ok(Self::from_datetime(at.assume_utc()));
        }
        Err(TimestampError::Format(trimmed.to_owned()))
    }

    pub fn to_datetime(self) -> Option<OffsetDateTime> {
        OffsetDateTime::from_unix_timestamp_nanos(self.0 as i128 * 1_000_000).ok()
    }
}

impl fmt::Display for TimestampMs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_datetime().and_then(|at| at.format(&Rfc3339).ok()) {
            Some(text) => f.write_str(&text),
            None => write!(f, "{}ms", self.0),
        }
    }
}

impl Serialize for TimestampMs {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.0)
    }
}

impl<'de> Deserialize<'de> for TimestampMs {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(TimestampVisitor)
    }
}

struct TimestampVisitor;

impl<'de> Visitor<'de> for TimestampVisitor {
    type Value = TimestampMs;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("epoch seconds, epoch milliseconds or an ISO 8601 string")
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> Result<TimestampMs, E> {
        TimestampMs::from_number(value as f64).map_err(E::custom)
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> Result<TimestampMs, E> {
        TimestampMs::from_number(value as f64).map_err(E::custom)
    }

    fn visit_f64<E: de::Error>(self, value: f64) -> Result<TimestampMs, E> {
        TimestampMs::from_number(value).map_err(E::custom)
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<TimestampMs, E> {
        TimestampMs::parse(value).map_err(E::custom)
    }
}
