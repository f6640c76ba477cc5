//! UTC time helpers for the telemetry wire format (`YYYY-MM-DD HH:MM:SS`).

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

pub const MS_PER_SECOND: i64 = 1_000;
pub const MS_PER_HOUR: i64 = 3_600_000;

const SQL_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Format ms-since-epoch as `YYYY-MM-DD HH:MM:SS` (UTC).
pub fn to_utc_sql(ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|dt| dt.format(SQL_FORMAT).to_string())
        .unwrap_or_default()
}

/// Parse a telemetry timestamp to ms since epoch.
///
/// RFC 3339 is tried first; otherwise `YYYY-MM-DD HH:MM:SS` (space or `T`
/// separator, optional fraction) is read as UTC with the fraction dropped.
pub fn parse_utc_sql(raw: &str) -> Option<i64> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_millis());
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc().timestamp() * MS_PER_SECOND)
}

/// An inclusive `[start_ms, end_ms]` window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start_ms: i64,
    pub end_ms: i64,
}

impl TimeRange {
    pub fn new(start_ms: i64, end_ms: i64) -> Result<Self> {
        if start_ms > end_ms {
            return Err(Error::InvalidRange { start_ms, end_ms });
        }
        Ok(Self { start_ms, end_ms })
    }

    /// The last `hours` hours ending at `now_ms`, truncated to whole seconds
    /// so the range survives a round trip through the wire format.
    pub fn last_hours(hours: u32, now_ms: i64) -> Self {
        let end_ms = now_ms - now_ms.rem_euclid(MS_PER_SECOND);
        Self {
            start_ms: end_ms - i64::from(hours) * MS_PER_HOUR,
            end_ms,
        }
    }

    /// Build a range from wire-format bounds.
    pub fn from_sql(start: &str, end: &str) -> Result<Self> {
        let start_ms = parse_utc_sql(start)
            .ok_or_else(|| Error::Other(format!("unparseable start_time: {start:?}")))?;
        let end_ms = parse_utc_sql(end)
            .ok_or_else(|| Error::Other(format!("unparseable end_time: {end:?}")))?;
        Self::new(start_ms, end_ms)
    }

    pub fn start_sql(&self) -> String {
        to_utc_sql(self.start_ms)
    }

    pub fn end_sql(&self) -> String {
        to_utc_sql(self.end_ms)
    }

    pub fn contains(&self, ts: i64) -> bool {
        ts >= self.start_ms && ts <= self.end_ms
    }
}
