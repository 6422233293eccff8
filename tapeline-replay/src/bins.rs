//! Minute bins: keys, flooring, and ranges.
//!
//! A bin key is the UTC minute formatted as `%Y%m%d%H%M`, so lexicographic
//! order is chronological order.

use chrono::{DateTime, Duration, DurationRound, NaiveDateTime, TimeZone, Utc};
use std::collections::BTreeSet;
use thiserror::Error;

pub const BIN_KEY_FORMAT: &str = "%Y%m%d%H%M";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid bin key '{key}': expected 12 digits as YYYYMMDDHHMM")]
pub struct BinKeyError {
    pub key: String,
}

/// One minute.
pub fn minute() -> Duration {
    Duration::minutes(1)
}

/// Truncate to the start of the minute, in UTC.
pub fn floor_to_minute<Tz: TimeZone>(t: DateTime<Tz>) -> DateTime<Utc> {
    let utc = t.with_timezone(&Utc);
    utc.duration_trunc(minute()).unwrap_or(utc)
}

pub fn bin_key<Tz: TimeZone>(t: DateTime<Tz>) -> String {
    floor_to_minute(t).format(BIN_KEY_FORMAT).to_string()
}

pub fn parse_bin_key(key: &str) -> Result<DateTime<Utc>, BinKeyError> {
    let err = || BinKeyError {
        key: key.to_string(),
    };
    if key.len() != 12 || !key.bytes().all(|b| b.is_ascii_digit()) {
        return Err(err());
    }
    NaiveDateTime::parse_from_str(key, BIN_KEY_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|_| err())
}

/// Whole minutes from `start` to `end`, truncated toward zero.
pub fn minutes_between<Tz1: TimeZone, Tz2: TimeZone>(start: DateTime<Tz1>, end: DateTime<Tz2>) -> i64 {
    (end.with_timezone(&Utc) - start.with_timezone(&Utc)).num_minutes()
}

/// Every minute from `floor(start)` to `floor(end)`, both ends included.
/// Empty when `end` is before `start`.
pub fn minute_range<Tz1: TimeZone, Tz2: TimeZone>(
    start: DateTime<Tz1>,
    end: DateTime<Tz2>,
) -> Vec<DateTime<Utc>> {
    let start = floor_to_minute(start);
    let end = floor_to_minute(end);
    let mut out = Vec::new();
    let mut t = start;
    while t <= end {
        out.push(t);
        t += minute();
    }
    out
}

/// Minutes in `[start, end]` that are not in `present`.
pub fn missing_minutes_in<Tz1: TimeZone, Tz2: TimeZone>(
    present: &[DateTime<Utc>],
    start: DateTime<Tz1>,
    end: DateTime<Tz2>,
) -> Vec<DateTime<Utc>> {
    let present: BTreeSet<DateTime<Utc>> = present.iter().map(|t| floor_to_minute(*t)).collect();
    minute_range(start, end)
        .into_iter()
        .filter(|t| !present.contains(t))
        .collect()
}
