//! Gap detection between consecutive market timestamps.

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Steady-state distance between bars.
pub const CADENCE: Duration = Duration::seconds(60);

/// Differences up to this are jitter, not a missing minute.
pub const TOLERANCE: Duration = Duration::seconds(90);

/// Stateless: compares two timestamps and reports the minutes between them
/// that were never seen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GapDetector;

impl GapDetector {
    pub fn new() -> Self {
        Self
    }

    /// `Some((gap_start, gap_end))` when minutes were skipped between `last`
    /// and `incoming`.
    ///
    /// - exactly one minute apart: no gap
    /// - more than 90 s apart: `[last + 60 s, incoming - 60 s]`, unless that
    ///   range is empty
    /// - anything else: no gap
    pub fn detect_gap<Tz1: TimeZone, Tz2: TimeZone>(
        &self,
        last: DateTime<Tz1>,
        incoming: DateTime<Tz2>,
    ) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let last = last.with_timezone(&Utc);
        let incoming = incoming.with_timezone(&Utc);
        let diff = incoming - last;

        if diff == CADENCE || diff <= TOLERANCE {
            return None;
        }

        let gap_start = last + CADENCE;
        let gap_end = incoming - CADENCE;
        (gap_end >= gap_start).then_some((gap_start, gap_end))
    }

    /// Number of whole minutes skipped between `last` and `incoming`.
    pub fn missing_minutes<Tz1: TimeZone, Tz2: TimeZone>(
        &self,
        last: DateTime<Tz1>,
        incoming: DateTime<Tz2>,
    ) -> i64 {
        self.detect_gap(last, incoming)
            .map(|(start, end)| (end - start).num_minutes() + 1)
            .unwrap_or(0)
    }
}
