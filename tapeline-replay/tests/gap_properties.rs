//! Property tests for gap detection and bin keys.
//!
//! Uses proptest to verify:
//! 1. Jitter up to 90 s is never a gap
//! 2. Reported gaps lie strictly between the two timestamps
//! 3. Minute-aligned gaps report exactly the skipped minutes
//! 4. Bin keys sort in time order and round-trip

use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;
use tapeline_replay::{bin_key, floor_to_minute, minute_range, minutes_between, parse_bin_key, GapDetector};

// ── Strategies (proptest) ────────────────────────────────────────────

/// Any second in 2020–2030.
fn arb_time() -> impl Strategy<Value = DateTime<Utc>> {
    (1_577_836_800i64..1_893_456_000).prop_map(|s| Utc.timestamp_opt(s, 0).unwrap())
}

fn arb_minute() -> impl Strategy<Value = DateTime<Utc>> {
    arb_time().prop_map(|t| floor_to_minute(t))
}

// ── 1. Jitter ────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn jitter_is_not_a_gap(last in arb_time(), secs in 0i64..=90) {
        prop_assert_eq!(GapDetector.detect_gap(last, last + Duration::seconds(secs)), None);
    }

    #[test]
    fn time_going_backwards_is_not_a_gap(last in arb_time(), secs in 1i64..100_000) {
        prop_assert_eq!(GapDetector.detect_gap(last, last - Duration::seconds(secs)), None);
    }
}

// ── 2. Gap bounds ────────────────────────────────────────────────────

proptest! {
    #[test]
    fn gap_lies_between_endpoints(last in arb_time(), secs in 91i64..100_000) {
        let incoming = last + Duration::seconds(secs);
        if let Some((start, end)) = GapDetector.detect_gap(last, incoming) {
            prop_assert!(last < start);
            prop_assert!(start <= end);
            prop_assert!(end < incoming);
            prop_assert_eq!(start, last + Duration::seconds(60));
            prop_assert_eq!(end, incoming - Duration::seconds(60));
        }
        // Past two minutes apart there is always room for a gap.
        if secs >= 120 {
            prop_assert!(GapDetector.detect_gap(last, incoming).is_some());
        }
    }
}

// ── 3. Aligned minutes ───────────────────────────────────────────────

proptest! {
    #[test]
    fn aligned_gap_counts_skipped_minutes(last in arb_minute(), k in 2i64..2_000) {
        let incoming = last + Duration::minutes(k);
        prop_assert_eq!(GapDetector.missing_minutes(last, incoming), k - 1);

        let (start, end) = GapDetector.detect_gap(last, incoming).unwrap();
        prop_assert_eq!(minute_range(start, end).len() as i64, k - 1);
    }
}

// ── 4. Bin keys ──────────────────────────────────────────────────────

proptest! {
    #[test]
    fn bin_keys_order_like_time(a in arb_time(), b in arb_time()) {
        let (ka, kb) = (bin_key(a), bin_key(b));
        prop_assert_eq!(ka.cmp(&kb), floor_to_minute(a).cmp(&floor_to_minute(b)));
    }

    #[test]
    fn bin_key_round_trips_to_the_minute(t in arb_time()) {
        prop_assert_eq!(parse_bin_key(&bin_key(t)).unwrap(), floor_to_minute(t));
    }

    #[test]
    fn minute_range_is_inclusive(start in arb_minute(), k in 0i64..500) {
        let end = start + Duration::minutes(k);
        let range = minute_range(start, end);
        prop_assert_eq!(range.len() as i64, minutes_between(start, end) + 1);
        prop_assert_eq!(range.first().copied(), Some(start));
        prop_assert_eq!(range.last().copied(), Some(end));
    }
}
