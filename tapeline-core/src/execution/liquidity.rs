//! Liquidity constraints: participation sizing and remainder policies.
//!
//! An order may take at most `participation_rate` of the volume available to it
//! in a bucket. Whatever it could not take is either carried to the next bar or
//! cancelled when the bar is done.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// What happens to an order's unfilled remainder once a bar has been processed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemainderPolicy {
    /// Keep the order scheduled; it participates again on the next bar.
    #[default]
    Carry,
    /// Cancel the unfilled remainder at the end of the bar.
    Cancel,
}

/// Maximum quantity an order may take from `volume_allocation` shares.
///
/// Truncated toward zero, never rounded: 0.1 of 1999 shares is 199.
pub fn participation_cap(volume_allocation: u64, participation_rate: Decimal) -> Decimal {
    (Decimal::from(volume_allocation) * participation_rate)
        .trunc()
        .max(Decimal::ZERO)
}

/// Fill quantity for one order in one bucket.
///
/// `min(floor(volume_allocation * participation_rate), remaining)`. Zero means
/// the order sits this bucket out.
pub fn participation_fill_qty(
    volume_allocation: u64,
    participation_rate: Decimal,
    remaining: Decimal,
) -> Decimal {
    participation_cap(volume_allocation, participation_rate)
        .min(remaining)
        .max(Decimal::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn cap_truncates() {
        assert_eq!(participation_cap(5000, dec!(0.1)), dec!(500));
        assert_eq!(participation_cap(1999, dec!(0.1)), dec!(199));
        assert_eq!(participation_cap(9, dec!(0.1)), Decimal::ZERO);
    }

    #[test]
    fn fill_is_bounded_by_remaining() {
        assert_eq!(participation_fill_qty(5000, dec!(0.1), dec!(1000)), dec!(500));
        assert_eq!(participation_fill_qty(5000, dec!(0.1), dec!(120)), dec!(120));
        assert_eq!(participation_fill_qty(0, dec!(0.5), dec!(120)), Decimal::ZERO);
    }

    #[test]
    fn remainder_policy_defaults_to_carry() {
        assert_eq!(RemainderPolicy::default(), RemainderPolicy::Carry);
        let parsed: RemainderPolicy = serde_json::from_str("\"cancel\"").unwrap();
        assert_eq!(parsed, RemainderPolicy::Cancel);
    }
}
