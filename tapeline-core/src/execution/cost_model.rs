//! Cost model: per-share commission.
//!
//! Commission is rounded to cents with banker's rounding (half to even), the
//! rounding `Decimal::round_dp` applies.

use rust_decimal::Decimal;

/// Default commission: half a cent per share.
pub const DEFAULT_COMMISSION_PER_SHARE: Decimal = Decimal::from_parts(5, 0, 0, false, 3);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostModel {
    pub commission_per_share: Decimal,
}

impl CostModel {
    pub fn new(commission_per_share: Decimal) -> Self {
        Self {
            commission_per_share,
        }
    }

    pub fn frictionless() -> Self {
        Self::new(Decimal::ZERO)
    }

    /// `round(quantity * commission_per_share, 2)`.
    pub fn compute_commission(&self, quantity: Decimal) -> Decimal {
        (quantity.abs() * self.commission_per_share).round_dp(2)
    }
}

impl Default for CostModel {
    fn default() -> Self {
        Self::new(DEFAULT_COMMISSION_PER_SHARE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn default_rate_is_half_a_cent() {
        assert_eq!(DEFAULT_COMMISSION_PER_SHARE, dec!(0.005));
        assert_eq!(CostModel::default().compute_commission(dec!(500)), dec!(2.50));
    }

    #[test]
    fn commission_rounds_half_to_even() {
        let cost = CostModel::default();
        // 0.005 -> 0.00, 0.015 -> 0.02, 0.025 -> 0.02
        assert_eq!(cost.compute_commission(dec!(1)), dec!(0.00));
        assert_eq!(cost.compute_commission(dec!(3)), dec!(0.02));
        assert_eq!(cost.compute_commission(dec!(5)), dec!(0.02));
    }

    #[test]
    fn frictionless_charges_nothing() {
        assert_eq!(CostModel::frictionless().compute_commission(dec!(10000)), Decimal::ZERO);
    }
}
