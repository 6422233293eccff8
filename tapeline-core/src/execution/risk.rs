//! Risk split: decompose a fill into closing and opening legs.

use crate::domain::{OrderSide, TradeDetail};
use rust_decimal::Decimal;

/// One sub-fill of a split fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RiskLeg {
    pub detail: TradeDetail,
    pub quantity: Decimal,
}

impl RiskLeg {
    fn off(quantity: Decimal) -> Self {
        Self {
            detail: TradeDetail::RiskOff,
            quantity,
        }
    }

    fn on(quantity: Decimal) -> Self {
        Self {
            detail: TradeDetail::RiskOn,
            quantity,
        }
    }
}

/// Split `fill_qty` against the signed pre-fill position.
///
/// - flat, or same direction as the position: one risk-on leg
/// - against the position without crossing zero: one risk-off leg
/// - against the position and crossing zero: risk-off for `|position|`, then
///   risk-on for the rest
///
/// Risk-off legs always come first.
pub fn split_fill(position_qty: Decimal, side: OrderSide, fill_qty: Decimal) -> Vec<RiskLeg> {
    if fill_qty <= Decimal::ZERO {
        return Vec::new();
    }

    let reducing = !position_qty.is_zero() && position_qty.is_sign_positive() != side.is_buy();
    if !reducing {
        return vec![RiskLeg::on(fill_qty)];
    }

    let exposure = position_qty.abs();
    if fill_qty > exposure {
        vec![RiskLeg::off(exposure), RiskLeg::on(fill_qty - exposure)]
    } else {
        vec![RiskLeg::off(fill_qty)]
    }
}
