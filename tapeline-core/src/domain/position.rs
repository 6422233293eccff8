//! Position: signed holding with weighted-average cost.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Signed position in one symbol. Positive is long, negative is short.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub quantity: Decimal,
    pub avg_price: Decimal,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub currency: String,
}

impl Position {
    pub fn flat(symbol: impl Into<String>, currency: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            quantity: Decimal::ZERO,
            avg_price: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            currency: currency.into(),
        }
    }

    pub fn is_long(&self) -> bool {
        self.quantity > Decimal::ZERO
    }

    pub fn is_short(&self) -> bool {
        self.quantity < Decimal::ZERO
    }

    pub fn is_flat(&self) -> bool {
        self.quantity.is_zero()
    }

    pub fn market_value(&self, current_price: Decimal) -> Decimal {
        self.quantity * current_price
    }

    /// Re-mark unrealized P&L at `current_price`.
    pub fn mark(&mut self, current_price: Decimal) {
        self.unrealized_pnl = self.quantity * (current_price - self.avg_price);
    }

    /// Apply a signed quantity change at `price` and return the P&L realized by it.
    ///
    /// - Flat or same direction: re-average the cost.
    /// - Opposite direction: realize P&L on the closed quantity at the average
    ///   cost. If the change crosses zero, the remainder opens at `price`.
    pub fn apply_fill(&mut self, qty_delta: Decimal, price: Decimal) -> Decimal {
        if qty_delta.is_zero() {
            return Decimal::ZERO;
        }

        let extending = self.quantity.is_zero()
            || self.quantity.is_sign_positive() == qty_delta.is_sign_positive();

        if extending {
            let new_qty = self.quantity + qty_delta;
            self.avg_price = (self.avg_price * self.quantity.abs() + price * qty_delta.abs())
                / new_qty.abs();
            self.quantity = new_qty;
            return Decimal::ZERO;
        }

        let closed = qty_delta.abs().min(self.quantity.abs());
        let direction = if self.quantity.is_sign_positive() {
            Decimal::ONE
        } else {
            Decimal::NEGATIVE_ONE
        };
        let realized = (price - self.avg_price) * closed * direction;
        self.realized_pnl += realized;

        let new_qty = self.quantity + qty_delta;
        if new_qty.is_zero() {
            self.avg_price = Decimal::ZERO;
            self.unrealized_pnl = Decimal::ZERO;
        } else if new_qty.is_sign_positive() != self.quantity.is_sign_positive() {
            self.avg_price = price;
        }
        self.quantity = new_qty;
        realized
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn buy_averages_into_existing_long() {
        let mut pos = Position::flat("SPY", "USD");
        pos.apply_fill(dec!(50), dec!(100));
        pos.apply_fill(dec!(50), dec!(110));
        assert_eq!(pos.quantity, dec!(100));
        // (100*50 + 110*50) / 100
        assert_eq!(pos.avg_price, dec!(105));
    }

    #[test]
    fn sell_reduces_long_and_realizes() {
        let mut pos = Position::flat("SPY", "USD");
        pos.apply_fill(dec!(100), dec!(100));
        let realized = pos.apply_fill(dec!(-30), dec!(110));
        assert_eq!(realized, dec!(300));
        assert_eq!(pos.quantity, dec!(70));
        assert_eq!(pos.avg_price, dec!(100));
        assert!(pos.is_long());
    }

    #[test]
    fn buy_covers_short() {
        let mut pos = Position::flat("SPY", "USD");
        pos.apply_fill(dec!(-50), dec!(100));
        assert!(pos.is_short());
        let realized = pos.apply_fill(dec!(50), dec!(90));
        // Short from 100 covered at 90: +10 * 50
        assert_eq!(realized, dec!(500));
        assert!(pos.is_flat());
        assert_eq!(pos.avg_price, Decimal::ZERO);
    }

    #[test]
    fn crossing_zero_opens_remainder_at_fill_price() {
        let mut pos = Position::flat("SPY", "USD");
        pos.apply_fill(dec!(-300), dec!(100));
        let realized = pos.apply_fill(dec!(500), dec!(95));
        assert_eq!(realized, dec!(1500));
        assert_eq!(pos.quantity, dec!(200));
        assert_eq!(pos.avg_price, dec!(95));
    }

    #[test]
    fn mark_computes_unrealized() {
        let mut pos = Position::flat("SPY", "USD");
        pos.apply_fill(dec!(-10), dec!(50));
        pos.mark(dec!(45));
        assert_eq!(pos.unrealized_pnl, dec!(50));
        assert_eq!(pos.market_value(dec!(45)), dec!(-450));
    }
}
