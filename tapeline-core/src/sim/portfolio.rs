//! In-memory positions keyed by symbol.

use crate::domain::Position;
use crate::ports::{PortfolioError, PortfolioManager};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct InMemoryPortfolio {
    positions: Mutex<HashMap<String, Position>>,
}

impl InMemoryPortfolio {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start `symbol` at `quantity` shares with cost basis `avg_price`.
    pub fn seed(&self, symbol: &str, quantity: Decimal, avg_price: Decimal, currency: &str) {
        let mut position = Position::flat(symbol, currency);
        position.quantity = quantity;
        position.avg_price = avg_price;
        self.positions.lock().insert(symbol.to_string(), position);
    }

    pub fn positions(&self) -> Vec<Position> {
        let mut all: Vec<Position> = self.positions.lock().values().cloned().collect();
        all.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        all
    }

    pub fn total_realized_pnl(&self) -> Decimal {
        self.positions.lock().values().map(|p| p.realized_pnl).sum()
    }
}

impl PortfolioManager for InMemoryPortfolio {
    fn get_position(&self, symbol: &str) -> Option<Position> {
        self.positions.lock().get(symbol).cloned()
    }

    fn update_position(
        &self,
        symbol: &str,
        qty_delta: Decimal,
        price: Decimal,
        currency: &str,
    ) -> Result<Position, PortfolioError> {
        if price <= Decimal::ZERO {
            return Err(PortfolioError::Rejected {
                symbol: symbol.to_string(),
                reason: format!("non-positive price {price}"),
            });
        }
        let mut positions = self.positions.lock();
        let position = positions
            .entry(symbol.to_string())
            .or_insert_with(|| Position::flat(symbol, currency));
        position.apply_fill(qty_delta, price);
        position.mark(price);
        Ok(position.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn update_creates_and_averages() {
        let pf = InMemoryPortfolio::new();
        assert!(pf.get_position("SPY").is_none());
        pf.update_position("SPY", dec!(100), dec!(10), "USD").unwrap();
        let pos = pf.update_position("SPY", dec!(100), dec!(12), "USD").unwrap();
        assert_eq!(pos.quantity, dec!(200));
        assert_eq!(pos.avg_price, dec!(11));
        assert_eq!(pos.unrealized_pnl, dec!(200));
    }

    #[test]
    fn rejects_non_positive_price() {
        let pf = InMemoryPortfolio::new();
        assert!(pf.update_position("SPY", dec!(1), dec!(0), "USD").is_err());
        assert!(pf.positions().is_empty());
    }

    #[test]
    fn seeded_short_realizes_on_cover() {
        let pf = InMemoryPortfolio::new();
        pf.seed("SPY", dec!(-300), dec!(100), "USD");
        pf.update_position("SPY", dec!(300), dec!(95), "USD").unwrap();
        assert_eq!(pf.total_realized_pnl(), dec!(1500));
    }
}
