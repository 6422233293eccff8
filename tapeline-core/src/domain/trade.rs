//! Trade: one immutable record of what happened to an order in one bucket.

use super::ids::{OrderId, TradeId};
use super::order::OrderSide;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What a trade record represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeDetail {
    /// Closes existing exposure.
    RiskOff,
    /// Opens or extends exposure.
    RiskOn,
    /// Zero-quantity audit record for a cancellation.
    Cancelled,
}

impl fmt::Display for TradeDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TradeDetail::RiskOff => "RISK_OFF",
            TradeDetail::RiskOn => "RISK_ON",
            TradeDetail::Cancelled => "CANCELLED",
        };
        write!(f, "{s}")
    }
}

/// Trade record for one sub-fill or cancellation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub trade_id: TradeId,
    pub order_id: OrderId,
    pub symbol: String,
    pub side: OrderSide,
    /// Impact-adjusted execution price.
    pub price: Decimal,
    pub quantity: Decimal,
    pub commission: Decimal,
    pub currency: String,
    pub detail: TradeDetail,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl Trade {
    pub fn notional(&self) -> Decimal {
        self.price * self.quantity
    }

    pub fn is_cancellation(&self) -> bool {
        self.detail == TradeDetail::Cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    #[test]
    fn notional_and_detail_tags() {
        let t = Utc.with_ymd_and_hms(2024, 3, 1, 14, 30, 0).unwrap();
        let trade = Trade {
            trade_id: TradeId::sequential("AAPL", 1),
            order_id: OrderId::from(7),
            symbol: "AAPL".into(),
            side: OrderSide::Sell,
            price: dec!(101.25),
            quantity: dec!(200),
            commission: dec!(1.00),
            currency: "USD".into(),
            detail: TradeDetail::RiskOff,
            start_time: t,
            end_time: t + chrono::Duration::minutes(1),
        };
        assert_eq!(trade.notional(), dec!(20250.00));
        assert!(!trade.is_cancellation());
        assert_eq!(trade.detail.to_string(), "RISK_OFF");
    }
}
