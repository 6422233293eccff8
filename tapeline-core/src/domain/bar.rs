//! Minute bars: the market data unit the engine runs on.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One minute's OHLCV snapshot for a single symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityBar {
    pub symbol: String,
    /// Start of the minute, UTC.
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: u64,
    pub currency: String,
}

impl EquityBar {
    /// Basic OHLC sanity check: high >= low, high >= open/close, low <= open/close, prices > 0.
    pub fn is_sane(&self) -> bool {
        self.high >= self.low
            && self.high >= self.open
            && self.high >= self.close
            && self.low <= self.open
            && self.low <= self.close
            && self.open > Decimal::ZERO
            && self.close > Decimal::ZERO
    }
}

/// FX rate for one minute: 1 `base` = `rate` `quote`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FxRate {
    pub base: String,
    pub quote: String,
    pub rate: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Everything known about one minute: equity bars plus FX rates.
///
/// A bin with no equity bars is "absent": the data for that minute has not
/// arrived yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketBin {
    pub timestamp: DateTime<Utc>,
    pub equity: Vec<EquityBar>,
    pub fx: Vec<FxRate>,
}

impl MarketBin {
    pub fn empty(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            equity: Vec::new(),
            fx: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.equity.is_empty()
    }

    pub fn bar(&self, symbol: &str) -> Option<&EquityBar> {
        self.equity.iter().find(|b| b.symbol == symbol)
    }

    /// Rate converting `base` into `quote`, inverting a stored `quote/base` pair if needed.
    pub fn fx_rate(&self, base: &str, quote: &str) -> Option<Decimal> {
        if base == quote {
            return Some(Decimal::ONE);
        }
        if let Some(fx) = self.fx.iter().find(|r| r.base == base && r.quote == quote) {
            return Some(fx.rate);
        }
        self.fx
            .iter()
            .find(|r| r.base == quote && r.quote == base && !r.rate.is_zero())
            .map(|r| Decimal::ONE / r.rate)
    }
}
