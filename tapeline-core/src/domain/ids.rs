use serde::{Deserialize, Serialize};
use std::fmt;

/// Exchange-assigned order ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrderId(pub String);

impl OrderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl From<u64> for OrderId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl From<&str> for OrderId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Trade ID, unique per execution manager
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TradeId(pub String);

impl TradeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Sequential trade ID scoped to a symbol: `T-{SYMBOL}-{seq:08}`.
    pub fn sequential(symbol: &str, seq: u64) -> Self {
        Self(format!("T-{symbol}-{seq:08}"))
    }
}

impl fmt::Display for TradeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequential_trade_ids_sort_in_issue_order() {
        let a = TradeId::sequential("AAPL", 9);
        let b = TradeId::sequential("AAPL", 10);
        assert_eq!(a.0, "T-AAPL-00000009");
        assert!(a < b);
    }

    #[test]
    fn order_id_from_number() {
        assert_eq!(OrderId::from(42).to_string(), "42");
    }
}
