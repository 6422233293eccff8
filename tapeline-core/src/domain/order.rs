//! Participation orders: lifecycle states and fill accounting.
//!
//! An order is worked over many minute buckets. Each fill moves quantity from
//! `remaining_qty` to `completed_qty`; a cancel moves whatever is left into
//! `cancelled_qty`. For every order:
//!
//! `completed_qty + remaining_qty + cancelled_qty == original_qty`
//!
//! and `cancelled_qty` stays zero until the order is cancelled.

use super::ids::OrderId;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Shared, lockable order. The order manager and the execution manager of the
/// order's instrument both hold one.
pub type OrderHandle = Arc<Mutex<Order>>;

/// Buy or sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// +1 for buys, -1 for sells.
    pub fn sign(self) -> Decimal {
        match self {
            OrderSide::Buy => Decimal::ONE,
            OrderSide::Sell => Decimal::NEGATIVE_ONE,
        }
    }

    pub fn is_buy(self) -> bool {
        matches!(self, OrderSide::Buy)
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Order lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Accepted, nothing filled yet.
    Working,
    /// Some quantity filled, some remaining.
    Partial,
    /// Fully filled.
    Completed,
    /// Cancelled; any unfilled quantity moved to `cancelled_qty`.
    Cancelled,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderStatus::Working => "WORKING",
            OrderStatus::Partial => "PARTIAL",
            OrderStatus::Completed => "COMPLETED",
            OrderStatus::Cancelled => "CANCELLED",
        };
        write!(f, "{s}")
    }
}

/// Errors from order construction and fill accounting.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OrderError {
    #[error("order {order_id}: quantity must be positive (got {qty})")]
    InvalidQuantity { order_id: OrderId, qty: Decimal },

    #[error("order {order_id}: participation rate must be in (0, 1] (got {rate})")]
    InvalidParticipation { order_id: OrderId, rate: Decimal },

    #[error("order {order_id}: fill quantity must be positive (got {qty})")]
    NonPositiveFill { order_id: OrderId, qty: Decimal },

    #[error("order {order_id}: fill of {qty} exceeds remaining {remaining}")]
    Overfill {
        order_id: OrderId,
        qty: Decimal,
        remaining: Decimal,
    },

    #[error("order {order_id} is {status} and cannot be filled")]
    NotFillable {
        order_id: OrderId,
        status: OrderStatus,
    },
}

/// A participation order worked against minute volume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: OrderId,
    /// Client-assigned ID, echoed back on every report.
    pub cl_order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub original_qty: Decimal,
    pub remaining_qty: Decimal,
    pub completed_qty: Decimal,
    pub cancelled_qty: Decimal,
    /// Volume-weighted average of all fill prices so far.
    pub avg_fill_price: Decimal,
    /// Reference price supplied at submission.
    pub price: Decimal,
    /// Fraction of available bucket volume this order may take per bucket.
    pub participation_rate: Decimal,
    pub currency: String,
    pub status: OrderStatus,
    pub submit_time: DateTime<Utc>,
    /// When the order starts participating. Defaults to the submit time.
    pub start_time: Option<DateTime<Utc>>,
    pub last_fill_time: Option<DateTime<Utc>>,
}

impl Order {
    /// Create a working order, validating quantity and participation rate.
    pub fn new(
        order_id: impl Into<OrderId>,
        symbol: impl Into<String>,
        side: OrderSide,
        quantity: Decimal,
        participation_rate: Decimal,
        submit_time: DateTime<Utc>,
    ) -> Result<Self, OrderError> {
        let order_id = order_id.into();
        if quantity <= Decimal::ZERO {
            return Err(OrderError::InvalidQuantity {
                order_id,
                qty: quantity,
            });
        }
        if participation_rate <= Decimal::ZERO || participation_rate > Decimal::ONE {
            return Err(OrderError::InvalidParticipation {
                order_id,
                rate: participation_rate,
            });
        }

        Ok(Self {
            cl_order_id: order_id.0.clone(),
            order_id,
            symbol: symbol.into(),
            side,
            original_qty: quantity,
            remaining_qty: quantity,
            completed_qty: Decimal::ZERO,
            cancelled_qty: Decimal::ZERO,
            avg_fill_price: Decimal::ZERO,
            price: Decimal::ZERO,
            participation_rate,
            currency: "USD".to_string(),
            status: OrderStatus::Working,
            submit_time,
            start_time: None,
            last_fill_time: None,
        })
    }

    pub fn with_cl_order_id(mut self, cl_order_id: impl Into<String>) -> Self {
        self.cl_order_id = cl_order_id.into();
        self
    }

    pub fn with_price(mut self, price: Decimal) -> Self {
        self.price = price;
        self
    }

    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into();
        self
    }

    pub fn with_start_time(mut self, start_time: DateTime<Utc>) -> Self {
        self.start_time = Some(start_time);
        self
    }

    /// Wrap into a shared handle.
    pub fn into_handle(self) -> OrderHandle {
        Arc::new(Mutex::new(self))
    }

    /// Still has quantity to work and is not in a terminal state.
    pub fn is_active(&self) -> bool {
        !self.status.is_terminal() && self.remaining_qty > Decimal::ZERO
    }

    /// Apply a fill of `qty` at `price`.
    ///
    /// Rejects non-positive quantities, fills on terminal orders, and fills
    /// larger than the remaining quantity. The order is untouched on error.
    pub fn record_fill(
        &mut self,
        qty: Decimal,
        price: Decimal,
        at: DateTime<Utc>,
    ) -> Result<(), OrderError> {
        if self.status.is_terminal() {
            return Err(OrderError::NotFillable {
                order_id: self.order_id.clone(),
                status: self.status,
            });
        }
        if qty <= Decimal::ZERO {
            return Err(OrderError::NonPositiveFill {
                order_id: self.order_id.clone(),
                qty,
            });
        }
        if qty > self.remaining_qty {
            return Err(OrderError::Overfill {
                order_id: self.order_id.clone(),
                qty,
                remaining: self.remaining_qty,
            });
        }

        let filled_before = self.completed_qty;
        self.completed_qty += qty;
        self.remaining_qty -= qty;
        self.avg_fill_price =
            (self.avg_fill_price * filled_before + price * qty) / self.completed_qty;
        self.last_fill_time = Some(at);
        self.status = if self.remaining_qty.is_zero() {
            OrderStatus::Completed
        } else {
            OrderStatus::Partial
        };
        Ok(())
    }

    /// Cancel whatever is left. Returns false (and changes nothing) when the
    /// order is already completed or cancelled.
    pub fn cancel(&mut self) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.cancelled_qty += self.remaining_qty;
        self.remaining_qty = Decimal::ZERO;
        self.status = OrderStatus::Cancelled;
        true
    }

    /// Quantity accounting identity and bounds.
    pub fn check_invariants(&self) -> bool {
        self.remaining_qty >= Decimal::ZERO
            && self.remaining_qty <= self.original_qty
            && self.completed_qty + self.remaining_qty + self.cancelled_qty == self.original_qty
            && (self.status == OrderStatus::Cancelled || self.cancelled_qty.is_zero())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 14, 30, 0).unwrap()
    }

    fn buy(qty: Decimal) -> Order {
        Order::new("O-1", "AAPL", OrderSide::Buy, qty, dec!(0.1), t0()).unwrap()
    }

    #[test]
    fn new_order_is_working_with_full_remaining() {
        let order = buy(dec!(1000));
        assert_eq!(order.status, OrderStatus::Working);
        assert_eq!(order.remaining_qty, dec!(1000));
        assert_eq!(order.completed_qty, Decimal::ZERO);
        assert_eq!(order.cl_order_id, "O-1");
        assert!(order.is_active());
        assert!(order.check_invariants());
    }

    #[test]
    fn rejects_bad_quantity_and_participation() {
        assert!(matches!(
            Order::new("O-1", "AAPL", OrderSide::Buy, dec!(0), dec!(0.1), t0()),
            Err(OrderError::InvalidQuantity { .. })
        ));
        assert!(matches!(
            Order::new("O-1", "AAPL", OrderSide::Buy, dec!(10), dec!(1.5), t0()),
            Err(OrderError::InvalidParticipation { .. })
        ));
        assert!(matches!(
            Order::new("O-1", "AAPL", OrderSide::Buy, dec!(10), dec!(0), t0()),
            Err(OrderError::InvalidParticipation { .. })
        ));
    }

    #[test]
    fn partial_then_complete() {
        let mut order = buy(dec!(1000));
        order.record_fill(dec!(500), dec!(100), t0()).unwrap();
        assert_eq!(order.status, OrderStatus::Partial);
        assert_eq!(order.remaining_qty, dec!(500));

        order.record_fill(dec!(500), dec!(102), t0()).unwrap();
        assert_eq!(order.status, OrderStatus::Completed);
        assert_eq!(order.remaining_qty, Decimal::ZERO);
        // (500 * 100 + 500 * 102) / 1000
        assert_eq!(order.avg_fill_price, dec!(101));
        assert!(order.check_invariants());
    }

    #[test]
    fn overfill_is_rejected_and_order_unchanged() {
        let mut order = buy(dec!(100));
        let before = order.clone();
        let err = order.record_fill(dec!(101), dec!(10), t0()).unwrap_err();
        assert!(matches!(err, OrderError::Overfill { .. }));
        assert_eq!(order, before);
    }

    #[test]
    fn cancel_moves_leftover_to_cancelled_qty() {
        let mut order = buy(dec!(1000));
        order.record_fill(dec!(300), dec!(10), t0()).unwrap();
        assert!(order.cancel());
        assert_eq!(order.status, OrderStatus::Cancelled);
        assert_eq!(order.remaining_qty, Decimal::ZERO);
        assert_eq!(order.cancelled_qty, dec!(700));
        assert!(order.check_invariants());

        // Second cancel is a no-op
        assert!(!order.cancel());
        assert_eq!(order.cancelled_qty, dec!(700));
    }

    #[test]
    fn cancelled_order_cannot_fill() {
        let mut order = buy(dec!(10));
        order.cancel();
        assert!(matches!(
            order.record_fill(dec!(1), dec!(10), t0()),
            Err(OrderError::NotFillable { .. })
        ));
    }
}
