//! Collaborator traits the execution manager calls into.
//!
//! Every per-book dependency is injected through [`Collaborators`]; the engine
//! never reaches for ambient state. Implementations are called while the
//! instrument lock is held and must not call back into the same
//! `ExecutionManager`.

use crate::domain::{Order, OrderId, OrderSide, Position, Trade, TradeDetail, TradeId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use thiserror::Error;

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AccountError {
    #[error("insufficient {currency} balance: need {required}, available {available}")]
    InsufficientBalance {
        currency: String,
        required: Decimal,
        available: Decimal,
    },

    #[error("no {0} ledger on this account")]
    UnknownCurrency(String),

    #[error("account rejected fill: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PortfolioError {
    #[error("position update rejected for {symbol}: {reason}")]
    Rejected { symbol: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ImpactError {
    #[error("impact model failed for {symbol}: {reason}")]
    Model { symbol: String, reason: String },
}

// ── Requests ────────────────────────────────────────────────────────

/// A sub-fill about to be applied, as seen by the account ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct FillIntent {
    pub order_id: OrderId,
    pub trade_id: TradeId,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    /// Impact-adjusted price.
    pub price: Decimal,
    pub commission: Decimal,
    pub currency: String,
    pub detail: TradeDetail,
    pub timestamp: DateTime<Utc>,
}

impl FillIntent {
    pub fn notional(&self) -> Decimal {
        self.price * self.quantity
    }

    /// Signed cash change this fill causes: buys pay notional plus
    /// commission, sells receive notional minus commission.
    pub fn cash_delta(&self) -> Decimal {
        match self.side {
            OrderSide::Buy => -(self.notional() + self.commission),
            OrderSide::Sell => self.notional() - self.commission,
        }
    }
}

/// Inputs to one price-impact evaluation.
///
/// `trade_volume == 0` is a decay tick: no trade happened in the bucket but
/// the model must still age its state.
#[derive(Debug, Clone, PartialEq)]
pub struct ImpactRequest<'a> {
    pub symbol: &'a str,
    pub currency: &'a str,
    pub base_price: Decimal,
    pub trade_volume: Decimal,
    pub total_volume: u64,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub trade_id: Option<&'a TradeId>,
    pub is_buy: bool,
}

impl ImpactRequest<'_> {
    pub fn is_decay_tick(&self) -> bool {
        self.trade_volume.is_zero()
    }
}

// ── Traits ──────────────────────────────────────────────────────────

/// Source of market volume for participation sizing.
pub trait VolumeTracker: Send + Sync {
    /// Total traded volume attributed to the current minute.
    fn get_current_minute_volume(&self) -> u64;

    /// Volume an order may participate in over `[start, end)`.
    fn get_available_volume(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> u64;

    /// Told about every executed sub-fill so trackers can deplete liquidity.
    fn record_consumed_volume(&self, _start: DateTime<Utc>, _end: DateTime<Utc>, _qty: Decimal) {}
}

/// Price-impact model. The formula itself lives outside this crate.
pub trait MarketImpactModel: Send + Sync {
    fn calculate_price_impact(&self, request: &ImpactRequest<'_>) -> Result<Decimal, ImpactError>;
}

/// Cash ledger that gates solvency.
pub trait Account: Send + Sync {
    /// Read-only solvency check. Must not mutate the ledger.
    fn check_balance_before_fill(&self, fill: &FillIntent) -> Result<(), AccountError>;

    /// Apply the fill's cash movement.
    fn adjust_balance_after_fill(&self, fill: &FillIntent) -> Result<(), AccountError>;

    /// Undo a previous `adjust_balance_after_fill` when a later step of the
    /// same sub-fill fails.
    fn reverse_fill_adjustment(&self, fill: &FillIntent) -> Result<(), AccountError>;
}

/// Position keeper for one book.
pub trait PortfolioManager: Send + Sync {
    fn get_position(&self, symbol: &str) -> Option<Position>;

    /// Apply a signed quantity change at `price` using weighted-average cost.
    fn update_position(
        &self,
        symbol: &str,
        qty_delta: Decimal,
        price: Decimal,
        currency: &str,
    ) -> Result<Position, PortfolioError>;
}

/// Receives the latest state of every order the engine touches.
pub trait OrderManager: Send + Sync {
    fn record_order(&self, order: &Order);
}

/// Receives every trade the engine produces, in order.
pub trait TradeManager: Send + Sync {
    fn record_trade(&self, trade: &Trade);
}

/// Everything an `ExecutionManager` needs from the book it trades for.
#[derive(Clone)]
pub struct Collaborators {
    pub volume: Arc<dyn VolumeTracker>,
    pub impact: Arc<dyn MarketImpactModel>,
    pub account: Arc<dyn Account>,
    pub portfolio: Arc<dyn PortfolioManager>,
    pub orders: Arc<dyn OrderManager>,
    pub trades: Arc<dyn TradeManager>,
}
