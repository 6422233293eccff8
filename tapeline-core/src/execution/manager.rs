//! Per-instrument execution manager.
//!
//! Holds scheduled fills and cancellations for one symbol and matches them
//! against each incoming bar:
//!
//! 1. Take every pending action keyed at or before the bar's end. Cancels
//!    already at or before the bar's start are applied first.
//! 2. Cut `[prev_time, current_time]` into buckets at every action time.
//! 3. Per bucket, size each active order by participation, split the fill into
//!    risk-off / risk-on legs against the current position, and apply each leg
//!    through the collaborators. A bucket with no fill is an impact decay tick.
//! 4. Apply cancels due at the bucket's end.
//!
//! A sub-fill is all or nothing. Its account adjustment is reversed when the
//! position update fails, and the order copy is only committed once both
//! succeeded.

use super::config::ExecutionConfig;
use super::cost_model::CostModel;
use super::liquidity::{participation_fill_qty, RemainderPolicy};
use super::pending::{PendingAction, PendingExecution, PendingQueue};
use super::risk::{split_fill, RiskLeg};
use crate::domain::{Order, OrderError, OrderHandle, OrderId, Trade, TradeDetail, TradeId};
use crate::ports::{
    AccountError, Collaborators, FillIntent, ImpactError, ImpactRequest, PortfolioError,
};
use chrono::{DateTime, Utc};
use parking_lot::ReentrantMutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("bar window is inverted: {current} is before {prev}")]
    InvertedWindow {
        prev: DateTime<Utc>,
        current: DateTime<Utc>,
    },

    #[error("order {order_id} is for {found}, this manager executes {expected}")]
    SymbolMismatch {
        order_id: OrderId,
        expected: String,
        found: String,
    },

    #[error("balance check failed for order {order_id}: {source}")]
    InsufficientBalance {
        order_id: OrderId,
        #[source]
        source: AccountError,
    },

    #[error("balance adjustment failed for order {order_id}: {source}")]
    Account {
        order_id: OrderId,
        #[source]
        source: AccountError,
    },

    #[error("position update failed for order {order_id}: {source}")]
    Portfolio {
        order_id: OrderId,
        #[source]
        source: PortfolioError,
    },

    #[error(transparent)]
    Impact(#[from] ImpactError),

    #[error(transparent)]
    Order(#[from] OrderError),

    #[error("execution manager for {0} re-entered from a collaborator")]
    Reentrant(String),
}

// ── Reports ─────────────────────────────────────────────────────────

/// Lifetime counters for one manager.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStatistics {
    pub symbol: String,
    /// Sub-fills applied. A split fill counts twice.
    pub total_executions: u64,
    pub total_cancellations: u64,
    pub total_trade_volume: Decimal,
    pub buckets_processed: u64,
    pub decay_ticks: u64,
    pub pending: usize,
}

/// What one `process_executions` call did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BarReport {
    pub trades: Vec<Trade>,
    pub buckets: usize,
    pub decay_ticks: usize,
    pub cancellations: usize,
    pub carried: usize,
}

impl BarReport {
    pub fn filled_qty(&self) -> Decimal {
        self.trades
            .iter()
            .filter(|t| !t.is_cancellation())
            .map(|t| t.quantity)
            .sum()
    }
}

// ── Manager ─────────────────────────────────────────────────────────

#[derive(Default)]
struct ManagerState {
    pending: PendingQueue,
    stats: ExecutionStatistics,
    trade_seq: u64,
}

/// Bar-level inputs shared by every bucket of one call.
struct BarContext<'a> {
    currency: &'a str,
    price: Decimal,
}

#[derive(Clone, Copy)]
struct Bucket {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    volume: u64,
}

/// Owns pending work for one instrument. All public operations serialize on a
/// single reentrant lock; different instruments run in parallel.
pub struct ExecutionManager {
    symbol: String,
    cost: CostModel,
    remainder_policy: RemainderPolicy,
    collab: Collaborators,
    state: ReentrantMutex<RefCell<ManagerState>>,
}

impl ExecutionManager {
    pub fn new(symbol: impl Into<String>, config: ExecutionConfig, collab: Collaborators) -> Self {
        let symbol = symbol.into();
        let state = ManagerState {
            stats: ExecutionStatistics {
                symbol: symbol.clone(),
                ..ExecutionStatistics::default()
            },
            ..ManagerState::default()
        };
        Self {
            cost: config.cost_model(),
            remainder_policy: config.remainder_policy,
            symbol,
            collab,
            state: ReentrantMutex::new(RefCell::new(state)),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Queue a fill for `order` at `timestamp`.
    pub fn schedule_execution<Tz: chrono::TimeZone>(
        &self,
        order: &OrderHandle,
        timestamp: DateTime<Tz>,
    ) -> Result<(), ExecutionError> {
        self.schedule(PendingExecution::fill(
            order.clone(),
            timestamp.with_timezone(&Utc),
        ))
    }

    /// Queue a cancellation for `order` at `timestamp`.
    pub fn schedule_cancellation<Tz: chrono::TimeZone>(
        &self,
        order: &OrderHandle,
        timestamp: DateTime<Tz>,
    ) -> Result<(), ExecutionError> {
        self.schedule(PendingExecution::cancel(
            order.clone(),
            timestamp.with_timezone(&Utc),
        ))
    }

    fn schedule(&self, entry: PendingExecution) -> Result<(), ExecutionError> {
        {
            let order = entry.order.lock();
            if order.symbol != self.symbol {
                return Err(ExecutionError::SymbolMismatch {
                    order_id: order.order_id.clone(),
                    expected: self.symbol.clone(),
                    found: order.symbol.clone(),
                });
            }
            debug!(
                symbol = %self.symbol,
                order_id = %order.order_id,
                action = ?entry.action,
                at = %entry.scheduled_at,
                "scheduled"
            );
        }
        let guard = self.state.lock();
        let mut state = guard
            .try_borrow_mut()
            .map_err(|_| ExecutionError::Reentrant(self.symbol.clone()))?;
        state.pending.push(entry);
        Ok(())
    }

    /// Match pending work against the bar `[prev_time, current_time]` priced at
    /// `price` in `currency`.
    ///
    /// On error nothing is dropped from the pending queue. Sub-fills committed
    /// before the failing one stay committed.
    pub fn process_executions<Tz1: chrono::TimeZone, Tz2: chrono::TimeZone>(
        &self,
        prev_time: DateTime<Tz1>,
        current_time: DateTime<Tz2>,
        currency: &str,
        price: Decimal,
    ) -> Result<BarReport, ExecutionError> {
        let prev = prev_time.with_timezone(&Utc);
        let current = current_time.with_timezone(&Utc);
        if current < prev {
            return Err(ExecutionError::InvertedWindow { prev, current });
        }

        let guard = self.state.lock();
        let mut state = guard
            .try_borrow_mut()
            .map_err(|_| ExecutionError::Reentrant(self.symbol.clone()))?;

        let due = state.pending.take_due(current);
        let bar = BarContext { currency, price };
        let mut report = BarReport::default();

        let outcome = match self.run_window(&mut state, &due, prev, current, &bar, &mut report) {
            Ok(()) => self.settle_remainders(&mut state, &due, current, &bar, &mut report),
            Err(err) => Err(err),
        };

        match outcome {
            Ok(()) => {
                state.stats.pending = state.pending.len();
                debug!(
                    symbol = %self.symbol,
                    trades = report.trades.len(),
                    buckets = report.buckets,
                    decay_ticks = report.decay_ticks,
                    "bar processed"
                );
                Ok(report)
            }
            Err(err) => {
                state.pending.restore(due);
                state.stats.pending = state.pending.len();
                error!(symbol = %self.symbol, error = %err, "bar processing aborted");
                Err(err)
            }
        }
    }

    /// A bucket in which no order traded is one decay tick, however many
    /// orders sized to zero in it.
    fn run_window(
        &self,
        state: &mut ManagerState,
        due: &[PendingExecution],
        prev: DateTime<Utc>,
        current: DateTime<Utc>,
        bar: &BarContext<'_>,
        report: &mut BarReport,
    ) -> Result<(), ExecutionError> {
        let mut fills: Vec<(OrderHandle, DateTime<Utc>)> = Vec::new();
        let mut cancels: Vec<(OrderHandle, DateTime<Utc>)> = Vec::new();
        for entry in due {
            let at = entry.effective_time();
            match entry.action {
                PendingAction::Fill => {
                    if !fills.iter().any(|(h, _)| entry.same_order(h)) {
                        fills.push((entry.order.clone(), at));
                    }
                }
                PendingAction::Cancel => cancels.push((entry.order.clone(), at)),
            }
        }

        for (order, at) in cancels.iter().filter(|(_, at)| *at <= prev) {
            self.apply_cancel(state, order, *at, *at, bar, report);
        }

        let mut boundaries: BTreeSet<DateTime<Utc>> = BTreeSet::from([prev, current]);
        boundaries.extend(
            fills
                .iter()
                .chain(cancels.iter())
                .map(|(_, at)| (*at).clamp(prev, current)),
        );
        let boundaries: Vec<DateTime<Utc>> = boundaries.into_iter().collect();

        for window in boundaries.windows(2) {
            let bucket = Bucket {
                start: window[0],
                end: window[1],
                volume: self.collab.volume.get_current_minute_volume(),
            };
            debug!(
                symbol = %self.symbol,
                start = %bucket.start,
                end = %bucket.end,
                volume = bucket.volume,
                "bucket"
            );

            let mut traded = false;
            for (order, at) in &fills {
                if *at < bucket.end && order.lock().is_active() {
                    traded |= self.fill_order(state, order, bucket, bar, report)?;
                }
            }
            if !traded {
                self.decay_tick(state, bucket, bar, report)?;
            }

            for (order, _) in cancels.iter().filter(|(_, at)| *at == bucket.end) {
                self.apply_cancel(state, order, bucket.start, bucket.end, bar, report);
            }

            state.stats.buckets_processed += 1;
            report.buckets += 1;
        }
        Ok(())
    }

    /// Participation fill for one order in one bucket. Returns whether any
    /// quantity traded.
    fn fill_order(
        &self,
        state: &mut ManagerState,
        handle: &OrderHandle,
        bucket: Bucket,
        bar: &BarContext<'_>,
        report: &mut BarReport,
    ) -> Result<bool, ExecutionError> {
        let mut order = handle.lock();
        let allocation = self
            .collab
            .volume
            .get_available_volume(bucket.start, bucket.end);
        let fill_qty =
            participation_fill_qty(allocation, order.participation_rate, order.remaining_qty);
        if fill_qty <= Decimal::ZERO {
            debug!(order_id = %order.order_id, allocation, "no fillable volume");
            return Ok(false);
        }

        let position_qty = self
            .collab
            .portfolio
            .get_position(&self.symbol)
            .map(|p| p.quantity)
            .unwrap_or(Decimal::ZERO);

        for leg in split_fill(position_qty, order.side, fill_qty) {
            self.apply_sub_fill(state, &mut order, leg, bucket, bar, report)?;
        }
        Ok(true)
    }

    fn apply_sub_fill(
        &self,
        state: &mut ManagerState,
        order: &mut Order,
        leg: RiskLeg,
        bucket: Bucket,
        bar: &BarContext<'_>,
        report: &mut BarReport,
    ) -> Result<(), ExecutionError> {
        let trade_id = self.next_trade_id(state);
        let commission = self.cost.compute_commission(leg.quantity);

        let impacted_price = self.collab.impact.calculate_price_impact(&ImpactRequest {
            symbol: &self.symbol,
            currency: bar.currency,
            base_price: bar.price,
            trade_volume: leg.quantity,
            total_volume: bucket.volume,
            start: bucket.start,
            end: bucket.end,
            trade_id: Some(&trade_id),
            is_buy: order.side.is_buy(),
        })?;

        let intent = FillIntent {
            order_id: order.order_id.clone(),
            trade_id: trade_id.clone(),
            symbol: self.symbol.clone(),
            side: order.side,
            quantity: leg.quantity,
            price: impacted_price,
            commission,
            currency: bar.currency.to_string(),
            detail: leg.detail,
            timestamp: bucket.end,
        };

        let account = &self.collab.account;
        account
            .check_balance_before_fill(&intent)
            .map_err(|source| ExecutionError::InsufficientBalance {
                order_id: order.order_id.clone(),
                source,
            })?;

        let mut staged = order.clone();
        staged.record_fill(leg.quantity, impacted_price, bucket.end)?;

        account
            .adjust_balance_after_fill(&intent)
            .map_err(|source| ExecutionError::Account {
                order_id: order.order_id.clone(),
                source,
            })?;

        if let Err(source) = self.collab.portfolio.update_position(
            &self.symbol,
            order.side.sign() * leg.quantity,
            impacted_price,
            bar.currency,
        ) {
            if let Err(reverse) = account.reverse_fill_adjustment(&intent) {
                error!(
                    order_id = %order.order_id,
                    trade_id = %trade_id,
                    error = %reverse,
                    "could not reverse balance adjustment"
                );
            }
            return Err(ExecutionError::Portfolio {
                order_id: order.order_id.clone(),
                source,
            });
        }

        *order = staged;
        let trade = Trade {
            trade_id,
            order_id: order.order_id.clone(),
            symbol: self.symbol.clone(),
            side: order.side,
            price: impacted_price,
            quantity: leg.quantity,
            commission,
            currency: bar.currency.to_string(),
            detail: leg.detail,
            start_time: bucket.start,
            end_time: bucket.end,
        };
        self.collab.trades.record_trade(&trade);
        self.collab.orders.record_order(order);
        self.collab
            .volume
            .record_consumed_volume(bucket.start, bucket.end, leg.quantity);

        state.stats.total_executions += 1;
        state.stats.total_trade_volume += leg.quantity;
        debug!(
            order_id = %order.order_id,
            detail = %trade.detail,
            qty = %trade.quantity,
            price = %trade.price,
            remaining = %order.remaining_qty,
            "sub-fill"
        );
        report.trades.push(trade);
        Ok(())
    }

    fn decay_tick(
        &self,
        state: &mut ManagerState,
        bucket: Bucket,
        bar: &BarContext<'_>,
        report: &mut BarReport,
    ) -> Result<(), ExecutionError> {
        self.collab.impact.calculate_price_impact(&ImpactRequest {
            symbol: &self.symbol,
            currency: bar.currency,
            base_price: bar.price,
            trade_volume: Decimal::ZERO,
            total_volume: bucket.volume,
            start: bucket.start,
            end: bucket.end,
            trade_id: None,
            is_buy: false,
        })?;
        state.stats.decay_ticks += 1;
        report.decay_ticks += 1;
        Ok(())
    }

    fn apply_cancel(
        &self,
        state: &mut ManagerState,
        handle: &OrderHandle,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        bar: &BarContext<'_>,
        report: &mut BarReport,
    ) {
        let mut order = handle.lock();
        let leftover = order.remaining_qty;
        if !order.cancel() {
            debug!(order_id = %order.order_id, status = %order.status, "nothing to cancel");
            return;
        }

        let trade = Trade {
            trade_id: self.next_trade_id(state),
            order_id: order.order_id.clone(),
            symbol: self.symbol.clone(),
            side: order.side,
            price: bar.price,
            quantity: Decimal::ZERO,
            commission: Decimal::ZERO,
            currency: bar.currency.to_string(),
            detail: TradeDetail::Cancelled,
            start_time: start,
            end_time: end,
        };
        self.collab.trades.record_trade(&trade);
        self.collab.orders.record_order(&order);

        state.stats.total_cancellations += 1;
        report.cancellations += 1;
        info!(order_id = %order.order_id, cancelled = %leftover, "order cancelled");
        report.trades.push(trade);
    }

    /// Re-queue or cancel fills that still have quantity after a clean bar.
    /// Fills whose order has not started yet go back unchanged.
    fn settle_remainders(
        &self,
        state: &mut ManagerState,
        due: &[PendingExecution],
        current: DateTime<Utc>,
        bar: &BarContext<'_>,
        report: &mut BarReport,
    ) -> Result<(), ExecutionError> {
        let mut seen: Vec<&OrderHandle> = Vec::new();
        for entry in due.iter().filter(|e| e.action == PendingAction::Fill) {
            if seen.iter().any(|h| Arc::ptr_eq(h, &entry.order)) {
                continue;
            }
            seen.push(&entry.order);
            if !entry.order.lock().is_active() {
                continue;
            }
            if entry.effective_time() > current {
                state.pending.push(entry.clone());
                continue;
            }
            match self.remainder_policy {
                RemainderPolicy::Carry => {
                    state
                        .pending
                        .push(PendingExecution::fill(entry.order.clone(), current));
                    report.carried += 1;
                }
                RemainderPolicy::Cancel => {
                    self.apply_cancel(state, &entry.order, current, current, bar, report);
                }
            }
        }
        Ok(())
    }

    fn next_trade_id(&self, state: &mut ManagerState) -> TradeId {
        state.trade_seq += 1;
        TradeId::sequential(&self.symbol, state.trade_seq)
    }

    /// Drop every scheduled action. Returns the number dropped; a second call
    /// returns zero.
    pub fn clear_pending_executions(&self) -> usize {
        let guard = self.state.lock();
        let Ok(mut state) = guard.try_borrow_mut() else {
            warn!(symbol = %self.symbol, "clear_pending_executions called re-entrantly; ignored");
            return 0;
        };
        let dropped = state.pending.clear();
        state.stats.pending = 0;
        if dropped > 0 {
            debug!(symbol = %self.symbol, dropped, "pending executions cleared");
        }
        dropped
    }

    pub fn pending_count(&self) -> usize {
        let guard = self.state.lock();
        let count = guard.try_borrow().map(|s| s.pending.len()).unwrap_or(0);
        count
    }

    /// Snapshot of lifetime counters. Called from inside a collaborator while a
    /// bar is being processed, it returns an empty snapshot rather than block
    /// or panic.
    pub fn get_execution_statistics(&self) -> ExecutionStatistics {
        let guard = self.state.lock();
        let stats = match guard.try_borrow() {
            Ok(state) => ExecutionStatistics {
                pending: state.pending.len(),
                ..state.stats.clone()
            },
            Err(_) => ExecutionStatistics {
                symbol: self.symbol.clone(),
                ..ExecutionStatistics::default()
            },
        };
        stats
    }

    pub fn log_execution_summary(&self) {
        let stats = self.get_execution_statistics();
        info!(
            symbol = %stats.symbol,
            executions = stats.total_executions,
            cancellations = stats.total_cancellations,
            volume = %stats.total_trade_volume,
            buckets = stats.buckets_processed,
            decay_ticks = stats.decay_ticks,
            pending = stats.pending,
            "execution summary"
        );
    }
}

impl std::fmt::Debug for ExecutionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionManager")
            .field("symbol", &self.symbol)
            .field("cost", &self.cost)
            .field("remainder_policy", &self.remainder_policy)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{OrderSide, OrderStatus};
    use crate::sim::SimBook;
    use chrono::{Duration, FixedOffset, TimeZone};
    use rust_decimal_macros::dec;
    use crate::ports::PortfolioManager;

    fn t(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 14, minute, 0).unwrap()
    }

    fn order(id: u64, side: OrderSide, qty: Decimal, rate: Decimal) -> OrderHandle {
        Order::new(id, "AAPL", side, qty, rate, t(30))
            .unwrap()
            .into_handle()
    }

    fn manager(book: &SimBook) -> ExecutionManager {
        ExecutionManager::new("AAPL", ExecutionConfig::default(), book.collaborators())
    }

    #[test]
    fn participation_fill_leaves_partial_order() {
        let book = SimBook::new(5000).with_cash("USD", dec!(1_000_000));
        let mgr = manager(&book);
        let o = order(1, OrderSide::Buy, dec!(1000), dec!(0.1));
        mgr.schedule_execution(&o, t(30)).unwrap();

        let report = mgr.process_executions(t(30), t(31), "USD", dec!(100)).unwrap();

        let o = o.lock();
        assert_eq!(report.trades.len(), 1);
        assert_eq!(o.completed_qty, dec!(500));
        assert_eq!(o.remaining_qty, dec!(500));
        assert_eq!(o.status, OrderStatus::Partial);
        assert_eq!(report.trades[0].commission, dec!(2.50));
        assert_eq!(book.account.balance("USD"), dec!(1_000_000) - dec!(50_002.50));
    }

    #[test]
    fn flip_records_risk_off_before_risk_on() {
        let book = SimBook::new(5000).with_cash("USD", dec!(1_000_000));
        book.portfolio.seed("AAPL", dec!(-300), dec!(100), "USD");
        let mgr = manager(&book);
        let o = order(1, OrderSide::Buy, dec!(500), dec!(1));
        mgr.schedule_execution(&o, t(30)).unwrap();

        let report = mgr.process_executions(t(30), t(31), "USD", dec!(95)).unwrap();

        let details: Vec<_> = report.trades.iter().map(|t| (t.detail, t.quantity)).collect();
        assert_eq!(
            details,
            vec![(TradeDetail::RiskOff, dec!(300)), (TradeDetail::RiskOn, dec!(200))]
        );
        let pos = book.portfolio.get_position("AAPL").unwrap();
        assert_eq!(pos.quantity, dec!(200));
        assert_eq!(pos.realized_pnl, dec!(1500));
        assert_eq!(mgr.get_execution_statistics().total_executions, 2);
    }

    #[test]
    fn idle_bucket_is_a_decay_tick() {
        let book = SimBook::new(5000);
        let mgr = manager(&book);
        let report = mgr.process_executions(t(30), t(31), "USD", dec!(100)).unwrap();
        assert_eq!(report.buckets, 1);
        assert_eq!(report.decay_ticks, 1);
        assert!(report.trades.is_empty());
    }

    #[test]
    fn order_starting_mid_bar_splits_the_window() {
        let book = SimBook::new(1000).with_cash("USD", dec!(1_000_000));
        let mgr = manager(&book);
        let start = t(30) + Duration::seconds(30);
        let o = Order::new(1, "AAPL", OrderSide::Buy, dec!(1000), dec!(0.1), t(30))
            .unwrap()
            .with_start_time(start)
            .into_handle();
        mgr.schedule_execution(&o, t(30)).unwrap();

        let report = mgr.process_executions(t(30), t(31), "USD", dec!(10)).unwrap();

        // First half idle, second half fills 100.
        assert_eq!(report.buckets, 2);
        assert_eq!(report.decay_ticks, 1);
        assert_eq!(report.trades.len(), 1);
        assert_eq!(report.trades[0].start_time, start);
        assert_eq!(o.lock().completed_qty, dec!(100));
    }

    #[test]
    fn cancel_at_bucket_end_records_zero_quantity_trade() {
        let book = SimBook::new(1000).with_cash("USD", dec!(1_000_000));
        let mgr = manager(&book);
        let o = order(1, OrderSide::Sell, dec!(1000), dec!(0.1));
        mgr.schedule_execution(&o, t(30)).unwrap();
        mgr.schedule_cancellation(&o, t(31)).unwrap();

        let report = mgr.process_executions(t(30), t(31), "USD", dec!(10)).unwrap();

        assert_eq!(report.cancellations, 1);
        let last = report.trades.last().unwrap();
        assert!(last.is_cancellation());
        assert_eq!(last.quantity, Decimal::ZERO);
        let o = o.lock();
        assert_eq!(o.status, OrderStatus::Cancelled);
        assert_eq!(o.completed_qty, dec!(100));
        assert_eq!(o.cancelled_qty, dec!(900));
        assert!(o.check_invariants());
        assert_eq!(mgr.pending_count(), 0);
    }

    #[test]
    fn insufficient_balance_aborts_and_restores_queue() {
        let book = SimBook::new(5000).with_cash("USD", dec!(10));
        let mgr = manager(&book);
        let o = order(1, OrderSide::Buy, dec!(1000), dec!(0.1));
        mgr.schedule_execution(&o, t(30)).unwrap();

        let err = mgr.process_executions(t(30), t(31), "USD", dec!(100)).unwrap_err();

        assert!(matches!(err, ExecutionError::InsufficientBalance { .. }));
        assert_eq!(o.lock().remaining_qty, dec!(1000));
        assert_eq!(book.account.balance("USD"), dec!(10));
        assert!(book.trades.is_empty());
        assert_eq!(mgr.pending_count(), 1);
    }

    #[test]
    fn carry_requeues_and_cancel_policy_cancels() {
        let book = SimBook::new(5000).with_cash("USD", dec!(1_000_000));
        let carry = manager(&book);
        let o = order(1, OrderSide::Buy, dec!(1000), dec!(0.1));
        carry.schedule_execution(&o, t(30)).unwrap();
        let report = carry.process_executions(t(30), t(31), "USD", dec!(1)).unwrap();
        assert_eq!(report.carried, 1);
        carry.process_executions(t(31), t(32), "USD", dec!(1)).unwrap();
        assert_eq!(o.lock().status, OrderStatus::Completed);
        assert_eq!(carry.pending_count(), 0);

        let config = ExecutionConfig {
            remainder_policy: RemainderPolicy::Cancel,
            ..ExecutionConfig::default()
        };
        let cancel = ExecutionManager::new("AAPL", config, book.collaborators());
        let o = order(2, OrderSide::Buy, dec!(1000), dec!(0.1));
        cancel.schedule_execution(&o, t(30)).unwrap();
        let report = cancel.process_executions(t(30), t(31), "USD", dec!(1)).unwrap();
        assert_eq!(report.cancellations, 1);
        assert_eq!(o.lock().cancelled_qty, dec!(500));
    }

    #[test]
    fn cancel_policy_keeps_orders_that_have_not_started() {
        let book = SimBook::new(5000).with_cash("USD", dec!(1_000_000));
        let config = ExecutionConfig {
            remainder_policy: RemainderPolicy::Cancel,
            ..ExecutionConfig::default()
        };
        let mgr = ExecutionManager::new("AAPL", config, book.collaborators());
        let o = Order::new(1, "AAPL", OrderSide::Buy, dec!(1000), dec!(0.1), t(30))
            .unwrap()
            .with_start_time(t(35))
            .into_handle();
        mgr.schedule_execution(&o, t(30)).unwrap();

        let report = mgr.process_executions(t(30), t(31), "USD", dec!(10)).unwrap();
        assert_eq!(report.cancellations, 0);
        assert_eq!(report.carried, 0);
        assert_eq!(o.lock().status, OrderStatus::Working);
        assert_eq!(o.lock().remaining_qty, dec!(1000));
        assert_eq!(mgr.pending_count(), 1);

        // Trades once its start arrives, then the remainder is cancelled.
        let report = mgr.process_executions(t(35), t(36), "USD", dec!(10)).unwrap();
        assert_eq!(report.filled_qty(), dec!(500));
        assert_eq!(report.cancellations, 1);
        let o = o.lock();
        assert_eq!(o.completed_qty, dec!(500));
        assert_eq!(o.cancelled_qty, dec!(500));
        assert!(o.check_invariants());
    }

    #[test]
    fn zero_fill_beside_a_trading_order_is_not_a_decay_tick() {
        let book = SimBook::new(5000).with_cash("USD", dec!(1_000_000));
        let mgr = manager(&book);
        let big = order(1, OrderSide::Buy, dec!(1000), dec!(0.1));
        let tiny = order(2, OrderSide::Buy, dec!(1000), dec!(0.0001));
        mgr.schedule_execution(&big, t(30)).unwrap();
        mgr.schedule_execution(&tiny, t(30)).unwrap();

        let report = mgr.process_executions(t(30), t(31), "USD", dec!(10)).unwrap();
        assert_eq!(report.buckets, 1);
        assert_eq!(report.decay_ticks, 0);
        assert_eq!(tiny.lock().completed_qty, Decimal::ZERO);
    }

    #[test]
    fn accepts_any_time_zone() {
        let book = SimBook::new(5000);
        let mgr = manager(&book);
        let est = FixedOffset::west_opt(5 * 3600).unwrap();
        let prev = t(30).with_timezone(&est);
        mgr.process_executions(prev, t(31), "USD", dec!(1)).unwrap();
        assert!(matches!(
            mgr.process_executions(t(31), prev, "USD", dec!(1)),
            Err(ExecutionError::InvertedWindow { .. })
        ));
    }

    #[test]
    fn rejects_foreign_symbol() {
        let book = SimBook::new(5000);
        let mgr = manager(&book);
        let msft = Order::new(1, "MSFT", OrderSide::Buy, dec!(10), dec!(0.1), t(30))
            .unwrap()
            .into_handle();
        assert!(matches!(
            mgr.schedule_execution(&msft, t(30)),
            Err(ExecutionError::SymbolMismatch { .. })
        ));
    }

    #[test]
    fn clear_twice_is_noop() {
        let book = SimBook::new(5000);
        let mgr = manager(&book);
        let o = order(1, OrderSide::Buy, dec!(10), dec!(0.1));
        mgr.schedule_execution(&o, t(30)).unwrap();
        mgr.schedule_cancellation(&o, t(40)).unwrap();
        assert_eq!(mgr.clear_pending_executions(), 2);
        assert_eq!(mgr.clear_pending_executions(), 0);
        assert_eq!(mgr.get_execution_statistics().pending, 0);
    }
}
