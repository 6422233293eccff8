//! Order and trade sinks that keep everything in memory.

use crate::domain::{Order, OrderId, Trade};
use crate::ports::{OrderManager, TradeManager};
use parking_lot::Mutex;
use std::collections::HashMap;

/// Latest reported state of every order, plus how many updates it received.
#[derive(Debug, Default)]
pub struct InMemoryOrderBook {
    orders: Mutex<HashMap<OrderId, Order>>,
    updates: Mutex<u64>,
}

impl InMemoryOrderBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, order_id: &OrderId) -> Option<Order> {
        self.orders.lock().get(order_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.orders.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.lock().is_empty()
    }

    pub fn update_count(&self) -> u64 {
        *self.updates.lock()
    }
}

impl OrderManager for InMemoryOrderBook {
    fn record_order(&self, order: &Order) {
        self.orders
            .lock()
            .insert(order.order_id.clone(), order.clone());
        *self.updates.lock() += 1;
    }
}

/// Append-only trade record.
#[derive(Debug, Default)]
pub struct TradeLog {
    trades: Mutex<Vec<Trade>>,
}

impl TradeLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trades(&self) -> Vec<Trade> {
        self.trades.lock().clone()
    }

    pub fn for_order(&self, order_id: &OrderId) -> Vec<Trade> {
        self.trades
            .lock()
            .iter()
            .filter(|t| &t.order_id == order_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.trades.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.trades.lock().is_empty()
    }
}

impl TradeManager for TradeLog {
    fn record_trade(&self, trade: &Trade) {
        self.trades.lock().push(trade.clone());
    }
}
