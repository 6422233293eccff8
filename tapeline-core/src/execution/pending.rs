//! Pending work: fills and cancellations keyed by UTC time bucket.

use crate::domain::OrderHandle;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingAction {
    Fill,
    Cancel,
}

/// One scheduled action against an order.
#[derive(Debug, Clone)]
pub struct PendingExecution {
    pub action: PendingAction,
    pub order: OrderHandle,
    pub scheduled_at: DateTime<Utc>,
}

impl PendingExecution {
    pub fn fill(order: OrderHandle, scheduled_at: DateTime<Utc>) -> Self {
        Self {
            action: PendingAction::Fill,
            order,
            scheduled_at,
        }
    }

    pub fn cancel(order: OrderHandle, scheduled_at: DateTime<Utc>) -> Self {
        Self {
            action: PendingAction::Cancel,
            order,
            scheduled_at,
        }
    }

    /// When the action takes effect. Fills follow the order's own start time
    /// when it has one; cancels happen when they were scheduled.
    pub fn effective_time(&self) -> DateTime<Utc> {
        match self.action {
            PendingAction::Fill => self.order.lock().start_time.unwrap_or(self.scheduled_at),
            PendingAction::Cancel => self.scheduled_at,
        }
    }

    pub fn same_order(&self, other: &OrderHandle) -> bool {
        Arc::ptr_eq(&self.order, other)
    }
}

/// Time-bucketed queue of pending actions. Insertion order is kept within a
/// bucket.
#[derive(Debug, Default)]
pub struct PendingQueue {
    buckets: BTreeMap<DateTime<Utc>, Vec<PendingExecution>>,
    len: usize,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: PendingExecution) {
        self.buckets
            .entry(entry.scheduled_at)
            .or_default()
            .push(entry);
        self.len += 1;
    }

    /// Remove and return every entry keyed at or before `until`, oldest first.
    pub fn take_due(&mut self, until: DateTime<Utc>) -> Vec<PendingExecution> {
        let keys: Vec<DateTime<Utc>> = self.buckets.range(..=until).map(|(k, _)| *k).collect();
        let mut due = Vec::new();
        for key in keys {
            if let Some(entries) = self.buckets.remove(&key) {
                due.extend(entries);
            }
        }
        self.len -= due.len();
        due
    }

    /// Put entries taken by `take_due` back, ahead of anything scheduled since.
    pub fn restore(&mut self, entries: Vec<PendingExecution>) {
        let mut by_key: BTreeMap<DateTime<Utc>, Vec<PendingExecution>> = BTreeMap::new();
        for entry in entries {
            by_key.entry(entry.scheduled_at).or_default().push(entry);
        }
        for (key, mut restored) in by_key {
            self.len += restored.len();
            let bucket = self.buckets.entry(key).or_default();
            restored.append(bucket);
            *bucket = restored;
        }
    }

    /// Drop everything. Returns how many entries were dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.len;
        self.buckets.clear();
        self.len = 0;
        dropped
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Order, OrderSide};
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;

    fn t(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 14, minute, 0).unwrap()
    }

    fn handle(id: u64) -> OrderHandle {
        Order::new(id, "AAPL", OrderSide::Buy, dec!(100), dec!(0.1), t(0))
            .unwrap()
            .into_handle()
    }

    #[test]
    fn take_due_is_inclusive_and_ordered() {
        let mut q = PendingQueue::new();
        q.push(PendingExecution::fill(handle(3), t(3)));
        q.push(PendingExecution::fill(handle(1), t(1)));
        q.push(PendingExecution::cancel(handle(2), t(2)));
        assert_eq!(q.len(), 3);

        let due = q.take_due(t(2));
        assert_eq!(due.len(), 2);
        assert_eq!(due[0].scheduled_at, t(1));
        assert_eq!(due[1].action, PendingAction::Cancel);
        assert_eq!(q.len(), 1);
        assert_eq!(q.bucket_count(), 1);
    }

    #[test]
    fn restore_puts_entries_back_first() {
        let mut q = PendingQueue::new();
        let a = handle(1);
        let b = handle(2);
        q.push(PendingExecution::fill(a.clone(), t(1)));
        let due = q.take_due(t(1));
        q.push(PendingExecution::fill(b.clone(), t(1)));
        q.restore(due);

        let again = q.take_due(t(1));
        assert_eq!(again.len(), 2);
        assert!(again[0].same_order(&a));
        assert!(again[1].same_order(&b));
    }

    #[test]
    fn clear_is_idempotent() {
        let mut q = PendingQueue::new();
        q.push(PendingExecution::fill(handle(1), t(1)));
        q.push(PendingExecution::fill(handle(2), t(1)));
        assert_eq!(q.clear(), 2);
        assert_eq!(q.clear(), 0);
        assert!(q.is_empty());
    }

    #[test]
    fn fill_effective_time_prefers_order_start() {
        let order = Order::new(1, "AAPL", OrderSide::Buy, dec!(100), dec!(0.1), t(0))
            .unwrap()
            .with_start_time(t(0) + Duration::seconds(30))
            .into_handle();
        let fill = PendingExecution::fill(order.clone(), t(5));
        assert_eq!(fill.effective_time(), t(0) + Duration::seconds(30));

        let cancel = PendingExecution::cancel(order, t(5));
        assert_eq!(cancel.effective_time(), t(5));
    }
}
