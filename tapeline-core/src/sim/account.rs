//! Cash ledger per currency.

use crate::domain::OrderSide;
use crate::ports::{Account, AccountError, FillIntent};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashMap;

/// Simple cash account. Buys need enough cash for notional plus commission;
/// sells always clear and credit proceeds net of commission.
#[derive(Debug, Default)]
pub struct SimAccount {
    balances: Mutex<HashMap<String, Decimal>>,
}

impl SimAccount {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cash(self, currency: impl Into<String>, amount: Decimal) -> Self {
        self.deposit(currency, amount);
        self
    }

    pub fn deposit(&self, currency: impl Into<String>, amount: Decimal) {
        *self
            .balances
            .lock()
            .entry(currency.into())
            .or_insert(Decimal::ZERO) += amount;
    }

    pub fn balance(&self, currency: &str) -> Decimal {
        self.balances
            .lock()
            .get(currency)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }
}

impl Account for SimAccount {
    fn check_balance_before_fill(&self, fill: &FillIntent) -> Result<(), AccountError> {
        if fill.side == OrderSide::Sell {
            return Ok(());
        }
        let balances = self.balances.lock();
        let Some(available) = balances.get(&fill.currency).copied() else {
            return Err(AccountError::UnknownCurrency(fill.currency.clone()));
        };
        let required = fill.notional() + fill.commission;
        if required > available {
            return Err(AccountError::InsufficientBalance {
                currency: fill.currency.clone(),
                required,
                available,
            });
        }
        Ok(())
    }

    fn adjust_balance_after_fill(&self, fill: &FillIntent) -> Result<(), AccountError> {
        *self
            .balances
            .lock()
            .entry(fill.currency.clone())
            .or_insert(Decimal::ZERO) += fill.cash_delta();
        Ok(())
    }

    fn reverse_fill_adjustment(&self, fill: &FillIntent) -> Result<(), AccountError> {
        let mut balances = self.balances.lock();
        let balance = balances
            .get_mut(&fill.currency)
            .ok_or_else(|| AccountError::UnknownCurrency(fill.currency.clone()))?;
        *balance -= fill.cash_delta();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{OrderId, TradeDetail, TradeId};
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn fill(side: OrderSide, qty: Decimal, price: Decimal) -> FillIntent {
        FillIntent {
            order_id: OrderId::from(1),
            trade_id: TradeId::sequential("SPY", 1),
            symbol: "SPY".into(),
            side,
            quantity: qty,
            price,
            commission: dec!(1),
            currency: "USD".into(),
            detail: TradeDetail::RiskOn,
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 14, 30, 0).unwrap(),
        }
    }

    #[test]
    fn buy_needs_notional_plus_commission() {
        let account = SimAccount::new().with_cash("USD", dec!(1000));
        assert!(account
            .check_balance_before_fill(&fill(OrderSide::Buy, dec!(10), dec!(99.9)))
            .is_ok());
        let err = account
            .check_balance_before_fill(&fill(OrderSide::Buy, dec!(10), dec!(100)))
            .unwrap_err();
        assert!(matches!(err, AccountError::InsufficientBalance { .. }));
    }

    #[test]
    fn unknown_currency_is_rejected_for_buys() {
        let account = SimAccount::new();
        assert_eq!(
            account.check_balance_before_fill(&fill(OrderSide::Buy, dec!(1), dec!(1))),
            Err(AccountError::UnknownCurrency("USD".into()))
        );
        assert!(account
            .check_balance_before_fill(&fill(OrderSide::Sell, dec!(1), dec!(1)))
            .is_ok());
    }

    #[test]
    fn reverse_undoes_adjust() {
        let account = SimAccount::new().with_cash("USD", dec!(5000));
        let buy = fill(OrderSide::Buy, dec!(10), dec!(100));
        account.adjust_balance_after_fill(&buy).unwrap();
        assert_eq!(account.balance("USD"), dec!(3999));
        account.reverse_fill_adjustment(&buy).unwrap();
        assert_eq!(account.balance("USD"), dec!(5000));
    }
}
