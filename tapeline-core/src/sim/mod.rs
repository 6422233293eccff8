//! In-memory collaborators for tests, benches and the CLI.

pub mod account;
pub mod ledger;
pub mod market;
pub mod portfolio;

pub use account::SimAccount;
pub use ledger::{InMemoryOrderBook, TradeLog};
pub use market::{FixedVolumeTracker, NoImpact};
pub use portfolio::InMemoryPortfolio;

use crate::ports::Collaborators;
use rust_decimal::Decimal;
use std::sync::Arc;

/// One simulated book: typed handles to every collaborator, so callers can
/// inspect state after handing `collaborators()` to an execution manager.
#[derive(Debug, Clone)]
pub struct SimBook {
    pub account: Arc<SimAccount>,
    pub portfolio: Arc<InMemoryPortfolio>,
    pub orders: Arc<InMemoryOrderBook>,
    pub trades: Arc<TradeLog>,
    pub volume: Arc<FixedVolumeTracker>,
    pub impact: Arc<NoImpact>,
}

impl SimBook {
    /// Empty book whose volume tracker reports `volume` shares per minute.
    pub fn new(volume: u64) -> Self {
        Self {
            account: Arc::new(SimAccount::new()),
            portfolio: Arc::new(InMemoryPortfolio::new()),
            orders: Arc::new(InMemoryOrderBook::new()),
            trades: Arc::new(TradeLog::new()),
            volume: Arc::new(FixedVolumeTracker::new(volume)),
            impact: Arc::new(NoImpact),
        }
    }

    pub fn with_cash(self, currency: &str, amount: Decimal) -> Self {
        self.account.deposit(currency, amount);
        self
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            volume: self.volume.clone(),
            impact: self.impact.clone(),
            account: self.account.clone(),
            portfolio: self.portfolio.clone(),
            orders: self.orders.clone(),
            trades: self.trades.clone(),
        }
    }
}
