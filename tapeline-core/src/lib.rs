//! Tapeline Core: domain types, collaborator ports, and the per-instrument
//! execution engine.
//!
//! This crate contains:
//! - Domain types (orders, trades, positions, minute bars, ids)
//! - Collaborator traits the engine calls into (account, portfolio, volume, impact)
//! - `ExecutionManager`: bucketed participation fills with risk-off/risk-on splits
//! - In-memory collaborators for tests and simulation

pub mod domain;
pub mod execution;
pub mod ports;
pub mod sim;

pub use domain::{
    EquityBar, FxRate, MarketBin, Order, OrderHandle, OrderId, OrderSide, OrderStatus, Position,
    Trade, TradeDetail, TradeId,
};
pub use execution::{ExecutionConfig, ExecutionError, ExecutionManager, ExecutionStatistics};
pub use ports::Collaborators;

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: everything shared across threads is Send + Sync.
    ///
    /// The replay worker drives execution managers from its own thread, so a
    /// non-Sync field anywhere in here breaks the build immediately.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        // Domain types
        require_send::<Order>();
        require_sync::<Order>();
        require_send::<OrderHandle>();
        require_sync::<OrderHandle>();
        require_send::<Trade>();
        require_sync::<Trade>();
        require_send::<Position>();
        require_sync::<Position>();
        require_send::<MarketBin>();
        require_sync::<MarketBin>();

        // Engine
        require_send::<ExecutionManager>();
        require_sync::<ExecutionManager>();
        require_send::<Collaborators>();
        require_sync::<Collaborators>();
        require_send::<ExecutionStatistics>();
        require_sync::<ExecutionStatistics>();

        // Sim collaborators
        require_send::<sim::SimBook>();
        require_sync::<sim::SimBook>();
    }

    /// Architecture contract: collaborators are object-safe and injected, so a
    /// book can swap any of them without touching the manager.
    #[test]
    fn collaborators_are_trait_objects() {
        let book = sim::SimBook::new(0);
        let collab = book.collaborators();
        let _: &dyn ports::Account = collab.account.as_ref();
        let _: &dyn ports::PortfolioManager = collab.portfolio.as_ref();
        let _: &dyn ports::VolumeTracker = collab.volume.as_ref();
        let _: &dyn ports::MarketImpactModel = collab.impact.as_ref();
    }
}
