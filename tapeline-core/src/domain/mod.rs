//! Domain types for Tapeline

pub mod bar;
pub mod ids;
pub mod order;
pub mod position;
pub mod trade;

pub use bar::{EquityBar, FxRate, MarketBin};
pub use ids::{OrderId, TradeId};
pub use order::{Order, OrderError, OrderHandle, OrderSide, OrderStatus};
pub use position::Position;
pub use trade::{Trade, TradeDetail};

/// Symbol type alias
pub type Symbol = String;
