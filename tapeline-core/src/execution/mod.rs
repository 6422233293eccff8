//! Execution: participation fills against minute buckets.
//!
//! Key concepts:
//! - **Buckets**: a bar's window cut at every scheduled action time
//! - **Participation**: an order takes at most a fixed fraction of bucket volume
//! - **Risk split**: fills that flip a position become a closing and an opening leg
//! - **Decay ticks**: buckets without trades still age the impact model
//! - **Remainders**: unfilled quantity is carried or cancelled after each bar

pub mod config;
pub mod cost_model;
pub mod liquidity;
pub mod manager;
pub mod pending;
pub mod risk;

pub use config::ExecutionConfig;
pub use cost_model::{CostModel, DEFAULT_COMMISSION_PER_SHARE};
pub use liquidity::{participation_cap, participation_fill_qty, RemainderPolicy};
pub use manager::{BarReport, ExecutionError, ExecutionManager, ExecutionStatistics};
pub use pending::{PendingAction, PendingExecution, PendingQueue};
pub use risk::{split_fill, RiskLeg};
