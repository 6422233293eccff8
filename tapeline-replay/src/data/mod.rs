//! Bar stores and the loader that fronts them.
//!
//! - `BarStore` is the storage abstraction (one minute in, one `MarketBin` out)
//! - `ParquetBarStore` keeps one Parquet file per minute under a date partition
//! - `PostgresBarStore` reads the `equity_bars` / `fx_rates` tables
//! - `MemoryBarStore` backs tests and fixtures
//! - `DataLoader` runs store calls on a bounded pool with a timeout

pub mod loader;
pub mod memory;
pub mod parquet;
pub mod postgres;

pub use loader::DataLoader;
pub use memory::MemoryBarStore;
pub use parquet::ParquetBarStore;
pub use postgres::PostgresBarStore;

use chrono::{DateTime, Utc};
use tapeline_core::MarketBin;
use thiserror::Error;

/// Errors from bar stores and the loader.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parquet I/O error: {0}")]
    ParquetError(String),

    #[error("postgres error: {0}")]
    PostgresError(String),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("store configuration error: {0}")]
    ConfigError(String),

    #[error("store worker pool error: {0}")]
    PoolError(String),

    #[error("store call for {what} was dropped by its worker")]
    WorkerLost { what: &'static str },
}

/// Storage for minute bins.
///
/// Implementations are called from the loader's pool threads. A minute with
/// no stored data is an empty bin, not an error.
pub trait BarStore: Send + Sync {
    fn name(&self) -> &str;

    /// Everything stored for the minute starting at `minute`.
    fn load_bin(&self, minute: DateTime<Utc>) -> Result<MarketBin, DataError>;

    /// The most recent minute with equity data.
    fn latest_bin(&self) -> Result<Option<DateTime<Utc>>, DataError>;

    /// Minutes with equity data in `[start, end]`, ascending.
    fn list_bins(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>, DataError>;
}
