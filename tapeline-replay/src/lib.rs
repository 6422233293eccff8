//! Tapeline Replay: gap detection, bar stores, and minute-by-minute replay.
//!
//! This crate builds on `tapeline-core` to provide:
//! - Minute bin keys and ranges
//! - Gap detection between consecutive market timestamps
//! - Bar stores (Parquet files, Postgres, in-memory) behind a bounded loader
//! - `ReplayEngine`: backfills missed minutes on a supervised worker thread
//! - `ReplayManager`: the facade a live feed calls for every minute
//! - TOML configuration for execution, replay and data

pub mod bins;
pub mod config;
pub mod data;
pub mod engine;
pub mod gap;
pub mod manager;
pub mod processor;

pub use bins::{bin_key, floor_to_minute, minute_range, minutes_between, parse_bin_key};
pub use config::{ConfigError, DataBackend, DataConfig, ReplayConfig, TapelineConfig};
pub use data::{BarStore, DataError, DataLoader, MemoryBarStore, ParquetBarStore, PostgresBarStore};
pub use engine::{
    CancelToken, ReplayEngine, ReplayEntry, ReplayError, ReplayModeState, ReplayProgress,
    SnapClock,
};
pub use gap::GapDetector;
pub use manager::{GapDecision, ReplayManager};
pub use processor::{ExecutionProcessor, MarketDataProcessor, ProcessError};

#[cfg(test)]
mod send_sync_checks {
    use super::*;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn replay_manager_is_send_sync() {
        assert_send::<ReplayManager>();
        assert_sync::<ReplayManager>();
    }

    #[test]
    fn loader_and_stores_are_send_sync() {
        assert_send::<DataLoader>();
        assert_sync::<DataLoader>();
        assert_send::<ParquetBarStore>();
        assert_sync::<ParquetBarStore>();
        assert_send::<PostgresBarStore>();
        assert_sync::<PostgresBarStore>();
    }

    #[test]
    fn status_types_are_send_sync() {
        assert_send::<ReplayProgress>();
        assert_sync::<ReplayProgress>();
        assert_send::<SnapClock>();
        assert_sync::<SnapClock>();
        assert_send::<GapDecision>();
    }

    #[test]
    fn gap_detector_is_copy() {
        fn assert_copy<T: Copy>() {}
        assert_copy::<GapDetector>();
    }
}
