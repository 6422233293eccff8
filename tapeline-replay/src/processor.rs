//! The seam between market data and whatever consumes it.
//!
//! `ReplayEngine` and `ReplayManager` only know `MarketDataProcessor`.
//! `ExecutionProcessor` is the stock implementation: it turns each bar into
//! a `process_executions` call on the matching execution manager.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tapeline_core::execution::ExecutionError;
use tapeline_core::sim::FixedVolumeTracker;
use tapeline_core::{EquityBar, ExecutionManager, FxRate};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("execution failed for {symbol}: {source}")]
    Execution {
        symbol: String,
        #[source]
        source: ExecutionError,
    },

    #[error("{0}")]
    Rejected(String),
}

/// Consumes one minute of market data.
///
/// `bypass_replay_detection` is true when the caller has already handled
/// gaps (replay and backfill), so the processor must not start another
/// replay from inside this call.
pub trait MarketDataProcessor: Send + Sync {
    fn process_market_data_bin(
        &self,
        equity: &[EquityBar],
        fx: &[FxRate],
        bypass_replay_detection: bool,
    ) -> Result<(), ProcessError>;
}

struct Book {
    manager: Arc<ExecutionManager>,
    volume_feed: Option<Arc<FixedVolumeTracker>>,
    last_bar: Option<DateTime<Utc>>,
}

/// Routes bars to one `ExecutionManager` per symbol.
///
/// Each bar is processed as the window `[previous bar, this bar]`; the first
/// bar a book sees covers the single minute ending at its timestamp.
/// Bars for symbols with no registered book are ignored.
#[derive(Default)]
pub struct ExecutionProcessor {
    books: Mutex<HashMap<String, Book>>,
}

impl ExecutionProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_book(&self, manager: Arc<ExecutionManager>) {
        self.insert(manager, None);
    }

    /// Register a book whose volume tracker is fed each bar's volume before
    /// the bar is processed.
    pub fn add_book_with_volume_feed(
        &self,
        manager: Arc<ExecutionManager>,
        volume: Arc<FixedVolumeTracker>,
    ) {
        self.insert(manager, Some(volume));
    }

    fn insert(&self, manager: Arc<ExecutionManager>, volume_feed: Option<Arc<FixedVolumeTracker>>) {
        let symbol = manager.symbol().to_string();
        self.books.lock().insert(
            symbol,
            Book {
                manager,
                volume_feed,
                last_bar: None,
            },
        );
    }

    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.books.lock().keys().cloned().collect();
        symbols.sort();
        symbols
    }

    /// Timestamp of the last bar processed for `symbol`.
    pub fn last_bar_time(&self, symbol: &str) -> Option<DateTime<Utc>> {
        self.books.lock().get(symbol).and_then(|b| b.last_bar)
    }
}

impl MarketDataProcessor for ExecutionProcessor {
    fn process_market_data_bin(
        &self,
        equity: &[EquityBar],
        _fx: &[FxRate],
        bypass_replay_detection: bool,
    ) -> Result<(), ProcessError> {
        let mut books = self.books.lock();
        for bar in equity {
            let Some(book) = books.get_mut(&bar.symbol) else {
                continue;
            };
            if !bar.is_sane() {
                warn!(symbol = %bar.symbol, at = %bar.timestamp, "skipping malformed bar");
                continue;
            }
            if book.last_bar.is_some_and(|last| bar.timestamp <= last) {
                debug!(symbol = %bar.symbol, at = %bar.timestamp, "bar already processed");
                continue;
            }

            if let Some(feed) = &book.volume_feed {
                feed.set_volume(bar.volume);
            }
            let prev = book
                .last_bar
                .unwrap_or(bar.timestamp - crate::bins::minute());

            let report = book
                .manager
                .process_executions(prev, bar.timestamp, &bar.currency, bar.close)
                .map_err(|source| ProcessError::Execution {
                    symbol: bar.symbol.clone(),
                    source,
                })?;
            book.last_bar = Some(bar.timestamp);

            debug!(
                symbol = %bar.symbol,
                at = %bar.timestamp,
                trades = report.trades.len(),
                replayed = bypass_replay_detection,
                "bar processed"
            );
        }
        Ok(())
    }
}
