//! In-memory bar store.

use super::{BarStore, DataError};
use crate::bins::floor_to_minute;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use tapeline_core::MarketBin;

/// Bins keyed by minute. Inserting from another thread while a replay runs
/// simulates late-arriving data.
#[derive(Debug, Default)]
pub struct MemoryBarStore {
    bins: RwLock<BTreeMap<DateTime<Utc>, MarketBin>>,
}

impl MemoryBarStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bins(bins: impl IntoIterator<Item = MarketBin>) -> Self {
        let store = Self::new();
        for bin in bins {
            store.insert(bin);
        }
        store
    }

    /// Replaces any bin already stored for the same minute.
    pub fn insert(&self, mut bin: MarketBin) {
        bin.timestamp = floor_to_minute(bin.timestamp);
        self.bins.write().insert(bin.timestamp, bin);
    }

    pub fn remove(&self, minute: DateTime<Utc>) -> Option<MarketBin> {
        self.bins.write().remove(&floor_to_minute(minute))
    }

    pub fn len(&self) -> usize {
        self.bins.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.bins.read().is_empty()
    }
}

impl BarStore for MemoryBarStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn load_bin(&self, minute: DateTime<Utc>) -> Result<MarketBin, DataError> {
        let minute = floor_to_minute(minute);
        Ok(self
            .bins
            .read()
            .get(&minute)
            .cloned()
            .unwrap_or_else(|| MarketBin::empty(minute)))
    }

    fn latest_bin(&self) -> Result<Option<DateTime<Utc>>, DataError> {
        Ok(self
            .bins
            .read()
            .iter()
            .rev()
            .find(|(_, bin)| !bin.is_empty())
            .map(|(t, _)| *t))
    }

    fn list_bins(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>, DataError> {
        if end < start {
            return Ok(Vec::new());
        }
        Ok(self
            .bins
            .read()
            .range(floor_to_minute(start)..=end)
            .filter(|(_, bin)| !bin.is_empty())
            .map(|(t, _)| *t)
            .collect())
    }
}
