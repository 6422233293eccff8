//! Volume and impact stand-ins.

use crate::ports::{ImpactError, ImpactRequest, MarketImpactModel, VolumeTracker};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicU64, Ordering};

/// Reports the same volume for every minute and every bucket, and tallies
/// what was consumed.
#[derive(Debug)]
pub struct FixedVolumeTracker {
    volume: AtomicU64,
    consumed: Mutex<Decimal>,
}

impl FixedVolumeTracker {
    pub fn new(volume: u64) -> Self {
        Self {
            volume: AtomicU64::new(volume),
            consumed: Mutex::new(Decimal::ZERO),
        }
    }

    pub fn set_volume(&self, volume: u64) {
        self.volume.store(volume, Ordering::Relaxed);
    }

    pub fn consumed(&self) -> Decimal {
        *self.consumed.lock()
    }
}

impl VolumeTracker for FixedVolumeTracker {
    fn get_current_minute_volume(&self) -> u64 {
        self.volume.load(Ordering::Relaxed)
    }

    fn get_available_volume(&self, _start: DateTime<Utc>, _end: DateTime<Utc>) -> u64 {
        self.volume.load(Ordering::Relaxed)
    }

    fn record_consumed_volume(&self, _start: DateTime<Utc>, _end: DateTime<Utc>, qty: Decimal) {
        *self.consumed.lock() += qty;
    }
}

/// Zero-impact model: every fill happens at the bar price.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoImpact;

impl MarketImpactModel for NoImpact {
    fn calculate_price_impact(&self, request: &ImpactRequest<'_>) -> Result<Decimal, ImpactError> {
        Ok(request.base_price)
    }
}
