//! `ReplayManager`: the one object a market-data feed talks to.
//!
//! Composes the gap detector, the replay engine, the data loader and the
//! snap clock. A feed calls `check_and_handle_market_data_gap` (or
//! `process_live_bin`, which does the check and the processing) for every
//! incoming minute.

use crate::bins::floor_to_minute;
use crate::config::{ReplayConfig, TapelineConfig};
use crate::data::{DataError, DataLoader};
use crate::engine::{ReplayEngine, ReplayEntry, ReplayError, ReplayModeState, ReplayProgress, SnapClock};
use crate::gap::GapDetector;
use crate::processor::MarketDataProcessor;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tapeline_core::MarketBin;
use tracing::{debug, info};

/// What the caller should do with an incoming live bin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GapDecision {
    /// No gap: process the bin now.
    ProcessLive,
    /// A replay is running and will reach this bin itself.
    DeferToReplay,
    /// A gap was found and a replay now owns every minute up to and
    /// including the incoming one.
    ReplayStarted {
        gap_start: DateTime<Utc>,
        gap_end: DateTime<Utc>,
        total_minutes: i64,
    },
}

pub struct ReplayManager {
    detector: GapDetector,
    loader: Arc<DataLoader>,
    engine: ReplayEngine,
}

impl ReplayManager {
    pub fn new(config: ReplayConfig, loader: Arc<DataLoader>) -> Self {
        let engine = ReplayEngine::new(config, Arc::clone(&loader), SnapClock::new());
        Self {
            detector: GapDetector::new(),
            loader,
            engine,
        }
    }

    /// Build the loader named by `[data]` and the engine from `[replay]`.
    pub fn from_config(config: &TapelineConfig) -> Result<Self, DataError> {
        let loader = DataLoader::from_config(&config.data)?;
        Ok(Self::new(config.replay.clone(), Arc::new(loader)))
    }

    pub fn loader(&self) -> &DataLoader {
        &self.loader
    }

    pub fn add_processor(&self, processor: Arc<dyn MarketDataProcessor>) {
        self.engine.add_processor(processor);
    }

    // ── Gap detection and replay control ─────────────────────────────

    pub fn detect_gap<Tz1: TimeZone, Tz2: TimeZone>(
        &self,
        last: DateTime<Tz1>,
        incoming: DateTime<Tz2>,
    ) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        self.detector.detect_gap(last, incoming)
    }

    pub fn enter_replay_mode<Tz1: TimeZone, Tz2: TimeZone>(
        &self,
        last_snap_time: DateTime<Tz1>,
        target_live_time: DateTime<Tz2>,
    ) -> Result<ReplayEntry, ReplayError> {
        self.engine.enter_replay_mode(last_snap_time, target_live_time)
    }

    pub fn stop_replay(&self) -> Result<bool, ReplayError> {
        self.engine.stop_replay()
    }

    pub fn get_replay_status(&self) -> ReplayProgress {
        self.engine.status()
    }

    pub fn is_replaying(&self) -> bool {
        self.engine.is_running()
    }

    pub fn reset_error(&self) -> bool {
        self.engine.reset_error()
    }

    /// Decide how to handle a live bin stamped `incoming_time`.
    pub fn check_and_handle_market_data_gap<Tz: TimeZone>(
        &self,
        incoming_time: DateTime<Tz>,
    ) -> Result<GapDecision, ReplayError> {
        let incoming = incoming_time.with_timezone(&Utc);

        if self.engine.is_running() {
            self.engine.set_latest_live_bin(incoming);
            return Ok(GapDecision::DeferToReplay);
        }

        let Some(last) = self.last_snap_time() else {
            return Ok(GapDecision::ProcessLive);
        };
        let Some((gap_start, gap_end)) = self.detector.detect_gap(last, incoming) else {
            return Ok(GapDecision::ProcessLive);
        };

        info!(
            last = %last,
            incoming = %incoming,
            gap_start = %gap_start,
            gap_end = %gap_end,
            "market data gap detected"
        );
        match self.engine.enter_replay_mode(last, incoming) {
            Ok(ReplayEntry::Started { total_minutes }) => Ok(GapDecision::ReplayStarted {
                gap_start,
                gap_end,
                total_minutes,
            }),
            Ok(ReplayEntry::AlreadyCurrent) => Ok(GapDecision::ProcessLive),
            // Lost a race with another caller that started the replay.
            Err(ReplayError::AlreadyRunning) => {
                self.engine.set_latest_live_bin(incoming);
                Ok(GapDecision::DeferToReplay)
            }
            Err(e) => Err(e),
        }
    }

    /// Gap-check a live bin and, when it is safe, process it and snap to it.
    pub fn process_live_bin(&self, bin: &MarketBin) -> Result<GapDecision, ReplayError> {
        let decision = self.check_and_handle_market_data_gap(bin.timestamp)?;
        if decision == GapDecision::ProcessLive {
            self.engine.dispatch(bin, false)?;
            self.engine.snap_clock().advance(bin.timestamp);
        }
        Ok(decision)
    }

    /// Process a bin supplied from outside the replay loop. Bins at or before
    /// the last snap are skipped and reported as `false`.
    pub fn process_backfill_data(&self, bin: &MarketBin) -> Result<bool, ReplayError> {
        let minute = floor_to_minute(bin.timestamp);
        if self.last_snap_time().is_some_and(|last| minute <= last) {
            debug!(minute = %minute, "skipping stale backfill bin");
            return Ok(false);
        }
        self.engine.dispatch(bin, true)?;
        self.engine.snap_clock().advance(minute);
        Ok(true)
    }

    // ── Snap clock ───────────────────────────────────────────────────

    pub fn record_snap_time<Tz: TimeZone>(&self, t: DateTime<Tz>) {
        self.engine.snap_clock().set(t.with_timezone(&Utc));
    }

    pub fn last_snap_time(&self) -> Option<DateTime<Utc>> {
        self.engine.snap_clock().get()
    }

    // ── Bin discovery ────────────────────────────────────────────────

    pub fn discover_latest_bin(&self) -> Result<Option<DateTime<Utc>>, DataError> {
        self.loader.latest_bin()
    }

    pub fn find_missing_bins<Tz1: TimeZone, Tz2: TimeZone>(
        &self,
        start: DateTime<Tz1>,
        end: DateTime<Tz2>,
    ) -> Result<Vec<DateTime<Utc>>, DataError> {
        self.loader.find_missing_bins(start, end)
    }

    // ── Callbacks ────────────────────────────────────────────────────

    pub fn on_replay_complete(&self, callback: impl Fn(&ReplayProgress) + Send + Sync + 'static) {
        self.engine.on_complete(callback);
    }

    pub fn on_replay_progress(&self, callback: impl Fn(&ReplayProgress) + Send + Sync + 'static) {
        self.engine.on_progress(callback);
    }

    pub fn on_state_change(&self, callback: impl Fn(ReplayModeState) + Send + Sync + 'static) {
        self.engine.on_state_change(callback);
    }
}
