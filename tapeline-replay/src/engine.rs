//! Replay engine: backfills missed minutes on a background thread.
//!
//! One run at a time. The worker walks forward from the last snapped minute,
//! loads each bin, hands it to every processor with replay detection
//! bypassed, and advances the shared `SnapClock`. Minutes older than the
//! newest live bin are historical and are polled until they appear. Minutes
//! at or after it are live and are given up on after `live_bin_max_checks`
//! misses, which hands control back to live processing.
//!
//! State machine:
//!
//! ```text
//! Live ─enter─▶ ReplayWaiting ─bin─▶ ReplayProcessing ─give up─▶ ReplayComplete ─▶ Live
//!                    │                      │
//!                    └──── stop ────────────┴──▶ Live
//!                    processor failure ───────▶ Error (until reset)
//! ```

use crate::bins::{bin_key, minute, minutes_between};
use crate::config::ReplayConfig;
use crate::data::DataLoader;
use crate::processor::{MarketDataProcessor, ProcessError};
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::{Condvar, Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tapeline_core::MarketBin;
use thiserror::Error;
use tracing::{debug, error, info, warn};

// ── Status types ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReplayModeState {
    Live,
    ReplayWaiting,
    ReplayProcessing,
    ReplayComplete,
    Error,
}

impl ReplayModeState {
    /// Waiting or processing.
    pub fn is_replaying(self) -> bool {
        matches!(self, Self::ReplayWaiting | Self::ReplayProcessing)
    }
}

/// Snapshot of a replay run.
///
/// `completed_minutes + remaining_minutes == total_minutes` always holds;
/// when the run continues past its original target, `total_minutes` grows
/// with `completed_minutes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayProgress {
    pub current_time: DateTime<Utc>,
    pub target_time: DateTime<Utc>,
    pub total_minutes: i64,
    pub completed_minutes: i64,
    pub remaining_minutes: i64,
    pub state: ReplayModeState,
    pub last_updated: DateTime<Utc>,
    pub error_message: Option<String>,
}

impl ReplayProgress {
    /// No replay has run yet.
    pub fn idle() -> Self {
        let now = Utc::now();
        Self {
            current_time: now,
            target_time: now,
            total_minutes: 0,
            completed_minutes: 0,
            remaining_minutes: 0,
            state: ReplayModeState::Live,
            last_updated: now,
            error_message: None,
        }
    }

    fn start(from: DateTime<Utc>, target: DateTime<Utc>, total: i64) -> Self {
        Self {
            current_time: from,
            target_time: target,
            total_minutes: total,
            completed_minutes: 0,
            remaining_minutes: total,
            state: ReplayModeState::ReplayWaiting,
            last_updated: Utc::now(),
            error_message: None,
        }
    }

    fn advance(&mut self, to: DateTime<Utc>) {
        self.completed_minutes += 1;
        self.total_minutes = self.total_minutes.max(self.completed_minutes);
        self.remaining_minutes = self.total_minutes - self.completed_minutes;
        self.current_time = to;
        self.last_updated = Utc::now();
    }

    /// 0–100; a run with nothing to do is 100 % done.
    pub fn progress_percentage(&self) -> f64 {
        if self.total_minutes <= 0 {
            100.0
        } else {
            self.completed_minutes as f64 / self.total_minutes as f64 * 100.0
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.completed_minutes >= 0
            && self.remaining_minutes >= 0
            && self.completed_minutes + self.remaining_minutes == self.total_minutes
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayEntry {
    Started { total_minutes: i64 },
    /// Nothing to backfill; the engine stayed live.
    AlreadyCurrent,
}

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("a replay is already running")]
    AlreadyRunning,

    #[error("a previous replay worker never stopped; refusing to start another")]
    WorkerLeaked,

    #[error("replay is in the error state: {0}")]
    InErrorState(String),

    #[error("failed to spawn replay worker: {0}")]
    Spawn(String),

    #[error(transparent)]
    Process(#[from] ProcessError),
}

// ── Cancellation ─────────────────────────────────────────────────────

/// Atomic flag plus a condvar so sleeping pollers wake as soon as it is set.
#[derive(Debug, Default)]
pub struct CancelToken {
    flag: AtomicBool,
    lock: Mutex<()>,
    cv: Condvar,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
        let _guard = self.lock.lock();
        self.cv.notify_all();
    }

    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Sleep for up to `timeout`. Returns whether the token was cancelled.
    pub fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.lock.lock();
        while !self.is_cancelled() {
            if self.cv.wait_until(&mut guard, deadline).timed_out() {
                break;
            }
        }
        self.is_cancelled()
    }
}

// ── Snap clock ───────────────────────────────────────────────────────

/// The last minute handed to the processors, shared by the live path and
/// the replay worker.
#[derive(Debug, Clone, Default)]
pub struct SnapClock(Arc<RwLock<Option<DateTime<Utc>>>>);

impl SnapClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<DateTime<Utc>> {
        *self.0.read()
    }

    pub fn set(&self, t: DateTime<Utc>) {
        *self.0.write() = Some(t);
    }

    /// Move forward to `t`; earlier times are ignored.
    pub fn advance(&self, t: DateTime<Utc>) -> bool {
        let mut slot = self.0.write();
        if slot.map_or(true, |last| t > last) {
            *slot = Some(t);
            true
        } else {
            false
        }
    }
}

// ── Shared state ─────────────────────────────────────────────────────

pub type ProgressCallback = Arc<dyn Fn(&ReplayProgress) + Send + Sync>;
pub type StateCallback = Arc<dyn Fn(ReplayModeState) + Send + Sync>;

struct Status {
    progress: ReplayProgress,
    latest_live_bin: Option<String>,
    running: bool,
}

struct Shared {
    status: Mutex<Status>,
    cancel: CancelToken,
    snap: SnapClock,
    processors: RwLock<Vec<Arc<dyn MarketDataProcessor>>>,
    on_progress: RwLock<Option<ProgressCallback>>,
    on_complete: RwLock<Option<ProgressCallback>>,
    on_state: RwLock<Option<StateCallback>>,
}

impl Shared {
    fn set_state(&self, state: ReplayModeState) {
        {
            let mut status = self.status.lock();
            if status.progress.state == state {
                return;
            }
            info!(from = ?status.progress.state, to = ?state, "replay state");
            status.progress.state = state;
            status.progress.last_updated = Utc::now();
        }
        self.notify_state(state);
    }

    fn notify_state(&self, state: ReplayModeState) {
        let callback = self.on_state.read().clone();
        if let Some(callback) = callback {
            callback(state);
        }
    }

    fn dispatch(&self, bin: &MarketBin, bypass: bool) -> Result<(), ProcessError> {
        let processors = self.processors.read().clone();
        for processor in &processors {
            processor.process_market_data_bin(&bin.equity, &bin.fx, bypass)?;
        }
        Ok(())
    }
}

/// Set once the worker thread has finished, panicking or not.
#[derive(Default)]
struct Completion {
    done: Mutex<bool>,
    cv: Condvar,
}

impl Completion {
    fn signal(&self) {
        *self.done.lock() = true;
        self.cv.notify_all();
    }

    fn is_done(&self) -> bool {
        *self.done.lock()
    }

    fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut done = self.done.lock();
        while !*done {
            if self.cv.wait_until(&mut done, deadline).timed_out() {
                break;
            }
        }
        *done
    }
}

struct Worker {
    handle: JoinHandle<()>,
    done: Arc<Completion>,
}

// ── Engine ───────────────────────────────────────────────────────────

pub struct ReplayEngine {
    config: ReplayConfig,
    loader: Arc<DataLoader>,
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
    leaked: Mutex<Option<Worker>>,
}

impl ReplayEngine {
    pub fn new(config: ReplayConfig, loader: Arc<DataLoader>, snap: SnapClock) -> Self {
        Self {
            config,
            loader,
            shared: Arc::new(Shared {
                status: Mutex::new(Status {
                    progress: ReplayProgress::idle(),
                    latest_live_bin: None,
                    running: false,
                }),
                cancel: CancelToken::new(),
                snap,
                processors: RwLock::new(Vec::new()),
                on_progress: RwLock::new(None),
                on_complete: RwLock::new(None),
                on_state: RwLock::new(None),
            }),
            worker: Mutex::new(None),
            leaked: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ReplayConfig {
        &self.config
    }

    pub fn snap_clock(&self) -> &SnapClock {
        &self.shared.snap
    }

    pub fn add_processor(&self, processor: Arc<dyn MarketDataProcessor>) {
        self.shared.processors.write().push(processor);
    }

    pub fn on_progress(&self, callback: impl Fn(&ReplayProgress) + Send + Sync + 'static) {
        *self.shared.on_progress.write() = Some(Arc::new(callback));
    }

    pub fn on_complete(&self, callback: impl Fn(&ReplayProgress) + Send + Sync + 'static) {
        *self.shared.on_complete.write() = Some(Arc::new(callback));
    }

    pub fn on_state_change(&self, callback: impl Fn(ReplayModeState) + Send + Sync + 'static) {
        *self.shared.on_state.write() = Some(Arc::new(callback));
    }

    /// Run `bin` through every processor on the calling thread.
    pub fn dispatch(&self, bin: &MarketBin, bypass_replay_detection: bool) -> Result<(), ProcessError> {
        self.shared.dispatch(bin, bypass_replay_detection)
    }

    /// Start backfilling from `last_snap_time` toward `target_live_time`.
    pub fn enter_replay_mode<Tz1: TimeZone, Tz2: TimeZone>(
        &self,
        last_snap_time: DateTime<Tz1>,
        target_live_time: DateTime<Tz2>,
    ) -> Result<ReplayEntry, ReplayError> {
        let from = last_snap_time.with_timezone(&Utc);
        let target = target_live_time.with_timezone(&Utc);

        let mut slot = self.worker.lock();
        self.check_leaked()?;
        {
            let status = self.shared.status.lock();
            if status.progress.state == ReplayModeState::Error {
                return Err(ReplayError::InErrorState(
                    status.progress.error_message.clone().unwrap_or_default(),
                ));
            }
        }
        if slot.as_ref().is_some_and(|w| !w.done.is_done()) {
            return Err(ReplayError::AlreadyRunning);
        }
        if let Some(finished) = slot.take() {
            let _ = finished.handle.join();
        }

        let total = minutes_between(from, target);
        if total <= 0 {
            debug!(from = %from, target = %target, "nothing to replay");
            return Ok(ReplayEntry::AlreadyCurrent);
        }

        {
            let mut status = self.shared.status.lock();
            status.progress = ReplayProgress::start(from, target, total);
            status.latest_live_bin = Some(bin_key(target));
            status.running = true;
        }
        self.shared.cancel.reset();
        self.shared.notify_state(ReplayModeState::ReplayWaiting);

        let done = Arc::new(Completion::default());
        let ctx = WorkerContext {
            shared: Arc::clone(&self.shared),
            loader: Arc::clone(&self.loader),
            config: self.config.clone(),
            done: Arc::clone(&done),
        };
        let handle = thread::Builder::new()
            .name("tapeline-replay".into())
            .spawn(move || run(ctx))
            .map_err(|e| {
                let mut status = self.shared.status.lock();
                status.running = false;
                status.progress.state = ReplayModeState::Live;
                ReplayError::Spawn(e.to_string())
            })?;
        *slot = Some(Worker { handle, done });

        info!(from = %from, target = %target, total_minutes = total, "replay started");
        Ok(ReplayEntry::Started {
            total_minutes: total,
        })
    }

    /// A leaked worker blocks new runs until it finishes on its own.
    fn check_leaked(&self) -> Result<(), ReplayError> {
        let mut leaked = self.leaked.lock();
        match leaked.as_ref() {
            None => Ok(()),
            Some(worker) if worker.done.is_done() => {
                if let Some(worker) = leaked.take() {
                    let _ = worker.handle.join();
                }
                info!("leaked replay worker has finished");
                Ok(())
            }
            Some(_) => Err(ReplayError::WorkerLeaked),
        }
    }

    /// Cancel the running replay and wait for its worker.
    ///
    /// Returns `Ok(false)` when no worker existed. A worker that misses the
    /// join timeout is kept as leaked and reported as an error.
    pub fn stop_replay(&self) -> Result<bool, ReplayError> {
        let mut slot = self.worker.lock();
        let Some(worker) = slot.take() else {
            return Ok(false);
        };

        self.shared.cancel.cancel();
        if worker.done.wait(self.config.join_timeout()) {
            if worker.handle.join().is_err() {
                warn!("replay worker ended with a panic");
            }
            Ok(true)
        } else {
            error!(
                timeout_ms = self.config.join_timeout_ms,
                "replay worker did not stop in time; marking it leaked"
            );
            *self.leaked.lock() = Some(worker);
            Err(ReplayError::WorkerLeaked)
        }
    }

    pub fn status(&self) -> ReplayProgress {
        self.shared.status.lock().progress.clone()
    }

    pub fn is_running(&self) -> bool {
        self.shared.status.lock().running
    }

    pub fn latest_live_bin(&self) -> Option<String> {
        self.shared.status.lock().latest_live_bin.clone()
    }

    /// Note a live bin seen while replaying. Only moves forward.
    pub fn set_latest_live_bin<Tz: TimeZone>(&self, t: DateTime<Tz>) {
        let key = bin_key(t);
        let mut status = self.shared.status.lock();
        if status.latest_live_bin.as_ref().map_or(true, |k| key > *k) {
            debug!(bin = %key, "latest live bin");
            status.latest_live_bin = Some(key);
        }
    }

    /// Leave the error state. Returns whether it was in it.
    pub fn reset_error(&self) -> bool {
        {
            let mut status = self.shared.status.lock();
            if status.progress.state != ReplayModeState::Error {
                return false;
            }
            status.progress.error_message = None;
        }
        self.shared.set_state(ReplayModeState::Live);
        true
    }
}

impl Drop for ReplayEngine {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.get_mut().take() {
            self.shared.cancel.cancel();
            if worker.done.wait(self.config.join_timeout()) {
                let _ = worker.handle.join();
            } else {
                warn!("replay worker still running at shutdown; detaching");
            }
        }
    }
}

// ── Worker ───────────────────────────────────────────────────────────

struct WorkerContext {
    shared: Arc<Shared>,
    loader: Arc<DataLoader>,
    config: ReplayConfig,
    done: Arc<Completion>,
}

enum Exit {
    CaughtUp,
    Cancelled,
    Failed(String),
}

enum Wait {
    Ready(MarketBin),
    GaveUp,
    Cancelled,
}

/// Marks the run finished when the worker exits, including by panic.
struct FinishGuard {
    shared: Arc<Shared>,
    done: Arc<Completion>,
}

impl Drop for FinishGuard {
    fn drop(&mut self) {
        if thread::panicking() {
            error!("replay worker panicked");
            let mut status = self.shared.status.lock();
            status.progress.state = ReplayModeState::Error;
            status.progress.error_message = Some("replay worker panicked".into());
            status.running = false;
        }
        self.done.signal();
    }
}

fn run(ctx: WorkerContext) {
    let _guard = FinishGuard {
        shared: Arc::clone(&ctx.shared),
        done: Arc::clone(&ctx.done),
    };
    let exit = replay_loop(&ctx);
    finish(&ctx.shared, exit);
}

fn replay_loop(ctx: &WorkerContext) -> Exit {
    loop {
        if ctx.shared.cancel.is_cancelled() {
            return Exit::Cancelled;
        }

        let next = ctx.shared.status.lock().progress.current_time + minute();
        let bin = match wait_for_bin(ctx, next) {
            Wait::Ready(bin) => bin,
            Wait::GaveUp => return Exit::CaughtUp,
            Wait::Cancelled => return Exit::Cancelled,
        };

        ctx.shared.set_state(ReplayModeState::ReplayProcessing);
        if let Err(e) = ctx.shared.dispatch(&bin, true) {
            return Exit::Failed(format!("bin {}: {e}", bin_key(next)));
        }
        ctx.shared.snap.advance(next);

        let progress = {
            let mut status = ctx.shared.status.lock();
            status.progress.advance(next);
            status.progress.clone()
        };
        debug!(
            bin = %bin_key(next),
            completed = progress.completed_minutes,
            total = progress.total_minutes,
            "bin replayed"
        );
        let callback = ctx.shared.on_progress.read().clone();
        if let Some(callback) = callback {
            callback(&progress);
        }
    }
}

fn wait_for_bin(ctx: &WorkerContext, next: DateTime<Utc>) -> Wait {
    let key = bin_key(next);
    let mut checks = 0u32;
    loop {
        if ctx.shared.cancel.is_cancelled() {
            return Wait::Cancelled;
        }
        match ctx.loader.load_bin(next) {
            Ok(bin) if !bin.is_empty() => return Wait::Ready(bin),
            Ok(_) => debug!(bin = %key, "bin not available yet"),
            Err(e) => warn!(bin = %key, error = %e, "bin load failed; will retry"),
        }
        checks += 1;

        let live = ctx
            .shared
            .status
            .lock()
            .latest_live_bin
            .as_ref()
            .map_or(true, |latest| key >= *latest);
        if live && checks >= ctx.config.live_bin_max_checks {
            info!(bin = %key, checks, "live bin not available; handing back to live");
            return Wait::GaveUp;
        }
        if ctx.shared.cancel.wait(ctx.config.polling_interval()) {
            return Wait::Cancelled;
        }
    }
}

fn finish(shared: &Shared, exit: Exit) {
    match exit {
        Exit::CaughtUp => {
            shared.set_state(ReplayModeState::ReplayComplete);
            let progress = shared.status.lock().progress.clone();
            info!(
                completed = progress.completed_minutes,
                snapped = ?shared.snap.get(),
                "replay complete"
            );
            let callback = shared.on_complete.read().clone();
            if let Some(callback) = callback {
                callback(&progress);
            }
            shared.set_state(ReplayModeState::Live);
        }
        Exit::Cancelled => {
            info!("replay stopped");
            shared.set_state(ReplayModeState::Live);
        }
        Exit::Failed(message) => {
            error!(error = %message, "replay failed");
            shared.status.lock().progress.error_message = Some(message);
            shared.set_state(ReplayModeState::Error);
        }
    }
    shared.status.lock().running = false;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap()
    }

    #[test]
    fn progress_invariant_holds_past_target() {
        let mut p = ReplayProgress::start(t0(), t0() + ChronoDuration::minutes(2), 2);
        assert_eq!(p.progress_percentage(), 0.0);
        for i in 1..=4 {
            p.advance(t0() + ChronoDuration::minutes(i));
            assert!(p.is_consistent());
        }
        assert_eq!(p.total_minutes, 4);
        assert_eq!(p.remaining_minutes, 0);
        assert_eq!(p.progress_percentage(), 100.0);
    }

    #[test]
    fn idle_progress_is_complete() {
        let p = ReplayProgress::idle();
        assert_eq!(p.state, ReplayModeState::Live);
        assert_eq!(p.progress_percentage(), 100.0);
        assert!(p.is_consistent());
    }

    #[test]
    fn cancel_wakes_a_sleeping_waiter() {
        let token = Arc::new(CancelToken::new());
        let waiter = {
            let token = Arc::clone(&token);
            thread::spawn(move || {
                let started = Instant::now();
                let cancelled = token.wait(Duration::from_secs(30));
                (cancelled, started.elapsed())
            })
        };
        thread::sleep(Duration::from_millis(20));
        token.cancel();
        let (cancelled, elapsed) = waiter.join().unwrap();
        assert!(cancelled);
        assert!(elapsed < Duration::from_secs(5));

        token.reset();
        assert!(!token.wait(Duration::from_millis(5)));
    }

    #[test]
    fn snap_clock_only_moves_forward() {
        let clock = SnapClock::new();
        assert!(clock.advance(t0()));
        assert!(!clock.advance(t0() - ChronoDuration::minutes(1)));
        assert_eq!(clock.get(), Some(t0()));
        clock.set(t0() - ChronoDuration::minutes(5));
        assert_eq!(clock.get(), Some(t0() - ChronoDuration::minutes(5)));
    }

    #[test]
    fn state_serializes_screaming_snake() {
        assert_eq!(
            serde_json::to_string(&ReplayModeState::ReplayProcessing).unwrap(),
            "\"REPLAY_PROCESSING\""
        );
    }
}
