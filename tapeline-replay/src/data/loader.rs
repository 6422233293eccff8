//! Bounded, timed access to a bar store.
//!
//! Store calls run on a private rayon pool sized by `worker_threads`; excess
//! calls queue behind it. The caller waits at most `call_timeout` for each
//! result. A call that times out is "no data yet": an empty bin, no latest
//! minute, or an empty listing.

use super::{BarStore, DataError, ParquetBarStore, PostgresBarStore};
use crate::bins::{floor_to_minute, missing_minutes_in};
use crate::config::{DataBackend, DataConfig};
use chrono::{DateTime, TimeZone, Utc};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;
use tapeline_core::MarketBin;
use tracing::{error, info, warn};

pub struct DataLoader {
    store: Arc<dyn BarStore>,
    pool: rayon::ThreadPool,
    call_timeout: Duration,
}

impl DataLoader {
    pub fn new(
        store: Arc<dyn BarStore>,
        worker_threads: usize,
        call_timeout: Duration,
    ) -> Result<Self, DataError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(worker_threads.max(1))
            .thread_name(|i| format!("tapeline-store-{i}"))
            .panic_handler(|_| error!("bar store call panicked"))
            .build()
            .map_err(|e| DataError::PoolError(e.to_string()))?;
        Ok(Self {
            store,
            pool,
            call_timeout,
        })
    }

    /// Build the store named by `config.backend`.
    pub fn from_config(config: &DataConfig) -> Result<Self, DataError> {
        let store: Arc<dyn BarStore> = match config.backend {
            DataBackend::File => Arc::new(ParquetBarStore::new(&config.root)),
            DataBackend::Postgres => {
                let conn = config.connection_string.as_deref().ok_or_else(|| {
                    DataError::ConfigError("postgres backend needs a connection_string".into())
                })?;
                Arc::new(PostgresBarStore::connect_lazy(conn)?)
            }
        };
        info!(
            store = store.name(),
            workers = config.worker_threads,
            timeout_ms = config.call_timeout_ms,
            "data loader ready"
        );
        Self::new(store, config.worker_threads, config.call_timeout())
    }

    pub fn store_name(&self) -> &str {
        self.store.name()
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// Run `f` on the pool. `Ok(None)` means it did not finish in time.
    fn call<T, F>(&self, what: &'static str, f: F) -> Result<Option<T>, DataError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn BarStore) -> Result<T, DataError> + Send + 'static,
    {
        let (tx, rx) = mpsc::sync_channel(1);
        let store = Arc::clone(&self.store);
        self.pool.spawn(move || {
            // Receiver may be gone after a timeout.
            let _ = tx.send(f(store.as_ref()));
        });

        match rx.recv_timeout(self.call_timeout) {
            Ok(result) => result.map(Some),
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    store = self.store.name(),
                    call = what,
                    timeout_ms = self.call_timeout.as_millis() as u64,
                    "store call timed out"
                );
                Ok(None)
            }
            Err(RecvTimeoutError::Disconnected) => Err(DataError::WorkerLost { what }),
        }
    }

    /// Bars and FX rates for the minute containing `minute`.
    pub fn load_bin<Tz: TimeZone>(&self, minute: DateTime<Tz>) -> Result<MarketBin, DataError> {
        let minute = floor_to_minute(minute);
        Ok(self
            .call("load_bin", move |store| store.load_bin(minute))?
            .unwrap_or_else(|| MarketBin::empty(minute)))
    }

    pub fn latest_bin(&self) -> Result<Option<DateTime<Utc>>, DataError> {
        Ok(self.call("latest_bin", |store| store.latest_bin())?.flatten())
    }

    pub fn list_bins<Tz1: TimeZone, Tz2: TimeZone>(
        &self,
        start: DateTime<Tz1>,
        end: DateTime<Tz2>,
    ) -> Result<Vec<DateTime<Utc>>, DataError> {
        let start = start.with_timezone(&Utc);
        let end = end.with_timezone(&Utc);
        Ok(self
            .call("list_bins", move |store| store.list_bins(start, end))?
            .unwrap_or_default())
    }

    /// Minutes in `[start, end]` the store has no equity data for.
    pub fn find_missing_bins<Tz1: TimeZone, Tz2: TimeZone>(
        &self,
        start: DateTime<Tz1>,
        end: DateTime<Tz2>,
    ) -> Result<Vec<DateTime<Utc>>, DataError> {
        let start = start.with_timezone(&Utc);
        let end = end.with_timezone(&Utc);
        let present = self.list_bins(start, end)?;
        Ok(missing_minutes_in(&present, start, end))
    }
}
