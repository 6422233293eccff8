//! Postgres bar store.
//!
//! Tables:
//! - `equity_bars(ts, symbol, open, high, low, close, volume, currency)`
//! - `fx_rates(ts, base, quote, rate)`
//!
//! Calls are synchronous to the caller and run on a private one-worker tokio
//! runtime. The connection is opened on first use and re-opened on the next
//! call after it closes.

use super::{BarStore, DataError};
use crate::bins::floor_to_minute;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::sync::Arc;
use tapeline_core::{EquityBar, FxRate, MarketBin};
use tokio::runtime::Runtime;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, Config, NoTls, Row};
use tracing::{debug, info, warn};

pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS equity_bars (
    ts       TIMESTAMPTZ NOT NULL,
    symbol   TEXT        NOT NULL,
    open     NUMERIC     NOT NULL,
    high     NUMERIC     NOT NULL,
    low      NUMERIC     NOT NULL,
    close    NUMERIC     NOT NULL,
    volume   BIGINT      NOT NULL,
    currency TEXT        NOT NULL,
    PRIMARY KEY (ts, symbol)
);
CREATE TABLE IF NOT EXISTS fx_rates (
    ts    TIMESTAMPTZ NOT NULL,
    base  TEXT        NOT NULL,
    quote TEXT        NOT NULL,
    rate  NUMERIC     NOT NULL,
    PRIMARY KEY (ts, base, quote)
);
";

const SELECT_EQUITY: &str = "SELECT symbol, open, high, low, close, volume, currency \
     FROM equity_bars WHERE ts = $1 ORDER BY symbol";
const SELECT_FX: &str = "SELECT base, quote, rate FROM fx_rates WHERE ts = $1 ORDER BY base, quote";
const SELECT_LATEST: &str = "SELECT max(ts) FROM equity_bars";
const SELECT_RANGE: &str =
    "SELECT DISTINCT ts FROM equity_bars WHERE ts >= $1 AND ts <= $2 ORDER BY ts";
const UPSERT_EQUITY: &str = "INSERT INTO equity_bars \
     (ts, symbol, open, high, low, close, volume, currency) \
     VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
     ON CONFLICT (ts, symbol) DO UPDATE SET \
     open = EXCLUDED.open, high = EXCLUDED.high, low = EXCLUDED.low, \
     close = EXCLUDED.close, volume = EXCLUDED.volume, currency = EXCLUDED.currency";
const UPSERT_FX: &str = "INSERT INTO fx_rates (ts, base, quote, rate) VALUES ($1, $2, $3, $4) \
     ON CONFLICT (ts, base, quote) DO UPDATE SET rate = EXCLUDED.rate";

fn pg_err(e: tokio_postgres::Error) -> DataError {
    DataError::PostgresError(e.to_string())
}

pub struct PostgresBarStore {
    config: Config,
    runtime: Runtime,
    client: Mutex<Option<Arc<Client>>>,
}

impl PostgresBarStore {
    /// Parses the connection string and builds the runtime. No connection
    /// is made until the first call.
    pub fn connect_lazy(connection_string: &str) -> Result<Self, DataError> {
        let config: Config = connection_string
            .parse()
            .map_err(|e: tokio_postgres::Error| DataError::ConfigError(e.to_string()))?;
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("tapeline-pg")
            .enable_all()
            .build()?;
        Ok(Self {
            config,
            runtime,
            client: Mutex::new(None),
        })
    }

    fn client(&self) -> Result<Arc<Client>, DataError> {
        let mut slot = self.client.lock();
        if let Some(client) = slot.as_ref().filter(|c| !c.is_closed()) {
            return Ok(client.clone());
        }

        let (client, connection) = self
            .runtime
            .block_on(self.config.connect(NoTls))
            .map_err(pg_err)?;
        self.runtime.spawn(async move {
            if let Err(e) = connection.await {
                warn!(error = %e, "postgres connection closed");
            }
        });
        info!("postgres connection opened");

        let client = Arc::new(client);
        *slot = Some(client.clone());
        Ok(client)
    }

    /// Drop a dead connection so the next call reconnects.
    fn forget_if_closed(&self, client: &Client) {
        if client.is_closed() {
            *self.client.lock() = None;
        }
    }

    fn query(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> Result<Vec<Row>, DataError> {
        let client = self.client()?;
        self.runtime
            .block_on(client.query(sql, params))
            .map_err(|e| {
                self.forget_if_closed(&client);
                pg_err(e)
            })
    }

    /// Create both tables if they do not exist.
    pub fn ensure_schema(&self) -> Result<(), DataError> {
        let client = self.client()?;
        self.runtime.block_on(client.batch_execute(SCHEMA)).map_err(|e| {
            self.forget_if_closed(&client);
            pg_err(e)
        })
    }

    /// Upsert one minute in a single transaction.
    pub fn write_bin(&self, bin: &MarketBin) -> Result<(), DataError> {
        if bin.is_empty() {
            return Err(DataError::ValidationError(format!(
                "bin {} has no equity bars",
                bin.timestamp
            )));
        }
        let minute = floor_to_minute(bin.timestamp);
        let volumes = bin
            .equity
            .iter()
            .map(|bar| {
                i64::try_from(bar.volume).map_err(|_| {
                    DataError::ValidationError(format!(
                        "{} volume {} at {minute} does not fit a BIGINT",
                        bar.symbol, bar.volume
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let client = self.client()?;

        let result = self.runtime.block_on(async {
            client.batch_execute("BEGIN").await?;
            for (bar, volume) in bin.equity.iter().zip(&volumes) {
                client
                    .execute(
                        UPSERT_EQUITY,
                        &[
                            &minute,
                            &bar.symbol,
                            &bar.open,
                            &bar.high,
                            &bar.low,
                            &bar.close,
                            volume,
                            &bar.currency,
                        ],
                    )
                    .await?;
            }
            for fx in &bin.fx {
                client
                    .execute(UPSERT_FX, &[&minute, &fx.base, &fx.quote, &fx.rate])
                    .await?;
            }
            client.batch_execute("COMMIT").await
        });

        result.map_err(|e| {
            if !client.is_closed() {
                let _ = self.runtime.block_on(client.batch_execute("ROLLBACK"));
            }
            self.forget_if_closed(&client);
            pg_err(e)
        })?;
        debug!(minute = %minute, bars = bin.equity.len(), "bin written to postgres");
        Ok(())
    }
}

impl BarStore for PostgresBarStore {
    fn name(&self) -> &str {
        "postgres"
    }

    fn load_bin(&self, minute: DateTime<Utc>) -> Result<MarketBin, DataError> {
        let minute = floor_to_minute(minute);

        let equity = self
            .query(SELECT_EQUITY, &[&minute])?
            .iter()
            .map(|row| row_to_equity(row, minute))
            .collect::<Result<Vec<_>, _>>()?;
        if equity.is_empty() {
            return Ok(MarketBin::empty(minute));
        }

        let fx = self
            .query(SELECT_FX, &[&minute])?
            .iter()
            .map(|row| row_to_fx(row, minute))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(MarketBin {
            timestamp: minute,
            equity,
            fx,
        })
    }

    fn latest_bin(&self) -> Result<Option<DateTime<Utc>>, DataError> {
        let rows = self.query(SELECT_LATEST, &[])?;
        match rows.first() {
            Some(row) => row.try_get::<_, Option<DateTime<Utc>>>(0).map_err(pg_err),
            None => Ok(None),
        }
    }

    fn list_bins(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>, DataError> {
        let start = floor_to_minute(start);
        if end < start {
            return Ok(Vec::new());
        }
        self.query(SELECT_RANGE, &[&start, &end])?
            .iter()
            .map(|row| row.try_get::<_, DateTime<Utc>>(0).map_err(pg_err))
            .collect()
    }
}

fn row_to_equity(row: &Row, minute: DateTime<Utc>) -> Result<EquityBar, DataError> {
    let volume: i64 = row.try_get("volume").map_err(pg_err)?;
    let volume = u64::try_from(volume)
        .map_err(|_| DataError::ValidationError(format!("negative volume {volume} at {minute}")))?;
    Ok(EquityBar {
        symbol: row.try_get("symbol").map_err(pg_err)?,
        timestamp: minute,
        open: row.try_get::<_, Decimal>("open").map_err(pg_err)?,
        high: row.try_get::<_, Decimal>("high").map_err(pg_err)?,
        low: row.try_get::<_, Decimal>("low").map_err(pg_err)?,
        close: row.try_get::<_, Decimal>("close").map_err(pg_err)?,
        volume,
        currency: row.try_get("currency").map_err(pg_err)?,
    })
}

fn row_to_fx(row: &Row, minute: DateTime<Utc>) -> Result<FxRate, DataError> {
    Ok(FxRate {
        base: row.try_get("base").map_err(pg_err)?,
        quote: row.try_get("quote").map_err(pg_err)?,
        rate: row.try_get::<_, Decimal>("rate").map_err(pg_err)?,
        timestamp: minute,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construction_does_not_connect() {
        let store = PostgresBarStore::connect_lazy("host=127.0.0.1 port=1 user=tapeline").unwrap();
        assert_eq!(store.name(), "postgres");
        assert!(store.client.lock().is_none());
    }

    #[test]
    fn bad_connection_string_is_a_config_error() {
        let err = PostgresBarStore::connect_lazy("host=localhost port=notaport").err();
        assert!(matches!(err, Some(DataError::ConfigError(_))));
    }

    #[test]
    fn oversized_volume_is_rejected_before_connecting() {
        let store = PostgresBarStore::connect_lazy("host=127.0.0.1 port=1 user=tapeline").unwrap();
        let minute = Utc::now();
        let bin = MarketBin {
            equity: vec![EquityBar {
                symbol: "SPY".into(),
                timestamp: minute,
                open: Decimal::ONE,
                high: Decimal::ONE,
                low: Decimal::ONE,
                close: Decimal::ONE,
                volume: u64::MAX,
                currency: "USD".into(),
            }],
            fx: Vec::new(),
            timestamp: minute,
        };
        assert!(matches!(store.write_bin(&bin), Err(DataError::ValidationError(_))));
        assert!(store.client.lock().is_none());
    }

    #[test]
    fn unreachable_server_is_an_error_not_a_panic() {
        let store =
            PostgresBarStore::connect_lazy("host=127.0.0.1 port=1 user=tapeline connect_timeout=1")
                .unwrap();
        let minute = Utc::now();
        assert!(matches!(store.load_bin(minute), Err(DataError::PostgresError(_))));
        assert!(store.client.lock().is_none());
    }
}
