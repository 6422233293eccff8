//! Parquet bar store with date partitioning.
//!
//! Layout: `{root}/date={YYYY-MM-DD}/{HHMM}.equity.parquet` and
//! `{root}/date={YYYY-MM-DD}/{HHMM}.fx.parquet`
//!
//! - Atomic writes (write to .tmp, rename into place), so a reader never sees
//!   a half-written minute
//! - Prices are stored as decimal strings, timestamps as epoch milliseconds
//! - Corrupt files are quarantined (`{filename}.quarantined`) and reported
//!   as an error; the next read of that minute sees it as absent

use super::{BarStore, DataError};
use crate::bins::floor_to_minute;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use polars::prelude::*;
use rust_decimal::Decimal;
use std::fs;
use std::path::{Path, PathBuf};
use tapeline_core::{EquityBar, FxRate, MarketBin};
use tracing::{debug, warn};

const EQUITY_SUFFIX: &str = ".equity.parquet";
const FX_SUFFIX: &str = ".fx.parquet";

pub struct ParquetBarStore {
    root: PathBuf,
}

impl ParquetBarStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `{root}/date={YYYY-MM-DD}/`
    fn date_dir(&self, date: NaiveDate) -> PathBuf {
        self.root.join(format!("date={}", date.format("%Y-%m-%d")))
    }

    fn equity_path(&self, minute: DateTime<Utc>) -> PathBuf {
        self.date_dir(minute.date_naive())
            .join(format!("{}{EQUITY_SUFFIX}", minute.format("%H%M")))
    }

    fn fx_path(&self, minute: DateTime<Utc>) -> PathBuf {
        self.date_dir(minute.date_naive())
            .join(format!("{}{FX_SUFFIX}", minute.format("%H%M")))
    }

    /// Write one minute. Existing files for that minute are replaced.
    pub fn write_bin(&self, bin: &MarketBin) -> Result<(), DataError> {
        if bin.is_empty() {
            return Err(DataError::ValidationError(format!(
                "bin {} has no equity bars",
                bin.timestamp
            )));
        }
        let minute = floor_to_minute(bin.timestamp);

        let dir = self.date_dir(minute.date_naive());
        fs::create_dir_all(&dir)
            .map_err(|e| DataError::ParquetError(format!("failed to create dir: {e}")))?;

        write_atomic(&equity_to_dataframe(&bin.equity)?, &self.equity_path(minute))?;
        if !bin.fx.is_empty() {
            write_atomic(&fx_to_dataframe(&bin.fx)?, &self.fx_path(minute))?;
        }
        debug!(minute = %minute, bars = bin.equity.len(), fx = bin.fx.len(), "bin written");
        Ok(())
    }

    /// Minutes with an equity file on `date`, ascending.
    fn minutes_on(&self, date: NaiveDate) -> Result<Vec<DateTime<Utc>>, DataError> {
        let dir = self.date_dir(date);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut minutes = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(hhmm) = name.to_str().and_then(|n| n.strip_suffix(EQUITY_SUFFIX)) else {
                continue;
            };
            match NaiveTime::parse_from_str(hhmm, "%H%M") {
                Ok(time) => minutes.push(date.and_time(time).and_utc()),
                Err(_) => debug!(file = ?entry.path(), "ignoring unrecognized file"),
            }
        }
        minutes.sort();
        Ok(minutes)
    }

    /// Partition dates present under the root, ascending.
    fn dates(&self) -> Result<Vec<NaiveDate>, DataError> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut dates = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.path().is_dir() {
                continue;
            }
            let name = entry.file_name();
            if let Some(date) = name
                .to_str()
                .and_then(|n| n.strip_prefix("date="))
                .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
            {
                dates.push(date);
            }
        }
        dates.sort();
        Ok(dates)
    }
}

impl BarStore for ParquetBarStore {
    fn name(&self) -> &str {
        "parquet"
    }

    fn load_bin(&self, minute: DateTime<Utc>) -> Result<MarketBin, DataError> {
        let minute = floor_to_minute(minute);
        let equity_path = self.equity_path(minute);
        if !equity_path.exists() {
            return Ok(MarketBin::empty(minute));
        }

        let equity = read_or_quarantine(&equity_path, |df| dataframe_to_equity(df, minute))?;
        let fx_path = self.fx_path(minute);
        let fx = if fx_path.exists() {
            read_or_quarantine(&fx_path, |df| dataframe_to_fx(df, minute))?
        } else {
            Vec::new()
        };

        Ok(MarketBin {
            timestamp: minute,
            equity,
            fx,
        })
    }

    fn latest_bin(&self) -> Result<Option<DateTime<Utc>>, DataError> {
        for date in self.dates()?.into_iter().rev() {
            if let Some(last) = self.minutes_on(date)?.pop() {
                return Ok(Some(last));
            }
        }
        Ok(None)
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
        let mut out = Vec::new();
        for date in self
            .dates()?
            .into_iter()
            .filter(|d| *d >= start.date_naive() && *d <= end.date_naive())
        {
            out.extend(
                self.minutes_on(date)?
                    .into_iter()
                    .filter(|t| *t >= start && *t <= end),
            );
        }
        Ok(out)
    }
}

// ── Parquet I/O helpers ─────────────────────────────────────────────

fn write_atomic(df: &DataFrame, path: &Path) -> Result<(), DataError> {
    let tmp_path = path.with_extension("parquet.tmp");
    write_parquet(df, &tmp_path)?;
    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        DataError::ParquetError(format!("atomic rename failed: {e}"))
    })
}

fn write_parquet(df: &DataFrame, path: &Path) -> Result<(), DataError> {
    let file =
        fs::File::create(path).map_err(|e| DataError::ParquetError(format!("create file: {e}")))?;
    ParquetWriter::new(file)
        .finish(&mut df.clone())
        .map_err(|e| DataError::ParquetError(format!("write parquet: {e}")))?;
    Ok(())
}

fn read_parquet(path: &Path) -> Result<DataFrame, DataError> {
    let file = fs::File::open(path).map_err(|e| DataError::ParquetError(format!("open: {e}")))?;
    ParquetReader::new(file)
        .finish()
        .map_err(|e| DataError::ParquetError(format!("read: {e}")))
}

fn read_or_quarantine<T>(
    path: &Path,
    convert: impl FnOnce(&DataFrame) -> Result<Vec<T>, DataError>,
) -> Result<Vec<T>, DataError> {
    let result = read_parquet(path).and_then(|df| convert(&df));
    if let Err(e) = &result {
        let quarantine = path.with_extension("parquet.quarantined");
        warn!(file = %path.display(), error = %e, "quarantining corrupt bin file");
        let _ = fs::rename(path, &quarantine);
    }
    result
}

fn column_err(e: PolarsError) -> DataError {
    DataError::ParquetError(format!("column read: {e}"))
}

fn parse_decimal(raw: Option<&str>, column: &str, row: usize) -> Result<Decimal, DataError> {
    raw.ok_or_else(|| DataError::ValidationError(format!("null {column} at row {row}")))?
        .parse::<Decimal>()
        .map_err(|e| DataError::ValidationError(format!("bad {column} at row {row}: {e}")))
}

fn required_str<'a>(raw: Option<&'a str>, column: &str, row: usize) -> Result<&'a str, DataError> {
    raw.ok_or_else(|| DataError::ValidationError(format!("null {column} at row {row}")))
}

fn equity_to_dataframe(bars: &[EquityBar]) -> Result<DataFrame, DataError> {
    let ts: Vec<i64> = bars
        .iter()
        .map(|b| floor_to_minute(b.timestamp).timestamp_millis())
        .collect();
    let symbols: Vec<String> = bars.iter().map(|b| b.symbol.clone()).collect();
    let opens: Vec<String> = bars.iter().map(|b| b.open.to_string()).collect();
    let highs: Vec<String> = bars.iter().map(|b| b.high.to_string()).collect();
    let lows: Vec<String> = bars.iter().map(|b| b.low.to_string()).collect();
    let closes: Vec<String> = bars.iter().map(|b| b.close.to_string()).collect();
    let volumes: Vec<u64> = bars.iter().map(|b| b.volume).collect();
    let currencies: Vec<String> = bars.iter().map(|b| b.currency.clone()).collect();

    DataFrame::new(vec![
        Column::new("ts".into(), ts),
        Column::new("symbol".into(), symbols),
        Column::new("open".into(), opens),
        Column::new("high".into(), highs),
        Column::new("low".into(), lows),
        Column::new("close".into(), closes),
        Column::new("volume".into(), volumes),
        Column::new("currency".into(), currencies),
    ])
    .map_err(|e| DataError::ParquetError(format!("dataframe creation: {e}")))
}

fn fx_to_dataframe(rates: &[FxRate]) -> Result<DataFrame, DataError> {
    let ts: Vec<i64> = rates
        .iter()
        .map(|r| floor_to_minute(r.timestamp).timestamp_millis())
        .collect();
    let bases: Vec<String> = rates.iter().map(|r| r.base.clone()).collect();
    let quotes: Vec<String> = rates.iter().map(|r| r.quote.clone()).collect();
    let values: Vec<String> = rates.iter().map(|r| r.rate.to_string()).collect();

    DataFrame::new(vec![
        Column::new("ts".into(), ts),
        Column::new("base".into(), bases),
        Column::new("quote".into(), quotes),
        Column::new("rate".into(), values),
    ])
    .map_err(|e| DataError::ParquetError(format!("dataframe creation: {e}")))
}

fn dataframe_to_equity(df: &DataFrame, minute: DateTime<Utc>) -> Result<Vec<EquityBar>, DataError> {
    if df.height() == 0 {
        return Err(DataError::ValidationError("empty parquet file".into()));
    }

    let symbols = df.column("symbol").map_err(column_err)?.str().map_err(column_err)?;
    let opens = df.column("open").map_err(column_err)?.str().map_err(column_err)?;
    let highs = df.column("high").map_err(column_err)?.str().map_err(column_err)?;
    let lows = df.column("low").map_err(column_err)?.str().map_err(column_err)?;
    let closes = df.column("close").map_err(column_err)?.str().map_err(column_err)?;
    let volumes = df.column("volume").map_err(column_err)?.u64().map_err(column_err)?;
    let currencies = df.column("currency").map_err(column_err)?.str().map_err(column_err)?;

    (0..df.height())
        .map(|i| {
            Ok(EquityBar {
                symbol: required_str(symbols.get(i), "symbol", i)?.to_string(),
                timestamp: minute,
                open: parse_decimal(opens.get(i), "open", i)?,
                high: parse_decimal(highs.get(i), "high", i)?,
                low: parse_decimal(lows.get(i), "low", i)?,
                close: parse_decimal(closes.get(i), "close", i)?,
                volume: volumes.get(i).unwrap_or(0),
                currency: required_str(currencies.get(i), "currency", i)?.to_string(),
            })
        })
        .collect()
}

fn dataframe_to_fx(df: &DataFrame, minute: DateTime<Utc>) -> Result<Vec<FxRate>, DataError> {
    let bases = df.column("base").map_err(column_err)?.str().map_err(column_err)?;
    let quotes = df.column("quote").map_err(column_err)?.str().map_err(column_err)?;
    let rates = df.column("rate").map_err(column_err)?.str().map_err(column_err)?;

    (0..df.height())
        .map(|i| {
            Ok(FxRate {
                base: required_str(bases.get(i), "base", i)?.to_string(),
                quote: required_str(quotes.get(i), "quote", i)?.to_string(),
                rate: parse_decimal(rates.get(i), "rate", i)?,
                timestamp: minute,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 14, 30, 0).unwrap()
    }

    fn sample_bin(at: DateTime<Utc>) -> MarketBin {
        MarketBin {
            timestamp: at,
            equity: vec![
                EquityBar {
                    symbol: "SPY".into(),
                    timestamp: at,
                    open: dec!(450.10),
                    high: dec!(450.55),
                    low: dec!(449.90),
                    close: dec!(450.25),
                    volume: 12_000,
                    currency: "USD".into(),
                },
                EquityBar {
                    symbol: "VOD".into(),
                    timestamp: at,
                    open: dec!(0.7120),
                    high: dec!(0.7130),
                    low: dec!(0.7110),
                    close: dec!(0.7125),
                    volume: 400_000,
                    currency: "GBP".into(),
                },
            ],
            fx: vec![FxRate {
                base: "GBP".into(),
                quote: "USD".into(),
                rate: dec!(1.2634),
                timestamp: at,
            }],
        }
    }

    #[test]
    fn write_and_load_keep_exact_decimals() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParquetBarStore::new(dir.path());

        store.write_bin(&sample_bin(t0())).unwrap();
        let loaded = store.load_bin(t0() + Duration::seconds(30)).unwrap();

        assert_eq!(loaded, sample_bin(t0()));
        assert!(dir
            .path()
            .join("date=2024-03-01")
            .join("1430.equity.parquet")
            .exists());
        assert!(dir.path().join("date=2024-03-01").join("1430.fx.parquet").exists());
    }

    #[test]
    fn missing_minute_is_an_empty_bin() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParquetBarStore::new(dir.path());
        let bin = store.load_bin(t0()).unwrap();
        assert!(bin.is_empty());
        assert_eq!(bin.timestamp, t0());
    }

    #[test]
    fn writing_an_empty_bin_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParquetBarStore::new(dir.path());
        assert!(matches!(
            store.write_bin(&MarketBin::empty(t0())),
            Err(DataError::ValidationError(_))
        ));
    }

    #[test]
    fn latest_and_list_scan_partitions() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParquetBarStore::new(dir.path());
        assert_eq!(store.latest_bin().unwrap(), None);

        let next_day = t0() + Duration::days(1);
        for at in [t0(), t0() + Duration::minutes(2), next_day] {
            store.write_bin(&sample_bin(at)).unwrap();
        }

        assert_eq!(store.latest_bin().unwrap(), Some(next_day));
        assert_eq!(
            store.list_bins(t0(), t0() + Duration::minutes(5)).unwrap(),
            vec![t0(), t0() + Duration::minutes(2)]
        );
        assert_eq!(store.list_bins(t0(), next_day).unwrap().len(), 3);
        assert!(store.list_bins(next_day, t0()).unwrap().is_empty());
    }

    #[test]
    fn corrupt_file_is_quarantined() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParquetBarStore::new(dir.path());
        let path = store.equity_path(t0());
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"not parquet").unwrap();

        assert!(store.load_bin(t0()).is_err());
        assert!(!path.exists());
        assert!(store.load_bin(t0()).unwrap().is_empty());
    }
}
