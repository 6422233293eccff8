//! TOML configuration for execution, replay, and the bar store.
//!
//! Every section and field has a default, so an empty file is a valid config.
//!
//! ```toml
//! [execution]
//! commission_per_share = "0.005"
//! remainder_policy = "carry"
//!
//! [replay]
//! polling_interval_ms = 5000
//! live_bin_max_checks = 3
//! join_timeout_ms = 10000
//!
//! [data]
//! backend = "file"
//! root = "data/bins"
//! worker_threads = 4
//! call_timeout_ms = 30000
//! ```

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tapeline_core::ExecutionConfig;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

// ── Replay ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// Wait between checks for a bin that has not arrived yet.
    pub polling_interval_ms: u64,
    /// Checks for a live bin before the replay hands back to live processing.
    pub live_bin_max_checks: u32,
    /// How long `stop_replay` waits for the worker to finish.
    pub join_timeout_ms: u64,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            polling_interval_ms: 5_000,
            live_bin_max_checks: 3,
            join_timeout_ms: 10_000,
        }
    }
}

impl ReplayConfig {
    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

// ── Data ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataBackend {
    /// Parquet files under `root`.
    #[default]
    File,
    /// `equity_bars` / `fx_rates` tables reached through `connection_string`.
    Postgres,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub backend: DataBackend,
    pub root: PathBuf,
    pub connection_string: Option<String>,
    /// Size of the pool that runs store calls.
    pub worker_threads: usize,
    pub call_timeout_ms: u64,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            backend: DataBackend::File,
            root: PathBuf::from("data/bins"),
            connection_string: None,
            worker_threads: 4,
            call_timeout_ms: 30_000,
        }
    }
}

impl DataConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

// ── Top level ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TapelineConfig {
    pub execution: ExecutionConfig,
    pub replay: ReplayConfig,
    pub data: DataConfig,
}

impl TapelineConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.execution.commission_per_share < Decimal::ZERO {
            return Err(ConfigError::Invalid(format!(
                "execution.commission_per_share must be >= 0, got {}",
                self.execution.commission_per_share
            )));
        }
        if self.replay.polling_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "replay.polling_interval_ms must be > 0".into(),
            ));
        }
        if self.replay.live_bin_max_checks == 0 {
            return Err(ConfigError::Invalid(
                "replay.live_bin_max_checks must be >= 1".into(),
            ));
        }
        if self.data.worker_threads == 0 {
            return Err(ConfigError::Invalid("data.worker_threads must be >= 1".into()));
        }
        if self.data.call_timeout_ms == 0 {
            return Err(ConfigError::Invalid("data.call_timeout_ms must be > 0".into()));
        }
        if self.data.backend == DataBackend::Postgres
            && self
                .data
                .connection_string
                .as_deref()
                .map_or(true, |s| s.trim().is_empty())
        {
            return Err(ConfigError::Invalid(
                "data.connection_string is required for the postgres backend".into(),
            ));
        }
        Ok(())
    }
}
