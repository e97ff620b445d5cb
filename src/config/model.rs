// src/config/model.rs

use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Orchestrator settings as read from `Stratrun.toml`.
///
/// ```toml
/// [engine]
/// binary = "freqtrade"
/// backtest_timeout_secs = 3600
///
/// [scheduler]
/// max_workers = 4
///
/// [storage]
/// runs_dir = "backtest_results"
/// ```
///
/// All sections are optional and have reasonable defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawSettings {
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub scheduler: SchedulerSection,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub data: DataSection,
    #[serde(default)]
    pub monitor: MonitorSection,
}

/// Validated settings; only constructed through `TryFrom<RawSettings>`.
#[derive(Debug, Clone)]
pub struct Settings {
    pub engine: EngineSection,
    pub scheduler: SchedulerSection,
    pub storage: StorageSection,
    pub data: DataSection,
    pub monitor: MonitorSection,
}

impl Settings {
    pub(crate) fn new_unchecked(raw: RawSettings) -> Self {
        Self {
            engine: raw.engine,
            scheduler: raw.scheduler,
            storage: raw.storage,
            data: raw.data,
            monitor: raw.monitor,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::new_unchecked(RawSettings::default())
    }
}

/// `[engine]` section: how to reach the external backtesting engine.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineSection {
    #[serde(default = "default_binary")]
    pub binary: PathBuf,

    /// Root of the engine's user data (strategies, downloaded market data).
    #[serde(default = "default_user_data_dir")]
    pub user_data_dir: PathBuf,

    #[serde(default = "default_exchange")]
    pub exchange: String,

    /// Timeout for short metadata calls like `--version`.
    #[serde(default = "default_validate_timeout")]
    pub validate_timeout_secs: u64,

    /// Per-job timeout for the backtest invocation; `0` disables it.
    #[serde(default = "default_backtest_timeout")]
    pub backtest_timeout_secs: u64,

    #[serde(default = "default_download_timeout")]
    pub download_timeout_secs: u64,
}

impl EngineSection {
    pub fn data_dir(&self) -> PathBuf {
        self.user_data_dir.join("data")
    }

    pub fn backtest_timeout(&self) -> Option<Duration> {
        (self.backtest_timeout_secs > 0).then(|| Duration::from_secs(self.backtest_timeout_secs))
    }
}

fn default_binary() -> PathBuf {
    PathBuf::from("freqtrade")
}

fn default_user_data_dir() -> PathBuf {
    PathBuf::from("user_data")
}

fn default_exchange() -> String {
    "binance".to_string()
}

fn default_validate_timeout() -> u64 {
    10
}

fn default_backtest_timeout() -> u64 {
    3600
}

fn default_download_timeout() -> u64 {
    600
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            user_data_dir: default_user_data_dir(),
            exchange: default_exchange(),
            validate_timeout_secs: default_validate_timeout(),
            backtest_timeout_secs: default_backtest_timeout(),
            download_timeout_secs: default_download_timeout(),
        }
    }
}

/// `[scheduler]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerSection {
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
}

fn default_max_workers() -> usize {
    4
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
        }
    }
}

/// `[storage]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageSection {
    /// Parent directory of all run directories.
    #[serde(default = "default_runs_dir")]
    pub runs_dir: PathBuf,

    /// Per-job config artifacts and other scratch files.
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,
}

fn default_runs_dir() -> PathBuf {
    PathBuf::from("backtest_results")
}

fn default_scratch_dir() -> PathBuf {
    PathBuf::from("temp")
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            runs_dir: default_runs_dir(),
            scratch_dir: default_scratch_dir(),
        }
    }
}

/// `[data]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct DataSection {
    /// Dataset files smaller than this are treated as corrupt.
    #[serde(default = "default_min_file_bytes")]
    pub min_file_bytes: u64,

    /// Extra days requested before `start_date` when downloading.
    #[serde(default)]
    pub download_days_padding: u32,
}

fn default_min_file_bytes() -> u64 {
    1024
}

impl Default for DataSection {
    fn default() -> Self {
        Self {
            min_file_bytes: default_min_file_bytes(),
            download_days_padding: 0,
        }
    }
}

/// `[monitor]` section (continuous dry runs).
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorSection {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_stop_grace_secs")]
    pub stop_grace_secs: u64,

    /// Number of recent log lines kept per dry run.
    #[serde(default = "default_log_window")]
    pub log_window: usize,
}

fn default_poll_interval_ms() -> u64 {
    5000
}

fn default_stop_grace_secs() -> u64 {
    10
}

fn default_log_window() -> usize {
    200
}

impl Default for MonitorSection {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            stop_grace_secs: default_stop_grace_secs(),
            log_window: default_log_window(),
        }
    }
}

/// Timeframes the engine accepts.
pub const VALID_TIMEFRAMES: &[&str] = &[
    "1m", "5m", "15m", "30m", "1h", "2h", "4h", "6h", "8h", "12h", "1d", "3d", "1w",
];

/// Configuration shared by every job of one run.
///
/// Immutable once jobs are built from it; `run_id` is filled in exactly once
/// per batch by [`RunConfig::with_run_id`] or [`RunConfig::ensure_run_id`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub timeframe: String,
    pub pairs: Vec<String>,
    pub initial_balance: f64,
    pub max_open_trades: u32,
    #[serde(default = "default_fee")]
    pub fee: f64,
    #[serde(default = "default_stake_amount")]
    pub stake_amount: String,
    #[serde(default)]
    pub enable_position_stacking: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

fn default_fee() -> f64 {
    0.001
}

fn default_stake_amount() -> String {
    "unlimited".to_string()
}

impl RunConfig {
    /// Engine time range, e.g. `20240101-20240301`.
    pub fn timerange(&self) -> String {
        format!(
            "{}-{}",
            self.start_date.format("%Y%m%d"),
            self.end_date.format("%Y%m%d")
        )
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    /// Assign a fresh run id unless one is already present.
    pub fn ensure_run_id(mut self) -> Self {
        if self.run_id.is_none() {
            self.run_id = Some(generate_run_id());
        }
        self
    }
}

/// `run_<YYYYmmdd_HHMMSS>_<token>`.
pub fn generate_run_id() -> String {
    format!(
        "run_{}_{}",
        chrono::Local::now().format("%Y%m%d_%H%M%S"),
        crate::short_token()
    )
}
