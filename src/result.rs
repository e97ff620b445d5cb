// src/result.rs

//! Jobs and the results they resolve to.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::config::RunConfig;
use crate::errors::Result;
use crate::types::ExecutionStatus;

/// One strategy-run request. Never mutated after submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub strategy: String,
    pub config: RunConfig,
}

impl Job {
    pub fn new(strategy: impl Into<String>, config: RunConfig) -> Self {
        Self {
            strategy: strategy.into(),
            config,
        }
    }

    pub fn run_id(&self) -> Option<&str> {
        self.config.run_id.as_deref()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceMetrics {
    pub total_return: f64,
    pub total_return_pct: f64,
    /// Percent, 0..=100.
    pub win_rate: f64,
    pub max_drawdown: f64,
    pub max_drawdown_pct: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub calmar_ratio: f64,
    pub profit_factor: f64,
    pub total_trades: u64,
    pub winning_trades: u64,
    pub losing_trades: u64,
    pub avg_profit: f64,
    pub avg_profit_pct: f64,
    pub avg_duration: f64,
}

impl PerformanceMetrics {
    /// Fill in win rate and calmar when the engine left them empty.
    pub fn calculate_derived_metrics(&mut self) {
        if self.win_rate == 0.0 && self.total_trades > 0 {
            let rate = 100.0 * self.winning_trades as f64 / self.total_trades as f64;
            self.win_rate = round_to(rate, 4);
        }

        if self.calmar_ratio == 0.0 && self.max_drawdown != 0.0 {
            self.calmar_ratio = round_to(self.total_return / self.max_drawdown.abs(), 6);
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            total_return_pct: self.total_return_pct,
            win_rate: self.win_rate,
            max_drawdown_pct: self.max_drawdown_pct,
            sharpe_ratio: self.sharpe_ratio,
            sortino_ratio: self.sortino_ratio,
            total_trades: self.total_trades,
        }
    }
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// The subset of metrics kept inside a run's strategy record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub total_return_pct: f64,
    pub win_rate: f64,
    pub max_drawdown_pct: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub total_trades: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TradeRecord {
    pub pair: String,
    pub open_time: Option<String>,
    pub close_time: Option<String>,
    pub direction: Option<String>,
    pub stake_amount: Option<f64>,
    pub profit_abs: Option<f64>,
    pub profit_pct: Option<f64>,
    pub exit_reason: Option<String>,
}

/// Resolved output of one job; produced exactly once per job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestResult {
    pub strategy_name: String,
    pub config: RunConfig,
    pub metrics: PerformanceMetrics,
    pub trades: Vec<TradeRecord>,
    pub timestamp: DateTime<Local>,
    /// Wall-clock seconds spent on the job.
    pub execution_time: Option<f64>,
    pub error_message: Option<String>,
    pub status: ExecutionStatus,
}

impl BacktestResult {
    pub fn completed(
        strategy_name: impl Into<String>,
        config: RunConfig,
        metrics: PerformanceMetrics,
        trades: Vec<TradeRecord>,
    ) -> Self {
        Self {
            strategy_name: strategy_name.into(),
            config,
            metrics,
            trades,
            timestamp: Local::now(),
            execution_time: None,
            error_message: None,
            status: ExecutionStatus::Completed,
        }
    }

    pub fn failed(
        strategy_name: impl Into<String>,
        config: RunConfig,
        error: impl Into<String>,
    ) -> Self {
        Self {
            strategy_name: strategy_name.into(),
            config,
            metrics: PerformanceMetrics::default(),
            trades: Vec::new(),
            timestamp: Local::now(),
            execution_time: None,
            error_message: Some(error.into()),
            status: ExecutionStatus::Failed,
        }
    }

    pub fn cancelled(strategy_name: impl Into<String>, config: RunConfig) -> Self {
        let mut result = Self::failed(strategy_name, config, "cancelled while running");
        result.status = ExecutionStatus::Cancelled;
        result
    }

    pub fn is_successful(&self) -> bool {
        self.status == ExecutionStatus::Completed && self.error_message.is_none()
    }

    /// `<strategy>_<YYYYmmdd_HHMMSS_mmm>.json`, derived from the result's own
    /// timestamp so the same result always maps to the same file name.
    pub fn file_name(&self) -> String {
        format!(
            "{}_{}.json",
            sanitize_file_component(&self.strategy_name),
            self.timestamp.format("%Y%m%d_%H%M%S_%3f")
        )
    }

    pub fn save_to_dir(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = dir.join(self.file_name());
        let body = serde_json::to_vec_pretty(self)?;
        fs::write(&path, body)?;
        Ok(path)
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let body = fs::read(path)?;
        Ok(serde_json::from_slice(&body)?)
    }
}

/// Keep strategy names usable as file name components.
pub fn sanitize_file_component(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}
