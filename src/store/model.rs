// src/store/model.rs

//! On-disk schema of `run_metadata.json`.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::config::RunConfig;
use crate::result::MetricsSummary;
use crate::types::{ExecutionStatus, RunStatus};

/// Per-run metadata document.
///
/// `status` and `completed_at` are derived from `strategies` + `results` by
/// [`RunMetadata::recompute_status`] and never written independently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub run_id: String,
    pub created_at: DateTime<Local>,
    pub config: RunConfig,
    #[serde(default)]
    pub strategies: Vec<String>,
    #[serde(default)]
    pub results: BTreeMap<String, StrategyRecord>,
    #[serde(default)]
    pub status: RunStatus,
    #[serde(default)]
    pub logs: BTreeMap<String, LogEntry>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Local>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Local>>,
}

impl RunMetadata {
    pub fn new(run_id: impl Into<String>, config: RunConfig) -> Self {
        Self {
            run_id: run_id.into(),
            created_at: Local::now(),
            config,
            strategies: Vec::new(),
            results: BTreeMap::new(),
            status: RunStatus::Running,
            logs: BTreeMap::new(),
            last_updated: None,
            completed_at: None,
        }
    }

    /// Declare a participant strategy. Returns `true` if it was new.
    pub fn add_strategy(&mut self, strategy: &str) -> bool {
        if self.strategies.iter().any(|s| s == strategy) {
            return false;
        }
        self.strategies.push(strategy.to_string());
        self.results.entry(strategy.to_string()).or_default();
        true
    }

    /// Overall status is `completed` iff there is at least one strategy and
    /// every declared strategy has a terminal record.
    pub fn recompute_status(&mut self) {
        let all_terminal = !self.strategies.is_empty()
            && self.strategies.iter().all(|name| {
                self.results
                    .get(name)
                    .is_some_and(|record| record.status.is_terminal())
            });

        if all_terminal {
            self.status = RunStatus::Completed;
            self.completed_at.get_or_insert_with(Local::now);
        } else {
            self.status = RunStatus::Running;
            self.completed_at = None;
        }
    }
}

/// Per-strategy entry inside a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyRecord {
    pub status: ExecutionStatus,
    pub started_at: Option<DateTime<Local>>,
    pub completed_at: Option<DateTime<Local>>,
    pub execution_time: Option<f64>,
    pub result_path: Option<PathBuf>,
    pub archive_path: Option<PathBuf>,
    pub metrics: Option<MetricsSummary>,
    pub error_message: Option<String>,
}

impl StrategyRecord {
    pub fn apply(&mut self, update: StrategyUpdate) {
        let StrategyUpdate {
            status,
            started_at,
            completed_at,
            execution_time,
            result_path,
            archive_path,
            metrics,
            error_message,
        } = update;

        if let Some(v) = status {
            self.status = v;
        }
        if let Some(v) = started_at {
            self.started_at = Some(v);
        }
        if let Some(v) = completed_at {
            self.completed_at = Some(v);
        }
        if let Some(v) = execution_time {
            self.execution_time = Some(v);
        }
        if let Some(v) = result_path {
            self.result_path = Some(v);
        }
        if let Some(v) = archive_path {
            self.archive_path = Some(v);
        }
        if let Some(v) = metrics {
            self.metrics = Some(v);
        }
        if let Some(v) = error_message {
            self.error_message = Some(v);
        }
    }
}

/// Partial update merged into a [`StrategyRecord`]; `None` fields leave the
/// existing value untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StrategyUpdate {
    pub status: Option<ExecutionStatus>,
    pub started_at: Option<DateTime<Local>>,
    pub completed_at: Option<DateTime<Local>>,
    pub execution_time: Option<f64>,
    pub result_path: Option<PathBuf>,
    pub archive_path: Option<PathBuf>,
    pub metrics: Option<MetricsSummary>,
    pub error_message: Option<String>,
}

impl StrategyUpdate {
    pub fn status(status: ExecutionStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn started() -> Self {
        Self {
            status: Some(ExecutionStatus::Running),
            started_at: Some(Local::now()),
            ..Default::default()
        }
    }
}

/// Index entry for a captured output log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub path: PathBuf,
    pub timestamp: DateTime<Local>,
}
