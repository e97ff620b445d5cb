// src/exec/executor.rs

//! Runs one backtest job end to end.

use std::collections::HashSet;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Local;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::{RunConfig, validate_run_config};
use crate::data::{DataReadiness, DatasetRequest};
use crate::errors::{Result, StratrunError};
use crate::exec::artifact::{self, ArtifactPaths};
use crate::exec::engine::{CancelSignal, Engine, Invocation, OutputLine, ProcessEnd};
use crate::exec::{parser, resolve};
use crate::result::{BacktestResult, Job, PerformanceMetrics, TradeRecord, sanitize_file_component};
use crate::store::{RunLayout, RunStore, StrategyUpdate};

#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    /// Config artifacts, per-job export directories and trade databases.
    pub scratch_dir: PathBuf,
    pub paths: ArtifactPaths,
    pub backtest_timeout: Option<Duration>,
}

/// Turns a [`Job`] into exactly one [`BacktestResult`].
///
/// Failures of any stage are contained in the returned result; the executor
/// never panics or returns an error for a failing job.
#[derive(Debug)]
pub struct Executor {
    engine: Engine,
    store: Arc<RunStore>,
    readiness: Arc<DataReadiness>,
    options: ExecutorOptions,
    progress: Option<mpsc::UnboundedSender<OutputLine>>,
}

/// What `execute` produced: the result plus the relocated archive, if any.
type Resolved = (BacktestResult, Option<PathBuf>);

impl Executor {
    pub fn new(
        engine: Engine,
        store: Arc<RunStore>,
        readiness: Arc<DataReadiness>,
        options: ExecutorOptions,
    ) -> Self {
        Self {
            engine,
            store,
            readiness,
            options,
            progress: None,
        }
    }

    /// Forward every engine output line to `tx`.
    pub fn with_progress(mut self, tx: mpsc::UnboundedSender<OutputLine>) -> Self {
        self.progress = Some(tx);
        self
    }

    pub async fn run(&self, job: Job) -> BacktestResult {
        self.run_with_cancel(job, CancelSignal::never()).await
    }

    /// Like [`Executor::run`], but the engine process is killed and the
    /// result is `cancelled` when `cancel` fires.
    pub async fn run_with_cancel(&self, job: Job, cancel: CancelSignal) -> BacktestResult {
        let started = Instant::now();
        let strategy = job.strategy.clone();
        info!(strategy = %strategy, run_id = ?job.run_id(), "starting backtest job");

        // Nothing touches the store or the engine until the config is sound.
        if let Err(e) = validate_run_config(&job.config) {
            warn!(strategy = %strategy, error = %e, "rejecting job with invalid run configuration");
            return failed_early(&strategy, job.config, e.to_string(), started);
        }

        let store = Arc::clone(&self.store);
        let (config, name) = (job.config.clone(), strategy.clone());
        let prepared = blocking(move || {
            let dir = store.ensure_run(&config, Some(&name))?;
            store.update_strategy(&dir, &name, StrategyUpdate::started());
            Ok(dir)
        })
        .await;
        let run_dir = match prepared {
            Ok(dir) => dir,
            Err(e) => {
                error!(strategy = %strategy, error = %e, "could not prepare run directory");
                return failed_early(
                    &strategy,
                    job.config,
                    format!("could not prepare run directory: {e}"),
                    started,
                );
            }
        };

        let mut scratch = Vec::new();
        let (mut result, archive) = match self.execute(&job, &run_dir, cancel, &mut scratch).await {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!(strategy = %strategy, error = %e, "backtest job failed");
                (BacktestResult::failed(&strategy, job.config.clone(), e.to_string()), None)
            }
        };
        result.execution_time = Some(started.elapsed().as_secs_f64());

        let store = Arc::clone(&self.store);
        let saved = result.clone();
        let finished = blocking(move || {
            persist(&store, &run_dir, &saved, archive);
            remove_scratch(&scratch);
            Ok(())
        })
        .await;
        if let Err(e) = finished {
            warn!(strategy = %strategy, error = %e, "failed to record job outcome");
        }

        info!(
            strategy = %strategy,
            status = %result.status,
            secs = result.execution_time.unwrap_or_default(),
            "backtest job finished"
        );
        result
    }

    async fn execute(
        &self,
        job: &Job,
        run_dir: &Path,
        mut cancel: CancelSignal,
        scratch: &mut Vec<PathBuf>,
    ) -> Result<Resolved> {
        let strategy = job.strategy.as_str();
        let layout = RunLayout::new(run_dir);

        let request = DatasetRequest::from(&job.config);
        tokio::select! {
            ready = self.readiness.ensure_ready(&request) => { ready?; }
            _ = cancel.fired() => {
                info!(strategy, "cancelled while preparing data");
                return Ok((BacktestResult::cancelled(strategy, job.config.clone()), None));
            }
        }

        let stem = sanitize_file_component(strategy);
        let scratch_dir = self.options.scratch_dir.clone();
        let export_dir = scratch_dir
            .join("exports")
            .join(format!("{stem}_{}", crate::short_token()));
        let export_path = export_dir.join(format!("backtest-result-{stem}.json"));
        let doc = artifact::backtest_config(
            strategy,
            &job.config,
            &self.options.paths,
            &scratch_dir,
            &export_path,
        );

        let (dir, name) = (export_dir.clone(), strategy.to_string());
        let (before, config_path) = blocking(move || {
            fs::create_dir_all(&dir)?;
            let before = resolve::snapshot_dir(&dir);
            let config_path = artifact::write_artifact(&scratch_dir, "config", &name, &doc)?;
            Ok((before, config_path))
        })
        .await?;
        scratch.push(export_dir);
        debug!(strategy, config = %config_path.display(), "wrote engine config");

        let log_path = layout
            .logs_dir()
            .join(format!("{stem}_{}.log", Local::now().format("%Y%m%d_%H%M%S")));
        let store = Arc::clone(&self.store);
        let (dir, name, log) = (run_dir.to_path_buf(), strategy.to_string(), log_path.clone());
        blocking(move || {
            store.record_log(&dir, &name, &log);
            Ok(())
        })
        .await?;

        let captured = self
            .engine
            .invoke(
                Invocation {
                    label: strategy.to_string(),
                    args: self.backtest_args(job, &config_path, &export_path),
                    log_path: Some(log_path),
                    progress: self.progress.clone(),
                    timeout: self.options.backtest_timeout,
                },
                cancel,
            )
            .await?;

        match captured.end {
            ProcessEnd::Cancelled => {
                return Ok((BacktestResult::cancelled(strategy, job.config.clone()), None));
            }
            ProcessEnd::Exited { success: false, code } => {
                return Err(StratrunError::execution(format!(
                    "engine exited with code {code}: {}",
                    captured.tail(20)
                )));
            }
            ProcessEnd::Exited { .. } => {}
        }

        let (name, archives_dir) = (strategy.to_string(), layout.archives_dir());
        let exported = blocking(move || Ok(load_export(&export_path, &before, &name, &archives_dir))).await?;
        if let Some((metrics, trades, archive)) = exported {
            let result = BacktestResult::completed(strategy, job.config.clone(), metrics, trades);
            return Ok((result, archive));
        }

        let metrics = parser::parse_metrics(&captured.stdout).ok_or_else(|| {
            StratrunError::resolution("no export produced and no recognizable metrics in engine output")
        })?;
        let trades = parser::parse_trades(&captured.stdout);
        Ok((BacktestResult::completed(strategy, job.config.clone(), metrics, trades), None))
    }

    fn backtest_args(&self, job: &Job, config_path: &Path, export_path: &Path) -> Vec<OsString> {
        vec![
            "backtesting".into(),
            "--config".into(),
            config_path.into(),
            "--strategy".into(),
            job.strategy.clone().into(),
            "--timerange".into(),
            job.config.timerange().into(),
            "--timeframe".into(),
            job.config.timeframe.clone().into(),
            "--userdir".into(),
            self.options.paths.user_data_dir.clone().into_os_string(),
            "--datadir".into(),
            self.options.paths.data_dir.clone().into_os_string(),
            "--export".into(),
            "trades".into(),
            "--export-filename".into(),
            export_path.into(),
        ]
    }
}

/// Run filesystem and store work off the async worker threads.
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StratrunError::execution(format!("blocking task failed: {e}")))?
}

fn failed_early(strategy: &str, config: RunConfig, message: String, started: Instant) -> BacktestResult {
    let mut result = BacktestResult::failed(strategy, config, message);
    result.execution_time = Some(started.elapsed().as_secs_f64());
    result
}

/// Metrics, trades and the relocated archive from the engine's export, or
/// `None` when the captured output has to be parsed instead.
fn load_export(
    requested: &Path,
    before: &HashSet<PathBuf>,
    strategy: &str,
    archives_dir: &Path,
) -> Option<(PerformanceMetrics, Vec<TradeRecord>, Option<PathBuf>)> {
    let export = resolve::locate_export(requested, before)?;
    match resolve::read_export(&export, strategy) {
        Ok((metrics, trades)) => {
            let archive = match resolve::relocate(&export, archives_dir) {
                Ok(path) => Some(path),
                Err(e) => {
                    warn!(strategy, error = %e, "failed to relocate export archive");
                    None
                }
            };
            Some((metrics, trades, archive))
        }
        Err(e) => {
            warn!(
                strategy,
                export = %export.display(),
                error = %e,
                "export unreadable; falling back to engine output"
            );
            None
        }
    }
}

/// Save the result document and fold the outcome into run metadata.
fn persist(store: &RunStore, run_dir: &Path, result: &BacktestResult, archive: Option<PathBuf>) {
    let results_dir = RunLayout::new(run_dir).results_dir();
    let result_path = match result.save_to_dir(&results_dir) {
        Ok(path) => Some(path),
        Err(e) => {
            warn!(strategy = %result.strategy_name, error = %e, "failed to save result document");
            None
        }
    };

    let update = StrategyUpdate {
        status: Some(result.status),
        completed_at: Some(Local::now()),
        execution_time: result.execution_time,
        result_path,
        archive_path: archive,
        metrics: result.is_successful().then(|| result.metrics.summary()),
        error_message: result.error_message.clone(),
        ..Default::default()
    };
    store.update_strategy(run_dir, &result.strategy_name, update);
}

fn remove_scratch(paths: &[PathBuf]) {
    for path in paths {
        let removed = if path.is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        };
        if let Err(e) = removed {
            debug!(path = %path.display(), error = %e, "failed to remove scratch path");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn blocking_work_returns_its_value() {
        let value = blocking(|| Ok(21 * 2)).await.unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn panicking_blocking_work_becomes_an_execution_error() {
        let err = blocking::<(), _>(|| panic!("disk on fire")).await.unwrap_err();
        assert!(matches!(err, StratrunError::Execution(_)), "{err:?}");
    }
}
