// src/store/run_store.rs

//! Durable per-run metadata with a single store-wide lock.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Local;
use tracing::{debug, info, warn};

use crate::config::{RunConfig, validate_run_id};
use crate::errors::{Result, StratrunError};
use crate::store::model::{LogEntry, RunMetadata, StrategyUpdate};

pub const METADATA_FILE: &str = "run_metadata.json";

/// Directory layout of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLayout {
    root: PathBuf,
}

impl RunLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.root.join(METADATA_FILE)
    }

    pub fn results_dir(&self) -> PathBuf {
        self.root.join("results")
    }

    pub fn archives_dir(&self) -> PathBuf {
        self.results_dir().join("archives")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    fn create_dirs(&self) -> std::io::Result<()> {
        fs::create_dir_all(self.archives_dir())?;
        fs::create_dir_all(self.logs_dir())
    }
}

/// Reads and writes `run_metadata.json` documents.
///
/// Every access goes through one mutex owned by the store (not one per
/// file): workers of the same run update different strategies inside the
/// same document, so read-merge-write must be serialized.
#[derive(Debug)]
pub struct RunStore {
    runs_dir: PathBuf,
    lock: Mutex<()>,
}

impl RunStore {
    pub fn new(runs_dir: impl Into<PathBuf>) -> Self {
        Self {
            runs_dir: runs_dir.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.runs_dir.join(run_id)
    }

    /// Create the run directory and metadata once per run id.
    ///
    /// Existing metadata is loaded and merged (the optional strategy is added
    /// to the participant list), never overwritten.
    pub fn ensure_run(&self, config: &RunConfig, strategy: Option<&str>) -> Result<PathBuf> {
        let run_id = config
            .run_id
            .as_deref()
            .ok_or_else(|| StratrunError::config("run configuration has no run id"))?;
        validate_run_id(run_id)?;

        let run_dir = self.run_dir(run_id);
        let layout = RunLayout::new(&run_dir);
        layout.create_dirs()?;

        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());

        let path = layout.metadata_path();
        let mut meta = if path.exists() {
            match read_metadata(&path) {
                Ok(existing) => existing,
                Err(e) => {
                    warn!(
                        run_id,
                        error = %e,
                        "run metadata unreadable; starting a fresh document"
                    );
                    RunMetadata::new(run_id, config.clone())
                }
            }
        } else {
            info!(run_id, dir = %run_dir.display(), "creating run directory");
            RunMetadata::new(run_id, config.clone())
        };

        if let Some(name) = strategy {
            if meta.add_strategy(name) {
                debug!(run_id, strategy = name, "strategy added to run");
            }
        }
        meta.recompute_status();
        meta.last_updated = Some(Local::now());

        write_metadata(&path, &meta)?;
        Ok(run_dir)
    }

    /// Read-merge-write one strategy record.
    ///
    /// Write failures are logged; the merged in-memory document is returned
    /// either way.
    pub fn update_strategy(
        &self,
        run_dir: &Path,
        strategy: &str,
        update: StrategyUpdate,
    ) -> RunMetadata {
        self.modify(run_dir, |meta| {
            meta.add_strategy(strategy);
            meta.results
                .entry(strategy.to_string())
                .or_default()
                .apply(update);
        })
    }

    /// Index a captured output log under the strategy name.
    pub fn record_log(&self, run_dir: &Path, strategy: &str, log_path: &Path) -> RunMetadata {
        self.modify(run_dir, |meta| {
            meta.logs.insert(
                strategy.to_string(),
                LogEntry {
                    path: log_path.to_path_buf(),
                    timestamp: Local::now(),
                },
            );
        })
    }

    pub fn load(&self, run_dir: &Path) -> Result<RunMetadata> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        read_metadata(&RunLayout::new(run_dir).metadata_path())
    }

    fn modify(&self, run_dir: &Path, f: impl FnOnce(&mut RunMetadata)) -> RunMetadata {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let path = RunLayout::new(run_dir).metadata_path();

        let mut meta = match read_metadata(&path) {
            Ok(meta) => meta,
            Err(e) => {
                warn!(
                    dir = %run_dir.display(),
                    error = %e,
                    "run metadata unavailable; rebuilding from directory name"
                );
                placeholder_metadata(run_dir)
            }
        };

        f(&mut meta);
        meta.recompute_status();
        meta.last_updated = Some(Local::now());

        if let Err(e) = write_metadata(&path, &meta) {
            warn!(
                dir = %run_dir.display(),
                error = %e,
                "failed to persist run metadata; continuing with in-memory copy"
            );
        }
        meta
    }
}

fn read_metadata(path: &Path) -> Result<RunMetadata> {
    let body = fs::read(path)?;
    Ok(serde_json::from_slice(&body)?)
}

/// Write to a sibling temp file, then rename over the target.
fn write_metadata(path: &Path, meta: &RunMetadata) -> Result<()> {
    let body = serde_json::to_vec_pretty(meta)?;
    let tmp = path.with_extension(format!("json.tmp-{}", crate::short_token()));
    fs::write(&tmp, body)?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

/// Metadata for a run whose document vanished or is corrupt. The config is
/// unknown at this point, so a minimal placeholder keeps updates flowing.
fn placeholder_metadata(run_dir: &Path) -> RunMetadata {
    let run_id = run_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let today = Local::now().date_naive();
    let config = RunConfig {
        start_date: today,
        end_date: today,
        timeframe: String::new(),
        pairs: Vec::new(),
        initial_balance: 0.0,
        max_open_trades: 0,
        fee: 0.0,
        stake_amount: String::new(),
        enable_position_stacking: false,
        run_id: Some(run_id.clone()),
    };
    RunMetadata::new(run_id, config)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::NaiveDate;
    use tempfile::TempDir;

    use super::*;
    use crate::types::{ExecutionStatus, RunStatus};

    fn config(run_id: &str) -> RunConfig {
        RunConfig {
            start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
            timeframe: "5m".into(),
            pairs: vec!["BTC/USDT".into()],
            initial_balance: 1000.0,
            max_open_trades: 2,
            fee: 0.001,
            stake_amount: "unlimited".into(),
            enable_position_stacking: false,
            run_id: Some(run_id.into()),
        }
    }

    #[test]
    fn ensure_run_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let store = RunStore::new(tmp.path());
        let cfg = config("run_a");

        let first = store.ensure_run(&cfg, Some("A")).unwrap();
        let second = store.ensure_run(&cfg, Some("A")).unwrap();
        assert_eq!(first, second);

        let meta = store.load(&first).unwrap();
        assert_eq!(meta.strategies, vec!["A".to_string()]);
        assert!(first.join("results/archives").is_dir());
        assert!(first.join("logs").is_dir());
    }

    #[test]
    fn ensure_run_without_run_id_is_config_error() {
        let tmp = TempDir::new().unwrap();
        let store = RunStore::new(tmp.path());
        let mut cfg = config("x");
        cfg.run_id = None;
        assert!(matches!(store.ensure_run(&cfg, None), Err(StratrunError::Config(_))));
    }

    #[test]
    fn ensure_run_refuses_escaping_run_ids() {
        let tmp = TempDir::new().unwrap();
        let runs = tmp.path().join("runs");
        let store = RunStore::new(&runs);

        let err = store.ensure_run(&config("../escaped"), None).unwrap_err();
        assert!(matches!(err, StratrunError::Config(_)));
        assert!(!tmp.path().join("escaped").exists());
    }

    #[test]
    fn update_recomputes_overall_status() {
        let tmp = TempDir::new().unwrap();
        let store = RunStore::new(tmp.path());
        let cfg = config("run_b");
        let dir = store.ensure_run(&cfg, Some("A")).unwrap();

        let meta = store.update_strategy(&dir, "A", StrategyUpdate::status(ExecutionStatus::Completed));
        assert_eq!(meta.status, RunStatus::Completed);
        assert!(meta.completed_at.is_some());

        store.ensure_run(&cfg, Some("B")).unwrap();
        let meta = store.load(&dir).unwrap();
        assert_eq!(meta.status, RunStatus::Running);
    }

    #[test]
    fn concurrent_updates_are_not_lost() {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(RunStore::new(tmp.path()));
        let dir = store.ensure_run(&config("run_c"), None).unwrap();

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let store = Arc::clone(&store);
                let dir = dir.clone();
                std::thread::spawn(move || {
                    store.update_strategy(
                        &dir,
                        &format!("S{i}"),
                        StrategyUpdate::status(ExecutionStatus::Completed),
                    );
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let meta = store.load(&dir).unwrap();
        assert_eq!(meta.results.len(), 16);
        assert_eq!(meta.strategies.len(), 16);
        assert_eq!(meta.status, RunStatus::Completed);
    }

    #[test]
    fn update_degrades_when_metadata_is_missing() {
        let tmp = TempDir::new().unwrap();
        let store = RunStore::new(tmp.path());
        let dir = tmp.path().join("run_gone");

        // Directory does not exist, so the write fails; the merged document
        // still comes back.
        let meta = store.update_strategy(&dir, "A", StrategyUpdate::status(ExecutionStatus::Failed));
        assert_eq!(meta.run_id, "run_gone");
        assert_eq!(meta.results["A"].status, ExecutionStatus::Failed);
    }
}
