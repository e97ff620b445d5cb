// src/data/readiness.rs

//! Market data readiness: every dataset a job needs must exist, exceed a
//! byte-size floor and parse, before any engine process is spawned.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::RunConfig;
use crate::data::acquire::DataAcquirer;
use crate::errors::{Result, StratrunError};
use crate::fs::FileSystem;

/// What a job needs: pairs x timeframe over a date range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetRequest {
    pub pairs: Vec<String>,
    pub timeframe: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl From<&RunConfig> for DatasetRequest {
    fn from(cfg: &RunConfig) -> Self {
        Self {
            pairs: cfg.pairs.clone(),
            timeframe: cfg.timeframe.clone(),
            start: cfg.start_date,
            end: cfg.end_date,
        }
    }
}

/// Outcome of one readiness check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadinessReport {
    pub ready: bool,
    pub issues: Vec<String>,
    /// Files that exist but failed the size or parse check.
    pub corrupt: Vec<PathBuf>,
}

/// Checks datasets and repairs them through a [`DataAcquirer`].
///
/// Repairs are serialized by a lock owned by this instance; the
/// application context holds exactly one instance, so two jobs sharing a
/// dataset never download it concurrently.
#[derive(Debug)]
pub struct DataReadiness {
    fs: Arc<dyn FileSystem>,
    data_dir: PathBuf,
    min_file_bytes: u64,
    acquirer: Arc<dyn DataAcquirer>,
    repair_lock: Mutex<()>,
}

impl DataReadiness {
    pub fn new(
        fs: Arc<dyn FileSystem>,
        data_dir: impl Into<PathBuf>,
        min_file_bytes: u64,
        acquirer: Arc<dyn DataAcquirer>,
    ) -> Self {
        Self {
            fs,
            data_dir: data_dir.into(),
            min_file_bytes,
            acquirer,
            repair_lock: Mutex::new(()),
        }
    }

    /// `<data_dir>/<BASE>_<QUOTE>-<timeframe>.json`
    pub fn dataset_path(&self, pair: &str, timeframe: &str) -> PathBuf {
        self.data_dir
            .join(format!("{}-{}.json", pair.replace('/', "_"), timeframe))
    }

    /// Check without repairing.
    pub fn check(&self, request: &DatasetRequest) -> ReadinessReport {
        let mut report = ReadinessReport::default();

        for pair in &request.pairs {
            let path = self.dataset_path(pair, &request.timeframe);
            if let Err(issue) = self.inspect(&path) {
                if self.fs.exists(&path) {
                    report.corrupt.push(path.clone());
                }
                report.issues.push(format!("{pair} {}: {issue}", request.timeframe));
            }
        }

        report.ready = report.issues.is_empty();
        report
    }

    /// Check, and on failure repair under the lock, then re-validate.
    ///
    /// Returns `StratrunError::Data` when the datasets are still not usable
    /// after the repair attempt.
    pub async fn ensure_ready(&self, request: &DatasetRequest) -> Result<ReadinessReport> {
        let report = self.check(request);
        if report.ready {
            return Ok(report);
        }

        debug!(issues = ?report.issues, "datasets not ready; waiting for repair lock");
        let _guard = self.repair_lock.lock().await;

        // Another job may have repaired the same datasets while we waited.
        let report = self.check(request);
        if report.ready {
            debug!("datasets became ready while waiting for repair lock");
            return Ok(report);
        }

        for path in &report.corrupt {
            warn!(path = %path.display(), "removing corrupt dataset");
            if let Err(e) = self.fs.remove_file(path) {
                warn!(path = %path.display(), error = %e, "failed to remove corrupt dataset");
            }
        }

        info!(
            pairs = ?request.pairs,
            timeframe = %request.timeframe,
            "acquiring market data"
        );
        if let Err(e) = self.acquirer.acquire(request).await {
            return Err(StratrunError::data(format!("data acquisition failed: {e}")));
        }

        let report = self.check(request);
        if report.ready {
            info!(pairs = ?request.pairs, "market data ready after acquisition");
            Ok(report)
        } else {
            Err(StratrunError::data(format!(
                "market data still not ready after download: {}",
                report.issues.join("; ")
            )))
        }
    }

    fn inspect(&self, path: &Path) -> std::result::Result<(), String> {
        if !self.fs.exists(path) {
            return Err("missing".to_string());
        }

        let size = self.fs.file_size(path).map_err(|e| format!("unreadable ({e})"))?;
        if size < self.min_file_bytes {
            return Err(format!(
                "too small ({size} bytes, expected at least {})",
                self.min_file_bytes
            ));
        }

        let body = self.fs.read(path).map_err(|e| format!("unreadable ({e})"))?;
        let candles: Vec<serde_json::Value> =
            serde_json::from_slice(&body).map_err(|e| format!("unparseable ({e})"))?;
        if candles.is_empty() {
            return Err("no candles".to_string());
        }
        if !candles.iter().all(|c| c.is_array()) {
            return Err("unexpected candle format".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::fs::mock::MockFileSystem;

    const CANDLES: &[u8] = b"[[1704067200000,42000.0,42100.0,41900.0,42050.0,12.5]]";

    /// Writes a valid dataset for every requested pair, slowly, and counts
    /// how often it ran.
    #[derive(Debug)]
    struct CountingAcquirer {
        fs: MockFileSystem,
        data_dir: PathBuf,
        calls: AtomicUsize,
        produce: bool,
    }

    impl DataAcquirer for CountingAcquirer {
        fn acquire<'a>(
            &'a self,
            request: &'a DatasetRequest,
        ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                if self.produce {
                    for pair in &request.pairs {
                        let path = self.data_dir.join(format!(
                            "{}-{}.json",
                            pair.replace('/', "_"),
                            request.timeframe
                        ));
                        self.fs.add_file(path, CANDLES);
                    }
                }
                Ok(())
            })
        }
    }

    fn request() -> DatasetRequest {
        DatasetRequest {
            pairs: vec!["BTC/USDT".to_string()],
            timeframe: "5m".to_string(),
            start: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            end: NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
        }
    }

    fn setup(produce: bool) -> (MockFileSystem, Arc<CountingAcquirer>, Arc<DataReadiness>) {
        let fs = MockFileSystem::new();
        let data_dir = PathBuf::from("/data/binance");
        let acquirer = Arc::new(CountingAcquirer {
            fs: fs.clone(),
            data_dir: data_dir.clone(),
            calls: AtomicUsize::new(0),
            produce,
        });
        let readiness = Arc::new(DataReadiness::new(
            Arc::new(fs.clone()),
            data_dir,
            16,
            acquirer.clone(),
        ));
        (fs, acquirer, readiness)
    }

    #[test]
    fn reports_missing_small_and_unparseable_files() {
        let (fs, _acq, readiness) = setup(false);
        let mut req = request();
        req.pairs = vec!["BTC/USDT".into(), "ETH/USDT".into(), "SOL/USDT".into()];

        fs.add_file("/data/binance/ETH_USDT-5m.json", b"[]");
        fs.add_file("/data/binance/SOL_USDT-5m.json", b"this is not json at all");

        let report = readiness.check(&req);
        assert!(!report.ready);
        assert_eq!(report.issues.len(), 3);
        assert!(report.issues[0].contains("missing"));
        assert!(report.issues[1].contains("too small"));
        assert!(report.issues[2].contains("unparseable"));
        assert_eq!(report.corrupt.len(), 2);
    }

    #[tokio::test]
    async fn ready_data_skips_acquisition() {
        let (fs, acq, readiness) = setup(true);
        fs.add_file("/data/binance/BTC_USDT-5m.json", CANDLES);

        let report = readiness.ensure_ready(&request()).await.unwrap();
        assert!(report.ready);
        assert_eq!(acq.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn corrupt_file_is_removed_and_redownloaded() {
        let (fs, acq, readiness) = setup(true);
        fs.add_file("/data/binance/BTC_USDT-5m.json", b"{ truncated");

        readiness.ensure_ready(&request()).await.unwrap();
        assert_eq!(acq.calls.load(Ordering::SeqCst), 1);
        assert_eq!(fs.read(Path::new("/data/binance/BTC_USDT-5m.json")).unwrap(), CANDLES);
    }

    #[tokio::test]
    async fn concurrent_jobs_trigger_one_repair() {
        let (_fs, acq, readiness) = setup(true);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let readiness = Arc::clone(&readiness);
                tokio::spawn(async move { readiness.ensure_ready(&request()).await })
            })
            .collect();

        for h in handles {
            let report = h.await.unwrap().unwrap();
            assert!(report.ready);
        }
        assert_eq!(acq.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_repair_is_a_data_error() {
        let (_fs, acq, readiness) = setup(false);

        let err = readiness.ensure_ready(&request()).await.unwrap_err();
        assert!(matches!(err, StratrunError::Data(ref msg) if msg.contains("still not ready")));
        assert_eq!(acq.calls.load(Ordering::SeqCst), 1);
    }
}
