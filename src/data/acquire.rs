// src/data/acquire.rs

//! How missing market data gets fetched.

use std::ffi::OsString;
use std::fmt::Debug;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::Duration;

use chrono::Days;
use tracing::info;

use crate::data::readiness::DatasetRequest;
use crate::exec::engine::Engine;

/// Fetches datasets into the data directory.
///
/// Production uses [`EngineDownloader`]; tests plug in acquirers that write
/// files directly.
pub trait DataAcquirer: Send + Sync + Debug {
    fn acquire<'a>(
        &'a self,
        request: &'a DatasetRequest,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>>;
}

/// Runs the engine's own `download-data` command.
#[derive(Debug, Clone)]
pub struct EngineDownloader {
    engine: Engine,
    exchange: String,
    data_dir: PathBuf,
    timeout: Duration,
    days_padding: u32,
}

impl EngineDownloader {
    pub fn new(
        engine: Engine,
        exchange: impl Into<String>,
        data_dir: impl Into<PathBuf>,
        timeout: Duration,
        days_padding: u32,
    ) -> Self {
        Self {
            engine,
            exchange: exchange.into(),
            data_dir: data_dir.into(),
            timeout,
            days_padding,
        }
    }

    /// `download-data --exchange .. --pairs .. --timeframes .. --timerange ..
    /// --datadir .. --data-format-ohlcv json`
    pub fn args(&self, request: &DatasetRequest) -> Vec<OsString> {
        let start = request
            .start
            .checked_sub_days(Days::new(self.days_padding.into()))
            .unwrap_or(request.start);
        let timerange = format!(
            "{}-{}",
            start.format("%Y%m%d"),
            request.end.format("%Y%m%d")
        );

        let mut args: Vec<OsString> = vec![
            "download-data".into(),
            "--exchange".into(),
            self.exchange.clone().into(),
            "--pairs".into(),
        ];
        args.extend(request.pairs.iter().map(OsString::from));
        args.extend([
            "--timeframes".into(),
            request.timeframe.clone().into(),
            "--timerange".into(),
            timerange.into(),
            "--datadir".into(),
            self.data_dir.clone().into_os_string(),
            "--data-format-ohlcv".into(),
            "json".into(),
        ]);
        args
    }
}

impl DataAcquirer for EngineDownloader {
    fn acquire<'a>(
        &'a self,
        request: &'a DatasetRequest,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>> {
        Box::pin(async move {
            info!(
                exchange = %self.exchange,
                pairs = ?request.pairs,
                timeframe = %request.timeframe,
                "downloading market data"
            );
            self.engine
                .run_short(self.args(request), self.timeout, "download-data")
                .await?;
            Ok(())
        })
    }
}
