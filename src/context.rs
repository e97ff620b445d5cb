// src/context.rs

//! Process-wide components, built once at startup and passed by reference.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::config::Settings;
use crate::data::{DataAcquirer, DataReadiness, EngineDownloader};
use crate::exec::artifact::ArtifactPaths;
use crate::exec::{Engine, Executor, ExecutorOptions, JobRunner, OutputLine};
use crate::fs::{FileSystem, RealFileSystem};
use crate::monitor::{DryRunMonitor, MonitorOptions};
use crate::scheduler::TaskScheduler;
use crate::store::RunStore;

/// Owns the two shared resources (the run store lock and the data
/// readiness lock) and the executor built on top of them.
#[derive(Debug)]
pub struct AppContext {
    pub settings: Settings,
    pub engine: Engine,
    pub store: Arc<RunStore>,
    pub readiness: Arc<DataReadiness>,
    pub executor: Arc<Executor>,
}

impl AppContext {
    /// Production wiring: real filesystem, datasets fetched by the engine.
    pub fn new(settings: Settings) -> Self {
        let engine = engine_for(&settings);
        let downloader = EngineDownloader::new(
            engine.clone(),
            settings.engine.exchange.clone(),
            exchange_data_dir(&settings),
            Duration::from_secs(settings.engine.download_timeout_secs),
            settings.data.download_days_padding,
        );
        Self::with_parts(settings, Arc::new(RealFileSystem), Arc::new(downloader), None)
    }

    /// Wiring with explicit dataset access, acquisition and an optional
    /// progress sink for engine output.
    pub fn with_parts(
        settings: Settings,
        fs: Arc<dyn FileSystem>,
        acquirer: Arc<dyn DataAcquirer>,
        progress: Option<mpsc::UnboundedSender<OutputLine>>,
    ) -> Self {
        let engine = engine_for(&settings);
        let store = Arc::new(RunStore::new(settings.storage.runs_dir.clone()));
        let readiness = Arc::new(DataReadiness::new(
            fs,
            exchange_data_dir(&settings),
            settings.data.min_file_bytes,
            acquirer,
        ));

        let mut executor = Executor::new(
            engine.clone(),
            Arc::clone(&store),
            Arc::clone(&readiness),
            ExecutorOptions {
                scratch_dir: settings.storage.scratch_dir.clone(),
                paths: artifact_paths(&settings),
                backtest_timeout: settings.engine.backtest_timeout(),
            },
        );
        if let Some(tx) = progress {
            executor = executor.with_progress(tx);
        }

        Self {
            settings,
            engine,
            store,
            readiness,
            executor: Arc::new(executor),
        }
    }

    /// Worker pool over the shared executor; `max_workers` overrides the
    /// configured size.
    pub fn scheduler(&self, max_workers: Option<usize>) -> TaskScheduler {
        let runner: Arc<dyn JobRunner> = self.executor.clone();
        TaskScheduler::new(runner, max_workers.unwrap_or(self.settings.scheduler.max_workers))
    }

    /// Must be called inside a tokio runtime (starts the poll loop).
    pub fn monitor(&self) -> DryRunMonitor {
        let m = &self.settings.monitor;
        DryRunMonitor::new(
            self.engine.clone(),
            MonitorOptions {
                poll_interval: Duration::from_millis(m.poll_interval_ms),
                stop_grace: Duration::from_secs(m.stop_grace_secs),
                log_window: m.log_window,
                scratch_dir: self.settings.storage.scratch_dir.clone(),
                paths: artifact_paths(&self.settings),
            },
        )
    }
}

fn engine_for(settings: &Settings) -> Engine {
    Engine::new(
        settings.engine.binary.clone(),
        Duration::from_secs(settings.engine.validate_timeout_secs),
    )
}

fn exchange_data_dir(settings: &Settings) -> std::path::PathBuf {
    settings.engine.data_dir().join(&settings.engine.exchange)
}

fn artifact_paths(settings: &Settings) -> ArtifactPaths {
    ArtifactPaths {
        user_data_dir: settings.engine.user_data_dir.clone(),
        data_dir: exchange_data_dir(settings),
        exchange: settings.engine.exchange.clone(),
    }
}
