// tests/end_to_end.rs
#![cfg(unix)]

mod common;
use crate::common::{RunConfigBuilder, TestResult, init_tracing, with_timeout};

use stratrun::context::AppContext;
use stratrun::result::BacktestResult;
use stratrun::types::{ExecutionStatus, RunStatus, TaskStatus};
use stratrun_test_utils::fake_engine::FakeEngine;

#[tokio::test]
async fn batch_lands_in_one_run_directory() -> TestResult {
    init_tracing();
    let engine = FakeEngine::new();
    let ctx = AppContext::new(engine.settings());

    assert!(ctx.engine.validate().await?.contains("freqtrade"));

    let scheduler = ctx.scheduler(Some(2));
    let config = RunConfigBuilder::new().with_run_id("run_e2e").build();
    let ids = scheduler.submit_batch(["Alpha", "Beta", "TextGamma"], config);
    assert_eq!(ids.len(), 3);

    let tasks = with_timeout(scheduler.wait_all()).await;
    assert_eq!(tasks.len(), 3);
    for task in &tasks {
        assert_eq!(task.status, TaskStatus::Completed, "{task:?}");
        assert!(task.result.as_ref().is_some_and(BacktestResult::is_successful));
    }

    let run_dir = ctx.store.run_dir("run_e2e");
    let meta = ctx.store.load(&run_dir)?;
    assert_eq!(meta.status, RunStatus::Completed);
    assert!(meta.completed_at.is_some());
    assert_eq!(meta.strategies.len(), 3);

    // Export-based resolution: metrics from the JSON export, archive kept.
    let alpha = &meta.results["Alpha"];
    assert_eq!(alpha.status, ExecutionStatus::Completed);
    let metrics = alpha.metrics.as_ref().ok_or("alpha has no metrics")?;
    assert_eq!(metrics.total_trades, 10);
    assert!((metrics.total_return_pct - 12.55).abs() < 1e-9);
    let archive = alpha.archive_path.as_ref().ok_or("alpha has no archive")?;
    assert!(archive.starts_with(run_dir.join("results").join("archives")));
    assert!(archive.exists());

    let saved = BacktestResult::load_from_file(alpha.result_path.as_ref().ok_or("no result path")?)?;
    assert_eq!(saved.strategy_name, "Alpha");
    assert_eq!(saved.trades.len(), 1);
    assert_eq!(saved.trades[0].direction.as_deref(), Some("long"));

    // Text fallback: no export, metrics scraped from stdout.
    let gamma = &meta.results["TextGamma"];
    assert_eq!(gamma.metrics.as_ref().map(|m| m.total_trades), Some(4));
    assert!(gamma.archive_path.is_none());

    // Every job has its own log file.
    assert_eq!(meta.logs.len(), 3);
    for entry in meta.logs.values() {
        assert!(entry.path.exists());
    }

    // One shared dataset, downloaded once for the whole batch.
    assert_eq!(engine.calls_of("download-data"), 1);
    assert_eq!(engine.calls_of("backtesting"), 3);

    // Per-job export directories are cleaned up.
    let exports = engine.root().join("scratch").join("exports");
    let leftover = std::fs::read_dir(&exports).map(|d| d.count()).unwrap_or(0);
    assert_eq!(leftover, 0);
    Ok(())
}

#[tokio::test]
async fn ready_data_skips_download() -> TestResult {
    init_tracing();
    let engine = FakeEngine::new();
    let settings = engine.settings();
    engine.seed_dataset(&settings, "BTC/USDT", "5m");
    let ctx = AppContext::new(settings);

    let job = RunConfigBuilder::new().with_run_id("run_seeded").job("Alpha");
    let result = with_timeout(ctx.executor.run(job)).await;

    assert!(result.is_successful(), "{:?}", result.error_message);
    assert!(result.execution_time.is_some());
    assert_eq!(engine.calls_of("download-data"), 0);
    Ok(())
}

#[tokio::test]
async fn batch_args_reach_the_engine() -> TestResult {
    init_tracing();
    let engine = FakeEngine::new();
    let ctx = AppContext::new(engine.settings());

    let job = RunConfigBuilder::new()
        .with_run_id("run_args")
        .with_timeframe("1h")
        .with_range((2024, 2, 1), (2024, 2, 15))
        .job("Alpha");
    let result = with_timeout(ctx.executor.run(job)).await;
    assert!(result.is_successful());

    let call = engine
        .calls()
        .into_iter()
        .find(|line| line.starts_with("backtesting"))
        .ok_or("engine never ran a backtest")?;
    assert!(call.contains("--strategy Alpha"));
    assert!(call.contains("--timerange 20240201-20240215"));
    assert!(call.contains("--timeframe 1h"));
    assert!(call.contains("--export trades"));
    Ok(())
}
