// src/lib.rs

pub mod cli;
pub mod config;
pub mod context;
pub mod data;
pub mod errors;
pub mod exec;
pub mod fs;
pub mod logging;
pub mod monitor;
pub mod result;
pub mod scheduler;
pub mod store;
pub mod types;

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use tracing::{info, warn};

use crate::cli::{CliArgs, Command};
use crate::config::{load_run_config, load_settings};
use crate::context::AppContext;
use crate::data::DatasetRequest;
use crate::result::Job;
use crate::store::RunStore;
use crate::types::TaskStatus;

/// Short random token used to keep generated file names unique.
pub fn short_token() -> String {
    let mut token = uuid::Uuid::new_v4().simple().to_string();
    token.truncate(8);
    token
}

/// High-level entry point used by `main.rs`; returns the process exit code.
pub async fn run(args: CliArgs) -> Result<i32> {
    let settings = load_settings(&args.config)?;
    let ctx = AppContext::new(settings);

    match args.command {
        Command::Backtest {
            run_config,
            strategies,
            workers,
        } => run_backtest(&ctx, &run_config, strategies, workers).await,
        Command::DryRun {
            run_config,
            strategy,
        } => run_dry_run(&ctx, &run_config, strategy).await,
        Command::Status { run_dir } => print_status(&ctx.store, &run_dir),
        Command::CheckData { run_config } => check_data(&ctx, &run_config).await,
    }
}

async fn run_backtest(
    ctx: &AppContext,
    run_config: &Path,
    strategies: Vec<String>,
    workers: Option<usize>,
) -> Result<i32> {
    let config = load_run_config(run_config)?.ensure_run_id();
    let run_id = config.run_id.clone().unwrap_or_default();

    ctx.engine.validate().await?;

    let scheduler = ctx.scheduler(workers);
    info!(
        run_id = %run_id,
        strategies = ?strategies,
        workers = scheduler.max_workers(),
        "submitting backtest batch"
    );
    scheduler.submit_batch(strategies, config);

    // Ctrl-C cancels what has not started and kills what is running.
    let tasks = tokio::select! {
        tasks = scheduler.wait_all() => tasks,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted; cancelling outstanding backtests");
            scheduler.shutdown(false).await
        }
    };

    let mut failures = 0;
    println!("run {run_id}");
    for task in &tasks {
        match (&task.status, &task.result) {
            (TaskStatus::Completed, Some(result)) => {
                let m = &result.metrics;
                println!(
                    "  {:<24} completed  return {:>8.2}%  win rate {:>6.2}%  drawdown {:>6.2}%  trades {}",
                    task.strategy_name,
                    m.total_return_pct,
                    m.win_rate,
                    m.max_drawdown_pct,
                    m.total_trades
                );
            }
            (status, _) => {
                failures += 1;
                println!(
                    "  {:<24} {:<10} {}",
                    task.strategy_name,
                    status,
                    task.error_message.as_deref().unwrap_or("")
                );
            }
        }
    }
    println!("results in {}", ctx.store.run_dir(&run_id).display());

    Ok(if failures == 0 { 0 } else { 1 })
}

async fn run_dry_run(ctx: &AppContext, run_config: &Path, strategy: String) -> Result<i32> {
    let config = load_run_config(run_config)?;
    ctx.engine.validate().await?;

    let monitor = ctx.monitor();
    let run_id = monitor.start(Job::new(strategy, config)).await?;
    println!("dry run {run_id} started; Ctrl-C to stop");

    let mut ticker = tokio::time::interval(Duration::from_millis(
        ctx.settings.monitor.poll_interval_ms.max(1000),
    ));
    let code = loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(state) = monitor.status(&run_id) else { break 1 };
                println!(
                    "[{}] {}  balance {}  profit {}  open trades {}  signals {}",
                    state.last_update.format("%H:%M:%S"),
                    state.status,
                    state.current_balance.map(|b| format!("{b:.2}")).unwrap_or_else(|| "-".into()),
                    state.current_profit.map(|p| format!("{p:+.2}%")).unwrap_or_else(|| "-".into()),
                    state.open_trades,
                    state.signals_count,
                );
                if !state.is_active() {
                    if let Some(msg) = &state.error_message {
                        println!("dry run ended: {msg}");
                    }
                    break if state.exit_code == Some(0) { 0 } else { 1 };
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!(run_id = %run_id, "stopping dry run");
                monitor.stop(&run_id).await;
                break 0;
            }
        }
    };

    monitor.shutdown().await;
    Ok(code)
}

fn print_status(store: &RunStore, run_dir: &Path) -> Result<i32> {
    let meta = store.load(run_dir)?;

    println!("run {}  ({})", meta.run_id, status_label(meta.status));
    println!("  created   {}", meta.created_at.format("%Y-%m-%d %H:%M:%S"));
    if let Some(done) = meta.completed_at {
        println!("  completed {}", done.format("%Y-%m-%d %H:%M:%S"));
    }
    println!(
        "  range     {}  timeframe {}  pairs {}",
        meta.config.timerange(),
        meta.config.timeframe,
        meta.config.pairs.join(",")
    );
    for name in &meta.strategies {
        let Some(record) = meta.results.get(name) else {
            continue;
        };
        let detail = match (&record.metrics, &record.error_message) {
            (Some(m), _) => format!(
                "return {:.2}%  win rate {:.2}%  trades {}",
                m.total_return_pct, m.win_rate, m.total_trades
            ),
            (None, Some(err)) => err.clone(),
            (None, None) => String::new(),
        };
        println!("  {:<24} {:<10} {}", name, record.status, detail);
    }

    Ok(0)
}

fn status_label(status: crate::types::RunStatus) -> &'static str {
    match status {
        crate::types::RunStatus::Running => "running",
        crate::types::RunStatus::Completed => "completed",
    }
}

async fn check_data(ctx: &AppContext, run_config: &Path) -> Result<i32> {
    let config = load_run_config(run_config)?;
    let request = DatasetRequest::from(&config);

    let before = ctx.readiness.check(&request);
    if before.ready {
        println!("all datasets ready");
        return Ok(0);
    }
    for issue in &before.issues {
        println!("  {issue}");
    }

    match ctx.readiness.ensure_ready(&request).await {
        Ok(_) => {
            println!("datasets repaired");
            Ok(0)
        }
        Err(e) => {
            println!("{e}");
            Ok(1)
        }
    }
}
