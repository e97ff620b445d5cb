// tests/monitor_dry_run.rs
#![cfg(unix)]

mod common;
use crate::common::{RunConfigBuilder, TestResult, init_tracing, with_timeout};

use std::time::Duration;

use stratrun::context::AppContext;
use stratrun::monitor::{DryRunMonitor, DryRunState, SignalSide};
use stratrun::types::ExecutionStatus;
use stratrun_test_utils::fake_engine::FakeEngine;

/// Poll snapshots until `done` holds.
async fn wait_until(
    monitor: &DryRunMonitor,
    run_id: &str,
    done: impl Fn(&DryRunState) -> bool,
) -> DryRunState {
    with_timeout(async {
        loop {
            if let Some(state) = monitor.status(run_id) {
                if done(&state) {
                    return state;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
}

#[tokio::test]
async fn running_dry_run_reports_events_and_stops() -> TestResult {
    init_tracing();
    let engine = FakeEngine::new();
    let ctx = AppContext::new(engine.settings());
    let monitor = ctx.monitor();

    let job = RunConfigBuilder::new().job("SampleStrategy");
    let run_id = monitor.start(job).await?;
    assert!(run_id.starts_with("dryrun_SampleStrategy_"));

    let state = wait_until(&monitor, &run_id, |s| s.open_trades == 1 && s.signals_count == 1).await;
    assert_eq!(state.status, ExecutionStatus::Running);
    assert!(state.pid.is_some());
    assert_eq!(state.current_balance, Some(1010.5));
    assert_eq!(state.current_profit, Some(1.05));
    let signal = &state.trade_signals[0];
    assert_eq!(signal.side, SignalSide::Buy);
    assert_eq!(signal.pair, "BTC/USDT");
    assert_eq!(signal.price, 42000.5);
    assert_eq!(state.recent_logs.len(), 4);
    assert_eq!(monitor.active().len(), 1);

    assert!(monitor.stop(&run_id).await);
    let state = monitor.status(&run_id).ok_or("state dropped after stop")?;
    assert_eq!(state.status, ExecutionStatus::Stopped);
    assert!(!state.is_active());
    assert!(monitor.active().is_empty());
    assert!(!monitor.stop(&run_id).await, "already stopped");

    // The engine got a dry-run config that points at its own database.
    let call = engine
        .calls()
        .into_iter()
        .find(|line| line.starts_with("trade"))
        .ok_or("engine never ran trade")?;
    assert!(call.contains("--strategy SampleStrategy"));

    monitor.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn engine_exit_is_picked_up_by_the_poll_loop() -> TestResult {
    init_tracing();
    let engine = FakeEngine::new();
    let ctx = AppContext::new(engine.settings());
    let monitor = ctx.monitor();

    let ok = monitor.start(RunConfigBuilder::new().job("ExitEarly")).await?;
    let crashed = monitor.start(RunConfigBuilder::new().job("CrashHard")).await?;

    let ok_state = wait_until(&monitor, &ok, |s| !s.is_active()).await;
    assert_eq!(ok_state.status, ExecutionStatus::Completed);
    assert_eq!(ok_state.exit_code, Some(0));
    assert!(ok_state.error_message.is_none());
    assert_eq!(ok_state.signals_count, 1);

    let crash_state = wait_until(&monitor, &crashed, |s| !s.is_active()).await;
    assert_eq!(crash_state.status, ExecutionStatus::Failed);
    assert_eq!(crash_state.exit_code, Some(3));
    assert!(crash_state.error_message.unwrap_or_default().contains("code 3"));
    assert!(crash_state.recent_logs.iter().any(|l| l.contains("exchange unreachable")));

    assert_eq!(monitor.all().len(), 2);
    assert_eq!(monitor.cleanup(Duration::ZERO), 2);
    assert!(monitor.all().is_empty());

    monitor.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn same_run_id_cannot_start_twice_while_active() -> TestResult {
    init_tracing();
    let engine = FakeEngine::new();
    let ctx = AppContext::new(engine.settings());
    let monitor = ctx.monitor();

    let job = RunConfigBuilder::new().with_run_id("dry_fixed").job("SampleStrategy");
    let run_id = monitor.start(job.clone()).await?;
    assert_eq!(run_id, "dry_fixed");

    let again = monitor.start(job).await;
    assert!(again.is_err());

    // Cleanup never drops a live dry run.
    assert_eq!(monitor.cleanup(Duration::ZERO), 0);

    // Shutdown stops everything still running.
    monitor.shutdown().await;
    let state = monitor.status(&run_id).ok_or("state dropped")?;
    assert_eq!(state.status, ExecutionStatus::Stopped);
    Ok(())
}

#[tokio::test]
async fn concurrent_starts_with_one_run_id_launch_one_process() -> TestResult {
    init_tracing();
    let engine = FakeEngine::new();
    let ctx = AppContext::new(engine.settings());
    let monitor = ctx.monitor();

    let job = RunConfigBuilder::new().with_run_id("dry_race").job("SampleStrategy");
    let (first, second) = tokio::join!(monitor.start(job.clone()), monitor.start(job));

    assert_eq!(
        [first.is_ok(), second.is_ok()].iter().filter(|ok| **ok).count(),
        1,
        "{first:?} / {second:?}"
    );
    assert_eq!(monitor.active().len(), 1);

    // The survivor is still alive and is the one that gets stopped.
    let state = wait_until(&monitor, "dry_race", |s| s.signals_count == 1).await;
    assert_eq!(state.status, ExecutionStatus::Running);
    assert!(monitor.stop("dry_race").await);
    assert_eq!(engine.calls_of("trade"), 1);

    monitor.shutdown().await;
    Ok(())
}
