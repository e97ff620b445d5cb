// tests/cli_commands.rs
#![cfg(unix)]

mod common;
use crate::common::{TestResult, init_tracing, with_timeout};

use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;
use stratrun::cli::{CliArgs, Command};
use stratrun_test_utils::fake_engine::FakeEngine;

/// Write a settings file pointing at the fake engine.
fn write_settings(engine: &FakeEngine) -> PathBuf {
    let root = engine.root();
    let path = root.join("Stratrun.toml");
    let toml = format!(
        r#"
[engine]
binary = "{binary}"
user_data_dir = "{root}/user_data"
backtest_timeout_secs = 20

[scheduler]
max_workers = 2

[storage]
runs_dir = "{root}/runs"
scratch_dir = "{root}/scratch"

[data]
min_file_bytes = 16
"#,
        binary = engine.binary().display(),
        root = root.display(),
    );
    fs::write(&path, toml).expect("write settings");
    path
}

fn write_run_config(dir: &Path, name: &str, pairs: &[&str], run_id: &str) -> PathBuf {
    let path = dir.join(name);
    let doc = serde_json::json!({
        "start_date": "2024-01-01",
        "end_date": "2024-01-31",
        "timeframe": "5m",
        "pairs": pairs,
        "initial_balance": 1000.0,
        "max_open_trades": 3,
        "run_id": run_id,
    });
    fs::write(&path, doc.to_string()).expect("write run config");
    path
}

fn args(settings: &Path, rest: &[&str]) -> CliArgs {
    let mut argv = vec!["stratrun", "--config", settings.to_str().unwrap()];
    argv.extend_from_slice(rest);
    CliArgs::try_parse_from(argv).expect("valid arguments")
}

#[test]
fn backtest_requires_a_strategy() {
    let parsed = CliArgs::try_parse_from(["stratrun", "backtest", "--run-config", "run.json"]);
    assert!(parsed.is_err());

    let parsed = CliArgs::try_parse_from([
        "stratrun", "backtest", "--run-config", "run.json", "--strategy", "A", "--strategy", "B",
    ])
    .unwrap();
    match parsed.command {
        Command::Backtest { strategies, workers, .. } => {
            assert_eq!(strategies, ["A", "B"]);
            assert_eq!(workers, None);
        }
        other => panic!("unexpected command {other:?}"),
    }
}

#[test]
fn zero_workers_is_rejected_at_parse_time() {
    let base = ["stratrun", "backtest", "--run-config", "run.json", "--strategy", "A"];

    let zero = CliArgs::try_parse_from(base.iter().copied().chain(["--workers", "0"]));
    assert!(zero.is_err(), "--workers 0 must not parse");

    let three = CliArgs::try_parse_from(base.iter().copied().chain(["--workers", "3"])).unwrap();
    match three.command {
        Command::Backtest { workers, .. } => assert_eq!(workers, Some(3)),
        other => panic!("unexpected command {other:?}"),
    }
}

#[test]
fn settings_path_defaults_to_the_working_directory() {
    let parsed = CliArgs::try_parse_from(["stratrun", "status", "--run-dir", "runs/x"]).unwrap();
    assert_eq!(parsed.config, PathBuf::from("Stratrun.toml"));
}

#[tokio::test]
async fn backtest_then_status_exit_cleanly() -> TestResult {
    init_tracing();
    let engine = FakeEngine::new();
    let settings = write_settings(&engine);
    let run_config = write_run_config(engine.root(), "run.json", &["BTC/USDT"], "run_cli");

    let code = with_timeout(stratrun::run(args(
        &settings,
        &[
            "backtest",
            "--run-config",
            run_config.to_str().unwrap(),
            "--strategy",
            "Alpha",
            "--strategy",
            "Beta",
        ],
    )))
    .await?;
    assert_eq!(code, 0);

    let run_dir = engine.root().join("runs").join("run_cli");
    assert!(run_dir.join("run_metadata.json").exists());

    let code = stratrun::run(args(&settings, &["status", "--run-dir", run_dir.to_str().unwrap()])).await?;
    assert_eq!(code, 0);
    Ok(())
}

#[tokio::test]
async fn failed_strategy_sets_exit_code() -> TestResult {
    init_tracing();
    let engine = FakeEngine::new();
    let settings = write_settings(&engine);
    let run_config = write_run_config(engine.root(), "run.json", &["BTC/USDT"], "run_cli_fail");

    let code = with_timeout(stratrun::run(args(
        &settings,
        &[
            "backtest",
            "--run-config",
            run_config.to_str().unwrap(),
            "--strategy",
            "BrokenAlpha",
        ],
    )))
    .await?;
    assert_eq!(code, 1);
    Ok(())
}

#[tokio::test]
async fn check_data_downloads_or_reports() -> TestResult {
    init_tracing();
    let engine = FakeEngine::new();
    let settings = write_settings(&engine);

    let good = write_run_config(engine.root(), "good.json", &["BTC/USDT", "ETH/USDT"], "r1");
    let code = stratrun::run(args(&settings, &["check-data", "--run-config", good.to_str().unwrap()])).await?;
    assert_eq!(code, 0);
    assert_eq!(engine.calls_of("download-data"), 1);

    // Already present now: no second download.
    let code = stratrun::run(args(&settings, &["check-data", "--run-config", good.to_str().unwrap()])).await?;
    assert_eq!(code, 0);
    assert_eq!(engine.calls_of("download-data"), 1);

    let bad = write_run_config(engine.root(), "bad.json", &["NODATA/USDT"], "r2");
    let code = stratrun::run(args(&settings, &["check-data", "--run-config", bad.to_str().unwrap()])).await?;
    assert_eq!(code, 1);
    Ok(())
}
