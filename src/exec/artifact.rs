// src/exec/artifact.rs

//! Per-job engine configuration files.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use serde_json::{Value, json};

use crate::config::RunConfig;
use crate::errors::Result;
use crate::result::sanitize_file_component;

/// Where the engine should find and put things for one job.
#[derive(Debug, Clone)]
pub struct ArtifactPaths {
    pub user_data_dir: PathBuf,
    /// Exchange-specific data directory (`<user_data>/data/<exchange>`).
    pub data_dir: PathBuf,
    pub exchange: String,
}

/// Engine configuration document for one strategy.
pub fn engine_config(strategy: &str, config: &RunConfig, paths: &ArtifactPaths) -> Value {
    let stake_amount = match config.stake_amount.parse::<f64>() {
        Ok(amount) => json!(amount),
        Err(_) => json!(config.stake_amount),
    };

    json!({
        "strategy": strategy,
        "timeframe": config.timeframe,
        "timerange": config.timerange(),
        "stake_currency": "USDT",
        "stake_amount": stake_amount,
        "dry_run": true,
        "dry_run_wallet": config.initial_balance,
        "max_open_trades": config.max_open_trades,
        "fee": config.fee,
        "enable_position_stacking": config.enable_position_stacking,
        "user_data_dir": paths.user_data_dir,
        "datadir": paths.data_dir,
        "exchange": {
            "name": paths.exchange,
            "pair_whitelist": config.pairs,
            "ccxt_config": {},
            "ccxt_async_config": {},
        },
        "pairlists": [{ "method": "StaticPairList" }],
        "entry_pricing": { "price_side": "same", "use_order_book": false },
        "exit_pricing": { "price_side": "same", "use_order_book": false },
    })
}

/// Backtest variant: isolated trade database and export location.
pub fn backtest_config(
    strategy: &str,
    config: &RunConfig,
    paths: &ArtifactPaths,
    scratch_dir: &Path,
    export_path: &Path,
) -> Value {
    let mut doc = engine_config(strategy, config, paths);
    let db = scratch_dir.join(format!(
        "tradesv3_{}_{}.sqlite",
        sanitize_file_component(strategy),
        crate::short_token()
    ));
    doc["db_url"] = json!(format!("sqlite:///{}", db.display()));
    doc["export"] = json!("trades");
    doc["exportfilename"] = json!(export_path);
    doc
}

/// Dry-run variant: persistent trade database, no external notifiers.
pub fn dry_run_config(
    strategy: &str,
    config: &RunConfig,
    paths: &ArtifactPaths,
    scratch_dir: &Path,
    run_id: &str,
) -> Value {
    let mut doc = engine_config(strategy, config, paths);
    let db = scratch_dir.join(format!("dryrun_{run_id}.sqlite"));
    doc["db_url"] = json!(format!("sqlite:///{}", db.display()));
    doc["telegram"] = json!({ "enabled": false });
    doc["api_server"] = json!({ "enabled": false });
    doc["initial_state"] = json!("running");
    doc
}

/// Write `doc` to `<scratch>/<prefix>_<strategy>_<ts>_<token>.json`.
///
/// The random token keeps two jobs for the same strategy started in the
/// same second from colliding.
pub fn write_artifact(scratch_dir: &Path, prefix: &str, strategy: &str, doc: &Value) -> Result<PathBuf> {
    fs::create_dir_all(scratch_dir)?;
    let path = scratch_dir.join(format!(
        "{prefix}_{}_{}_{}.json",
        sanitize_file_component(strategy),
        Local::now().format("%Y%m%d_%H%M%S"),
        crate::short_token()
    ));
    fs::write(&path, serde_json::to_vec_pretty(doc)?)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use tempfile::TempDir;

    use super::*;

    fn run_config() -> RunConfig {
        RunConfig {
            start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            timeframe: "5m".into(),
            pairs: vec!["BTC/USDT".into(), "ETH/USDT".into()],
            initial_balance: 1000.0,
            max_open_trades: 3,
            fee: 0.001,
            stake_amount: "unlimited".into(),
            enable_position_stacking: false,
            run_id: Some("run_t".into()),
        }
    }

    fn paths() -> ArtifactPaths {
        ArtifactPaths {
            user_data_dir: "user_data".into(),
            data_dir: "user_data/data/binance".into(),
            exchange: "binance".into(),
        }
    }

    #[test]
    fn backtest_config_carries_job_settings() {
        let doc = backtest_config(
            "SampleStrategy",
            &run_config(),
            &paths(),
            Path::new("temp"),
            Path::new("temp/exports/x"),
        );

        assert_eq!(doc["strategy"], "SampleStrategy");
        assert_eq!(doc["timerange"], "20240101-20240301");
        assert_eq!(doc["stake_amount"], "unlimited");
        assert_eq!(doc["dry_run_wallet"], 1000.0);
        assert_eq!(doc["exchange"]["pair_whitelist"], json!(["BTC/USDT", "ETH/USDT"]));
        assert_eq!(doc["export"], "trades");
        assert!(doc["db_url"].as_str().unwrap().contains("tradesv3_SampleStrategy_"));
    }

    #[test]
    fn numeric_stake_amount_is_a_number() {
        let mut cfg = run_config();
        cfg.stake_amount = "100".into();
        let doc = engine_config("S", &cfg, &paths());
        assert_eq!(doc["stake_amount"], 100.0);
    }

    #[test]
    fn dry_run_config_disables_notifiers() {
        let doc = dry_run_config("S", &run_config(), &paths(), Path::new("temp"), "dr1");
        assert_eq!(doc["telegram"]["enabled"], false);
        assert_eq!(doc["api_server"]["enabled"], false);
        assert!(doc["db_url"].as_str().unwrap().ends_with("dryrun_dr1.sqlite"));
    }

    #[test]
    fn artifacts_for_the_same_strategy_do_not_collide() {
        let tmp = TempDir::new().unwrap();
        let doc = json!({});
        let a = write_artifact(tmp.path(), "config", "S", &doc).unwrap();
        let b = write_artifact(tmp.path(), "config", "S", &doc).unwrap();
        assert_ne!(a, b);
        assert!(a.exists() && b.exists());
    }
}
