// src/config/validate.rs

use crate::config::model::{RawSettings, RunConfig, Settings, VALID_TIMEFRAMES};
use crate::errors::{Result, StratrunError};

impl TryFrom<RawSettings> for Settings {
    type Error = StratrunError;

    fn try_from(raw: RawSettings) -> std::result::Result<Self, Self::Error> {
        validate_settings(&raw)?;
        Ok(Settings::new_unchecked(raw))
    }
}

fn validate_settings(raw: &RawSettings) -> Result<()> {
    if raw.scheduler.max_workers == 0 {
        return Err(StratrunError::config(
            "[scheduler].max_workers must be >= 1 (got 0)",
        ));
    }

    if raw.engine.binary.as_os_str().is_empty() {
        return Err(StratrunError::config("[engine].binary must not be empty"));
    }

    if raw.engine.validate_timeout_secs == 0 {
        return Err(StratrunError::config(
            "[engine].validate_timeout_secs must be >= 1 (got 0)",
        ));
    }

    if raw.monitor.poll_interval_ms == 0 {
        return Err(StratrunError::config(
            "[monitor].poll_interval_ms must be >= 1 (got 0)",
        ));
    }

    if raw.monitor.log_window == 0 {
        return Err(StratrunError::config(
            "[monitor].log_window must be >= 1 (got 0)",
        ));
    }

    Ok(())
}

/// Check a run configuration before any job is built from it.
pub fn validate_run_config(cfg: &RunConfig) -> Result<()> {
    if cfg.start_date >= cfg.end_date {
        return Err(StratrunError::config(format!(
            "start date {} must be earlier than end date {}",
            cfg.start_date, cfg.end_date
        )));
    }

    if !(cfg.initial_balance > 0.0) {
        return Err(StratrunError::config(format!(
            "initial balance must be greater than 0 (got {})",
            cfg.initial_balance
        )));
    }

    if cfg.max_open_trades == 0 {
        return Err(StratrunError::config(
            "max open trades must be greater than 0",
        ));
    }

    if !VALID_TIMEFRAMES.contains(&cfg.timeframe.as_str()) {
        return Err(StratrunError::config(format!(
            "invalid timeframe: {}",
            cfg.timeframe
        )));
    }

    if !(0.0..1.0).contains(&cfg.fee) {
        return Err(StratrunError::config(format!(
            "fee must be in [0, 1) (got {})",
            cfg.fee
        )));
    }

    if cfg.pairs.is_empty() {
        return Err(StratrunError::config("at least one trading pair is required"));
    }

    for pair in &cfg.pairs {
        let valid = pair
            .split_once('/')
            .is_some_and(|(base, quote)| !base.is_empty() && !quote.is_empty() && !quote.contains('/'));
        if !valid {
            return Err(StratrunError::config(format!(
                "invalid pair '{pair}' (expected BASE/QUOTE)"
            )));
        }
    }

    if let Some(run_id) = &cfg.run_id {
        validate_run_id(run_id)?;
    }

    Ok(())
}

/// A run id names one directory directly under the runs directory.
pub fn validate_run_id(run_id: &str) -> Result<()> {
    if run_id.trim().is_empty() || run_id.contains(['/', '\\']) || run_id.contains("..") {
        return Err(StratrunError::config(format!("invalid run id '{run_id}'")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn base() -> RunConfig {
        RunConfig {
            start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            timeframe: "5m".to_string(),
            pairs: vec!["BTC/USDT".to_string()],
            initial_balance: 1000.0,
            max_open_trades: 3,
            fee: 0.001,
            stake_amount: "unlimited".to_string(),
            enable_position_stacking: false,
            run_id: None,
        }
    }

    #[test]
    fn accepts_valid_run_config() {
        validate_run_config(&base()).unwrap();
        assert_eq!(base().timerange(), "20240101-20240301");
    }

    #[test]
    fn rejects_inverted_dates() {
        let mut cfg = base();
        cfg.end_date = cfg.start_date;
        assert!(matches!(
            validate_run_config(&cfg),
            Err(StratrunError::Config(msg)) if msg.contains("earlier")
        ));
    }

    #[test]
    fn rejects_unknown_timeframe_and_bad_pairs() {
        let mut cfg = base();
        cfg.timeframe = "7m".to_string();
        assert!(validate_run_config(&cfg).is_err());

        let mut cfg = base();
        cfg.pairs = vec!["BTCUSDT".to_string()];
        assert!(validate_run_config(&cfg).is_err());
    }

    #[test]
    fn rejects_run_ids_that_leave_the_runs_dir() {
        for bad in ["../escaped", "..", "a/b", "a\\b", "x..y", "  "] {
            let mut cfg = base();
            cfg.run_id = Some(bad.to_string());
            assert!(
                matches!(validate_run_config(&cfg), Err(StratrunError::Config(_))),
                "{bad:?} accepted"
            );
        }
        validate_run_id("run_20240101_ab12").unwrap();
    }

    #[test]
    fn empty_pairs_are_rejected() {
        let mut cfg = base();
        cfg.pairs.clear();
        assert!(matches!(
            validate_run_config(&cfg),
            Err(StratrunError::Config(msg)) if msg.contains("pair")
        ));
    }

    #[test]
    fn zero_workers_is_rejected() {
        let mut raw = RawSettings::default();
        raw.scheduler.max_workers = 0;
        assert!(matches!(Settings::try_from(raw), Err(StratrunError::Config(_))));
    }
}
