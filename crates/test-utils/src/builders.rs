#![allow(dead_code)]

use chrono::NaiveDate;
use stratrun::config::RunConfig;
use stratrun::result::Job;

/// Builder for `RunConfig` with a small, valid default window.
pub struct RunConfigBuilder {
    config: RunConfig,
}

impl RunConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: RunConfig {
                start_date: date(2024, 1, 1),
                end_date: date(2024, 1, 31),
                timeframe: "5m".to_string(),
                pairs: vec!["BTC/USDT".to_string()],
                initial_balance: 1000.0,
                max_open_trades: 3,
                fee: 0.001,
                stake_amount: "unlimited".to_string(),
                enable_position_stacking: false,
                run_id: None,
            },
        }
    }

    pub fn with_pairs(mut self, pairs: &[&str]) -> Self {
        self.config.pairs = pairs.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn with_timeframe(mut self, timeframe: &str) -> Self {
        self.config.timeframe = timeframe.to_string();
        self
    }

    pub fn with_range(mut self, start: (i32, u32, u32), end: (i32, u32, u32)) -> Self {
        self.config.start_date = date(start.0, start.1, start.2);
        self.config.end_date = date(end.0, end.1, end.2);
        self
    }

    pub fn with_run_id(mut self, run_id: &str) -> Self {
        self.config = self.config.with_run_id(run_id);
        self
    }

    pub fn build(self) -> RunConfig {
        self.config
    }

    /// Shorthand for a job over the built config.
    pub fn job(self, strategy: &str) -> Job {
        Job::new(strategy, self.build())
    }
}

impl Default for RunConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid test date")
}
