// src/monitor/state.rs

use std::collections::VecDeque;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::monitor::events::{LogEvent, SignalSide};
use crate::types::ExecutionStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeSignal {
    pub timestamp: DateTime<Local>,
    pub side: SignalSide,
    pub pair: String,
    pub amount: f64,
    pub currency: String,
    pub price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub timestamp: DateTime<Local>,
    pub balance: f64,
    pub profit_pct: f64,
}

/// Snapshot of one supervised dry run. Callers only ever see clones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DryRunState {
    pub run_id: String,
    pub strategy: String,
    pub status: ExecutionStatus,
    pub start_time: DateTime<Local>,
    pub last_update: DateTime<Local>,
    pub pid: Option<u32>,
    pub exit_code: Option<i32>,
    pub error_message: Option<String>,
    pub signals_count: usize,
    pub current_balance: Option<f64>,
    pub current_profit: Option<f64>,
    pub open_trades: u32,
    pub latest_log_line: Option<String>,
    pub recent_logs: VecDeque<String>,
    pub trade_signals: Vec<TradeSignal>,
    pub balance_history: Vec<BalanceSnapshot>,
}

impl DryRunState {
    pub fn new(run_id: impl Into<String>, strategy: impl Into<String>) -> Self {
        let now = Local::now();
        Self {
            run_id: run_id.into(),
            strategy: strategy.into(),
            status: ExecutionStatus::Pending,
            start_time: now,
            last_update: now,
            pid: None,
            exit_code: None,
            error_message: None,
            signals_count: 0,
            current_balance: None,
            current_profit: None,
            open_trades: 0,
            latest_log_line: None,
            recent_logs: VecDeque::new(),
            trade_signals: Vec::new(),
            balance_history: Vec::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }

    /// Append a log line to the rolling window (at most `window` lines) and
    /// fold in any event it carries.
    pub fn ingest(&mut self, line: &str, window: usize, event: Option<LogEvent>) {
        let now = Local::now();
        self.last_update = now;
        self.latest_log_line = Some(line.to_string());
        self.recent_logs.push_back(line.to_string());
        while self.recent_logs.len() > window {
            self.recent_logs.pop_front();
        }

        match event {
            Some(LogEvent::Signal {
                side,
                pair,
                amount,
                currency,
                price,
            }) => {
                self.signals_count += 1;
                self.trade_signals.push(TradeSignal {
                    timestamp: now,
                    side,
                    pair,
                    amount,
                    currency,
                    price,
                });
            }
            Some(LogEvent::Balance { balance, profit_pct }) => {
                self.current_balance = Some(balance);
                self.current_profit = Some(profit_pct);
                self.balance_history.push(BalanceSnapshot {
                    timestamp: now,
                    balance,
                    profit_pct,
                });
            }
            Some(LogEvent::OpenTrades(n)) => self.open_trades = n,
            None => {}
        }
    }

    /// Move to a terminal status once; later calls are ignored.
    pub fn finish(&mut self, status: ExecutionStatus, exit_code: Option<i32>) {
        if self.status.is_terminal() {
            return;
        }
        self.status = status;
        self.exit_code = exit_code;
        self.last_update = Local::now();
    }
}
