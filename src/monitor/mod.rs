// src/monitor/mod.rs

//! Process Monitor for continuous dry runs: one subprocess per job, a
//! single background poll loop, and snapshot-only state access.

pub mod events;
pub mod process;
pub mod state;

pub use events::{LogEvent, SignalSide, parse_line};
pub use process::{DryRunMonitor, MonitorOptions};
pub use state::{BalanceSnapshot, DryRunState, TradeSignal};
