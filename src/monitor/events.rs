// src/monitor/events.rs

//! Domain events recognized in dry-run engine output.

use std::sync::LazyLock;

use regex::Regex;

#[derive(Debug, Clone, PartialEq)]
pub enum LogEvent {
    Signal {
        side: SignalSide,
        pair: String,
        amount: f64,
        currency: String,
        price: f64,
    },
    Balance {
        balance: f64,
        profit_pct: f64,
    },
    OpenTrades(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalSide {
    Buy,
    Sell,
}

static SIGNAL: LazyLock<Regex> = LazyLock::new(|| {
    compile(r"INFO - (.*?): (Buy|Sell) signal for ([\d.]+) (\S+) at ([\d.]+) USDT")
});

static BALANCE: LazyLock<Regex> = LazyLock::new(|| {
    compile(r"INFO - Current balance: ([\d.]+) USDT \(([+-]?[\d.]+)% profit\)")
});

static OPEN_TRADES: LazyLock<Regex> =
    LazyLock::new(|| compile(r"INFO - Current open trades: (\d+)"));

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid built-in pattern {pattern:?}: {e}"))
}

/// The event carried by `line`, if any.
pub fn parse_line(line: &str) -> Option<LogEvent> {
    if let Some(c) = SIGNAL.captures(line) {
        let side = if &c[2] == "Buy" { SignalSide::Buy } else { SignalSide::Sell };
        return Some(LogEvent::Signal {
            side,
            // The prefix may carry a logger name: "freqtrade.worker - BTC/USDT".
            pair: c[1].rsplit(" - ").next().unwrap_or(&c[1]).trim().to_string(),
            amount: c[3].parse().ok()?,
            currency: c[4].to_string(),
            price: c[5].parse().ok()?,
        });
    }

    if let Some(c) = BALANCE.captures(line) {
        return Some(LogEvent::Balance {
            balance: c[1].parse().ok()?,
            profit_pct: c[2].parse().ok()?,
        });
    }

    OPEN_TRADES
        .captures(line)
        .and_then(|c| c[1].parse().ok())
        .map(LogEvent::OpenTrades)
}
