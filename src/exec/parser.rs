// src/exec/parser.rs

//! Fallback: scrape metrics from the engine's human-readable report when no
//! structured export was produced.

use std::sync::LazyLock;

use regex::Regex;

use crate::result::{PerformanceMetrics, TradeRecord};

const NUM: &str = r"([+-]?\d+(?:\.\d+)?)";

struct Patterns {
    total_return: Regex,
    total_return_pct: Regex,
    win_rate: Regex,
    max_drawdown: Regex,
    max_drawdown_pct: Regex,
    sharpe: Regex,
    sortino: Regex,
    calmar: Regex,
    profit_factor: Regex,
    total_trades: Regex,
    winning_trades: Regex,
    losing_trades: Regex,
    avg_profit: Regex,
    avg_profit_pct: Regex,
    avg_duration: Regex,
}

fn row(label: &str, suffix: &str) -> Regex {
    // Accept both ASCII and box-drawing column separators.
    Regex::new(&format!(r"{label}\s*[|│]\s*{NUM}\s*{suffix}"))
        .unwrap_or_else(|e| panic!("invalid built-in pattern for {label}: {e}"))
}

static PATTERNS: LazyLock<Patterns> = LazyLock::new(|| Patterns {
    total_return: row(r"Total profit USDT", ""),
    total_return_pct: row(r"Total profit %", ""),
    win_rate: row(r"Win rate", "%"),
    max_drawdown: row(r"Max drawdown", "USDT"),
    max_drawdown_pct: row(r"Max drawdown %", ""),
    sharpe: row(r"Sharpe", ""),
    sortino: row(r"Sortino", ""),
    calmar: row(r"Calmar", ""),
    profit_factor: row(r"Profit factor", ""),
    total_trades: row(r"Total trades", ""),
    winning_trades: row(r"Winning trades", ""),
    losing_trades: row(r"Losing trades", ""),
    avg_profit: row(r"Avg\. profit", "USDT"),
    avg_profit_pct: row(r"Avg\. profit %", ""),
    avg_duration: row(r"Avg\. duration", ""),
});

static LEADING_NUM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(NUM).unwrap_or_else(|e| panic!("invalid built-in number pattern: {e}"))
});

fn capture(re: &Regex, text: &str) -> Option<f64> {
    re.captures(text)?.get(1)?.as_str().parse().ok()
}

/// Metrics found in `output`, or `None` when not a single one matched.
pub fn parse_metrics(output: &str) -> Option<PerformanceMetrics> {
    let p = &*PATTERNS;
    let mut found = false;
    let mut grab = |re: &Regex| {
        let value = capture(re, output);
        found |= value.is_some();
        value.unwrap_or_default()
    };

    let mut metrics = PerformanceMetrics {
        total_return: grab(&p.total_return),
        total_return_pct: grab(&p.total_return_pct),
        win_rate: grab(&p.win_rate),
        max_drawdown: grab(&p.max_drawdown),
        max_drawdown_pct: grab(&p.max_drawdown_pct),
        sharpe_ratio: grab(&p.sharpe),
        sortino_ratio: grab(&p.sortino),
        calmar_ratio: grab(&p.calmar),
        profit_factor: grab(&p.profit_factor),
        total_trades: grab(&p.total_trades) as u64,
        winning_trades: grab(&p.winning_trades) as u64,
        losing_trades: grab(&p.losing_trades) as u64,
        avg_profit: grab(&p.avg_profit),
        avg_profit_pct: grab(&p.avg_profit_pct),
        avg_duration: grab(&p.avg_duration),
    };

    if !found {
        return None;
    }
    metrics.calculate_derived_metrics();
    Some(metrics)
}

/// Per-pair rows of the `BACKTESTING REPORT` table.
///
/// The header row names `Pair` and `Profit`; data rows have at least six
/// columns with the pair first and the absolute profit second to last.
/// Units after the number (`12.5 USDT`) are ignored.
pub fn parse_trades(output: &str) -> Vec<TradeRecord> {
    let Some(start) = output.find("BACKTESTING REPORT") else {
        return Vec::new();
    };

    let mut trades = Vec::new();
    let mut in_table = false;

    for line in output[start..].lines().skip(1) {
        let cells: Vec<&str> = line
            .split(['|', '│', '┃'])
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .collect();

        if !in_table {
            in_table = cells.iter().any(|c| c.contains("Pair")) && cells.iter().any(|c| c.contains("Profit"));
            continue;
        }
        if line.trim().is_empty() {
            break;
        }
        if cells.len() < 6 || cells[0].eq_ignore_ascii_case("TOTAL") {
            continue;
        }

        trades.push(TradeRecord {
            pair: cells[0].to_string(),
            profit_abs: capture(&LEADING_NUM, cells[cells.len() - 2]),
            ..Default::default()
        });
    }

    trades
}
