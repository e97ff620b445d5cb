// src/exec/resolve.rs

//! Locate and read the engine's structured export.
//!
//! The engine writes either a plain JSON document or a zip archive whose
//! summary member is a `.json` with `backtest-result` in its name. Trades may
//! live inside the summary block or in sibling members named after the
//! strategy.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::{debug, warn};
use zip::ZipArchive;

use crate::errors::{Result, StratrunError};
use crate::result::{PerformanceMetrics, TradeRecord};

/// Files currently present in `dir` (empty if it does not exist).
pub fn snapshot_dir(dir: &Path) -> HashSet<PathBuf> {
    match fs::read_dir(dir) {
        Ok(entries) => entries.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
        Err(_) => HashSet::new(),
    }
}

fn is_export_candidate(path: &Path) -> bool {
    let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
    if name.starts_with('.') || name.ends_with(".meta.json") {
        return false;
    }
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("zip") | Some("json")
    )
}

/// Find the export produced by one invocation.
///
/// Prefers the requested path itself; otherwise the newest candidate in its
/// directory that was not there before the run.
pub fn locate_export(requested: &Path, before: &HashSet<PathBuf>) -> Option<PathBuf> {
    if requested.is_file() {
        return Some(requested.to_path_buf());
    }

    let dir = if requested.is_dir() {
        requested
    } else {
        requested.parent()?
    };

    snapshot_dir(dir)
        .into_iter()
        .filter(|p| !before.contains(p) && p.is_file() && is_export_candidate(p))
        .max_by_key(|p| fs::metadata(p).and_then(|m| m.modified()).ok())
}

/// Metrics and trades for `strategy` from an export file.
pub fn read_export(path: &Path, strategy: &str) -> Result<(PerformanceMetrics, Vec<TradeRecord>)> {
    debug!(path = %path.display(), strategy, "reading engine export");
    let is_zip = path.extension().and_then(|e| e.to_str()) == Some("zip");
    if is_zip {
        read_archive(path, strategy)
    } else {
        let doc: Value = serde_json::from_slice(&fs::read(path)?)?;
        let block = strategy_block(&doc, strategy)?;
        Ok((extract_metrics(block), block_trades(block)))
    }
}

fn read_archive(path: &Path, strategy: &str) -> Result<(PerformanceMetrics, Vec<TradeRecord>)> {
    let mut archive = ZipArchive::new(File::open(path)?)?;
    let names: Vec<String> = archive.file_names().map(str::to_string).collect();

    // Per-strategy members share the summary's prefix; the summary is the
    // shortest name.
    let summary_name = names
        .iter()
        .filter(|n| {
            let stem = Path::new(n.as_str()).file_stem().map(|s| s.to_string_lossy().into_owned());
            n.ends_with(".json") && stem.is_some_and(|s| s.contains("backtest-result"))
        })
        .min_by_key(|n| n.len())
        .ok_or_else(|| StratrunError::resolution(format!("no backtest-result summary in {}", path.display())))?
        .clone();

    let summary = read_member(&mut archive, &summary_name)?;
    let block = strategy_block(&summary, strategy)?;
    let metrics = extract_metrics(block);
    let mut trades = block_trades(block);

    if trades.is_empty() {
        let wanted = strategy.to_lowercase();
        for name in names.iter().filter(|n| **n != summary_name && n.ends_with(".json")) {
            let stem = Path::new(name.as_str())
                .file_stem()
                .map(|s| s.to_string_lossy().to_lowercase())
                .unwrap_or_default();
            if !stem.contains(&wanted) {
                continue;
            }
            match read_member(&mut archive, name) {
                Ok(doc) => trades.extend(payload_trades(&doc)),
                Err(e) => warn!(member = %name, error = %e, "skipping unreadable archive member"),
            }
        }
    }

    Ok((metrics, trades))
}

fn read_member(archive: &mut ZipArchive<File>, name: &str) -> Result<Value> {
    let mut body = String::new();
    archive.by_name(name)?.read_to_string(&mut body)?;
    Ok(serde_json::from_str(&body)?)
}

/// `doc.strategy.<name>` (or `strategies`), matched case-insensitively; a
/// single-strategy export is accepted under any name.
fn strategy_block<'a>(doc: &'a Value, strategy: &str) -> Result<&'a Map<String, Value>> {
    let section = doc
        .get("strategy")
        .or_else(|| doc.get("strategies"))
        .and_then(Value::as_object)
        .ok_or_else(|| StratrunError::resolution("export has no strategy section"))?;

    let block = section
        .get(strategy)
        .or_else(|| {
            section
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(strategy))
                .map(|(_, v)| v)
        })
        .or_else(|| (section.len() == 1).then(|| section.values().next()).flatten())
        .and_then(Value::as_object)
        .ok_or_else(|| StratrunError::resolution(format!("strategy '{strategy}' not found in export")))?;

    Ok(block)
}

/// Number from a JSON number or a numeric string (`"12.5%"` included).
fn number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').replace(',', "").parse().ok(),
        _ => None,
    }
}

fn first(block: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|k| block.get(*k).and_then(number))
}

fn text(v: &Value) -> Option<String> {
    match v {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn first_text(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| obj.get(*k).and_then(text))
}

/// Map the engine's metric keys onto [`PerformanceMetrics`].
pub fn extract_metrics(block: &Map<String, Value>) -> PerformanceMetrics {
    let total_return = first(block, &["profit_total_abs", "profit_abs", "total_profit"]).unwrap_or_default();
    let total_return_pct = match first(block, &["profit_total_pct"]) {
        Some(pct) => pct,
        None => first(block, &["profit_total"]).map(|r| r * 100.0).unwrap_or_default(),
    };
    let max_drawdown = first(block, &["max_drawdown_abs", "max_drawdown"]).unwrap_or_default();
    let max_drawdown_pct = match first(block, &["max_drawdown_pct"]) {
        Some(pct) => pct,
        None => first(block, &["max_drawdown_account", "max_relative_drawdown"])
            .map(|r| r * 100.0)
            .unwrap_or_default(),
    };
    let win_rate = match first(block, &["winrate", "win_rate"]) {
        // Ratios come as 0..=1.
        Some(r) if r <= 1.0 => r * 100.0,
        Some(pct) => pct,
        None => 0.0,
    };
    let avg_profit_pct = match first(block, &["profit_mean_pct"]) {
        Some(pct) => pct,
        None => first(block, &["profit_mean"]).map(|r| r * 100.0).unwrap_or_default(),
    };

    let mut metrics = PerformanceMetrics {
        total_return,
        total_return_pct,
        win_rate,
        max_drawdown,
        max_drawdown_pct,
        sharpe_ratio: first(block, &["sharpe", "sharpe_ratio"]).unwrap_or_default(),
        sortino_ratio: first(block, &["sortino", "sortino_ratio"]).unwrap_or_default(),
        calmar_ratio: first(block, &["calmar", "calmar_ratio"]).unwrap_or_default(),
        profit_factor: first(block, &["profit_factor"]).unwrap_or_default(),
        total_trades: first(block, &["total_trades", "trade_count", "trades_count"]).unwrap_or_default() as u64,
        winning_trades: first(block, &["wins", "winning_trades"]).unwrap_or_default() as u64,
        losing_trades: first(block, &["losses", "losing_trades"]).unwrap_or_default() as u64,
        avg_profit: first(block, &["profit_mean_abs", "avg_profit"]).unwrap_or_default(),
        avg_profit_pct,
        avg_duration: first(block, &["holding_avg_s", "avg_duration"]).unwrap_or_default(),
    };

    if metrics.total_trades == 0 {
        if let Some(trades) = block.get("trades").and_then(Value::as_array) {
            metrics.total_trades = trades.len() as u64;
        }
    }

    metrics.calculate_derived_metrics();
    metrics
}

fn block_trades(block: &Map<String, Value>) -> Vec<TradeRecord> {
    block
        .get("trades")
        .and_then(Value::as_array)
        .map(|list| list.iter().filter_map(normalize_trade).collect())
        .unwrap_or_default()
}

/// Trades from a standalone payload: a bare list or a `trades` / `data` /
/// `results` list.
fn payload_trades(doc: &Value) -> Vec<TradeRecord> {
    let list = match doc {
        Value::Array(list) => Some(list),
        Value::Object(obj) => ["trades", "data", "results"]
            .iter()
            .find_map(|k| obj.get(*k).and_then(Value::as_array)),
        _ => None,
    };
    list.map(|l| l.iter().filter_map(normalize_trade).collect())
        .unwrap_or_default()
}

fn normalize_trade(raw: &Value) -> Option<TradeRecord> {
    let obj = raw.as_object()?;
    let pair = first_text(obj, &["pair", "symbol"])?;

    let direction = first_text(obj, &["trade_direction", "direction"]).or_else(|| {
        obj.get("is_short")
            .and_then(Value::as_bool)
            .map(|short| if short { "short" } else { "long" }.to_string())
    });
    let profit_pct = first(obj, &["profit_pct", "profit_percent"])
        .or_else(|| first(obj, &["profit_ratio"]).map(|r| r * 100.0));

    Some(TradeRecord {
        pair,
        open_time: first_text(obj, &["open_date", "open_time", "open_timestamp"]),
        close_time: first_text(obj, &["close_date", "close_time", "close_timestamp"]),
        direction,
        stake_amount: first(obj, &["stake_amount", "amount"]),
        profit_abs: first(obj, &["profit_abs", "profit_amount", "profit"]),
        profit_pct,
        exit_reason: first_text(obj, &["exit_reason", "sell_reason"]),
    })
}

/// Move an export (and its `<name>.meta.json` sidecar, if any) into
/// `archives_dir`. Returns the new archive path.
pub fn relocate(export: &Path, archives_dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(archives_dir)?;
    let name = export
        .file_name()
        .ok_or_else(|| StratrunError::resolution(format!("export path has no file name: {}", export.display())))?;
    let target = archives_dir.join(name);
    move_file(export, &target)?;

    let sidecar = sidecar_path(export);
    if sidecar.is_file() {
        if let Err(e) = move_file(&sidecar, &sidecar_path(&target)) {
            warn!(path = %sidecar.display(), error = %e, "failed to move export sidecar");
        }
    }

    Ok(target)
}

fn sidecar_path(export: &Path) -> PathBuf {
    let mut name = export.file_name().unwrap_or_default().to_os_string();
    name.push(".meta.json");
    export.with_file_name(name)
}

/// Rename, falling back to copy + remove across filesystems.
fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    fs::copy(from, to)?;
    fs::remove_file(from)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use serde_json::json;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    use super::*;

    fn summary() -> Value {
        json!({
            "strategy": {
                "SampleStrategy": {
                    "profit_total_abs": 120.0,
                    "profit_total": 0.12,
                    "max_drawdown_abs": 40.0,
                    "max_drawdown_account": 0.04,
                    "wins": 6,
                    "losses": 2,
                    "total_trades": 8,
                    "sharpe": 1.7,
                    "sortino": "2.1",
                    "profit_mean": 0.015
                }
            }
        })
    }

    fn write_zip(path: &Path, members: &[(&str, Value)]) {
        let mut zip = zip::ZipWriter::new(File::create(path).unwrap());
        for (name, doc) in members {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(doc.to_string().as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn maps_metric_aliases_and_derives_missing_values() {
        let doc = summary();
        let block = doc["strategy"]["SampleStrategy"].as_object().unwrap();
        let m = extract_metrics(block);

        assert_eq!(m.total_return, 120.0);
        assert_eq!(m.total_return_pct, 12.0);
        assert_eq!(m.max_drawdown_pct, 4.0);
        assert_eq!(m.sortino_ratio, 2.1);
        assert_eq!(m.avg_profit_pct, 1.5);
        assert_eq!(m.win_rate, 75.0);
        assert_eq!(m.calmar_ratio, 3.0);
    }

    #[test]
    fn reads_zip_archive_with_trades_in_sibling_member() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("backtest-result-2024-01-01_00-00-00.zip");
        write_zip(
            &path,
            &[
                ("backtest-result-2024-01-01_00-00-00.json", summary()),
                (
                    "backtest-result-2024-01-01_00-00-00_SampleStrategy.json",
                    json!({ "trades": [
                        { "pair": "BTC/USDT", "open_date": "2024-01-02 10:00:00",
                          "profit_abs": 3.5, "profit_ratio": 0.02, "is_short": false,
                          "exit_reason": "roi" },
                        { "symbol": "ETH/USDT", "sell_reason": "stop_loss", "profit_abs": -1.0 }
                    ]}),
                ),
            ],
        );

        let (metrics, trades) = read_export(&path, "samplestrategy").unwrap();
        assert_eq!(metrics.total_trades, 8);
        assert_eq!(trades.len(), 2);
        assert_eq!(trades[0].direction.as_deref(), Some("long"));
        assert_eq!(trades[0].profit_pct, Some(2.0));
        assert_eq!(trades[1].pair, "ETH/USDT");
        assert_eq!(trades[1].exit_reason.as_deref(), Some("stop_loss"));
    }

    #[test]
    fn archive_without_summary_is_a_resolution_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("export.zip");
        write_zip(&path, &[("other.json", json!({}))]);

        assert!(matches!(read_export(&path, "S"), Err(StratrunError::Resolution(_))));
    }

    #[test]
    fn locates_new_export_in_directory() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("old.zip"), b"x").unwrap();
        let before = snapshot_dir(tmp.path());

        fs::write(tmp.path().join("backtest-result-new.zip"), b"x").unwrap();
        fs::write(tmp.path().join("backtest-result-new.zip.meta.json"), b"{}").unwrap();
        fs::write(tmp.path().join(".last_result.json"), b"{}").unwrap();

        let found = locate_export(&tmp.path().join("requested.json"), &before).unwrap();
        assert_eq!(found.file_name().unwrap(), "backtest-result-new.zip");
    }

    #[test]
    fn relocates_archive_with_sidecar() {
        let tmp = TempDir::new().unwrap();
        let export = tmp.path().join("bt.zip");
        fs::write(&export, b"zip").unwrap();
        fs::write(tmp.path().join("bt.zip.meta.json"), b"{}").unwrap();
        let archives = tmp.path().join("run/results/archives");

        let moved = relocate(&export, &archives).unwrap();
        assert_eq!(moved, archives.join("bt.zip"));
        assert!(moved.is_file());
        assert!(archives.join("bt.zip.meta.json").is_file());
        assert!(!export.exists());
    }
}
