#![cfg(unix)]
#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use stratrun::config::Settings;

/// Shell stand-in for the engine binary.
///
/// - `--version` prints a version line
/// - `download-data` writes a small candle file per pair, except pairs
///   starting with `NODATA`
/// - `backtesting` writes a JSON export for the strategy; strategies named
///   `Broken*` exit 1, `Text*` print a text report only, `Slow*` sleep
/// - `trade` prints a few dry-run log lines; `Exit*` then exits 0,
///   `Crash*` exits 3, everything else sleeps until stopped
///
/// Every invocation's argv is appended to the calls log.
const SCRIPT: &str = r#"#!/bin/sh
echo "$*" >> "@CALLS@"
cmd="$1"
[ $# -gt 0 ] && shift

flag() {
  want="$1"; shift
  while [ $# -gt 0 ]; do
    if [ "$1" = "$want" ]; then echo "$2"; return; fi
    shift
  done
}

case "$cmd" in
  --version)
    echo "freqtrade 2024.1 (fake)"
    exit 0 ;;

  download-data)
    datadir=$(flag --datadir "$@")
    tf=$(flag --timeframes "$@")
    pairs=""
    collecting=0
    for arg in "$@"; do
      case "$arg" in
        --pairs) collecting=1 ;;
        --*) collecting=0 ;;
        *) if [ $collecting = 1 ]; then pairs="$pairs $arg"; fi ;;
      esac
    done
    mkdir -p "$datadir"
    for pair in $pairs; do
      case "$pair" in NODATA*) continue ;; esac
      file="$datadir/$(echo "$pair" | tr '/' '_')-$tf.json"
      echo '[[1704067200000,42000.0,42100.0,41900.0,42050.0,12.5],[1704067500000,42050.0,42200.0,42000.0,42150.0,8.1]]' > "$file"
    done
    echo "downloaded$pairs"
    exit 0 ;;

  backtesting)
    strategy=$(flag --strategy "$@")
    export_file=$(flag --export-filename "$@")
    echo "Loading strategy $strategy"
    case "$strategy" in
      Broken*)
        echo "ImportError: strategy $strategy could not be loaded" >&2
        exit 1 ;;
      Slow*)
        exec sleep 30 ;;
      Text*)
        cat <<REPORT
Result for strategy $strategy
                              BACKTESTING REPORT
| Pair     | Trades | Avg Profit % | Avg Duration | Tot Profit % | Tot Profit USDT | Win |
|----------+--------+--------------+--------------+--------------+-----------------+-----|
| BTC/USDT |      4 |         1.00 |      0:45:00 |         0.90 |           9.000 |   3 |
| TOTAL    |      4 |         1.00 |      0:45:00 |         0.90 |           9.000 |   3 |

| Total profit USDT   | 9.000 |
| Total profit %      | 0.90 |
| Total trades        | 4 |
| Winning trades      | 3 |
| Losing trades       | 1 |
| Max drawdown        | 2.5 USDT |
| Max drawdown %      | 0.25 |
REPORT
        exit 0 ;;
    esac
    cat > "$export_file" <<EXPORT
{"strategy": {"$strategy": {
  "profit_total_abs": 125.5, "profit_total": 0.1255,
  "max_drawdown_abs": 25.1, "max_drawdown_account": 0.0251,
  "wins": 7, "losses": 3, "total_trades": 10,
  "sharpe": 1.8, "sortino": 2.4,
  "trades": [
    {"pair": "BTC/USDT", "open_date": "2024-01-03 10:00:00+00:00",
     "close_date": "2024-01-03 14:00:00+00:00", "profit_abs": 12.0,
     "profit_ratio": 0.012, "exit_reason": "roi", "is_short": false}
  ]
}}}
EXPORT
    echo "Backtest for $strategy finished"
    exit 0 ;;

  trade)
    strategy=$(flag --strategy "$@")
    echo "2024-05-01 12:00:00,001 - freqtrade.worker - INFO - Bot heartbeat. PID=$$" >&2
    echo "2024-05-01 12:00:01,002 - freqtrade.freqtradebot - INFO - BTC/USDT: Buy signal for 0.0015 BTC at 42000.5 USDT" >&2
    echo "2024-05-01 12:00:02,003 - freqtrade.wallets - INFO - Current balance: 1010.5 USDT (+1.05% profit)"
    echo "2024-05-01 12:00:03,004 - freqtrade.freqtradebot - INFO - Current open trades: 1"
    case "$strategy" in
      Exit*) exit 0 ;;
      Crash*) echo "Fatal: exchange unreachable" >&2; exit 3 ;;
    esac
    exec sleep 60 ;;

  *)
    echo "unknown command $cmd" >&2
    exit 2 ;;
esac
"#;

/// A temporary engine installation: the script plus a user data root.
pub struct FakeEngine {
    dir: TempDir,
    binary: PathBuf,
    calls: PathBuf,
}

impl FakeEngine {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("create fake engine dir");
        let binary = dir.path().join("freqtrade");
        let calls = dir.path().join("calls.log");

        fs::write(&binary, SCRIPT.replace("@CALLS@", &calls.display().to_string()))
            .expect("write fake engine script");
        fs::set_permissions(&binary, fs::Permissions::from_mode(0o755))
            .expect("make fake engine executable");

        Self { dir, binary, calls }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Argument lines of every invocation so far, oldest first.
    pub fn calls(&self) -> Vec<String> {
        fs::read_to_string(&self.calls)
            .map(|s| s.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    pub fn calls_of(&self, command: &str) -> usize {
        self.calls()
            .iter()
            .filter(|line| line.split_whitespace().next() == Some(command))
            .count()
    }

    /// Settings wired to this engine, with every directory under its root
    /// and timings short enough for tests.
    pub fn settings(&self) -> Settings {
        let root = self.root();
        let mut settings = Settings::default();
        settings.engine.binary = self.binary.clone();
        settings.engine.user_data_dir = root.join("user_data");
        settings.engine.validate_timeout_secs = 5;
        settings.engine.backtest_timeout_secs = 20;
        settings.engine.download_timeout_secs = 20;
        settings.scheduler.max_workers = 2;
        settings.storage.runs_dir = root.join("runs");
        settings.storage.scratch_dir = root.join("scratch");
        settings.data.min_file_bytes = 16;
        settings.monitor.poll_interval_ms = 50;
        settings.monitor.stop_grace_secs = 2;
        settings.monitor.log_window = 50;
        settings
    }

    /// Pre-populate a valid dataset so no download is needed.
    pub fn seed_dataset(&self, settings: &Settings, pair: &str, timeframe: &str) -> PathBuf {
        let dir = settings.engine.data_dir().join(&settings.engine.exchange);
        fs::create_dir_all(&dir).expect("create data dir");
        let path = dir.join(format!("{}-{}.json", pair.replace('/', "_"), timeframe));
        fs::write(&path, "[[1704067200000,42000.0,42100.0,41900.0,42050.0,12.5]]")
            .expect("seed dataset");
        path
    }
}

impl Default for FakeEngine {
    fn default() -> Self {
        Self::new()
    }
}
