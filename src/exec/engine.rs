// src/exec/engine.rs

//! Subprocess plumbing for the external backtesting engine.
//!
//! Every invocation is an explicit argv (never a shell string). Output is
//! consumed line by line on both streams so pipe buffers never fill, and
//! each line is fanned out to an optional log file, an in-memory capture and
//! an optional progress channel.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::errors::{Result, StratrunError};

/// Which pipe a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

/// One line of engine output, tagged with the job it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub label: String,
    pub stream: Stream,
    pub line: String,
}

/// Cancellation request for an in-flight invocation.
///
/// Only an explicit send fires the signal; a dropped sender means "nobody
/// will ever cancel", not "cancel now".
#[derive(Debug, Default)]
pub struct CancelSignal {
    rx: Option<oneshot::Receiver<()>>,
}

impl CancelSignal {
    pub fn new(rx: oneshot::Receiver<()>) -> Self {
        Self { rx: Some(rx) }
    }

    pub fn never() -> Self {
        Self { rx: None }
    }

    /// Resolves once cancellation was requested; pends forever otherwise.
    pub async fn fired(&mut self) {
        match self.rx.as_mut() {
            Some(rx) => {
                if rx.await.is_err() {
                    self.rx = None;
                    std::future::pending::<()>().await;
                }
            }
            None => std::future::pending::<()>().await,
        }
    }
}

/// Everything needed to run one streaming engine invocation.
#[derive(Debug)]
pub struct Invocation {
    /// Used in log fields and progress lines (usually the strategy name).
    pub label: String,
    pub args: Vec<OsString>,
    pub log_path: Option<PathBuf>,
    pub progress: Option<mpsc::UnboundedSender<OutputLine>>,
    pub timeout: Option<Duration>,
}

/// How an invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessEnd {
    Exited { code: i32, success: bool },
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct Captured {
    pub end: ProcessEnd,
    pub stdout: String,
    pub stderr: String,
}

impl Captured {
    /// Last `max_lines` lines of stderr (falling back to stdout), for error
    /// messages.
    pub fn tail(&self, max_lines: usize) -> String {
        let source = if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        };
        let lines: Vec<&str> = source.lines().collect();
        let start = lines.len().saturating_sub(max_lines);
        lines[start..].join("\n")
    }
}

/// Handle on the engine executable.
#[derive(Debug, Clone)]
pub struct Engine {
    binary: PathBuf,
    validate_timeout: Duration,
}

impl Engine {
    pub fn new(binary: impl Into<PathBuf>, validate_timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            validate_timeout,
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Base command with piped output; the child dies with its handle.
    pub fn command<I, S>(&self, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args.into_iter().map(Into::into))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Check that the engine starts at all; returns its version line.
    pub async fn validate(&self) -> Result<String> {
        let out = self
            .run_short(["--version"], self.validate_timeout, "engine --version")
            .await?;
        let version = out.stdout.lines().next().unwrap_or_default().trim().to_string();
        info!(binary = %self.binary.display(), version = %version, "engine available");
        Ok(version)
    }

    /// Run a short, non-streaming command and require a zero exit code.
    pub async fn run_short<I, S>(&self, args: I, timeout: Duration, what: &str) -> Result<Captured>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let captured = self
            .invoke(
                Invocation {
                    label: what.to_string(),
                    args: args.into_iter().map(Into::into).collect(),
                    log_path: None,
                    progress: None,
                    timeout: Some(timeout),
                },
                CancelSignal::never(),
            )
            .await?;

        match captured.end {
            ProcessEnd::Exited { success: true, .. } => Ok(captured),
            ProcessEnd::Exited { code, .. } => Err(StratrunError::execution(format!(
                "{what} exited with code {code}: {}",
                captured.tail(20)
            ))),
            ProcessEnd::Cancelled => Err(StratrunError::execution(format!("{what} was cancelled"))),
        }
    }

    /// Spawn the engine and stream its output until it exits, the cancel
    /// signal fires, or the timeout elapses.
    ///
    /// A non-zero exit is reported through [`ProcessEnd`], not as an error;
    /// spawn failures and timeouts are errors.
    pub async fn invoke(&self, inv: Invocation, mut cancel: CancelSignal) -> Result<Captured> {
        let Invocation {
            label,
            args,
            log_path,
            progress,
            timeout,
        } = inv;

        let log_file = match &log_path {
            Some(path) => {
                let file = File::create(path)
                    .await
                    .with_context(|| format!("creating output log {:?}", path))?;
                Some(Arc::new(Mutex::new(file)))
            }
            None => None,
        };

        info!(
            label = %label,
            binary = %self.binary.display(),
            args = ?args,
            "starting engine process"
        );

        let mut child = self.command(args).spawn().map_err(|e| {
            StratrunError::execution(format!(
                "spawning engine {} for '{label}': {e}",
                self.binary.display()
            ))
        })?;

        let stdout = spawn_reader(&mut child, Stream::Stdout, &label, log_file.clone(), progress.clone());
        let stderr = spawn_reader(&mut child, Stream::Stderr, &label, log_file.clone(), progress);

        let deadline = async {
            match timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };

        let end = tokio::select! {
            status = child.wait() => {
                let status = status.with_context(|| format!("waiting for engine process of '{label}'"))?;
                let code = status.code().unwrap_or(-1);
                info!(label = %label, exit_code = code, success = status.success(), "engine process exited");
                Some(ProcessEnd::Exited { code, success: status.success() })
            }
            _ = cancel.fired() => {
                info!(label = %label, "cancellation requested; killing engine process");
                kill(&mut child, &label).await;
                Some(ProcessEnd::Cancelled)
            }
            _ = deadline => {
                warn!(label = %label, timeout = ?timeout, "engine process timed out; killing");
                kill(&mut child, &label).await;
                None
            }
        };

        let stdout = join_reader(stdout, &label).await;
        let stderr = join_reader(stderr, &label).await;

        if let Some(file) = log_file {
            if let Err(e) = file.lock().await.flush().await {
                warn!(label = %label, error = %e, "failed to flush output log");
            }
        }

        match end {
            Some(end) => Ok(Captured { end, stdout, stderr }),
            None => Err(StratrunError::Timeout {
                what: label,
                after_secs: timeout.map(|t| t.as_secs()).unwrap_or_default(),
            }),
        }
    }
}

async fn kill(child: &mut Child, label: &str) {
    if let Err(e) = child.kill().await {
        warn!(label = %label, error = %e, "failed to kill engine process");
    }
}

fn spawn_reader(
    child: &mut Child,
    stream: Stream,
    label: &str,
    log_file: Option<Arc<Mutex<File>>>,
    progress: Option<mpsc::UnboundedSender<OutputLine>>,
) -> Option<JoinHandle<String>> {
    let pipe: Box<dyn AsyncRead + Send + Unpin> = match stream {
        Stream::Stdout => Box::new(child.stdout.take()?),
        Stream::Stderr => Box::new(child.stderr.take()?),
    };
    let label = label.to_string();

    Some(tokio::spawn(async move {
        let mut captured = String::new();
        let mut lines = BufReader::new(pipe).lines();

        while let Ok(Some(line)) = lines.next_line().await {
            debug!(label = %label, ?stream, "{}", line);

            if let Some(file) = &log_file {
                let mut file = file.lock().await;
                if let Err(e) = file.write_all(format!("{line}\n").as_bytes()).await {
                    warn!(label = %label, error = %e, "failed to write output log");
                }
            }
            if let Some(tx) = &progress {
                let _ = tx.send(OutputLine {
                    label: label.clone(),
                    stream,
                    line: line.clone(),
                });
            }

            captured.push_str(&line);
            captured.push('\n');
        }

        captured
    }))
}

/// How long to wait for a pipe to close once the engine itself is gone.
/// Grandchildren can hold it open indefinitely.
const READER_GRACE: Duration = Duration::from_secs(1);

async fn join_reader(handle: Option<JoinHandle<String>>, label: &str) -> String {
    let Some(mut handle) = handle else {
        return String::new();
    };
    match tokio::time::timeout(READER_GRACE, &mut handle).await {
        Ok(joined) => joined.unwrap_or_default(),
        Err(_) => {
            debug!(label = %label, "output pipe still open after engine exit; abandoning reader");
            handle.abort();
            String::new()
        }
    }
}
