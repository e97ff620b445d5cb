// src/monitor/process.rs

//! Supervision of long-lived dry-run engine processes.

use std::collections::HashMap;
use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Local;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::errors::{Result, StratrunError};
use crate::exec::Engine;
use crate::exec::artifact::{self, ArtifactPaths};
use crate::monitor::events::parse_line;
use crate::monitor::state::DryRunState;
use crate::result::{Job, sanitize_file_component};
use crate::types::ExecutionStatus;

#[derive(Debug, Clone)]
pub struct MonitorOptions {
    pub poll_interval: Duration,
    pub stop_grace: Duration,
    pub log_window: usize,
    pub scratch_dir: PathBuf,
    pub paths: ArtifactPaths,
}

#[derive(Debug)]
struct LiveProcess {
    child: Child,
    lines: mpsc::UnboundedReceiver<String>,
    readers: Vec<JoinHandle<()>>,
}

#[derive(Debug)]
struct Shared {
    states: Mutex<HashMap<String, DryRunState>>,
    live: tokio::sync::Mutex<HashMap<String, LiveProcess>>,
    log_window: usize,
}

impl Shared {
    fn states(&self) -> MutexGuard<'_, HashMap<String, DryRunState>> {
        self.states.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn update(&self, run_id: &str, f: impl FnOnce(&mut DryRunState)) {
        if let Some(state) = self.states().get_mut(run_id) {
            f(state);
        }
    }

    /// Fold every line that has arrived so far into the state.
    fn drain(&self, run_id: &str, rx: &mut mpsc::UnboundedReceiver<String>) {
        let mut lines = Vec::new();
        while let Ok(line) = rx.try_recv() {
            lines.push(line);
        }
        if lines.is_empty() {
            return;
        }
        self.update(run_id, |state| {
            for line in &lines {
                state.ingest(line, self.log_window, parse_line(line));
            }
        });
    }

    /// One pass over every live process.
    async fn poll(&self) {
        let mut live = self.live.lock().await;
        let mut exited = Vec::new();

        for (run_id, process) in live.iter_mut() {
            self.drain(run_id, &mut process.lines);
            match process.child.try_wait() {
                Ok(Some(status)) => exited.push((run_id.clone(), status.success(), status.code())),
                Ok(None) => {}
                Err(e) => {
                    warn!(run_id = %run_id, error = %e, "failed to poll dry-run process");
                    exited.push((run_id.clone(), false, None));
                }
            }
        }

        for (run_id, success, code) in exited {
            if let Some(mut process) = live.remove(&run_id) {
                finish_readers(&mut process).await;
                self.drain(&run_id, &mut process.lines);
            }
            let status = if success {
                ExecutionStatus::Completed
            } else {
                ExecutionStatus::Failed
            };
            info!(run_id = %run_id, ?code, status = %status, "dry-run process exited");
            self.update(&run_id, |state| {
                if !success {
                    state.error_message = Some(format!(
                        "engine exited with code {}",
                        code.map(|c| c.to_string()).unwrap_or_else(|| "unknown".into())
                    ));
                }
                state.finish(status, code);
            });
        }
    }
}

/// Lines still buffered in the pipes arrive shortly after exit.
async fn finish_readers(process: &mut LiveProcess) {
    for reader in process.readers.drain(..) {
        if tokio::time::timeout(Duration::from_secs(1), reader).await.is_err() {
            debug!("output reader still busy after process exit");
        }
    }
}

/// Starts, polls and stops dry runs. Must be created inside a tokio
/// runtime; the poll loop runs until [`DryRunMonitor::shutdown`] or drop.
#[derive(Debug)]
pub struct DryRunMonitor {
    engine: Engine,
    options: MonitorOptions,
    shared: Arc<Shared>,
    shutdown_tx: watch::Sender<bool>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl DryRunMonitor {
    pub fn new(engine: Engine, options: MonitorOptions) -> Self {
        let shared = Arc::new(Shared {
            states: Mutex::new(HashMap::new()),
            live: tokio::sync::Mutex::new(HashMap::new()),
            log_window: options.log_window.max(1),
        });
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let poller = spawn_poller(Arc::clone(&shared), options.poll_interval, shutdown_rx);

        Self {
            engine,
            options,
            shared,
            shutdown_tx,
            poller: Mutex::new(Some(poller)),
        }
    }

    /// Launch `trade` for the job's strategy. Returns the dry-run id (the
    /// job's run id when set, a fresh one otherwise).
    pub async fn start(&self, job: Job) -> Result<String> {
        let run_id = match job.run_id() {
            Some(id) => id.to_string(),
            None => format!(
                "dryrun_{}_{}_{}",
                sanitize_file_component(&job.strategy),
                Local::now().format("%Y%m%d_%H%M%S"),
                crate::short_token()
            ),
        };

        // Held until the new process is registered, so two starts for the
        // same id cannot both pass the check.
        let mut live = self.shared.live.lock().await;
        if live.contains_key(&run_id) || self.status(&run_id).is_some_and(|s| s.is_active()) {
            return Err(StratrunError::config(format!("dry run '{run_id}' is already active")));
        }

        let doc = artifact::dry_run_config(
            &job.strategy,
            &job.config,
            &self.options.paths,
            &self.options.scratch_dir,
            &run_id,
        );
        let config_path =
            artifact::write_artifact(&self.options.scratch_dir, "dryrun_config", &job.strategy, &doc)?;

        let args: Vec<OsString> = vec![
            "trade".into(),
            "--config".into(),
            config_path.into_os_string(),
            "--strategy".into(),
            job.strategy.clone().into(),
            "--userdir".into(),
            self.options.paths.user_data_dir.clone().into_os_string(),
        ];
        let mut child = self.engine.command(args).spawn().map_err(|e| {
            StratrunError::execution(format!("spawning dry run for '{}': {e}", job.strategy))
        })?;

        let (tx, rx) = mpsc::unbounded_channel();
        let mut readers = Vec::new();
        if let Some(out) = child.stdout.take() {
            readers.push(forward_lines(out, tx.clone()));
        }
        if let Some(err) = child.stderr.take() {
            readers.push(forward_lines(err, tx));
        }

        let mut state = DryRunState::new(&run_id, &job.strategy);
        state.status = ExecutionStatus::Running;
        state.pid = child.id();
        info!(run_id = %run_id, strategy = %job.strategy, pid = ?state.pid, "dry run started");

        self.shared.states().insert(run_id.clone(), state);
        live.insert(
            run_id.clone(),
            LiveProcess {
                child,
                lines: rx,
                readers,
            },
        );
        Ok(run_id)
    }

    /// Terminate gracefully, force-kill after the grace period. `false` if
    /// no live process has this id.
    pub async fn stop(&self, run_id: &str) -> bool {
        let Some(mut process) = self.shared.live.lock().await.remove(run_id) else {
            return false;
        };

        request_termination(&mut process.child, run_id).await;
        let code = match tokio::time::timeout(self.options.stop_grace, process.child.wait()).await {
            Ok(Ok(status)) => status.code(),
            Ok(Err(e)) => {
                warn!(run_id, error = %e, "failed waiting for dry-run process");
                None
            }
            Err(_) => {
                warn!(run_id, grace = ?self.options.stop_grace, "dry run ignored termination; killing");
                if let Err(e) = process.child.kill().await {
                    warn!(run_id, error = %e, "failed to kill dry-run process");
                }
                None
            }
        };

        finish_readers(&mut process).await;
        self.shared.drain(run_id, &mut process.lines);
        self.shared.update(run_id, |state| state.finish(ExecutionStatus::Stopped, code));
        info!(run_id, "dry run stopped");
        true
    }

    pub fn status(&self, run_id: &str) -> Option<DryRunState> {
        self.shared.states().get(run_id).cloned()
    }

    /// Running dry runs only.
    pub fn active(&self) -> HashMap<String, DryRunState> {
        self.shared
            .states()
            .iter()
            .filter(|(_, s)| s.is_active())
            .map(|(id, s)| (id.clone(), s.clone()))
            .collect()
    }

    pub fn all(&self) -> HashMap<String, DryRunState> {
        self.shared.states().clone()
    }

    /// Forget finished dry runs whose last update is older than `max_age`.
    pub fn cleanup(&self, max_age: Duration) -> usize {
        let now = Local::now();
        let mut states = self.shared.states();
        let before = states.len();
        states.retain(|_, s| {
            let expired = (now - s.last_update)
                .to_std()
                .is_ok_and(|age| age >= max_age);
            s.is_active() || !expired
        });
        before - states.len()
    }

    /// Stop every live dry run and end the poll loop.
    pub async fn shutdown(&self) {
        let ids: Vec<String> = self.shared.live.lock().await.keys().cloned().collect();
        for id in ids {
            self.stop(&id).await;
        }

        let _ = self.shutdown_tx.send(true);
        let poller = self.poller.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = poller {
            let _ = handle.await;
        }
        debug!("dry-run monitor shut down");
    }
}

fn spawn_poller(
    shared: Arc<Shared>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => shared.poll().await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("dry-run poll loop finished");
    })
}

fn forward_lines<R>(pipe: R, tx: mpsc::UnboundedSender<String>) -> JoinHandle<()>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(pipe).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(line).is_err() {
                break;
            }
        }
    })
}

async fn request_termination(child: &mut Child, run_id: &str) {
    if let Some(pid) = child.id() {
        if send_sigterm(pid).await {
            debug!(run_id, pid, "sent SIGTERM");
            return;
        }
    }
    if let Err(e) = child.start_kill() {
        warn!(run_id, error = %e, "failed to signal dry-run process");
    }
}

#[cfg(unix)]
async fn send_sigterm(pid: u32) -> bool {
    tokio::process::Command::new("kill")
        .args(["-TERM", &pid.to_string()])
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .await
        .is_ok_and(|s| s.success())
}

#[cfg(not(unix))]
async fn send_sigterm(_pid: u32) -> bool {
    false
}
