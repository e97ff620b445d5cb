// src/scheduler/pool.rs

//! Bounded worker pool over a [`JobRunner`].

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Local};
use tokio::sync::{Semaphore, oneshot};
use tracing::{debug, error, info, warn};

use crate::config::RunConfig;
use crate::exec::{CancelSignal, JobRunner};
use crate::result::{BacktestResult, Job};
use crate::scheduler::registry::{TaskControl, TaskRegistry};
use crate::scheduler::snapshot::SchedulerSnapshot;
use crate::scheduler::task::{SchedulerStatistics, TaskId, TaskInfo};
use crate::types::TaskStatus;

/// Message stored on tasks that were pending or running when a snapshot was
/// taken and are restored into a fresh scheduler.
pub const INTERRUPTED: &str = "interrupted: scheduler stopped before the task finished";

/// Runs submitted jobs with at most `max_workers` in flight.
///
/// `submit` returns immediately; each job waits for a worker slot in its own
/// tokio task. Must be used from within a tokio runtime.
pub struct TaskScheduler {
    runner: Arc<dyn JobRunner>,
    registry: Arc<TaskRegistry>,
    slots: Arc<Semaphore>,
    max_workers: usize,
    created_at: DateTime<Local>,
}

impl std::fmt::Debug for TaskScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskScheduler")
            .field("max_workers", &self.max_workers)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

impl TaskScheduler {
    pub fn new(runner: Arc<dyn JobRunner>, max_workers: usize) -> Self {
        let max_workers = max_workers.max(1);
        Self {
            runner,
            registry: Arc::new(TaskRegistry::new()),
            slots: Arc::new(Semaphore::new(max_workers)),
            max_workers,
            created_at: Local::now(),
        }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    pub fn created_at(&self) -> DateTime<Local> {
        self.created_at
    }

    /// Queue one job. A missing run id is filled in before the job is
    /// registered.
    pub fn submit(&self, job: Job) -> TaskId {
        let job = Job {
            config: job.config.ensure_run_id(),
            ..job
        };
        let task_id = uuid::Uuid::new_v4().to_string();
        let (cancel, cancel_rx) = oneshot::channel();
        let (terminate, terminate_rx) = oneshot::channel();

        self.registry.insert(
            TaskInfo::pending(task_id.clone(), job.strategy.clone()),
            Some(TaskControl { cancel, terminate }),
        );
        info!(task_id = %task_id, strategy = %job.strategy, run_id = ?job.run_id(), "task submitted");

        tokio::spawn(run_task(
            task_id.clone(),
            job,
            Arc::clone(&self.runner),
            Arc::clone(&self.registry),
            Arc::clone(&self.slots),
            cancel_rx,
            terminate_rx,
        ));

        task_id
    }

    /// One job per strategy, all sharing a single run id.
    ///
    /// Returns strategy -> task id.
    pub fn submit_batch<I, S>(&self, strategies: I, config: RunConfig) -> BTreeMap<String, TaskId>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let config = config.ensure_run_id();
        strategies
            .into_iter()
            .map(Into::into)
            .map(|strategy: String| {
                let id = self.submit(Job::new(strategy.clone(), config.clone()));
                (strategy, id)
            })
            .collect()
    }

    /// Cancel a task that has not started. `false` for unknown, running or
    /// finished tasks.
    pub fn cancel(&self, task_id: &str) -> bool {
        let cancelled = self.registry.cancel_pending(task_id);
        if cancelled {
            info!(task_id, "task cancelled before start");
        }
        cancelled
    }

    /// Kill the engine process of a running task; it ends `cancelled`.
    pub fn terminate(&self, task_id: &str) -> bool {
        let sent = self.registry.terminate_running(task_id);
        if sent {
            info!(task_id, "termination requested for running task");
        }
        sent
    }

    pub fn status(&self, task_id: &str) -> Option<TaskStatus> {
        self.registry.status(task_id)
    }

    pub fn task(&self, task_id: &str) -> Option<TaskInfo> {
        self.registry.get(task_id)
    }

    /// The job's result once it finished (failed jobs included).
    pub fn result(&self, task_id: &str) -> Option<BacktestResult> {
        self.registry.get(task_id).and_then(|t| t.result)
    }

    pub fn tasks(&self) -> Vec<TaskInfo> {
        self.registry.all()
    }

    pub fn running(&self) -> Vec<TaskInfo> {
        self.registry.with_status(TaskStatus::Running)
    }

    pub fn pending(&self) -> Vec<TaskInfo> {
        self.registry.with_status(TaskStatus::Pending)
    }

    pub fn statistics(&self) -> SchedulerStatistics {
        self.registry.statistics(self.max_workers)
    }

    pub fn clear_terminal(&self) -> usize {
        let removed = self.registry.clear_terminal();
        debug!(removed, "cleared finished tasks");
        removed
    }

    /// Wait until the task is terminal. `None` for unknown task ids.
    pub async fn wait(&self, task_id: &str) -> Option<TaskInfo> {
        let mut rx = self.registry.subscribe(task_id)?;
        // An error means the entry was cleared; report what is left.
        let _ = rx.wait_for(|s| s.is_terminal()).await;
        self.registry.get(task_id)
    }

    /// Wait until every task submitted so far is terminal.
    pub async fn wait_all(&self) -> Vec<TaskInfo> {
        let ids: Vec<TaskId> = self.registry.all().into_iter().map(|t| t.task_id).collect();
        for id in &ids {
            self.wait(id).await;
        }
        self.registry.all()
    }

    /// Stop accepting work and wind the pool down.
    ///
    /// Pending tasks are cancelled and the worker slots are closed, so jobs
    /// submitted afterwards fail with "worker pool closed". Running tasks
    /// are awaited when `wait` is set; otherwise their engine processes are
    /// terminated and the tasks end `cancelled`. Returns every known task.
    pub async fn shutdown(&self, wait: bool) -> Vec<TaskInfo> {
        info!(wait, "shutting down task scheduler");

        let cancelled = self
            .registry
            .with_status(TaskStatus::Pending)
            .iter()
            .filter(|t| self.registry.cancel_pending(&t.task_id))
            .count();
        self.slots.close();

        let running = self.registry.with_status(TaskStatus::Running);
        if !wait {
            for task in &running {
                self.terminate(&task.task_id);
            }
        }
        for task in &running {
            self.wait(&task.task_id).await;
        }

        info!(cancelled, drained = running.len(), "task scheduler shut down");
        self.registry.all()
    }

    pub fn snapshot(&self) -> SchedulerSnapshot {
        SchedulerSnapshot {
            max_workers: self.max_workers,
            created_at: self.created_at,
            tasks: self
                .registry
                .all()
                .into_iter()
                .map(|t| (t.task_id.clone(), t))
                .collect(),
        }
    }

    /// Rebuild a scheduler from a snapshot.
    ///
    /// Nothing is re-run: tasks that were pending or running are marked
    /// failed with [`INTERRUPTED`].
    pub fn restore(runner: Arc<dyn JobRunner>, snapshot: SchedulerSnapshot) -> Self {
        let mut scheduler = Self::new(runner, snapshot.max_workers);
        scheduler.created_at = snapshot.created_at;

        for (_, mut info) in snapshot.tasks {
            if !info.status.is_terminal() {
                warn!(task_id = %info.task_id, status = %info.status, "restored task was interrupted");
                info.status = TaskStatus::Failed;
                info.completed_at = Some(Local::now());
                info.error_message = Some(INTERRUPTED.to_string());
            }
            scheduler.registry.insert(info, None);
        }
        scheduler
    }
}

async fn run_task(
    task_id: TaskId,
    job: Job,
    runner: Arc<dyn JobRunner>,
    registry: Arc<TaskRegistry>,
    slots: Arc<Semaphore>,
    mut cancel_rx: oneshot::Receiver<()>,
    terminate_rx: oneshot::Receiver<()>,
) {
    let permit = tokio::select! {
        biased;
        cancel = &mut cancel_rx => {
            if cancel.is_ok() {
                debug!(task_id = %task_id, "task cancelled while waiting for a worker");
                return;
            }
            // Sender dropped without cancelling: still wait for a slot.
            Arc::clone(&slots).acquire_owned().await
        }
        permit = Arc::clone(&slots).acquire_owned() => permit,
    };
    let Ok(_permit) = permit else {
        registry.fail(&task_id, "worker pool closed");
        return;
    };

    if !registry.mark_running(&task_id) {
        debug!(task_id = %task_id, "task no longer pending; skipping");
        return;
    }
    info!(task_id = %task_id, strategy = %job.strategy, "task running");

    let strategy = job.strategy.clone();
    // Run in its own task so a panicking job fails the task instead of
    // leaking the worker slot.
    let handle = tokio::spawn(async move {
        runner.run_job(job, CancelSignal::new(terminate_rx)).await
    });

    match handle.await {
        Ok(result) => {
            if let Some(status) = registry.finish(&task_id, result) {
                info!(task_id = %task_id, strategy = %strategy, status = %status, "task finished");
            }
        }
        Err(e) => {
            error!(task_id = %task_id, strategy = %strategy, error = %e, "task worker panicked");
            registry.fail(&task_id, format!("worker panicked: {e}"));
        }
    }
}
