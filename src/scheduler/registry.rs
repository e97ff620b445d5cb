// src/scheduler/registry.rs

//! Lock-guarded task table.
//!
//! All status changes go through [`TaskRegistry`], which refuses any
//! transition that would move a task backwards. Watchers are notified
//! through a per-task `watch` channel.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::Local;
use tokio::sync::{oneshot, watch};
use tracing::{debug, warn};

use crate::result::BacktestResult;
use crate::scheduler::task::{SchedulerStatistics, TaskId, TaskInfo, status_for};
use crate::types::TaskStatus;

#[derive(Debug)]
struct Entry {
    info: TaskInfo,
    /// Fires while pending: the worker gives up waiting for a slot.
    cancel: Option<oneshot::Sender<()>>,
    /// Fires while running: the job kills its engine process.
    terminate: Option<oneshot::Sender<()>>,
    status_tx: watch::Sender<TaskStatus>,
}

impl Entry {
    fn move_to(&mut self, next: TaskStatus) -> bool {
        let current = self.info.status;
        if !current.can_transition_to(next) {
            debug!(
                task_id = %self.info.task_id,
                from = %current,
                to = %next,
                "ignoring non-monotonic status transition"
            );
            return false;
        }
        self.info.status = next;
        if next.is_terminal() {
            self.info.completed_at = Some(Local::now());
            self.cancel = None;
            self.terminate = None;
        }
        self.status_tx.send_replace(next);
        true
    }
}

/// Control handles created for a task at submission.
#[derive(Debug)]
pub struct TaskControl {
    pub cancel: oneshot::Sender<()>,
    pub terminate: oneshot::Sender<()>,
}

#[derive(Debug, Default)]
pub struct TaskRegistry {
    entries: Mutex<HashMap<TaskId, Entry>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<TaskId, Entry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a task. `control` is `None` for tasks restored from a
    /// snapshot, which can no longer be cancelled.
    pub fn insert(&self, info: TaskInfo, control: Option<TaskControl>) -> watch::Receiver<TaskStatus> {
        let (status_tx, status_rx) = watch::channel(info.status);
        let (cancel, terminate) = match control {
            Some(c) => (Some(c.cancel), Some(c.terminate)),
            None => (None, None),
        };
        self.entries().insert(
            info.task_id.clone(),
            Entry {
                info,
                cancel,
                terminate,
                status_tx,
            },
        );
        status_rx
    }

    /// Pending -> Running. `false` if the task was cancelled first.
    pub fn mark_running(&self, id: &str) -> bool {
        let mut entries = self.entries();
        let Some(entry) = entries.get_mut(id) else {
            return false;
        };
        if !entry.move_to(TaskStatus::Running) {
            return false;
        }
        entry.info.started_at = Some(Local::now());
        entry.cancel = None;
        true
    }

    /// Store the job's result and derive the final status from it.
    pub fn finish(&self, id: &str, result: BacktestResult) -> Option<TaskStatus> {
        let mut entries = self.entries();
        let entry = entries.get_mut(id)?;
        let status = status_for(&result);
        if !entry.move_to(status) {
            warn!(task_id = id, status = %status, "task already finished; dropping late result");
            return None;
        }
        entry.info.error_message = result.error_message.clone();
        entry.info.result = Some(result);
        Some(status)
    }

    /// Mark failed without a result (panicked worker).
    pub fn fail(&self, id: &str, message: impl Into<String>) -> bool {
        let mut entries = self.entries();
        let Some(entry) = entries.get_mut(id) else {
            return false;
        };
        if !entry.move_to(TaskStatus::Failed) {
            return false;
        }
        entry.info.error_message = Some(message.into());
        true
    }

    /// Pending -> Cancelled. Only a task that has not started can be
    /// cancelled this way.
    pub fn cancel_pending(&self, id: &str) -> bool {
        let mut entries = self.entries();
        let Some(entry) = entries.get_mut(id) else {
            return false;
        };
        if entry.info.status != TaskStatus::Pending {
            return false;
        }
        let cancel = entry.cancel.take();
        if !entry.move_to(TaskStatus::Cancelled) {
            return false;
        }
        entry.info.error_message = Some("cancelled before start".to_string());
        if let Some(tx) = cancel {
            let _ = tx.send(());
        }
        true
    }

    /// Ask a running task to kill its engine process. The status changes
    /// once the job reports back.
    pub fn terminate_running(&self, id: &str) -> bool {
        let mut entries = self.entries();
        let Some(entry) = entries.get_mut(id) else {
            return false;
        };
        if entry.info.status != TaskStatus::Running {
            return false;
        }
        match entry.terminate.take() {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }

    pub fn get(&self, id: &str) -> Option<TaskInfo> {
        self.entries().get(id).map(|e| e.info.clone())
    }

    pub fn status(&self, id: &str) -> Option<TaskStatus> {
        self.entries().get(id).map(|e| e.info.status)
    }

    pub fn subscribe(&self, id: &str) -> Option<watch::Receiver<TaskStatus>> {
        self.entries().get(id).map(|e| e.status_tx.subscribe())
    }

    /// All tasks, oldest first.
    pub fn all(&self) -> Vec<TaskInfo> {
        let mut tasks: Vec<TaskInfo> = self.entries().values().map(|e| e.info.clone()).collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.task_id.cmp(&b.task_id)));
        tasks
    }

    pub fn with_status(&self, status: TaskStatus) -> Vec<TaskInfo> {
        self.all().into_iter().filter(|t| t.status == status).collect()
    }

    pub fn statistics(&self, max_workers: usize) -> SchedulerStatistics {
        let entries = self.entries();
        SchedulerStatistics::from_tasks(entries.values().map(|e| &e.info), max_workers)
    }

    /// Drop every terminal task; returns how many were removed.
    pub fn clear_terminal(&self) -> usize {
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, e| !e.info.status.is_terminal());
        before - entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn control() -> (TaskControl, oneshot::Receiver<()>, oneshot::Receiver<()>) {
        let (cancel, cancel_rx) = oneshot::channel();
        let (terminate, terminate_rx) = oneshot::channel();
        (TaskControl { cancel, terminate }, cancel_rx, terminate_rx)
    }

    #[test]
    fn cancel_only_wins_against_pending() {
        let registry = TaskRegistry::new();
        let (ctl, mut cancel_rx, _t) = control();
        registry.insert(TaskInfo::pending("t1", "A"), Some(ctl));

        assert!(registry.cancel_pending("t1"));
        assert_eq!(cancel_rx.try_recv(), Ok(()));
        assert_eq!(registry.status("t1"), Some(TaskStatus::Cancelled));

        // The worker loses the race.
        assert!(!registry.mark_running("t1"));
        assert!(!registry.cancel_pending("t1"));
    }

    #[test]
    fn running_task_cannot_be_cancelled_but_can_be_terminated() {
        let registry = TaskRegistry::new();
        let (ctl, _c, mut terminate_rx) = control();
        registry.insert(TaskInfo::pending("t1", "A"), Some(ctl));
        assert!(registry.mark_running("t1"));

        assert!(!registry.cancel_pending("t1"));
        assert!(registry.terminate_running("t1"));
        assert_eq!(terminate_rx.try_recv(), Ok(()));
        // Only once.
        assert!(!registry.terminate_running("t1"));
    }

    #[test]
    fn terminal_status_is_final() {
        let registry = TaskRegistry::new();
        registry.insert(TaskInfo::pending("t1", "A"), None);
        assert!(registry.mark_running("t1"));
        assert!(registry.fail("t1", "boom"));
        assert!(!registry.fail("t1", "again"));
        assert_eq!(registry.get("t1").unwrap().error_message.as_deref(), Some("boom"));
    }

    #[test]
    fn clear_terminal_keeps_live_tasks() {
        let registry = TaskRegistry::new();
        registry.insert(TaskInfo::pending("a", "A"), None);
        registry.insert(TaskInfo::pending("b", "B"), None);
        registry.fail("a", "x");

        assert_eq!(registry.clear_terminal(), 1);
        assert!(registry.get("a").is_none());
        assert!(registry.get("b").is_some());
    }
}
