// src/scheduler/task.rs

//! Task metadata tracked by the scheduler.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::result::BacktestResult;
use crate::types::{ExecutionStatus, TaskStatus};

pub type TaskId = String;

/// One submitted job as the scheduler sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub task_id: TaskId,
    pub strategy_name: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Local>,
    #[serde(default)]
    pub started_at: Option<DateTime<Local>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Local>>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub result: Option<BacktestResult>,
}

impl TaskInfo {
    pub fn pending(task_id: impl Into<TaskId>, strategy_name: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            strategy_name: strategy_name.into(),
            status: TaskStatus::Pending,
            created_at: Local::now(),
            started_at: None,
            completed_at: None,
            error_message: None,
            result: None,
        }
    }
}

/// Task status a job result maps to.
///
/// A failed result still counts as a finished task: the result is stored and
/// its error copied onto the task.
pub fn status_for(result: &BacktestResult) -> TaskStatus {
    match result.status {
        ExecutionStatus::Completed => TaskStatus::Completed,
        ExecutionStatus::Cancelled | ExecutionStatus::Stopped => TaskStatus::Cancelled,
        ExecutionStatus::Failed | ExecutionStatus::Pending | ExecutionStatus::Running => {
            TaskStatus::Failed
        }
    }
}

/// Counts per status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStatistics {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub max_workers: usize,
}

impl SchedulerStatistics {
    pub fn from_tasks<'a>(tasks: impl IntoIterator<Item = &'a TaskInfo>, max_workers: usize) -> Self {
        let mut stats = Self {
            max_workers,
            ..Default::default()
        };
        for task in tasks {
            stats.total += 1;
            match task.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Running => stats.running += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }
}
