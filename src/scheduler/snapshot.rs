// src/scheduler/snapshot.rs

//! Serializable scheduler state.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::scheduler::task::{SchedulerStatistics, TaskId, TaskInfo};

/// Point-in-time copy of every task, results included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerSnapshot {
    pub max_workers: usize,
    pub created_at: DateTime<Local>,
    #[serde(default)]
    pub tasks: BTreeMap<TaskId, TaskInfo>,
}

impl SchedulerSnapshot {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        Self::from_json(&fs::read_to_string(path)?)
    }

    pub fn statistics(&self) -> SchedulerStatistics {
        SchedulerStatistics::from_tasks(self.tasks.values(), self.max_workers)
    }
}
