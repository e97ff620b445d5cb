// src/scheduler/mod.rs

//! Task Scheduler: a bounded worker pool that runs jobs concurrently and
//! tracks each one through `pending -> running -> terminal`.
//!
//! The same scheduler serves both flavors: in-process callers use it
//! directly, and [`SchedulerSnapshot`] persists and restores its state.

pub mod pool;
pub mod registry;
pub mod snapshot;
pub mod task;

pub use pool::{INTERRUPTED, TaskScheduler};
pub use snapshot::SchedulerSnapshot;
pub use task::{SchedulerStatistics, TaskId, TaskInfo};
