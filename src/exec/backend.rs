// src/exec/backend.rs

//! Pluggable job runner abstraction.
//!
//! The scheduler talks to a `JobRunner` instead of the concrete
//! [`Executor`], so tests can run jobs without spawning engine processes.

use std::future::Future;
use std::pin::Pin;

use crate::exec::engine::CancelSignal;
use crate::exec::executor::Executor;
use crate::result::{BacktestResult, Job};

/// Runs one job to its result.
///
/// Implementations contain every failure in the returned result and honor
/// `cancel` by stopping work and returning a `cancelled` result.
pub trait JobRunner: Send + Sync {
    fn run_job(
        &self,
        job: Job,
        cancel: CancelSignal,
    ) -> Pin<Box<dyn Future<Output = BacktestResult> + Send + '_>>;
}

impl JobRunner for Executor {
    fn run_job(
        &self,
        job: Job,
        cancel: CancelSignal,
    ) -> Pin<Box<dyn Future<Output = BacktestResult> + Send + '_>> {
        Box::pin(self.run_with_cancel(job, cancel))
    }
}
