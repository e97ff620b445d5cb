#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Semaphore;

use stratrun::exec::{CancelSignal, JobRunner};
use stratrun::result::{BacktestResult, Job, PerformanceMetrics};

/// What the fake does once a job's work is done.
#[derive(Debug, Clone)]
pub enum Outcome {
    Complete,
    Fail(String),
    Panic,
}

/// A `JobRunner` that never spawns a process.
///
/// - records which strategies were started, in order
/// - tracks how many jobs were in flight at once
/// - optionally holds every job at a gate until [`FakeRunner::release`]
/// - honors the cancel signal while delayed or gated
#[derive(Debug)]
pub struct FakeRunner {
    outcomes: Mutex<HashMap<String, Outcome>>,
    delay: Duration,
    gate: Option<Arc<Semaphore>>,
    started: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self {
            outcomes: Mutex::new(HashMap::new()),
            delay: Duration::ZERO,
            gate: None,
            started: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Jobs wait for a permit from [`FakeRunner::release`] before finishing.
    pub fn gated(mut self) -> Self {
        self.gate = Some(Arc::new(Semaphore::new(0)));
        self
    }

    pub fn with_outcome(self, strategy: &str, outcome: Outcome) -> Self {
        self.outcomes
            .lock()
            .unwrap()
            .insert(strategy.to_string(), outcome);
        self
    }

    /// Let `n` gated jobs proceed.
    pub fn release(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    pub fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn outcome_for(&self, strategy: &str) -> Outcome {
        self.outcomes
            .lock()
            .unwrap()
            .get(strategy)
            .cloned()
            .unwrap_or(Outcome::Complete)
    }

    async fn work(&self) {
        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        tokio::time::sleep(self.delay).await;
    }
}

impl Default for FakeRunner {
    fn default() -> Self {
        Self::new()
    }
}

/// Metrics every completed fake job reports.
pub fn sample_metrics() -> PerformanceMetrics {
    let mut metrics = PerformanceMetrics {
        total_return: 125.5,
        total_return_pct: 12.55,
        max_drawdown: 25.1,
        max_drawdown_pct: 2.51,
        sharpe_ratio: 1.8,
        total_trades: 10,
        winning_trades: 7,
        losing_trades: 3,
        ..Default::default()
    };
    metrics.calculate_derived_metrics();
    metrics
}

impl JobRunner for FakeRunner {
    fn run_job(
        &self,
        job: Job,
        mut cancel: CancelSignal,
    ) -> Pin<Box<dyn Future<Output = BacktestResult> + Send + '_>> {
        Box::pin(async move {
            let outcome = self.outcome_for(&job.strategy);
            self.started.lock().unwrap().push(job.strategy.clone());
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            let cancelled = tokio::select! {
                _ = self.work() => false,
                _ = cancel.fired() => true,
            };
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if cancelled {
                return BacktestResult::cancelled(job.strategy, job.config);
            }
            match outcome {
                Outcome::Complete => {
                    BacktestResult::completed(job.strategy, job.config, sample_metrics(), Vec::new())
                }
                Outcome::Fail(message) => BacktestResult::failed(job.strategy, job.config, message),
                Outcome::Panic => panic!("fake runner blew up on {}", job.strategy),
            }
        })
    }
}
