#![allow(dead_code)]

pub use stratrun_test_utils::builders::RunConfigBuilder;
pub use stratrun_test_utils::{init_tracing, with_timeout};

use std::time::Duration;

use stratrun::scheduler::TaskScheduler;
use stratrun::types::TaskStatus;

pub type TestResult = Result<(), Box<dyn std::error::Error>>;

/// Poll until the task reaches `status`; panics via `with_timeout` if it never does.
pub async fn wait_for_status(scheduler: &TaskScheduler, task_id: &str, status: TaskStatus) {
    with_timeout(async {
        while scheduler.status(task_id) != Some(status) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
}
