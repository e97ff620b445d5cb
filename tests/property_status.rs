// tests/property_status.rs

use proptest::prelude::*;
use stratrun::result::BacktestResult;
use stratrun::scheduler::TaskInfo;
use stratrun::scheduler::registry::TaskRegistry;
use stratrun::types::TaskStatus;
use stratrun_test_utils::builders::RunConfigBuilder;
use stratrun_test_utils::fake_runner::sample_metrics;

#[derive(Debug, Clone)]
enum Op {
    MarkRunning,
    Complete,
    FailResult,
    CancelResult,
    Panic,
    CancelPending,
    Terminate,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::MarkRunning),
        Just(Op::Complete),
        Just(Op::FailResult),
        Just(Op::CancelResult),
        Just(Op::Panic),
        Just(Op::CancelPending),
        Just(Op::Terminate),
    ]
}

fn rank(status: TaskStatus) -> u8 {
    match status {
        TaskStatus::Pending => 0,
        TaskStatus::Running => 1,
        TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled => 2,
    }
}

fn apply(registry: &TaskRegistry, op: &Op) {
    let config = RunConfigBuilder::new().build();
    match op {
        Op::MarkRunning => {
            registry.mark_running("t");
        }
        Op::Complete => {
            registry.finish("t", BacktestResult::completed("S", config, sample_metrics(), Vec::new()));
        }
        Op::FailResult => {
            registry.finish("t", BacktestResult::failed("S", config, "engine error"));
        }
        Op::CancelResult => {
            registry.finish("t", BacktestResult::cancelled("S", config));
        }
        Op::Panic => {
            registry.fail("t", "worker panicked");
        }
        Op::CancelPending => {
            registry.cancel_pending("t");
        }
        Op::Terminate => {
            registry.terminate_running("t");
        }
    }
}

proptest! {
    #[test]
    fn task_status_only_moves_forward(ops in proptest::collection::vec(op_strategy(), 1..20)) {
        let registry = TaskRegistry::new();
        let rx = registry.insert(TaskInfo::pending("t", "S"), None);

        let mut previous = TaskStatus::Pending;
        for op in &ops {
            apply(&registry, op);
            let current = registry.status("t").unwrap();

            prop_assert!(rank(current) >= rank(previous), "{previous} -> {current} via {op:?}");
            if previous.is_terminal() {
                prop_assert_eq!(current, previous, "terminal status changed via {:?}", op);
            }
            // Watchers see the same status as the registry.
            prop_assert_eq!(*rx.borrow(), current);
            previous = current;
        }

        let info = registry.get("t").unwrap();
        prop_assert_eq!(info.started_at.is_some(), ops_reached_running(&ops));
        prop_assert_eq!(info.completed_at.is_some(), info.status.is_terminal());
    }
}

/// Whether `mark_running` ran while the task was still pending.
fn ops_reached_running(ops: &[Op]) -> bool {
    for op in ops {
        match op {
            Op::MarkRunning => return true,
            Op::CancelPending | Op::Panic | Op::Complete | Op::FailResult | Op::CancelResult => {
                return false;
            }
            Op::Terminate => {}
        }
    }
    false
}
