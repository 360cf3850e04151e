//! Task and planning failures.

use std::sync::Arc;
use std::time::Duration;

use waggle::core::{TaskStatus, ROOT_PLAN_ID};
use waggle::orchestration::{ExecutionState, RunParams};
use waggle::Error;

use crate::fixtures::{
    coordinator, split_at_level, Behaviour, ChunkedPlanner, RecordingSink, ScriptedExecutor,
    UnavailablePlanner, THREE_LEVEL_PLAN,
};

/// Test: A failing task aborts the run
/// Given 2-0 fails after 80ms while level 1 completes quickly
/// When the run executes
/// Then the run fails with 2-0's message and keeps level 1's results
#[tokio::test]
async fn test_task_error_aborts_with_partial_results() {
    let executor = Arc::new(
        ScriptedExecutor::new(Duration::from_millis(5))
            .with("2-0", Behaviour::Fail(Duration::from_millis(80), "tool broke".into())),
    );
    let sink = Arc::new(RecordingSink::default());
    let coordinator = coordinator(Arc::new(ChunkedPlanner::whole(THREE_LEVEL_PLAN)), executor.clone())
        .with_result_sink(sink.clone());
    let run = coordinator.start(RunParams::new("goal"));
    let events = run.events();

    let failure = run.execute().await.unwrap_err();

    match &failure.error {
        Error::TaskFailed { node_id, message } => {
            assert_eq!(node_id, "2-0");
            assert_eq!(message, "tool broke");
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(failure.partial.task_results.contains_key("1-0"));
    assert!(failure.partial.task_results.contains_key("1-c"));
    assert!(!failure.partial.task_results.contains_key("2-0"));

    let executed = executor.executed();
    assert!(!executed.contains(&"2-c".to_string()));
    assert!(!executed.contains(&"3-0".to_string()));

    assert_eq!(events.status("2-0").await, TaskStatus::Error);
    sink.wait_for("2-0", ExecutionState::Error).await;
    sink.wait_for(ROOT_PLAN_ID, ExecutionState::Error).await;
}

/// Test: A task failing while the plan streams leaves the plan node alone
/// Given level 3 arrives 300ms late and 1-0 fails after 10ms
/// When the run executes
/// Then the run fails with 1-0's error and the plan node carries no error
#[tokio::test]
async fn test_task_error_during_planning_keeps_plan_node_clean() {
    let (first, rest) = split_at_level(THREE_LEVEL_PLAN, 3);
    let planner = ChunkedPlanner::new(vec![
        (Duration::ZERO, first),
        (Duration::from_millis(300), rest),
    ]);
    let executor = Arc::new(
        ScriptedExecutor::new(Duration::from_millis(5))
            .with("1-0", Behaviour::Fail(Duration::from_millis(10), "tool broke".into())),
    );
    let run = coordinator(Arc::new(planner), executor.clone()).start(RunParams::new("goal"));
    let events = run.events();

    let failure = run.execute().await.unwrap_err();

    assert!(
        matches!(&failure.error, Error::TaskFailed { node_id, .. } if node_id == "1-0"),
        "got {:?}",
        failure.error
    );
    assert_eq!(events.status("1-0").await, TaskStatus::Error);
    let root = events.state(ROOT_PLAN_ID).await.unwrap();
    assert_ne!(root.status(), TaskStatus::Error);
    assert_eq!(root.result(), None);
}

/// Test: An unreachable planner runs nothing
/// Given the planning service answers 503
/// When the run executes
/// Then the status error is reported verbatim and no task executes
#[tokio::test]
async fn test_planner_unavailable_runs_nothing() {
    let executor = Arc::new(ScriptedExecutor::new(Duration::from_millis(1)));
    let coordinator = coordinator(Arc::new(UnavailablePlanner), executor.clone());
    let run = coordinator.start(RunParams::new("goal"));
    let events = run.events();

    let failure = run.execute().await.unwrap_err();

    assert_eq!(
        failure.error.to_string(),
        "Error fetching plan: 503 planner overloaded"
    );
    assert!(executor.executed().is_empty());
    assert_eq!(events.status(ROOT_PLAN_ID).await, TaskStatus::Error);
}

/// Test: A plan that never parses runs nothing
/// Given a planner that streams prose instead of levels
/// When the run executes
/// Then planning fails structurally before any execution
#[tokio::test]
async fn test_unparseable_plan_runs_nothing() {
    let executor = Arc::new(ScriptedExecutor::new(Duration::from_millis(1)));
    let planner = ChunkedPlanner::whole("I am sorry, I cannot plan that.\n");

    let failure = coordinator(Arc::new(planner), executor.clone())
        .run(RunParams::new("goal"))
        .await
        .unwrap_err();

    assert!(failure.error.is_structural(), "got {:?}", failure.error);
    assert!(failure.partial.task_results.is_empty());
    assert!(executor.executed().is_empty());
}
