//! User stops and superseded runs.

use std::sync::Arc;
use std::time::{Duration, Instant};

use waggle::core::ROOT_PLAN_ID;
use waggle::orchestration::{ExecutionState, RunEvent, RunParams};

use crate::fixtures::{
    coordinator, split_at_level, Behaviour, ChunkedPlanner, RecordingSink, ScriptedExecutor,
    THREE_LEVEL_PLAN,
};

/// Test: Cancelling stops a hanging task
/// Given 1-0 never finishes
/// When the run is cancelled after 50ms
/// Then the run ends as cancelled and 1-c never starts
#[tokio::test]
async fn test_cancel_stops_running_task() {
    let executor = Arc::new(ScriptedExecutor::new(Duration::from_millis(5)).with("1-0", Behaviour::Hang));
    let sink = Arc::new(RecordingSink::default());
    let coordinator = coordinator(Arc::new(ChunkedPlanner::whole(THREE_LEVEL_PLAN)), executor.clone())
        .with_result_sink(sink.clone());
    let run = coordinator.start(RunParams::new("goal"));
    let signal = run.signal();
    let mut events = run.subscribe();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        signal.cancel();
    });
    let failure = run.execute().await.unwrap_err();

    assert!(failure.is_cancellation());
    assert!(!failure.partial.task_results.contains_key("1-0"));
    assert!(!executor.executed().contains(&"1-c".to_string()));

    let mut aborted = false;
    while let Ok(event) = events.try_recv() {
        aborted |= matches!(event, RunEvent::RunAborted { .. });
    }
    assert!(aborted, "observers should see the abort");
    sink.wait_for(ROOT_PLAN_ID, ExecutionState::Cancelled).await;
}

/// Test: Cancelling while the plan streams
/// Given a planner that sends nothing for 500ms
/// When the run is cancelled after 30ms
/// Then the run ends promptly without executing anything
#[tokio::test]
async fn test_cancel_during_planning() {
    let planner = ChunkedPlanner::new(vec![(
        Duration::from_millis(500),
        THREE_LEVEL_PLAN.to_string(),
    )]);
    let executor = Arc::new(ScriptedExecutor::new(Duration::from_millis(1)));
    let run = coordinator(Arc::new(planner), executor.clone()).start(RunParams::new("goal"));
    let signal = run.signal();
    let started = Instant::now();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        signal.cancel();
    });
    let failure = run.execute().await.unwrap_err();

    assert!(failure.is_cancellation());
    assert!(started.elapsed() < Duration::from_millis(400));
    assert!(executor.executed().is_empty());
}

/// Test: Starting a new run supersedes the running one
/// Given a run stuck on a hanging task
/// When the same coordinator starts another run
/// Then the first run ends as cancelled
#[tokio::test]
async fn test_new_run_supersedes_previous() {
    let (first_level, _) = split_at_level(THREE_LEVEL_PLAN, 2);
    let executor = Arc::new(ScriptedExecutor::new(Duration::from_millis(5)).with("1-0", Behaviour::Hang));
    let coordinator = coordinator(Arc::new(ChunkedPlanner::whole(&first_level)), executor.clone());

    let first = coordinator.start(RunParams::new("first goal"));
    let first = tokio::spawn(first.execute());
    tokio::time::sleep(Duration::from_millis(50)).await;

    let _second = coordinator.start(RunParams::new("second goal"));
    let failure = tokio::time::timeout(Duration::from_secs(2), first)
        .await
        .expect("first run should stop")
        .unwrap()
        .unwrap_err();

    assert!(failure.is_cancellation());
}
