//! Execution overlapping with plan streaming.

use std::sync::Arc;
use std::time::Duration;

use waggle::core::{TaskStatus, ROOT_PLAN_ID};
use waggle::orchestration::{ExecutionState, RunParams};

use crate::fixtures::{
    coordinator, split_at_level, ChunkedPlanner, RecordingSink, ScriptedExecutor, THREE_LEVEL_PLAN,
};

/// Test: Level-1 tasks start before the plan has finished streaming
/// Given a plan whose last level arrives 300ms after the first two
/// When the run executes
/// Then 1-0 is dispatched before the planner stream ends
#[tokio::test]
async fn test_first_level_runs_while_plan_streams() {
    let (first, rest) = split_at_level(THREE_LEVEL_PLAN, 3);
    let planner = ChunkedPlanner::new(vec![
        (Duration::ZERO, first),
        (Duration::from_millis(300), rest),
    ]);
    let finished_at = planner.finished_at();
    let executor = Arc::new(ScriptedExecutor::new(Duration::from_millis(10)));

    let outcome = coordinator(Arc::new(planner), executor.clone())
        .run(RunParams::new("Compare AgentGPT and AutoGPT"))
        .await
        .unwrap();

    let plan_end = finished_at.lock().unwrap().expect("planner stream ended");
    assert!(
        executor.span("1-0").started < plan_end,
        "1-0 should start while the plan is still streaming"
    );
    assert_eq!(outcome.task_results.len(), 6);
    for id in ["1-0", "1-c", "2-0", "2-c", "3-0", "3-c"] {
        assert!(outcome.task_results.contains_key(id), "missing {}", id);
    }
}

/// Test: The goal waits for the whole plan
/// Given levels 1 and 2 finish long before level 3 arrives
/// When the run executes
/// Then the last level is still executed
#[tokio::test]
async fn test_goal_waits_for_later_levels() {
    let (first, rest) = split_at_level(THREE_LEVEL_PLAN, 3);
    let planner = ChunkedPlanner::new(vec![
        (Duration::ZERO, first),
        (Duration::from_millis(150), rest),
    ]);
    let executor = Arc::new(ScriptedExecutor::new(Duration::from_millis(1)));

    let outcome = coordinator(Arc::new(planner), executor.clone())
        .run(RunParams::new("goal"))
        .await
        .unwrap();

    assert!(outcome.completed_tasks.contains("3-c"));
    assert_eq!(executor.executed().len(), 6);
}

/// Test: Review tasks see the results of their level
/// Given the three-level plan
/// When 1-c is dispatched
/// Then its request carries the finished 1-0 state and nothing from level 2
#[tokio::test]
async fn test_review_receives_level_results() {
    let executor = Arc::new(ScriptedExecutor::new(Duration::from_millis(5)));

    coordinator(Arc::new(ChunkedPlanner::whole(THREE_LEVEL_PLAN)), executor.clone())
        .run(RunParams::new("goal"))
        .await
        .unwrap();

    let review = executor.request("1-c");
    let reviewed: Vec<&str> = review
        .reviewee_task_results
        .iter()
        .map(|s| s.node_id.as_str())
        .collect();
    assert_eq!(reviewed, vec!["1-0"]);
    assert_eq!(
        review.reviewee_task_results[0].result(),
        Some("finished 📚 Research AgentGPT")
    );
    assert!(review.dag.nodes.iter().any(|n| n.id == "3-c"));
}

/// Test: A one-task plan
/// Given a plan with a single node
/// When the run executes
/// Then exactly that task runs and the plan node reports the graph size
#[tokio::test]
async fn test_single_task_plan() {
    let plan = "1:\n  - id: 0\n    name: Answer\n    context: Answer the question\n";
    let executor = Arc::new(ScriptedExecutor::new(Duration::from_millis(1)));
    let sink = Arc::new(RecordingSink::default());
    let coordinator = coordinator(Arc::new(ChunkedPlanner::whole(plan)), executor.clone())
        .with_result_sink(sink.clone());

    let params = RunParams::new("What is 2 + 2?");
    let execution_id = params.execution_id.clone();
    let run = coordinator.start(params);
    let events = run.events();
    let outcome = run.execute().await.unwrap();

    assert_eq!(executor.executed(), vec!["1-0".to_string()]);
    assert_eq!(outcome.task_results.len(), 1);

    let root = events.state(ROOT_PLAN_ID).await.unwrap();
    assert_eq!(root.status(), TaskStatus::Done);
    assert_eq!(
        root.result(),
        Some("Planned an execution graph with 1 tasks and 1 edges.")
    );

    sink.wait_for("1-0", ExecutionState::Executing).await;
    let record = sink.wait_for(ROOT_PLAN_ID, ExecutionState::Done).await;
    assert_eq!(record.execution_id, execution_id);
}

/// Test: A parent reference to a later level is ignored
/// Given level 1 names level 2 as its parent and level 2 names level 1
/// When the run executes
/// Then only the backward reference holds and both tasks run in order
#[tokio::test]
async fn test_forward_parent_reference_is_ignored() {
    let plan = r#"1:
  - parents: [2]
  - id: 0
    name: "Chicken"
    context: "Comes first"
2:
  - parents: [1]
  - id: 0
    name: "Egg"
    context: "Comes second"
"#;
    let executor = Arc::new(ScriptedExecutor::new(Duration::from_millis(5)));

    let outcome = coordinator(Arc::new(ChunkedPlanner::whole(plan)), executor.clone())
        .run(RunParams::new("goal"))
        .await
        .unwrap();

    assert_eq!(outcome.task_results.len(), 2);
    assert!(executor.span("1-0").finished.unwrap() <= executor.span("2-0").started);
}

/// Test: A parents entry streamed after its level's nodes still holds
/// Given level 2's node arrives at once and its `parents: [1]` 100ms later
/// When the run executes with 200ms tasks
/// Then 2-0 starts only after 1-c has finished
#[tokio::test]
async fn test_late_parents_entry_orders_level() {
    let nodes = r#"1:
  - id: 0
    name: "Research"
    context: "Find sources"
  - id: c
    name: "Review"
    context: "Check the sources"
2:
  - id: 0
    name: "Write"
    context: "Write it up"
"#;
    let planner = ChunkedPlanner::new(vec![
        (Duration::ZERO, nodes.to_string()),
        (Duration::from_millis(100), "  - parents: [1]\n".to_string()),
    ]);
    let executor = Arc::new(ScriptedExecutor::new(Duration::from_millis(200)));
    let run = coordinator(Arc::new(planner), executor.clone()).start(RunParams::new("goal"));
    let graph = run.graph();

    let outcome = run.execute().await.unwrap();

    assert_eq!(outcome.task_results.len(), 3);
    assert!(executor.span("1-c").finished.unwrap() <= executor.span("2-0").started);
    let graph = graph.read().await;
    assert!(graph.has_edge("1-c", "2-0"));
    assert!(!graph.has_edge(ROOT_PLAN_ID, "2-0"));
}
