//! Scheduler for concurrent task execution over a growing graph.
//!
//! The Scheduler polls the live [`ExecutionGraph`] for ready tasks,
//! dispatches each ready layer concurrently through the [`TaskExecutor`]
//! and records completions. The graph may still be growing while it runs;
//! the goal can only be reached once planning has completed.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error as ThisError;
use tokio::sync::{mpsc, watch, RwLock};

use crate::config::AgentSettings;
use crate::core::graph::ExecutionGraph;
use crate::core::node::Node;
use crate::core::packet::AgentPacket;
use crate::error::{Error, Result};
use crate::orchestration::events::{EventSink, RunEvent};
use crate::orchestration::executor::TaskExecutor;
use crate::orchestration::service::ExecuteRequest;
use crate::orchestration::signal::{AbortReason, AbortSignal};
use crate::plan::stream::PlanPhase;
use crate::{zlog, zlog_debug, zlog_error, zlog_warn};

/// Results of a run: the terminal packet of every completed task.
#[derive(Debug, Clone, Default)]
pub struct RunOutcome {
    pub task_results: HashMap<String, AgentPacket>,
    pub completed_tasks: HashSet<String>,
}

/// A failed run, with everything that completed before the failure.
#[derive(Debug, ThisError)]
#[error("{error}")]
pub struct RunFailure {
    pub error: Error,
    pub partial: RunOutcome,
}

impl RunFailure {
    pub fn new(error: Error, partial: RunOutcome) -> Self {
        Self { error, partial }
    }

    pub fn is_cancellation(&self) -> bool {
        self.error.is_cancellation()
    }
}

/// Request fields shared by every task of a run.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    pub goal: String,
    pub goal_id: String,
    pub execution_id: String,
    pub execute: AgentSettings,
    pub review: AgentSettings,
}

struct Completion {
    node: Node,
    result: Result<AgentPacket>,
}

pub struct Scheduler {
    graph: Arc<RwLock<ExecutionGraph>>,
    executor: TaskExecutor,
    events: EventSink,
    signal: AbortSignal,
    planning: watch::Receiver<PlanPhase>,
    context: RunContext,
    poll_interval: Duration,
    completed: HashSet<String>,
    in_flight: HashSet<String>,
    results: HashMap<String, AgentPacket>,
    completion_tx: mpsc::UnboundedSender<Completion>,
    completion_rx: mpsc::UnboundedReceiver<Completion>,
}

impl Scheduler {
    /// The root node starts out completed so level-1 tasks can run while
    /// planning continues.
    pub fn new(
        graph: Arc<RwLock<ExecutionGraph>>,
        executor: TaskExecutor,
        events: EventSink,
        signal: AbortSignal,
        planning: watch::Receiver<PlanPhase>,
        context: RunContext,
    ) -> Self {
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        Self {
            graph,
            executor,
            events,
            signal,
            planning,
            context,
            poll_interval: Duration::from_millis(100),
            completed: HashSet::new(),
            in_flight: HashSet::new(),
            results: HashMap::new(),
            completion_tx,
            completion_rx,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Ready tasks that are not already running, in insertion order.
    pub async fn get_ready_tasks(&self) -> Vec<Node> {
        let graph = self.graph.read().await;
        graph
            .ready_tasks(&self.completed)
            .into_iter()
            .filter(|node| !self.in_flight.contains(&node.id))
            .cloned()
            .collect()
    }

    /// Run the scheduling loop until the goal is reached or the run aborts.
    pub async fn run(mut self) -> std::result::Result<RunOutcome, RunFailure> {
        let root_id = self.graph.read().await.root_id().to_string();
        self.completed.insert(root_id);

        loop {
            if self.signal.is_aborted() {
                if matches!(self.signal.reason(), Some(AbortReason::Cancelled)) {
                    self.drain_before_cancel().await;
                }
                let error = self.signal.to_error();
                zlog_warn!("Run aborted: {}", error);
                self.events.emit(RunEvent::RunAborted {
                    reason: error.to_string(),
                });
                return Err(self.fail(error));
            }

            let phase = self.planning.borrow().clone();
            if let PlanPhase::Failed(message) = &phase {
                self.signal
                    .abort(AbortReason::PlanningFailed(message.clone()));
                continue;
            }
            let planning_done = matches!(phase, PlanPhase::Complete { .. });

            let (goal_reached, pending) = {
                let graph = self.graph.read().await;
                (
                    graph.is_goal_reached(&self.completed),
                    graph.pending_tasks(&self.completed).len(),
                )
            };

            if planning_done && goal_reached {
                zlog!("Goal reached with {} completed tasks", self.completed.len());
                self.events.emit(RunEvent::GoalReached {
                    completed: self.completed.len(),
                });
                return Ok(self.outcome());
            }

            let ready = self.get_ready_tasks().await;
            if !ready.is_empty() {
                self.dispatch(ready).await;
                continue;
            }

            if planning_done && self.in_flight.is_empty() {
                let message = if pending == 0 {
                    "no pending tasks while planning is done, yet the goal is not reached".to_string()
                } else {
                    format!("{} pending tasks can never become ready", pending)
                };
                zlog_error!("Scheduler stalled: {}", message);
                return Err(self.fail(Error::InconsistentState(message)));
            }

            let completion = tokio::select! {
                _ = self.signal.cancelled() => None,
                completion = self.completion_rx.recv() => completion,
                _ = tokio::time::sleep(self.poll_interval) => None,
            };
            if let Some(completion) = completion {
                self.handle_completion(completion).await;
            }
        }
    }

    /// Launch every task of a ready layer concurrently.
    async fn dispatch(&mut self, ready: Vec<Node>) {
        let dag = self.graph.read().await.snapshot();
        zlog_debug!(
            "dispatching layer: {}",
            ready.iter().map(|n| n.id.as_str()).collect::<Vec<_>>().join(", ")
        );

        for node in ready {
            if self.signal.is_aborted() {
                break;
            }
            self.in_flight.insert(node.id.clone());
            self.events.inject(&node, AgentPacket::Starting).await;
            self.events.emit(RunEvent::TaskDispatched {
                node_id: node.id.clone(),
            });

            let settings = if node.is_review() {
                &self.context.review
            } else {
                &self.context.execute
            };
            let reviewee_task_results = self
                .events
                .finished_with_prefix(&format!("{}-", node.base_id()))
                .await;
            let request = ExecuteRequest {
                goal: self.context.goal.clone(),
                goal_id: self.context.goal_id.clone(),
                execution_id: self.context.execution_id.clone(),
                agent_prompting_method: settings.agent_prompting_method.clone(),
                task: node.clone(),
                dag: dag.clone(),
                reviewee_task_results,
                creation_props: settings.creation_props(),
            };

            let executor = self.executor.clone();
            let signal = self.signal.clone();
            let completions = self.completion_tx.clone();
            tokio::spawn(async move {
                let result = executor.execute(request, &signal).await;
                let _ = completions.send(Completion { node, result });
            });
        }
    }

    /// Record one finished execution. Failures abort the whole run.
    async fn handle_completion(&mut self, completion: Completion) {
        let Completion { node, result } = completion;
        self.in_flight.remove(&node.id);

        match result {
            Ok(packet) if !packet.is_error() => {
                zlog!("Task {} done", node.id);
                self.events.inject(&node, packet.clone()).await;
                self.results.insert(node.id.clone(), packet);
                self.completed.insert(node.id);
            }
            Ok(packet) => {
                let message = packet
                    .terminal_value()
                    .unwrap_or("task failed")
                    .to_string();
                zlog_error!("Task {} failed: {}", node.id, message);
                self.events.inject(&node, packet).await;
                self.signal.abort(AbortReason::TaskFailed {
                    node_id: node.id,
                    message,
                });
            }
            Err(e) if e.is_cancellation() => {
                zlog_debug!("Task {} stopped by abort", node.id);
            }
            Err(e) => {
                let message = e.to_string();
                zlog_error!("Task {} failed: {}", node.id, message);
                self.events
                    .inject(&node, AgentPacket::fatal(message.clone()))
                    .await;
                self.signal.abort(AbortReason::TaskFailed {
                    node_id: node.id,
                    message,
                });
            }
        }
    }

    /// Record completions that were already queued when the run was
    /// cancelled, up to the first failure.
    ///
    /// A task failure aborts from inside `handle_completion`, so anything
    /// still queued at that point finished after it and is dropped.
    async fn drain_before_cancel(&mut self) {
        while let Ok(completion) = self.completion_rx.try_recv() {
            let succeeded = matches!(&completion.result, Ok(p) if !p.is_error());
            if !succeeded {
                break;
            }
            self.handle_completion(completion).await;
        }
    }

    fn outcome(&mut self) -> RunOutcome {
        RunOutcome {
            task_results: std::mem::take(&mut self.results),
            completed_tasks: std::mem::take(&mut self.completed),
        }
    }

    fn fail(&mut self, error: Error) -> RunFailure {
        RunFailure::new(error, self.outcome())
    }
}
