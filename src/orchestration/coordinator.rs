//! Run entry point: plan a goal and execute the plan as it streams in.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{broadcast, oneshot, RwLock};
use uuid::Uuid;

use crate::config::{AgentRoles, Config};
use crate::core::graph::ExecutionGraph;
use crate::core::node::{initial_node, Node};
use crate::core::packet::AgentPacket;
use crate::orchestration::events::{EventSink, RunEvent};
use crate::orchestration::executor::TaskExecutor;
use crate::orchestration::http::{
    build_client, HttpExecutionService, HttpPlanningService, HttpResultSink,
};
use crate::orchestration::scheduler::{RunContext, RunFailure, RunOutcome, Scheduler};
use crate::orchestration::service::{
    ExecutionService, ExecutionState, PlanRequest, PlanningService, ResultSink,
};
use crate::orchestration::signal::{AbortReason, AbortSignal};
use crate::plan::stream::{PlanSummary, StreamingPlanParser};
use crate::{zlog, zlog_debug, zlog_warn, Error, Result};

/// Identity and settings of one run.
#[derive(Debug, Clone)]
pub struct RunParams {
    pub goal: String,
    pub goal_id: String,
    pub execution_id: String,
    pub agents: AgentRoles,
}

impl RunParams {
    /// Fresh goal and execution ids.
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            goal: goal.into(),
            goal_id: Uuid::new_v4().to_string(),
            execution_id: Uuid::new_v4().to_string(),
            agents: AgentRoles::default(),
        }
    }

    pub fn with_agents(mut self, agents: AgentRoles) -> Self {
        self.agents = agents;
        self
    }
}

/// Creates runs. Starting a run aborts the one started before it.
pub struct Coordinator {
    planner: Arc<dyn PlanningService>,
    execution: Arc<dyn ExecutionService>,
    result_sink: Option<Arc<dyn ResultSink>>,
    poll_interval: Duration,
    active: Mutex<Option<AbortSignal>>,
}

impl Coordinator {
    pub fn new(planner: Arc<dyn PlanningService>, execution: Arc<dyn ExecutionService>) -> Self {
        Self {
            planner,
            execution,
            result_sink: None,
            poll_interval: Duration::from_millis(100),
            active: Mutex::new(None),
        }
    }

    /// HTTP services as configured.
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = build_client(config.request_timeout())?;
        let mut coordinator = Self::new(
            Arc::new(HttpPlanningService::new(client.clone(), &config.plan_url)),
            Arc::new(HttpExecutionService::new(client.clone(), &config.execute_url)),
        )
        .with_poll_interval(config.poll_interval());
        if let Some(url) = &config.result_url {
            coordinator = coordinator.with_result_sink(Arc::new(HttpResultSink::new(client, url)));
        }
        Ok(coordinator)
    }

    pub fn with_result_sink(mut self, sink: Arc<dyn ResultSink>) -> Self {
        self.result_sink = Some(sink);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Prepare a run. Observers can subscribe before it is executed.
    pub fn start(&self, params: RunParams) -> Run {
        let signal = AbortSignal::new();
        if let Ok(mut active) = self.active.lock() {
            if let Some(previous) = active.replace(signal.clone()) {
                if previous.cancel() {
                    zlog!("Aborted previous run in favour of {}", params.execution_id);
                }
            }
        }

        let mut events = EventSink::new();
        if let Some(sink) = &self.result_sink {
            events = events.with_result_sink(
                Arc::clone(sink),
                params.goal_id.clone(),
                params.execution_id.clone(),
            );
        }

        Run {
            root: initial_node(&params.goal),
            graph: Arc::new(RwLock::new(ExecutionGraph::new(initial_node(&params.goal)))),
            params,
            signal,
            events,
            planner: Arc::clone(&self.planner),
            execution: Arc::clone(&self.execution),
            poll_interval: self.poll_interval,
        }
    }

    /// Plan and execute `params` to completion.
    pub async fn run(&self, params: RunParams) -> std::result::Result<RunOutcome, RunFailure> {
        self.start(params).execute().await
    }
}

/// One prepared execution.
pub struct Run {
    params: RunParams,
    root: Node,
    graph: Arc<RwLock<ExecutionGraph>>,
    signal: AbortSignal,
    events: EventSink,
    planner: Arc<dyn PlanningService>,
    execution: Arc<dyn ExecutionService>,
    poll_interval: Duration,
}

impl Run {
    pub fn params(&self) -> &RunParams {
        &self.params
    }

    /// The signal callers use to stop the run.
    pub fn signal(&self) -> AbortSignal {
        self.signal.clone()
    }

    pub fn events(&self) -> EventSink {
        self.events.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.events.subscribe()
    }

    pub fn graph(&self) -> Arc<RwLock<ExecutionGraph>> {
        Arc::clone(&self.graph)
    }

    /// Stream the plan and schedule tasks as soon as the first one exists.
    ///
    /// Planning errors that leave no task to run end the run before any
    /// execution starts.
    pub async fn execute(self) -> std::result::Result<RunOutcome, RunFailure> {
        let parser = StreamingPlanParser::new(
            Arc::clone(&self.planner),
            Arc::clone(&self.graph),
            self.events.clone(),
        );
        let phase = parser.phase();
        let request = PlanRequest {
            goal: self.params.goal.clone(),
            goal_id: self.params.goal_id.clone(),
            execution_id: self.params.execution_id.clone(),
            creation_props: self.params.agents.plan.creation_props(),
        };

        let (first_tx, first_rx) = oneshot::channel();
        let planning = {
            let signal = self.signal.clone();
            let events = self.events.clone();
            let root = self.root.clone();
            tokio::spawn(async move {
                let result = parser.run(&request, &signal, Some(first_tx)).await;
                conclude_planning(result, &root, &events, &signal).await
            })
        };

        // The sender is dropped without a value when planning ends first.
        let mut planning = Some(planning);
        if first_rx.await.is_err() {
            if let Some(handle) = planning.take() {
                if let Err(e) = join_planning(handle).await {
                    return Err(self.finish(RunFailure::new(e, RunOutcome::default())).await);
                }
            }
        }

        let context = RunContext {
            goal: self.params.goal.clone(),
            goal_id: self.params.goal_id.clone(),
            execution_id: self.params.execution_id.clone(),
            execute: self.params.agents.execute.clone(),
            review: self.params.agents.review.clone(),
        };
        let scheduler = Scheduler::new(
            Arc::clone(&self.graph),
            TaskExecutor::new(Arc::clone(&self.execution), self.events.clone()),
            self.events.clone(),
            self.signal.clone(),
            phase,
            context,
        )
        .with_poll_interval(self.poll_interval);
        let result = scheduler.run().await;

        let planning_result = match planning {
            Some(handle) => join_planning(handle).await.map(|_| ()),
            None => Ok(()),
        };

        match result {
            Ok(outcome) => {
                self.events.finish(&self.root, ExecutionState::Done).await;
                Ok(outcome)
            }
            Err(mut failure) => {
                // The scheduler only sees that planning failed; report why.
                if matches!(failure.error, Error::Planning(_)) {
                    if let Err(cause) = planning_result {
                        failure.error = cause;
                    }
                }
                Err(self.finish(failure).await)
            }
        }
    }

    async fn finish(&self, failure: RunFailure) -> RunFailure {
        let state = if failure.is_cancellation() {
            ExecutionState::Cancelled
        } else {
            ExecutionState::Error
        };
        self.events.finish(&self.root, state).await;
        failure
    }
}

async fn join_planning(
    handle: tokio::task::JoinHandle<Result<PlanSummary>>,
) -> Result<PlanSummary> {
    handle.await.map_err(|e| Error::TaskJoin(e.to_string()))?
}

/// True when the run was stopped by something other than planning, such
/// as a failed task. The plan node then keeps its streaming state.
fn aborted_elsewhere(signal: &AbortSignal) -> bool {
    matches!(signal.reason(), Some(reason) if !matches!(reason, AbortReason::PlanningFailed(_)))
}

/// Validate the finished plan and report it on the plan node.
async fn conclude_planning(
    result: Result<PlanSummary>,
    root: &Node,
    events: &EventSink,
    signal: &AbortSignal,
) -> Result<PlanSummary> {
    let result = result.and_then(|summary| {
        if summary.tasks == 0 || summary.edges == 0 {
            Err(Error::Planning(format!(
                "degenerate plan with {} tasks and {} edges",
                summary.tasks, summary.edges
            )))
        } else {
            Ok(summary)
        }
    });

    match &result {
        Ok(summary) => {
            let message = format!(
                "Planned an execution graph with {} tasks and {} edges.",
                summary.tasks, summary.edges
            );
            events.inject(root, AgentPacket::done(message)).await;
        }
        Err(e) if e.is_cancellation() || aborted_elsewhere(signal) => {
            zlog_debug!("Planning stopped: {}", e);
        }
        Err(e) => {
            zlog_warn!("Planning failed: {}", e);
            events.inject(root, AgentPacket::fatal(e.to_string())).await;
            signal.abort(AbortReason::PlanningFailed(e.to_string()));
        }
    }
    result
}
