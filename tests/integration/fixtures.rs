//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - A planner that streams a plan in delayed chunks
//! - An execution service scripted per task id
//! - A result sink that records what was persisted

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use waggle::core::AgentPacket;
use waggle::orchestration::{
    ByteStream, Coordinator, ExecuteRequest, ExecutionService, ExecutionState, PacketStream,
    PlanRequest, PlanningService, ResultRecord, ResultSink,
};
use waggle::{Error, Result};

/// Two independent research levels reviewed by a third.
pub const THREE_LEVEL_PLAN: &str = r#"1:
  - id: 0
    name: "📚 Research AgentGPT"
    context: "Gather information about AgentGPT"
  - id: c
    name: "🔍 Review the research findings"
    context: "Review the gathered information"
2:
  - id: 0
    name: "📚 Research AutoGPT"
    context: "Gather information about AutoGPT"
  - id: c
    name: "🔍 Review the research findings"
    context: "Review the gathered information"
3:
  - parents: [1, 2]
  - id: 0
    name: "📝 Create report outline"
    context: "Create an outline for the report"
  - id: c
    name: "🔍 Review the sections"
    context: "Review the sections for accuracy"
"#;

/// Split `plan` before the line that opens `level`.
pub fn split_at_level(plan: &str, level: u32) -> (String, String) {
    let marker = format!("\n{}:\n", level);
    match plan.find(&marker) {
        Some(idx) => (plan[..=idx].to_string(), plan[idx + 1..].to_string()),
        None => (plan.to_string(), String::new()),
    }
}

/// Streams a plan as chunks, each sent after its delay.
pub struct ChunkedPlanner {
    chunks: Vec<(Duration, String)>,
    finished_at: Arc<Mutex<Option<Instant>>>,
}

impl ChunkedPlanner {
    pub fn new(chunks: Vec<(Duration, String)>) -> Self {
        Self {
            chunks,
            finished_at: Arc::new(Mutex::new(None)),
        }
    }

    /// The whole plan in one chunk.
    pub fn whole(plan: &str) -> Self {
        Self::new(vec![(Duration::ZERO, plan.to_string())])
    }

    pub fn finished_at(&self) -> Arc<Mutex<Option<Instant>>> {
        Arc::clone(&self.finished_at)
    }
}

#[async_trait]
impl PlanningService for ChunkedPlanner {
    async fn plan(&self, _request: &PlanRequest) -> Result<ByteStream> {
        let chunks = self.chunks.clone();
        let finished_at = Arc::clone(&self.finished_at);
        let stream = async_stream::stream! {
            for (delay, chunk) in chunks {
                tokio::time::sleep(delay).await;
                yield Ok::<_, Error>(chunk.into_bytes());
            }
            *finished_at.lock().unwrap() = Some(Instant::now());
        };
        Ok(Box::pin(stream))
    }
}

/// Refuses every plan request with an HTTP status error.
pub struct UnavailablePlanner;

#[async_trait]
impl PlanningService for UnavailablePlanner {
    async fn plan(&self, _request: &PlanRequest) -> Result<ByteStream> {
        Err(Error::HttpStatus {
            context: "Error fetching plan".into(),
            status: 503,
            text: "planner overloaded".into(),
        })
    }
}

/// How the scripted service treats one task.
#[derive(Debug, Clone)]
pub enum Behaviour {
    /// Emit a token, wait, then finish with `done`.
    Succeed(Duration),
    /// Wait, then finish with an error packet.
    Fail(Duration, String),
    /// Emit `working` and never finish.
    Hang,
}

/// Timing of one execution call.
#[derive(Debug, Clone)]
pub struct Span {
    pub node_id: String,
    pub started: Instant,
    pub finished: Option<Instant>,
}

pub struct ScriptedExecutor {
    default_delay: Duration,
    behaviours: HashMap<String, Behaviour>,
    spans: Arc<Mutex<Vec<Span>>>,
    requests: Mutex<Vec<ExecuteRequest>>,
}

impl ScriptedExecutor {
    pub fn new(default_delay: Duration) -> Self {
        Self {
            default_delay,
            behaviours: HashMap::new(),
            spans: Arc::new(Mutex::new(Vec::new())),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with(mut self, node_id: &str, behaviour: Behaviour) -> Self {
        self.behaviours.insert(node_id.to_string(), behaviour);
        self
    }

    pub fn spans(&self) -> Vec<Span> {
        self.spans.lock().unwrap().clone()
    }

    pub fn span(&self, node_id: &str) -> Span {
        self.spans()
            .into_iter()
            .find(|s| s.node_id == node_id)
            .unwrap_or_else(|| panic!("{} was never executed", node_id))
    }

    pub fn executed(&self) -> Vec<String> {
        self.spans().into_iter().map(|s| s.node_id).collect()
    }

    pub fn request(&self, node_id: &str) -> ExecuteRequest {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.task.id == node_id)
            .cloned()
            .unwrap_or_else(|| panic!("no request for {}", node_id))
    }
}

#[async_trait]
impl ExecutionService for ScriptedExecutor {
    async fn execute(&self, request: &ExecuteRequest) -> Result<PacketStream> {
        let node_id = request.task.id.clone();
        self.requests.lock().unwrap().push(request.clone());
        let index = {
            let mut spans = self.spans.lock().unwrap();
            spans.push(Span {
                node_id: node_id.clone(),
                started: Instant::now(),
                finished: None,
            });
            spans.len() - 1
        };

        let behaviour = self
            .behaviours
            .get(&node_id)
            .cloned()
            .unwrap_or(Behaviour::Succeed(self.default_delay));
        let spans = Arc::clone(&self.spans);
        let name = request.task.name.clone();

        let stream = async_stream::stream! {
            match behaviour {
                Behaviour::Succeed(delay) => {
                    yield Ok::<_, Error>(AgentPacket::Token { token: "…".into() });
                    tokio::time::sleep(delay).await;
                    spans.lock().unwrap()[index].finished = Some(Instant::now());
                    yield Ok(AgentPacket::done(format!("finished {}", name)));
                }
                Behaviour::Fail(delay, message) => {
                    tokio::time::sleep(delay).await;
                    spans.lock().unwrap()[index].finished = Some(Instant::now());
                    yield Ok(AgentPacket::fatal(message));
                }
                Behaviour::Hang => {
                    yield Ok(AgentPacket::Working);
                    futures::future::pending::<()>().await;
                }
            }
        };
        Ok(Box::pin(stream))
    }
}

/// Records every persisted result.
#[derive(Default)]
pub struct RecordingSink {
    records: Mutex<Vec<ResultRecord>>,
}

impl RecordingSink {
    pub fn records(&self) -> Vec<ResultRecord> {
        self.records.lock().unwrap().clone()
    }

    /// Wait until a record in `state` exists for `node_id`.
    pub async fn wait_for(&self, node_id: &str, state: ExecutionState) -> ResultRecord {
        for _ in 0..200 {
            let found = self
                .records()
                .into_iter()
                .find(|r| r.node.id == node_id && r.state == state);
            if let Some(record) = found {
                return record;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("no {:?} record for {}", state, node_id);
    }
}

#[async_trait]
impl ResultSink for RecordingSink {
    async fn save(&self, record: &ResultRecord) -> Result<()> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

/// A coordinator over the given mocks with a fast poll interval.
pub fn coordinator(
    planner: Arc<dyn PlanningService>,
    executor: Arc<ScriptedExecutor>,
) -> Coordinator {
    Coordinator::new(planner, executor).with_poll_interval(Duration::from_millis(5))
}
