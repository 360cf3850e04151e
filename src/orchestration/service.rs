//! Boundaries to the external planning, execution and result services.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::core::node::{Node, PlanGraph};
use crate::core::packet::AgentPacket;
use crate::core::state::TaskState;
use crate::Result;

/// Raw plan response body, chunk by chunk.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>>> + Send + 'static>>;

/// Execution events for one task, ending in a terminal packet.
pub type PacketStream = Pin<Box<dyn Stream<Item = Result<AgentPacket>> + Send + 'static>>;

/// Model settings sent along with every request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CreationProps {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanRequest {
    pub goal: String,
    pub goal_id: String,
    pub execution_id: String,
    pub creation_props: CreationProps,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest {
    pub goal: String,
    pub goal_id: String,
    pub execution_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_prompting_method: Option<String>,
    pub task: Node,
    pub dag: PlanGraph,
    pub reviewee_task_results: Vec<TaskState>,
    pub creation_props: CreationProps,
}

/// Persisted state of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionState {
    Executing,
    Done,
    Error,
    Cancelled,
}

/// One result handed to the persistence collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultRecord {
    pub goal_id: String,
    pub node: Node,
    pub execution_id: String,
    pub packet: AgentPacket,
    pub packets: Vec<AgentPacket>,
    pub state: ExecutionState,
}

#[async_trait]
pub trait PlanningService: Send + Sync {
    /// Open the streamed plan for a goal.
    async fn plan(&self, request: &PlanRequest) -> Result<ByteStream>;
}

#[async_trait]
pub trait ExecutionService: Send + Sync {
    /// Start executing one task.
    async fn execute(&self, request: &ExecuteRequest) -> Result<PacketStream>;
}

#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn save(&self, record: &ResultRecord) -> Result<()>;
}
