//! Core domain models for the planning and execution engine.
//!
//! Plan structure (nodes, edges, the live execution graph) is kept apart
//! from runtime state (packets and the status they project to).

pub mod graph;
pub mod node;
pub mod packet;
pub mod state;

pub use graph::{ExecutionGraph, MergeOutcome};
pub use node::{base_id, initial_node, Edge, Node, PlanGraph, CRITICISM_SUFFIX, ROOT_PLAN_ID};
pub use packet::{status_for, AgentPacket, Severity, TaskStatus};
pub use state::TaskState;
