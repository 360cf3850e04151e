//! Plan structure: nodes, edges and the flat graph shape exchanged with
//! the planning and execution services.
//!
//! Nodes are immutable once created. Runtime status lives in
//! [`TaskState`](crate::core::state::TaskState), keyed by node id.

use serde::{Deserialize, Serialize};

/// Id of the synthetic plan node every run starts from.
pub const ROOT_PLAN_ID: &str = "👸🐝";

/// Local id reserved for a level's review ("criticism") node.
pub const CRITICISM_SUFFIX: &str = "c";

/// A single task in the execution plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Globally unique within an execution (`level-localId` for planned tasks).
    pub id: String,
    /// Display title.
    pub name: String,
    /// Free-text task instructions.
    pub context: String,
}

impl Node {
    pub fn new(id: impl Into<String>, name: impl Into<String>, context: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            context: context.into(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.id == ROOT_PLAN_ID
    }

    /// Review nodes carry the reserved `c` local id (`<level>-c`).
    pub fn is_review(&self) -> bool {
        self.id
            .rsplit_once('-')
            .is_some_and(|(_, local)| local == CRITICISM_SUFFIX)
    }

    /// The level part of a `level-localId` id.
    pub fn base_id(&self) -> &str {
        base_id(&self.id)
    }
}

/// The level part of a `level-localId` id, or the whole id if it has no `-`.
pub fn base_id(id: &str) -> &str {
    id.split_once('-').map(|(base, _)| base).unwrap_or(id)
}

/// The synthetic plan node for a goal.
pub fn initial_node(goal: &str) -> Node {
    Node::new(ROOT_PLAN_ID, "⭐ Plan", goal)
}

/// A dependency: `target` depends on `source`.
///
/// Serialized with the `sId`/`tId` field names the services use.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    #[serde(rename = "sId")]
    pub source: String,
    #[serde(rename = "tId")]
    pub target: String,
}

impl Edge {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

/// Flat node/edge lists: a parsed plan fragment or a graph snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanGraph {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

impl PlanGraph {
    pub fn new(nodes: Vec<Node>, edges: Vec<Edge>) -> Self {
        Self { nodes, edges }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }
}
