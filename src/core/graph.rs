//! The live execution graph.
//!
//! [`ExecutionGraph`] wraps a petgraph `DiGraph` that only ever grows:
//! plan fragments are merged in as the planner streams them, and nodes
//! or edges are never removed. Node insertion order is preserved and is
//! the tie-break order for scheduling.

use crate::core::node::{Edge, Node, PlanGraph};
use crate::error::{Error, Result};
use petgraph::algo::has_path_connecting;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Bfs, EdgeRef};
use petgraph::Direction;
use std::collections::{HashMap, HashSet};

/// What a merge changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub nodes_added: usize,
    pub edges_added: usize,
    /// Root edges generated for nodes that arrived with no dependency.
    pub hookup_edges: usize,
}

impl MergeOutcome {
    pub fn is_changed(&self) -> bool {
        self.nodes_added > 0 || self.edges_added > 0 || self.hookup_edges > 0
    }
}

/// The task dependency graph of one run, rooted at the plan node.
#[derive(Clone)]
pub struct ExecutionGraph {
    graph: DiGraph<Node, ()>,
    index: HashMap<String, NodeIndex>,
    root: NodeIndex,
}

impl ExecutionGraph {
    /// Create a graph holding only the root node.
    pub fn new(root: Node) -> Self {
        let mut graph = DiGraph::new();
        let id = root.id.clone();
        let root = graph.add_node(root);
        let mut index = HashMap::new();
        index.insert(id, root);
        Self { graph, index, root }
    }

    pub fn root(&self) -> &Node {
        &self.graph[self.root]
    }

    pub fn root_id(&self) -> &str {
        &self.graph[self.root].id
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn contains_node(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn get_node(&self, id: &str) -> Option<&Node> {
        self.index.get(id).map(|&idx| &self.graph[idx])
    }

    pub fn has_edge(&self, source: &str, target: &str) -> bool {
        match (self.index.get(source), self.index.get(target)) {
            (Some(&s), Some(&t)) => self.graph.find_edge(s, t).is_some(),
            _ => false,
        }
    }

    /// Nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.graph.node_indices().map(move |idx| &self.graph[idx])
    }

    /// Edges in insertion order.
    pub fn edges(&self) -> Vec<Edge> {
        self.graph
            .edge_references()
            .map(|e| {
                Edge::new(
                    self.graph[e.source()].id.clone(),
                    self.graph[e.target()].id.clone(),
                )
            })
            .collect()
    }

    /// Flat copy for requests and observers.
    pub fn snapshot(&self) -> PlanGraph {
        PlanGraph::new(self.nodes().cloned().collect(), self.edges())
    }

    /// Merge a complete plan into the graph.
    ///
    /// Existing ids and `(source, target)` pairs are skipped, so merging
    /// the same fragment twice is a no-op. After the fragment's edges are
    /// in, every non-root node without an incoming edge is hooked to the
    /// root so it lands in a ready layer.
    ///
    /// # Errors
    /// Fails without modifying the graph if an edge references a node that
    /// is neither in the graph nor in the fragment, or if an edge would
    /// close a cycle.
    pub fn merge(&mut self, fragment: &PlanGraph) -> Result<MergeOutcome> {
        self.merge_partial(fragment, None)
    }

    /// Merge a fragment of a plan that is still streaming.
    ///
    /// Nodes of `open_level` may still receive a `parents` entry, so they
    /// are not hooked to the root until a later merge or
    /// [`close_levels`](Self::close_levels) sees the level closed.
    pub fn merge_partial(
        &mut self,
        fragment: &PlanGraph,
        open_level: Option<u64>,
    ) -> Result<MergeOutcome> {
        for edge in &fragment.edges {
            let known = |id: &str| {
                self.index.contains_key(id) || fragment.nodes.iter().any(|n| n.id == id)
            };
            if !known(&edge.source) || !known(&edge.target) {
                return Err(Error::DanglingEdge {
                    from: edge.source.clone(),
                    to: edge.target.clone(),
                });
            }
        }

        // Work on a copy so a rejected fragment leaves the live graph intact.
        let mut next = self.clone();
        let mut outcome = MergeOutcome::default();

        for node in &fragment.nodes {
            if next.index.contains_key(&node.id) {
                continue;
            }
            let idx = next.graph.add_node(node.clone());
            next.index.insert(node.id.clone(), idx);
            outcome.nodes_added += 1;
        }

        for edge in &fragment.edges {
            let s = next.index[&edge.source];
            let t = next.index[&edge.target];
            if next.graph.find_edge(s, t).is_some() {
                continue;
            }
            if s == t || has_path_connecting(&next.graph, t, s, None) {
                return Err(Error::Cycle {
                    from: edge.source.clone(),
                    to: edge.target.clone(),
                });
            }
            next.graph.add_edge(s, t, ());
            outcome.edges_added += 1;
        }

        let open_level = open_level.map(|level| level.to_string());
        outcome.hookup_edges = next.add_hookup_edges(open_level.as_deref());

        if outcome.is_changed() {
            *self = next;
        }
        Ok(outcome)
    }

    /// Hook every remaining parentless node to the root once the plan has
    /// ended. Returns the number of edges added.
    pub fn close_levels(&mut self) -> usize {
        self.add_hookup_edges(None)
    }

    /// Connect every parentless non-root node outside `open_level` to the root.
    fn add_hookup_edges(&mut self, open_level: Option<&str>) -> usize {
        let orphans: Vec<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|&idx| idx != self.root)
            .filter(|&idx| Some(self.graph[idx].base_id()) != open_level)
            .filter(|&idx| {
                self.graph
                    .neighbors_directed(idx, Direction::Incoming)
                    .next()
                    .is_none()
            })
            .collect();
        for &idx in &orphans {
            self.graph.add_edge(self.root, idx, ());
        }
        orphans.len()
    }

    // ========== Scheduling Operations ==========

    /// Non-root nodes not yet in `completed`, in insertion order.
    pub fn pending_tasks<'a>(&'a self, completed: &HashSet<String>) -> Vec<&'a Node> {
        self.nodes()
            .filter(|node| !node.is_root() && !completed.contains(&node.id))
            .collect()
    }

    /// Pending nodes whose every dependency is in `completed`.
    ///
    /// A node with no incoming edge is never ready on its own; merges hook
    /// such nodes to the root, which is why the root must be in `completed`.
    pub fn ready_tasks<'a>(&'a self, completed: &HashSet<String>) -> Vec<&'a Node> {
        self.graph
            .node_indices()
            .filter(|&idx| idx != self.root)
            .filter_map(|idx| {
                let node = &self.graph[idx];
                if completed.contains(&node.id) {
                    return None;
                }
                let mut deps = self
                    .graph
                    .neighbors_directed(idx, Direction::Incoming)
                    .peekable();
                deps.peek()?;
                deps.all(|dep| completed.contains(&self.graph[dep].id))
                    .then_some(node)
            })
            .collect()
    }

    /// Nodes with a path from the root (the root included).
    pub fn reachable_from_root(&self) -> Vec<&Node> {
        let mut bfs = Bfs::new(&self.graph, self.root);
        let mut seen = Vec::new();
        while let Some(idx) = bfs.next(&self.graph) {
            seen.push(idx);
        }
        seen.sort();
        seen.into_iter().map(|idx| &self.graph[idx]).collect()
    }

    /// True once every node reachable from the root is in `completed`.
    pub fn is_goal_reached(&self, completed: &HashSet<String>) -> bool {
        self.reachable_from_root()
            .iter()
            .all(|node| completed.contains(&node.id))
    }
}

impl std::fmt::Debug for ExecutionGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionGraph")
            .field("nodes", &self.node_count())
            .field("edges", &self.edge_count())
            .finish()
    }
}
