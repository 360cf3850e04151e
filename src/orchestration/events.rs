//! Packet routing and run notifications.
//!
//! [`EventSink`] owns the per-node [`TaskState`] map. Injecting a packet
//! appends it to the node's log, re-derives the status and broadcasts a
//! [`RunEvent`]. Broadcast never blocks: observers that fall behind lose
//! events, not the run.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};

use crate::core::node::Node;
use crate::core::packet::{AgentPacket, TaskStatus};
use crate::core::state::TaskState;
use crate::orchestration::service::{ExecutionState, ResultRecord, ResultSink};
use crate::{zlog_trace, zlog_warn};

const EVENT_CAPACITY: usize = 1024;

/// Notifications for observers of a run.
#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    PacketInjected {
        node_id: String,
        packet: AgentPacket,
        status: TaskStatus,
    },
    GraphUpdated {
        nodes: usize,
        edges: usize,
    },
    TaskDispatched {
        node_id: String,
    },
    GoalReached {
        completed: usize,
    },
    RunAborted {
        reason: String,
    },
}

struct Persistence {
    sink: Arc<dyn ResultSink>,
    goal_id: String,
    execution_id: String,
}

/// Shared router for one run. Clones share the same state map and channel.
#[derive(Clone)]
pub struct EventSink {
    states: Arc<RwLock<HashMap<String, TaskState>>>,
    events: broadcast::Sender<RunEvent>,
    persistence: Option<Arc<Persistence>>,
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            states: Arc::new(RwLock::new(HashMap::new())),
            events,
            persistence: None,
        }
    }

    /// Hand every terminal packet to `sink` on a detached task.
    pub fn with_result_sink(
        mut self,
        sink: Arc<dyn ResultSink>,
        goal_id: impl Into<String>,
        execution_id: impl Into<String>,
    ) -> Self {
        self.persistence = Some(Arc::new(Persistence {
            sink,
            goal_id: goal_id.into(),
            execution_id: execution_id.into(),
        }));
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.events.subscribe()
    }

    /// Broadcast an event. Having no subscribers is fine.
    pub fn emit(&self, event: RunEvent) {
        let _ = self.events.send(event);
    }

    /// Append `packet` to the node's log and notify observers.
    ///
    /// Per-node order equals call order; the state is created on the
    /// node's first packet.
    pub async fn inject(&self, node: &Node, packet: AgentPacket) -> TaskStatus {
        let (status, packets) = {
            let mut states = self.states.write().await;
            let state = states
                .entry(node.id.clone())
                .or_insert_with(|| TaskState::new(node.id.clone()));
            state.push(packet.clone());
            let packets = packet.is_terminal().then(|| state.packets().to_vec());
            (state.status(), packets)
        };

        zlog_trace!(
            "inject node={} packet={} status={}",
            node.id,
            packet.kind(),
            status
        );

        if let Some(packets) = packets {
            let state = if packet.is_error() {
                ExecutionState::Error
            } else {
                ExecutionState::Executing
            };
            self.persist(node, packet.clone(), packets, state);
        }

        self.emit(RunEvent::PacketInjected {
            node_id: node.id.clone(),
            packet,
            status,
        });
        status
    }

    /// Persist the run's final state against `node` (the plan node).
    pub async fn finish(&self, node: &Node, state: ExecutionState) {
        let snapshot = self.states.read().await.get(&node.id).cloned();
        let Some(snapshot) = snapshot else {
            return;
        };
        if let Some(last) = snapshot.last_packet() {
            self.persist(node, last.clone(), snapshot.packets().to_vec(), state);
        }
    }

    fn persist(
        &self,
        node: &Node,
        packet: AgentPacket,
        packets: Vec<AgentPacket>,
        state: ExecutionState,
    ) {
        let Some(persistence) = self.persistence.clone() else {
            return;
        };
        let record = ResultRecord {
            goal_id: persistence.goal_id.clone(),
            node: node.clone(),
            execution_id: persistence.execution_id.clone(),
            packet,
            packets,
            state,
        };
        tokio::spawn(async move {
            if let Err(e) = persistence.sink.save(&record).await {
                zlog_warn!("Failed to save result for {}: {}", record.node.id, e);
            }
        });
    }

    pub async fn state(&self, node_id: &str) -> Option<TaskState> {
        self.states.read().await.get(node_id).cloned()
    }

    pub async fn status(&self, node_id: &str) -> TaskStatus {
        self.states
            .read()
            .await
            .get(node_id)
            .map(TaskState::status)
            .unwrap_or_default()
    }

    pub async fn snapshot(&self) -> HashMap<String, TaskState> {
        self.states.read().await.clone()
    }

    /// Finished states whose id starts with `prefix`, in id order.
    pub async fn finished_with_prefix(&self, prefix: &str) -> Vec<TaskState> {
        let states = self.states.read().await;
        let mut found: Vec<TaskState> = states
            .values()
            .filter(|s| s.node_id.starts_with(prefix) && s.result().is_some())
            .cloned()
            .collect();
        found.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        found
    }
}
