//! Per-task runtime state, derived from the packet log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::packet::{status_for, AgentPacket, TaskStatus};

/// Runtime state of one node, created lazily on its first packet.
///
/// `status` is always the projection of the last packet; there is no
/// setter, only [`TaskState::push`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskState {
    pub node_id: String,
    status: TaskStatus,
    /// Wire name of the packet the status was derived from.
    from_packet_type: Option<String>,
    result: Option<String>,
    packets: Vec<AgentPacket>,
    updated_at: DateTime<Utc>,
}

impl TaskState {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            status: TaskStatus::Idle,
            from_packet_type: None,
            result: None,
            packets: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    /// Append a packet and re-derive the status.
    pub fn push(&mut self, packet: AgentPacket) {
        self.status = status_for(Some(&packet));
        self.from_packet_type = Some(packet.kind().to_string());
        if packet.is_terminal() {
            self.result = packet.terminal_value().map(str::to_string);
        }
        self.packets.push(packet);
        self.updated_at = Utc::now();
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn from_packet_type(&self) -> Option<&str> {
        self.from_packet_type.as_deref()
    }

    pub fn result(&self) -> Option<&str> {
        self.result.as_deref()
    }

    pub fn packets(&self) -> &[AgentPacket] {
        &self.packets
    }

    pub fn last_packet(&self) -> Option<&AgentPacket> {
        self.packets.last()
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}
