//! Single-task execution against the execution service.

use std::sync::Arc;

use futures::StreamExt;

use crate::core::packet::AgentPacket;
use crate::orchestration::events::EventSink;
use crate::orchestration::service::{ExecuteRequest, ExecutionService};
use crate::orchestration::signal::AbortSignal;
use crate::{zlog_debug, Error, Result};

/// Runs one task to its terminal packet.
///
/// Intermediate packets are injected into the [`EventSink`] as they
/// arrive. The terminal `done`/`error` packet is returned, not injected;
/// recording it is the scheduler's job.
#[derive(Clone)]
pub struct TaskExecutor {
    service: Arc<dyn ExecutionService>,
    events: EventSink,
}

impl TaskExecutor {
    pub fn new(service: Arc<dyn ExecutionService>, events: EventSink) -> Self {
        Self { service, events }
    }

    /// # Errors
    /// The abort signal (also when it is already set on entry), transport
    /// errors, or a stream that ends without a terminal packet.
    pub async fn execute(&self, request: ExecuteRequest, signal: &AbortSignal) -> Result<AgentPacket> {
        if signal.is_aborted() {
            return Err(signal.to_error());
        }
        let node = request.task.clone();
        zlog_debug!("execute {} ({})", node.id, node.name);

        let mut stream = tokio::select! {
            _ = signal.cancelled() => return Err(signal.to_error()),
            opened = self.service.execute(&request) => opened?,
        };

        loop {
            let next = tokio::select! {
                _ = signal.cancelled() => return Err(signal.to_error()),
                next = stream.next() => next,
            };
            match next {
                Some(Ok(packet)) if packet.is_terminal() => {
                    zlog_debug!("execute {} finished with {}", node.id, packet.kind());
                    return Ok(packet);
                }
                Some(Ok(packet)) => {
                    self.events.inject(&node, packet).await;
                }
                Some(Err(e)) => return Err(e),
                None => {
                    return Err(Error::TaskFailed {
                        node_id: node.id,
                        message: "execution stream ended without a result".to_string(),
                    })
                }
            }
        }
    }
}
