//! Incremental consumption of the streamed plan.
//!
//! The plan body is read chunk by chunk. Whenever a chunk completes at
//! least one line, the accumulated text is handed to a parse worker on
//! the blocking pool. Successful parses are merged into the live graph by
//! a single publisher task, so the scheduler can start on level-1 tasks
//! while the rest of the plan is still arriving.
//!
//! The last level of a parse may still be missing its `parents` entry, so
//! its parentless nodes are only hooked to the plan node once a later
//! level appears or the stream ends.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{mpsc, oneshot, watch, RwLock};
use tokio::task::{JoinHandle, JoinSet};

use crate::core::graph::ExecutionGraph;
use crate::core::node::Node;
use crate::core::packet::AgentPacket;
use crate::orchestration::events::{EventSink, RunEvent};
use crate::orchestration::service::{PlanRequest, PlanningService};
use crate::orchestration::signal::{AbortReason, AbortSignal};
use crate::plan::wire::{parse_fragment, PlanFragment};
use crate::util;
use crate::{zlog, zlog_debug, zlog_error, zlog_trace, zlog_warn, Error, Result};

pub const DEFAULT_PARSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Splits a byte stream into complete lines.
///
/// Complete lines accumulate; bytes after the last newline wait for the
/// next chunk. Multi-byte characters split across chunks are kept intact.
#[derive(Debug, Default)]
pub struct LineBuffer {
    complete: String,
    partial: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk. Returns `true` if it completed at least one line.
    pub fn push(&mut self, chunk: &[u8]) -> bool {
        match chunk.iter().rposition(|&b| b == b'\n') {
            Some(idx) => {
                self.partial.extend_from_slice(&chunk[..=idx]);
                let lines = std::mem::take(&mut self.partial);
                self.complete.push_str(&String::from_utf8_lossy(&lines));
                self.partial.extend_from_slice(&chunk[idx + 1..]);
                true
            }
            None => {
                self.partial.extend_from_slice(chunk);
                false
            }
        }
    }

    /// Flush trailing bytes at end of stream. Returns `true` if any were pending.
    pub fn finish(&mut self) -> bool {
        if self.partial.is_empty() {
            return false;
        }
        let rest = std::mem::take(&mut self.partial);
        self.complete.push_str(&String::from_utf8_lossy(&rest));
        true
    }

    /// All complete text received so far.
    pub fn text(&self) -> &str {
        &self.complete
    }

    pub fn pending_bytes(&self) -> usize {
        self.partial.len()
    }
}

/// Progress of the planning stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanPhase {
    Pending,
    Streaming,
    Complete { tasks: usize, edges: usize },
    Failed(String),
}

impl PlanPhase {
    pub fn is_finished(&self) -> bool {
        matches!(self, PlanPhase::Complete { .. } | PlanPhase::Failed(_))
    }
}

/// Size of the planned graph, excluding the plan node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanSummary {
    pub tasks: usize,
    pub edges: usize,
}

pub struct StreamingPlanParser {
    service: Arc<dyn PlanningService>,
    graph: Arc<RwLock<ExecutionGraph>>,
    events: EventSink,
    phase: watch::Sender<PlanPhase>,
}

impl StreamingPlanParser {
    pub fn new(
        service: Arc<dyn PlanningService>,
        graph: Arc<RwLock<ExecutionGraph>>,
        events: EventSink,
    ) -> Self {
        let (phase, _) = watch::channel(PlanPhase::Pending);
        Self {
            service,
            graph,
            events,
            phase,
        }
    }

    pub fn phase(&self) -> watch::Receiver<PlanPhase> {
        self.phase.subscribe()
    }

    /// Stream the plan for `request` into the graph.
    ///
    /// `first_task` receives the first planned node as soon as it has been
    /// merged. Resolves once the stream has ended and every parse has been
    /// applied.
    ///
    /// # Errors
    /// Transport and HTTP status errors, a structural merge error, the
    /// abort signal, or `Error::Planning` when nothing parseable arrived.
    pub async fn run(
        &self,
        request: &PlanRequest,
        signal: &AbortSignal,
        first_task: Option<oneshot::Sender<Node>>,
    ) -> Result<PlanSummary> {
        self.phase.send_replace(PlanPhase::Streaming);
        let result = self.stream_plan(request, signal, first_task).await;
        match &result {
            Ok(summary) => {
                zlog!(
                    "Planning complete: {} tasks, {} edges",
                    summary.tasks,
                    summary.edges
                );
                self.phase.send_replace(PlanPhase::Complete {
                    tasks: summary.tasks,
                    edges: summary.edges,
                });
            }
            Err(e) => {
                zlog_error!("Planning failed: {}", e);
                self.phase.send_replace(PlanPhase::Failed(e.to_string()));
            }
        }
        result
    }

    async fn stream_plan(
        &self,
        request: &PlanRequest,
        signal: &AbortSignal,
        first_task: Option<oneshot::Sender<Node>>,
    ) -> Result<PlanSummary> {
        let root = self.graph.read().await.root().clone();

        let mut stream = tokio::select! {
            _ = signal.cancelled() => return Err(signal.to_error()),
            opened = self.service.plan(request) => opened?,
        };
        zlog!("Planning started for execution {}", request.execution_id);
        self.events.inject(&root, AgentPacket::Working).await;

        let (fragment_tx, fragment_rx) = mpsc::unbounded_channel();
        let publisher = tokio::spawn(publish(
            Arc::clone(&self.graph),
            self.events.clone(),
            signal.clone(),
            fragment_rx,
            first_task,
        ));
        let mut workers = JoinSet::new();
        let mut buffer = LineBuffer::new();

        loop {
            let chunk = tokio::select! {
                _ = signal.cancelled() => {
                    workers.abort_all();
                    return Err(abort_error(publisher, signal).await);
                }
                chunk = stream.next() => chunk,
            };
            match chunk {
                Some(Ok(bytes)) => {
                    zlog_trace!("plan chunk: {} bytes", bytes.len());
                    if buffer.push(&bytes) {
                        self.spawn_parse(&mut workers, buffer.text(), &fragment_tx);
                    }
                }
                Some(Err(e)) => {
                    workers.abort_all();
                    publisher.abort();
                    return Err(e);
                }
                None => break,
            }
        }

        if buffer.finish() {
            self.spawn_parse(&mut workers, buffer.text(), &fragment_tx);
        }
        drop(fragment_tx);

        tokio::select! {
            _ = signal.cancelled() => {
                workers.abort_all();
                return Err(abort_error(publisher, signal).await);
            }
            _ = drain(&mut workers) => {}
        }

        let produced = publisher
            .await
            .map_err(|e| Error::TaskJoin(e.to_string()))??;
        if signal.is_aborted() {
            return Err(signal.to_error());
        }
        if !produced {
            return Err(Error::Planning("no plan produced".to_string()));
        }

        let graph = self.graph.read().await;
        Ok(PlanSummary {
            tasks: graph.node_count().saturating_sub(1),
            edges: graph.edge_count(),
        })
    }

    fn spawn_parse(
        &self,
        workers: &mut JoinSet<()>,
        text: &str,
        fragments: &mpsc::UnboundedSender<PlanFragment>,
    ) {
        let text = text.to_string();
        let fragments = fragments.clone();
        workers.spawn(async move {
            match util::blocking_with_timeout(DEFAULT_PARSE_TIMEOUT, move || parse_fragment(&text)).await {
                Ok(fragment) => {
                    let _ = fragments.send(fragment);
                }
                Err(e @ (Error::Timeout(_) | Error::TaskJoin(_))) => {
                    zlog_warn!("Plan parse worker failed: {}", e);
                }
                Err(e) => zlog_debug!("Plan not parseable yet: {}", e),
            }
        });
    }
}

async fn drain(workers: &mut JoinSet<()>) {
    while let Some(joined) = workers.join_next().await {
        if let Err(e) = joined {
            zlog_warn!("Plan parse worker panicked: {}", e);
        }
    }
}

/// Prefer the publisher's structural error over the generic abort error.
async fn abort_error(publisher: JoinHandle<Result<bool>>, signal: &AbortSignal) -> Error {
    if publisher.is_finished() {
        if let Ok(Err(e)) = publisher.await {
            return e;
        }
    } else {
        publisher.abort();
    }
    signal.to_error()
}

/// Merge parsed fragments into the graph, one at a time, then close the
/// last level once every parse is in.
///
/// Returns whether any fragment carried nodes.
async fn publish(
    graph: Arc<RwLock<ExecutionGraph>>,
    events: EventSink,
    signal: AbortSignal,
    mut fragments: mpsc::UnboundedReceiver<PlanFragment>,
    mut first_task: Option<oneshot::Sender<Node>>,
) -> Result<bool> {
    let mut produced = false;

    while let Some(fragment) = fragments.recv().await {
        if fragment.graph.nodes.is_empty() {
            continue;
        }
        produced = true;

        let merged = {
            let mut graph = graph.write().await;
            graph
                .merge_partial(&fragment.graph, fragment.last_level)
                .map(|outcome| {
                    (
                        outcome,
                        graph.node_count(),
                        graph.edge_count(),
                        graph.nodes().nth(1).cloned(),
                    )
                })
        };

        let (outcome, nodes, edges, first) = match merged {
            Ok(merged) => merged,
            Err(e) => {
                zlog_error!("Rejected plan fragment: {}", e);
                signal.abort(AbortReason::PlanningFailed(e.to_string()));
                return Err(e);
            }
        };

        if outcome.is_changed() {
            zlog_debug!(
                "graph updated: +{} nodes, +{} edges, +{} hookups ({} nodes, {} edges)",
                outcome.nodes_added,
                outcome.edges_added,
                outcome.hookup_edges,
                nodes,
                edges
            );
            events.emit(RunEvent::GraphUpdated { nodes, edges });
        }

        if let Some(node) = first {
            if let Some(tx) = first_task.take() {
                zlog!("First task ready: {}", node.id);
                let _ = tx.send(node);
            }
        }
    }

    if produced {
        let (hookups, nodes, edges) = {
            let mut graph = graph.write().await;
            (graph.close_levels(), graph.node_count(), graph.edge_count())
        };
        if hookups > 0 {
            zlog_debug!("closed last level: +{} hookups", hookups);
            events.emit(RunEvent::GraphUpdated { nodes, edges });
        }
    }

    Ok(produced)
}
