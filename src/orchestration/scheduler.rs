//! Orchestrator for concurrent, dependency-linked task nodes.
//!
//! The Orchestrator starts every seed node at once and reacts to nodes in the
//! order they finish. Each finished node produces one progress event; a
//! succeeded node with a spawn rule may add new nodes to the run while its
//! siblings are still in flight. When nothing is pending the merged results
//! are handed to the sink and a single terminal event closes the run.

use crate::core::event::{Aggregate, ProgressEvent};
use crate::core::task::{TaskId, TaskNode, TaskState};
use crate::error::{Error, Result};
use crate::orchestration::backend::GenerationBackend;
use crate::sink::{NoopSink, ResultSink};
use crate::{rlog, rlog_error, rlog_warn};
use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Per-run settings supplied by the caller.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Echoed in the terminal event and stored on the aggregate.
    pub correlation_id: Option<String>,
    /// Cancelling drops every in-flight node and skips the sink.
    pub cancel: CancellationToken,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Coordinates one or more runs against a shared backend.
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use tokio::sync::mpsc;
/// use ripple::core::TaskNode;
/// use ripple::orchestration::{GenerationRequest, Orchestrator, RunOptions};
///
/// let orchestrator = Orchestrator::new(backend);
/// let (event_tx, mut event_rx) = mpsc::channel(32);
/// let seeds = vec![TaskNode::new("summary", GenerationRequest::new(prompt))];
///
/// let (aggregate, _) = tokio::join!(
///     orchestrator.run(seeds, RunOptions::new(), event_tx),
///     async { while let Some(event) = event_rx.recv().await { println!("{event:?}") } },
/// );
/// ```
pub struct Orchestrator {
    backend: Arc<dyn GenerationBackend>,
    sink: Arc<dyn ResultSink>,
}

impl Orchestrator {
    pub fn new(backend: Arc<dyn GenerationBackend>) -> Self {
        Self {
            backend,
            sink: Arc::new(NoopSink),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ResultSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn backend(&self) -> &Arc<dyn GenerationBackend> {
        &self.backend
    }

    /// Run `seeds` and every node they spawn to completion.
    ///
    /// Events go to `event_tx` in completion order, followed by exactly one
    /// terminal event. A result stored under a suffixed key (`q#2`) is
    /// reported under that key. Task failures are reported as events and
    /// never abort the run. When the token fires while the terminal event
    /// waits for channel space, the event is dropped and the aggregate is
    /// still returned, since the sink has already accepted it.
    ///
    /// # Errors
    ///
    /// - [`Error::Cancelled`] when the token fires or the receiver is
    ///   dropped. In-flight nodes are dropped and the sink is not called.
    /// - [`Error::Sink`] when the sink rejects the aggregate, after a fatal
    ///   error event carrying the aggregate has been sent.
    pub async fn run(
        &self,
        seeds: Vec<TaskNode>,
        options: RunOptions,
        event_tx: mpsc::Sender<ProgressEvent>,
    ) -> Result<Aggregate> {
        let backend = self.backend.as_ref();
        let cancel = &options.cancel;
        let mut pending: HashMap<TaskId, String> = HashMap::new();
        let mut running = FuturesUnordered::new();
        let mut outbox: VecDeque<ProgressEvent> = VecDeque::new();
        let mut aggregate = Aggregate::new(options.correlation_id.clone());

        rlog!(
            "Run {} starting with {} seed tasks",
            options.correlation_id.as_deref().unwrap_or("-"),
            seeds.len()
        );
        for node in seeds {
            pending.insert(node.id, node.name.clone());
            running.push(node.execute(backend));
        }

        // Finished nodes queue their events in the outbox; a full channel
        // holds back delivery but never polling or cancellation.
        while !pending.is_empty() || !outbox.is_empty() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(Self::abandon("cancellation requested", &pending));
                }
                _ = event_tx.closed() => {
                    return Err(Self::abandon("event receiver dropped", &pending));
                }
                permit = event_tx.reserve(), if !outbox.is_empty() => match permit {
                    Ok(permit) => {
                        if let Some(event) = outbox.pop_front() {
                            permit.send(event);
                        }
                    }
                    Err(_) => return Err(Self::abandon("event receiver dropped", &pending)),
                },
                Some(mut node) = running.next(), if !running.is_empty() => {
                    pending.remove(&node.id);
                    outbox.push_back(Self::record(&mut node, &mut aggregate));
                    for child in node.spawn() {
                        rlog!("[{}] spawned '{}'", node.name, child.name);
                        pending.insert(child.id, child.name.clone());
                        running.push(child.execute(backend));
                    }
                }
            }
        }

        if let Err(err) = self.sink.persist(&aggregate).await {
            rlog_error!("Result sink failed: {}", err);
            let fatal = ProgressEvent::fatal(format!("result sink failed: {}", err), &aggregate);
            Self::deliver(&event_tx, cancel, fatal).await;
            return Err(Error::Sink(err.to_string()));
        }

        rlog!(
            "Run complete: {} results, {} degraded, {} failed",
            aggregate.len(),
            aggregate.degraded.len(),
            aggregate.failed.len()
        );
        if !Self::deliver(&event_tx, cancel, ProgressEvent::complete(&aggregate)).await {
            rlog_warn!("Terminal event not delivered, results were already persisted");
        }
        Ok(aggregate)
    }

    /// Send a terminal event unless the token fires or the receiver goes first.
    async fn deliver(
        event_tx: &mpsc::Sender<ProgressEvent>,
        cancel: &CancellationToken,
        event: ProgressEvent,
    ) -> bool {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            sent = event_tx.send(event) => sent.is_ok(),
        }
    }

    /// Merge a finished node into the aggregate and build its event.
    fn record(node: &mut TaskNode, aggregate: &mut Aggregate) -> ProgressEvent {
        match &node.state {
            TaskState::Succeeded => {
                let data = node.result.clone().unwrap_or(Value::Null);
                let key = aggregate.insert(&node.name, data.clone(), node.degraded);
                ProgressEvent::partial(&key, data, node.degraded)
            }
            TaskState::Failed { error } => {
                aggregate.record_failure(&node.name);
                ProgressEvent::task_error(&node.name, error.clone())
            }
            TaskState::Pending | TaskState::Running => {
                let message = format!("task ended in state {}", node.state);
                rlog_warn!("[{}] {}", node.name, message);
                aggregate.record_failure(&node.name);
                ProgressEvent::task_error(&node.name, message)
            }
        }
    }

    fn abandon(reason: &str, pending: &HashMap<TaskId, String>) -> Error {
        let mut names: Vec<&str> = pending.values().map(String::as_str).collect();
        names.sort_unstable();
        rlog_warn!("Run cancelled ({}), dropping: {}", reason, names.join(", "));
        Error::Cancelled
    }
}
