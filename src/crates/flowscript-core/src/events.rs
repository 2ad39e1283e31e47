//! Typed workflow lifecycle events and per-execution pub/sub
//!
//! Each execution owns one [`EventEmitter`]. Components emit [`WorkflowEvent`]s
//! synchronously as they produce the corresponding state change, so per
//! execution the delivery order always matches the emission order. Observers
//! subscribe by event name or through the wildcard channel that receives
//! everything.
//!
//! # Event catalog
//!
//! | Event | Payload |
//! |-------|---------|
//! | `workflow:started` | initial state snapshot |
//! | `node:executing` | `{nodeId, nodeName}` |
//! | `node:completed` | `{nodeId, nodeName, edge, edgeData}` |
//! | `node:failed` | `{nodeId, nodeName, error}` |
//! | `workflow:paused` | `{nodeId, tokenId}` |
//! | `workflow:resumed` | `{nodeId, tokenId, resumeData}` |
//! | `workflow:completed` | `{finalState}` |
//! | `workflow:failed` | `{error, state}` |
//! | `state:updated` | `{path, newValue}` |
//! | `human:input:required` | form request (schema, hints, timeout, defaults, context) |
//! | `human:input:received` | `{nodeId, nodeName, tokenId, input}` |
//!
//! Subscriptions are channel-based: dropping the receiver unsubscribes, and
//! closed receivers are pruned on the next emit. Events from different
//! executions carry no cross-ordering guarantee.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Name of a workflow lifecycle event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    /// Execution left the subscribe window and is about to run its first node
    #[serde(rename = "workflow:started")]
    WorkflowStarted,

    /// A node is about to execute
    #[serde(rename = "node:executing")]
    NodeExecuting,

    /// A node finished and its edge was selected
    #[serde(rename = "node:completed")]
    NodeCompleted,

    /// A node raised an error
    #[serde(rename = "node:failed")]
    NodeFailed,

    /// A pause token was minted and the execution is waiting
    #[serde(rename = "workflow:paused")]
    WorkflowPaused,

    /// A pause token completed and the execution is continuing
    #[serde(rename = "workflow:resumed")]
    WorkflowResumed,

    /// The execution finished successfully
    #[serde(rename = "workflow:completed")]
    WorkflowCompleted,

    /// The execution finished with an error
    #[serde(rename = "workflow:failed")]
    WorkflowFailed,

    /// The state store was mutated
    #[serde(rename = "state:updated")]
    StateUpdated,

    /// A human node is requesting input
    #[serde(rename = "human:input:required")]
    HumanInputRequired,

    /// A human node received its input
    #[serde(rename = "human:input:received")]
    HumanInputReceived,
}

impl EventType {
    /// The wire name of the event (`workflow:started`, `node:completed`, ...)
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WorkflowStarted => "workflow:started",
            Self::NodeExecuting => "node:executing",
            Self::NodeCompleted => "node:completed",
            Self::NodeFailed => "node:failed",
            Self::WorkflowPaused => "workflow:paused",
            Self::WorkflowResumed => "workflow:resumed",
            Self::WorkflowCompleted => "workflow:completed",
            Self::WorkflowFailed => "workflow:failed",
            Self::StateUpdated => "state:updated",
            Self::HumanInputRequired => "human:input:required",
            Self::HumanInputReceived => "human:input:received",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A workflow lifecycle event
///
/// Every event is stamped with the workflow id, the execution id, and an
/// emission timestamp; the shape of `data` depends on [`EventType`] (see the
/// module-level catalog).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowEvent {
    /// Workflow definition id
    #[serde(rename = "workflowId")]
    pub workflow_id: String,

    /// Execution id
    #[serde(rename = "executionId")]
    pub execution_id: String,

    /// Event name
    pub event: EventType,

    /// Emission time
    pub timestamp: DateTime<Utc>,

    /// Event payload
    pub data: Value,
}

impl WorkflowEvent {
    /// Create an event stamped with the current time
    pub fn new(
        workflow_id: impl Into<String>,
        execution_id: impl Into<String>,
        event: EventType,
        data: Value,
    ) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            execution_id: execution_id.into(),
            event,
            timestamp: Utc::now(),
            data,
        }
    }
}

/// Per-execution event emitter with per-name and wildcard subscriptions
///
/// Emission is synchronous and never blocks: subscribers sit behind unbounded
/// channels, and senders whose receivers have been dropped are pruned during
/// emit.
pub struct EventEmitter {
    named: RwLock<HashMap<EventType, Vec<mpsc::UnboundedSender<WorkflowEvent>>>>,
    wildcard: RwLock<Vec<mpsc::UnboundedSender<WorkflowEvent>>>,
}

impl EventEmitter {
    /// Create an emitter with no subscribers
    pub fn new() -> Self {
        Self {
            named: RwLock::new(HashMap::new()),
            wildcard: RwLock::new(Vec::new()),
        }
    }

    /// Subscribe to a single event name
    ///
    /// Dropping the returned receiver unsubscribes.
    pub fn subscribe(&self, event: EventType) -> mpsc::UnboundedReceiver<WorkflowEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.named.write().unwrap().entry(event).or_default().push(tx);
        rx
    }

    /// Subscribe to every event emitted on this execution
    pub fn subscribe_all(&self) -> mpsc::UnboundedReceiver<WorkflowEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.wildcard.write().unwrap().push(tx);
        rx
    }

    /// Subscribe to every event as a [`futures::Stream`]
    pub fn event_stream(&self) -> UnboundedReceiverStream<WorkflowEvent> {
        UnboundedReceiverStream::new(self.subscribe_all())
    }

    /// Publish an event to name-matched and wildcard subscribers, in order
    pub fn emit(&self, event: WorkflowEvent) {
        {
            let mut named = self.named.write().unwrap();
            if let Some(senders) = named.get_mut(&event.event) {
                senders.retain(|tx| tx.send(event.clone()).is_ok());
            }
        }
        let mut wildcard = self.wildcard.write().unwrap();
        wildcard.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Number of live subscriptions (named + wildcard)
    pub fn subscriber_count(&self) -> usize {
        let named: usize = self.named.read().unwrap().values().map(Vec::len).sum();
        named + self.wildcard.read().unwrap().len()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
