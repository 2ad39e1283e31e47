//! Per-execution runtime context: event emission, pausing, and resuming
//!
//! A [`RuntimeContext`] is injected into every node invocation. It stamps and
//! publishes events, minting and completing the [`PauseToken`]s that let
//! human-interaction nodes suspend an execution indefinitely and resume when
//! an external caller supplies data.
//!
//! Pause tokens are single-shot completion handles built on
//! `tokio::sync::oneshot`: the context keeps the sending half in its
//! active-token table, the suspended node holds the receiving half inside the
//! token. A token is created at most once and completed at most once;
//! completing it a second time is an error.

use crate::error::{FlowError, Result};
use crate::events::{EventEmitter, EventType, WorkflowEvent};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::oneshot;

/// Identity of the node currently being executed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentNode {
    /// Stable per-invocation node id (`name:positional-path`)
    pub id: String,
    /// Registered node name
    pub name: String,
}

/// Single-shot completion handle for a suspended node
///
/// Returned by [`RuntimeContext::pause`]; consumed by
/// [`RuntimeContext::wait_for_resume`]. The identity fields mirror what the
/// execution manager needs to route an external resume back to this token.
#[derive(Debug)]
pub struct PauseToken {
    /// Token id, unique within the process
    pub id: String,
    /// Workflow definition id
    pub workflow_id: String,
    /// Execution that minted the token
    pub execution_id: String,
    /// Node id the execution is suspended at
    pub node_id: String,
    /// Node name the execution is suspended at
    pub node_name: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
    rx: oneshot::Receiver<Result<Value>>,
}

/// Snapshot of an outstanding pause token, as reported by
/// [`RuntimeContext::active_tokens`]
#[derive(Debug, Clone, Serialize)]
pub struct TokenInfo {
    /// Token id
    #[serde(rename = "tokenId")]
    pub id: String,
    /// Node id the token was minted for
    #[serde(rename = "nodeId")]
    pub node_id: String,
    /// Node name the token was minted for
    #[serde(rename = "nodeName")]
    pub node_name: String,
    /// Creation time
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

struct TokenSlot {
    node_id: String,
    node_name: String,
    created_at: DateTime<Utc>,
    tx: Option<oneshot::Sender<Result<Value>>>,
}

/// Per-execution facade over events and pause/resume
///
/// Owned by exactly one execution; nodes receive it behind an `Arc` through
/// their [`crate::node::ExecutionContext`].
pub struct RuntimeContext {
    workflow_id: String,
    execution_id: String,
    emitter: Arc<EventEmitter>,
    current_node: RwLock<Option<CurrentNode>>,
    tokens: RwLock<HashMap<String, TokenSlot>>,
    token_counter: AtomicU64,
    cancelled: AtomicBool,
}

impl RuntimeContext {
    /// Create a context for one execution
    pub fn new(
        workflow_id: impl Into<String>,
        execution_id: impl Into<String>,
        emitter: Arc<EventEmitter>,
    ) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            execution_id: execution_id.into(),
            emitter,
            current_node: RwLock::new(None),
            tokens: RwLock::new(HashMap::new()),
            token_counter: AtomicU64::new(0),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Workflow definition id
    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    /// Execution id
    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    /// The per-execution event emitter
    pub fn emitter(&self) -> &Arc<EventEmitter> {
        &self.emitter
    }

    /// Stamp and publish an event on this execution's emitter
    pub fn emit(&self, event: EventType, data: Value) {
        self.emitter.emit(WorkflowEvent::new(
            &self.workflow_id,
            &self.execution_id,
            event,
            data,
        ));
    }

    /// The node currently being executed, if any
    pub fn current_node(&self) -> Option<CurrentNode> {
        self.current_node.read().unwrap().clone()
    }

    /// Mark which node is executing
    ///
    /// Set by the interpreter around each invocation; exposed for custom
    /// executors that drive nodes directly.
    pub fn set_current_node(&self, node: Option<CurrentNode>) {
        *self.current_node.write().unwrap() = node;
    }

    /// Mint a pause token for the currently executing node
    ///
    /// Records the token in the active set and emits `workflow:paused`.
    /// Pausing while no node is executing is an error.
    pub fn pause(&self) -> Result<PauseToken> {
        let current = self
            .current_node
            .read()
            .unwrap()
            .clone()
            .ok_or(FlowError::NoCurrentNode)?;

        let seq = self.token_counter.fetch_add(1, Ordering::SeqCst);
        let created_at = Utc::now();
        let id = format!("{}:{}:{}", self.execution_id, current.id, seq);
        let (tx, rx) = oneshot::channel();

        self.tokens.write().unwrap().insert(
            id.clone(),
            TokenSlot {
                node_id: current.id.clone(),
                node_name: current.name.clone(),
                created_at,
                tx: Some(tx),
            },
        );

        self.emit(
            EventType::WorkflowPaused,
            json!({ "nodeId": current.id, "tokenId": id }),
        );

        Ok(PauseToken {
            id,
            workflow_id: self.workflow_id.clone(),
            execution_id: self.execution_id.clone(),
            node_id: current.id,
            node_name: current.name,
            created_at,
            rx,
        })
    }

    /// Block until the token completes
    ///
    /// Validates ownership, emits `workflow:resumed` on successful resume,
    /// and removes the token from the active set regardless of outcome.
    pub async fn wait_for_resume(&self, token: PauseToken) -> Result<Value> {
        if token.execution_id != self.execution_id {
            return Err(FlowError::TokenOwnership {
                token: token.id,
                execution: self.execution_id.clone(),
            });
        }

        let outcome = token.rx.await;
        self.tokens.write().unwrap().remove(&token.id);

        match outcome {
            Ok(Ok(data)) => {
                self.emit(
                    EventType::WorkflowResumed,
                    json!({
                        "nodeId": token.node_id,
                        "tokenId": token.id,
                        "resumeData": data,
                    }),
                );
                Ok(data)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(FlowError::execution(
                "pause token dropped without completion",
            )),
        }
    }

    /// Block until the token completes, or reject it after `timeout`
    ///
    /// On expiry the token is removed from the active set and the caller
    /// receives [`FlowError::Timeout`]; a later resume of the same token
    /// reports it as not found.
    pub async fn wait_for_resume_timeout(
        &self,
        token: PauseToken,
        timeout: Duration,
    ) -> Result<Value> {
        let token_id = token.id.clone();
        let node_id = token.node_id.clone();
        match tokio::time::timeout(timeout, self.wait_for_resume(token)).await {
            Ok(result) => result,
            Err(_) => {
                self.tokens.write().unwrap().remove(&token_id);
                Err(FlowError::timeout(
                    format!("resume wait at node '{}'", node_id),
                    timeout.as_millis() as u64,
                ))
            }
        }
    }

    /// Complete a token with resume data (external entry point)
    ///
    /// Emits `human:input:received` before the waiter wakes, so receipt
    /// always precedes the `workflow:resumed` the waiter emits.
    pub fn resume(&self, token_id: &str, data: Value) -> Result<()> {
        let (tx, node_id, node_name) = {
            let mut tokens = self.tokens.write().unwrap();
            let slot = tokens
                .get_mut(token_id)
                .ok_or_else(|| FlowError::TokenNotFound(token_id.to_string()))?;
            let tx = slot
                .tx
                .take()
                .ok_or_else(|| FlowError::TokenAlreadyResolved(token_id.to_string()))?;
            (tx, slot.node_id.clone(), slot.node_name.clone())
        };

        self.emit(
            EventType::HumanInputReceived,
            json!({
                "nodeId": node_id,
                "nodeName": node_name,
                "tokenId": token_id,
                "input": data,
            }),
        );

        tx.send(Ok(data)).map_err(|_| {
            // The waiter is gone (timed out or dropped); the slot is stale.
            self.tokens.write().unwrap().remove(token_id);
            FlowError::TokenNotFound(token_id.to_string())
        })
    }

    /// Reject a token with a cancellation error (external entry point)
    pub fn cancel(&self, token_id: &str) -> Result<()> {
        self.complete(
            token_id,
            Err(FlowError::Cancelled("pause token cancelled".to_string())),
        )
    }

    fn complete(&self, token_id: &str, outcome: Result<Value>) -> Result<()> {
        let tx = {
            let mut tokens = self.tokens.write().unwrap();
            let slot = tokens
                .get_mut(token_id)
                .ok_or_else(|| FlowError::TokenNotFound(token_id.to_string()))?;
            slot.tx
                .take()
                .ok_or_else(|| FlowError::TokenAlreadyResolved(token_id.to_string()))?
        };
        tx.send(outcome).map_err(|_| {
            // The waiter is gone (timed out or dropped); the slot is stale.
            self.tokens.write().unwrap().remove(token_id);
            FlowError::TokenNotFound(token_id.to_string())
        })
    }

    /// Outstanding (unresolved) tokens
    pub fn active_tokens(&self) -> Vec<TokenInfo> {
        self.tokens
            .read()
            .unwrap()
            .iter()
            .filter(|(_, slot)| slot.tx.is_some())
            .map(|(id, slot)| TokenInfo {
                id: id.clone(),
                node_id: slot.node_id.clone(),
                node_name: slot.node_name.clone(),
                created_at: slot.created_at,
            })
            .collect()
    }

    /// Find the outstanding token for a node, by node id or bare node name
    pub fn token_for_node(&self, node: &str) -> Option<String> {
        self.tokens
            .read()
            .unwrap()
            .iter()
            .find(|(_, slot)| {
                slot.tx.is_some() && (slot.node_id == node || slot.node_name == node)
            })
            .map(|(id, _)| id.clone())
    }

    /// Cancel every outstanding token with an "execution cancelled" error
    pub fn clear_all_tokens(&self) {
        let slots: Vec<_> = self.tokens.write().unwrap().drain().collect();
        for (_, mut slot) in slots {
            if let Some(tx) = slot.tx.take() {
                let _ = tx.send(Err(FlowError::Cancelled(
                    "execution cancelled".to_string(),
                )));
            }
        }
    }

    /// Mark this execution as cancelled
    ///
    /// The interpreter consults this flag between elements; an in-flight node
    /// is never interrupted.
    pub fn set_cancelled(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether this execution has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for RuntimeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeContext")
            .field("workflow_id", &self.workflow_id)
            .field("execution_id", &self.execution_id)
            .field("current_node", &self.current_node())
            .field("active_tokens", &self.active_tokens().len())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
