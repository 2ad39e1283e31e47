//! Execution manager: lifecycle of many concurrent workflow executions
//!
//! The [`ExecutionManager`] is the process-wide entry point: it starts
//! executions (spawning the interpreter on its own tokio task), routes
//! external resumes to the matching pause token, cancels, reports status
//! snapshots, and cleans up terminal executions. Executions proceed in
//! parallel and independently; within one execution the interpreter is
//! strictly sequential.
//!
//! # The subscribe window
//!
//! `start_execution` returns the execution id before the first node runs, and
//! the spawned task waits [`ExecutorConfig::subscribe_grace`] before emitting
//! `workflow:started`. That window gives callers time to attach to the
//! per-execution emitter (via [`ExecutionManager::get_runtime`]) without
//! missing early `node:*` events. Observers attaching after the window may
//! miss events; that is the documented trade-off of the knob.
//!
//! # Status lifecycle
//!
//! ```text
//! pending ──> running ──┬──> completed
//!               ^       ├──> failed
//!               │       └──> cancelled
//!             paused (while any pause token is outstanding)
//! ```
//!
//! Terminal statuses are sticky. `paused` is derived: a running execution
//! with at least one outstanding pause token reports `paused`.

use crate::definition::WorkflowDefinition;
use crate::error::{FlowError, Result};
use crate::events::{EventEmitter, EventType};
use crate::interpreter::FlowInterpreter;
use crate::registry::NodeRegistry;
use crate::runtime::RuntimeContext;
use crate::state::{deep_merge, StateStore};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Execution lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    /// Accepted, inside the subscribe window
    Pending,
    /// The interpreter is advancing
    Running,
    /// Suspended on at least one pause token
    Paused,
    /// Finished successfully
    Completed,
    /// Finished with an error
    Failed,
    /// Cancelled by an external caller
    Cancelled,
}

impl ExecutionStatus {
    /// Whether this status is terminal (sticky)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Snapshot of one execution, as returned by status queries
///
/// `state` is a deep copy; mutating it cannot touch the live execution.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionRecord {
    /// Process-unique execution id
    #[serde(rename = "executionId")]
    pub execution_id: String,

    /// Workflow definition id
    #[serde(rename = "workflowId")]
    pub workflow_id: String,

    /// Current lifecycle status
    pub status: ExecutionStatus,

    /// When the execution was accepted
    #[serde(rename = "startTime")]
    pub start_time: DateTime<Utc>,

    /// When the execution reached a terminal status
    #[serde(rename = "endTime", skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,

    /// Node id currently executing, if any
    #[serde(rename = "currentNodeId", skip_serializing_if = "Option::is_none")]
    pub current_node_id: Option<String>,

    /// Node name currently executing, if any
    #[serde(rename = "currentNodeName", skip_serializing_if = "Option::is_none")]
    pub current_node_name: Option<String>,

    /// Outstanding pause token ids
    #[serde(rename = "pauseTokenIds")]
    pub pause_token_ids: Vec<String>,

    /// Deep copy of the latest state document
    pub state: Value,

    /// Last error, for failed executions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone)]
struct RecordCore {
    workflow_id: String,
    status: ExecutionStatus,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    error: Option<String>,
}

struct ExecutionHandle {
    core: Arc<RwLock<RecordCore>>,
    runtime: Arc<RuntimeContext>,
    store: Arc<StateStore>,
    emitter: Arc<EventEmitter>,
}

/// Construction-time configuration for the manager
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Delay between acknowledging a start and running the first node
    pub subscribe_grace: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            subscribe_grace: Duration::from_millis(100),
        }
    }
}

impl ExecutorConfig {
    /// Override the subscribe window
    pub fn with_subscribe_grace(mut self, grace: Duration) -> Self {
        self.subscribe_grace = grace;
        self
    }
}

/// Process-wide registry of executions
pub struct ExecutionManager {
    registry: Arc<NodeRegistry>,
    executions: DashMap<String, ExecutionHandle>,
    config: ExecutorConfig,
}

impl ExecutionManager {
    /// Create a manager over the given node registry with default config
    pub fn new(registry: Arc<NodeRegistry>) -> Self {
        Self::with_config(registry, ExecutorConfig::default())
    }

    /// Create a manager with explicit configuration
    pub fn with_config(registry: Arc<NodeRegistry>, config: ExecutorConfig) -> Self {
        Self {
            registry,
            executions: DashMap::new(),
            config,
        }
    }

    /// Start an execution of the given workflow
    ///
    /// Returns the execution id immediately; the interpreter runs on its own
    /// task after the subscribe window. `initial_input` is deep-merged over
    /// the definition's `initial_state`.
    pub fn start_execution(
        &self,
        workflow: &WorkflowDefinition,
        initial_input: Option<Value>,
    ) -> Result<String> {
        workflow.validate()?;

        let execution_id = format!("exec-{}", Uuid::new_v4());
        let mut seed = workflow.initial_state.clone();
        if let Some(input) = initial_input {
            deep_merge(&mut seed, input);
        }

        let store = Arc::new(StateStore::with_initial(seed));
        let emitter = Arc::new(EventEmitter::new());
        let runtime = Arc::new(RuntimeContext::new(
            &workflow.id,
            &execution_id,
            emitter.clone(),
        ));

        // Bridge store mutations onto the event stream.
        let hook_runtime = runtime.clone();
        store
            .set_after_update(Box::new(move |path, new_value| {
                hook_runtime.emit(
                    EventType::StateUpdated,
                    json!({ "path": path, "newValue": new_value }),
                );
            }))
            .expect("fresh store has no hook");

        let core = Arc::new(RwLock::new(RecordCore {
            workflow_id: workflow.id.clone(),
            status: ExecutionStatus::Pending,
            start_time: Utc::now(),
            end_time: None,
            error: None,
        }));

        self.executions.insert(
            execution_id.clone(),
            ExecutionHandle {
                core: core.clone(),
                runtime: runtime.clone(),
                store: store.clone(),
                emitter,
            },
        );

        info!(workflow = %workflow.id, execution = %execution_id, "starting execution");

        let interpreter = FlowInterpreter::new(self.registry.clone());
        let nodes = workflow.nodes.clone();
        let grace = self.config.subscribe_grace;
        let task_id = execution_id.clone();

        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            {
                let mut core = core.write().unwrap();
                if runtime.is_cancelled() || core.status.is_terminal() {
                    if core.end_time.is_none() {
                        core.end_time = Some(Utc::now());
                    }
                    return;
                }
                core.status = ExecutionStatus::Running;
            }
            runtime.emit(
                EventType::WorkflowStarted,
                json!({ "initialState": store.snapshot() }),
            );

            let result = interpreter.run(&nodes, store.clone(), runtime.clone()).await;
            match result {
                _ if runtime.is_cancelled() => {
                    debug!(execution = %task_id, "execution cancelled");
                    finalize(&core, ExecutionStatus::Cancelled, None);
                }
                Ok(()) => {
                    info!(execution = %task_id, "execution completed");
                    finalize(&core, ExecutionStatus::Completed, None);
                    runtime.emit(
                        EventType::WorkflowCompleted,
                        json!({ "finalState": store.snapshot() }),
                    );
                }
                Err(e) if e.is_cancellation() => {
                    debug!(execution = %task_id, "execution cancelled");
                    finalize(&core, ExecutionStatus::Cancelled, None);
                }
                Err(e) => {
                    warn!(execution = %task_id, error = %e, "execution failed");
                    finalize(&core, ExecutionStatus::Failed, Some(e.to_string()));
                    runtime.clear_all_tokens();
                    runtime.emit(
                        EventType::WorkflowFailed,
                        json!({ "error": e.to_string(), "state": store.snapshot() }),
                    );
                }
            }
        });

        Ok(execution_id)
    }

    /// Complete the pause token a resumable execution is waiting on
    ///
    /// `node` may be the stable node id or the bare node name. Fails with
    /// [`FlowError::ExecutionNotFound`] for unknown executions and
    /// [`FlowError::NotPaused`] when no matching token is outstanding.
    pub fn resume_execution(&self, execution_id: &str, node: &str, data: Value) -> Result<()> {
        let handle = self
            .executions
            .get(execution_id)
            .ok_or_else(|| FlowError::ExecutionNotFound(execution_id.to_string()))?;

        if handle.core.read().unwrap().status.is_terminal() {
            return Err(FlowError::NotPaused(execution_id.to_string()));
        }

        let token_id = handle
            .runtime
            .token_for_node(node)
            .ok_or_else(|| FlowError::NotPaused(execution_id.to_string()))?;

        debug!(execution = %execution_id, node = %node, token = %token_id, "resuming execution");
        handle.runtime.resume(&token_id, data)
    }

    /// Cancel an execution
    ///
    /// Idempotent: cancelling a terminal execution is a no-op. Outstanding
    /// pause tokens are rejected with an "execution cancelled" error; an
    /// in-flight node runs to completion and its edge data is discarded.
    pub fn cancel_execution(&self, execution_id: &str) -> Result<()> {
        let handle = self
            .executions
            .get(execution_id)
            .ok_or_else(|| FlowError::ExecutionNotFound(execution_id.to_string()))?;

        {
            let mut core = handle.core.write().unwrap();
            if core.status.is_terminal() {
                return Ok(());
            }
            core.status = ExecutionStatus::Cancelled;
            core.end_time = Some(Utc::now());
        }

        info!(execution = %execution_id, "cancelling execution");
        handle.runtime.set_cancelled();
        handle.runtime.clear_all_tokens();
        Ok(())
    }

    /// Snapshot one execution's record
    ///
    /// Idempotent and side-effect-free; the returned state is a deep copy.
    pub fn get_execution_status(&self, execution_id: &str) -> Result<ExecutionRecord> {
        let handle = self
            .executions
            .get(execution_id)
            .ok_or_else(|| FlowError::ExecutionNotFound(execution_id.to_string()))?;
        Ok(snapshot_record(execution_id, &handle))
    }

    /// Snapshot every known execution
    pub fn get_all_executions(&self) -> Vec<ExecutionRecord> {
        self.executions
            .iter()
            .map(|entry| snapshot_record(entry.key(), entry.value()))
            .collect()
    }

    /// The per-execution event emitter, for observers
    pub fn get_runtime(&self, execution_id: &str) -> Result<Arc<EventEmitter>> {
        let handle = self
            .executions
            .get(execution_id)
            .ok_or_else(|| FlowError::ExecutionNotFound(execution_id.to_string()))?;
        Ok(handle.emitter.clone())
    }

    /// Remove terminal executions older than `age`
    ///
    /// Returns how many were removed. Non-terminal executions are always
    /// retained.
    pub fn cleanup_completed(&self, age: Duration) -> usize {
        let cutoff = Utc::now() - chrono::Duration::from_std(age).unwrap_or(chrono::Duration::zero());
        let before = self.executions.len();
        self.executions.retain(|_, handle| {
            let core = handle.core.read().unwrap();
            !(core.status.is_terminal()
                && core.end_time.map(|end| end < cutoff).unwrap_or(false))
        });
        let removed = before - self.executions.len();
        if removed > 0 {
            debug!(removed, "cleaned up terminal executions");
        }
        removed
    }

    /// Number of known executions
    pub fn len(&self) -> usize {
        self.executions.len()
    }

    /// Whether any executions are known
    pub fn is_empty(&self) -> bool {
        self.executions.is_empty()
    }
}

fn finalize(core: &Arc<RwLock<RecordCore>>, status: ExecutionStatus, error: Option<String>) {
    let mut core = core.write().unwrap();
    if !core.status.is_terminal() {
        core.status = status;
    }
    if core.end_time.is_none() {
        core.end_time = Some(Utc::now());
    }
    if error.is_some() {
        core.error = error;
    }
}

fn snapshot_record(execution_id: &str, handle: &ExecutionHandle) -> ExecutionRecord {
    let core = handle.core.read().unwrap().clone();
    let tokens = handle.runtime.active_tokens();
    let status = if core.status == ExecutionStatus::Running && !tokens.is_empty() {
        ExecutionStatus::Paused
    } else {
        core.status
    };
    let current = handle.runtime.current_node();

    ExecutionRecord {
        execution_id: execution_id.to_string(),
        workflow_id: core.workflow_id,
        status,
        start_time: core.start_time,
        end_time: core.end_time,
        current_node_id: current.as_ref().map(|c| c.id.clone()),
        current_node_name: current.map(|c| c.name),
        pause_token_ids: tokens.into_iter().map(|t| t.id).collect(),
        state: handle.store.snapshot(),
        error: core.error,
    }
}

impl std::fmt::Debug for ExecutionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionManager")
            .field("executions", &self.executions.len())
            .field("config", &self.config)
            .finish()
    }
}
