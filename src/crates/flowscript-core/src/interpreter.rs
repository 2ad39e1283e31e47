//! The flow interpreter: recursive walker over the workflow tree
//!
//! The interpreter executes a flow-element sequence against one execution's
//! state store and runtime context. It dispatches nodes in tree order, routes
//! on the edge each node returns, honors branch and loop constructs, and
//! converts node failures into execution failure.
//!
//! # Walk structure
//!
//! ```text
//! run(elements)
//!   └── run_sequence(elements, path, previous)
//!         ├── leaf          → invoke_node → previous = edge data
//!         ├── branch tuple  → invoke condition
//!         │                   ├── edge in map   → run_sequence(sub)
//!         │                   ├── edge → null   → no-op
//!         │                   └── edge unmapped → non-fatal skip
//!         └── loop tuple    → invoke controller (per-construct LoopScope)
//!                             ├── next_iteration → run_sequence(body), repeat
//!                             └── anything else  → leave the loop
//! ```
//!
//! # Node invocation protocol
//!
//! For each leaf node, in order:
//!
//! 1. emit `node:executing`;
//! 2. compose the [`ExecutionContext`] - state, template-interpolated config,
//!    runtime, previous edge data - with `runtime.current_node` set to the
//!    stable per-invocation node id (`name:positional-path`);
//! 3. call `execute`; a returned error aborts the execution as `failed`;
//! 4. select the effective edge: first in insertion order, or for branches
//!    the first whose name appears in the branch map;
//! 5. evaluate the selected edge's thunk exactly once (thunk errors become an
//!    `error` field of the payload) and carry the data forward;
//! 6. emit `node:completed` with `{edge, edgeData}`.
//!
//! # Failure semantics
//!
//! A thrown node error fails the execution; an edge-thunk error does not.
//! Unknown node names fail immediately. Nesting past [`MAX_DEPTH`] fails
//! rather than overflowing the stack. A cancelled execution stops before the
//! next node; the in-flight node is never interrupted.

use crate::definition::FlowElement;
use crate::error::{FlowError, Result};
use crate::events::EventType;
use crate::node::{ExecutionContext, LoopScope, EXIT_LOOP, NEXT_ITERATION};
use crate::registry::NodeRegistry;
use crate::runtime::{CurrentNode, RuntimeContext};
use crate::state::StateStore;
use crate::template::interpolate_config;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

/// Maximum flow-element nesting before the walk aborts
pub const MAX_DEPTH: usize = 64;

/// Recursive walker over flow-element sequences
///
/// Stateless across executions: the per-execution state store and runtime
/// context are passed into [`FlowInterpreter::run`].
pub struct FlowInterpreter {
    registry: Arc<NodeRegistry>,
    max_depth: usize,
}

struct Env {
    state: Arc<StateStore>,
    runtime: Arc<RuntimeContext>,
}

impl FlowInterpreter {
    /// Create an interpreter over the given registry
    pub fn new(registry: Arc<NodeRegistry>) -> Self {
        Self {
            registry,
            max_depth: MAX_DEPTH,
        }
    }

    /// Walk a flow-element sequence to completion
    ///
    /// Returns `Ok(())` when the final element finishes, or the first error
    /// that aborted the walk.
    pub async fn run(
        &self,
        elements: &[FlowElement],
        state: Arc<StateStore>,
        runtime: Arc<RuntimeContext>,
    ) -> Result<()> {
        let env = Env { state, runtime };
        self.run_sequence(elements, &env, String::new(), 0, None)
            .await
            .map(|_| ())
    }

    fn run_sequence<'a>(
        &'a self,
        elements: &'a [FlowElement],
        env: &'a Env,
        path: String,
        depth: usize,
        previous: Option<Value>,
    ) -> BoxFuture<'a, Result<Option<Value>>> {
        async move {
            if depth > self.max_depth {
                return Err(FlowError::DepthExceeded(self.max_depth));
            }

            let mut previous = previous;
            for (index, element) in elements.iter().enumerate() {
                let element_path = if path.is_empty() {
                    index.to_string()
                } else {
                    format!("{}.{}", path, index)
                };

                match element {
                    FlowElement::NodeRef(_) | FlowElement::Configured { .. } => {
                        let (name, config) = leaf_parts(element);
                        let (_, data) = self
                            .invoke_node(
                                name,
                                config,
                                &element_path,
                                None,
                                previous.take(),
                                None,
                                env,
                            )
                            .await?;
                        previous = Some(data);
                    }

                    FlowElement::Branch {
                        condition,
                        branches,
                    } => {
                        let (name, config) = leaf_parts(condition);
                        let branch_names: Vec<String> = branches.keys().cloned().collect();
                        let (edge, data) = self
                            .invoke_node(
                                name,
                                config,
                                &element_path,
                                Some(&branch_names),
                                previous.take(),
                                None,
                                env,
                            )
                            .await?;

                        match branches.get(&edge) {
                            Some(Some(sequence)) => {
                                let result = self
                                    .run_sequence(
                                        sequence,
                                        env,
                                        format!("{}.{}", element_path, edge),
                                        depth + 1,
                                        Some(data.clone()),
                                    )
                                    .await?;
                                previous = Some(result.unwrap_or(data));
                            }
                            Some(None) => {
                                previous = Some(data);
                            }
                            None => {
                                // Non-fatal: the condition's edge has no
                                // mapped sub-sequence.
                                debug!(node = name, edge = %edge, "branch edge not mapped, skipping");
                                previous = Some(data);
                            }
                        }
                    }

                    FlowElement::Loop { controller, body } => {
                        let (name, config) = leaf_parts(controller);
                        let scope = LoopScope::new();
                        loop {
                            let (edge, data) = self
                                .invoke_node(
                                    name,
                                    config,
                                    &element_path,
                                    None,
                                    previous.take(),
                                    Some(scope.clone()),
                                    env,
                                )
                                .await?;

                            if edge == NEXT_ITERATION {
                                let result = self
                                    .run_sequence(
                                        body,
                                        env,
                                        format!("{}.body", element_path),
                                        depth + 1,
                                        Some(data.clone()),
                                    )
                                    .await?;
                                previous = Some(result.unwrap_or(data));
                            } else {
                                if edge != EXIT_LOOP {
                                    warn!(
                                        node = name,
                                        edge = %edge,
                                        "loop controller returned a non-loop edge, treating as exit_loop"
                                    );
                                }
                                previous = Some(data);
                                break;
                            }
                        }
                    }
                }
            }
            Ok(previous)
        }
        .boxed()
    }

    #[allow(clippy::too_many_arguments)]
    async fn invoke_node(
        &self,
        name: &str,
        config: &Value,
        node_path: &str,
        branch_names: Option<&[String]>,
        previous: Option<Value>,
        loop_scope: Option<LoopScope>,
        env: &Env,
    ) -> Result<(String, Value)> {
        if env.runtime.is_cancelled() {
            return Err(FlowError::Cancelled("execution cancelled".to_string()));
        }

        let node_id = format!("{}:{}", name, node_path);
        env.runtime.set_current_node(Some(CurrentNode {
            id: node_id.clone(),
            name: name.to_string(),
        }));
        env.runtime.emit(
            EventType::NodeExecuting,
            json!({ "nodeId": node_id, "nodeName": name }),
        );
        debug!(node = name, id = %node_id, "executing node");

        let node = match self.registry.create(name) {
            Ok(node) => node,
            Err(e) => {
                self.fail_node(env, &node_id, name, &e);
                return Err(e);
            }
        };

        let config = interpolate_config(config, &env.state.snapshot());
        let ctx = ExecutionContext {
            state: env.state.clone(),
            config,
            runtime: env.runtime.clone(),
            previous_data: previous,
            loop_scope,
        };

        let edges = match node.execute(&ctx).await {
            Ok(edges) => edges,
            Err(e) if e.is_cancellation() => {
                env.runtime.set_current_node(None);
                return Err(e);
            }
            Err(e) => {
                self.fail_node(env, &node_id, name, &e);
                return Err(FlowError::node_execution(name, e.to_string()));
            }
        };

        let (edge, data) = match edges.resolve(branch_names) {
            Ok(selected) => selected,
            Err(e) => {
                self.fail_node(env, &node_id, name, &e);
                return Err(FlowError::node_execution(name, e.to_string()));
            }
        };

        env.runtime.emit(
            EventType::NodeCompleted,
            json!({
                "nodeId": node_id,
                "nodeName": name,
                "edge": edge,
                "edgeData": data,
            }),
        );
        env.runtime.set_current_node(None);
        Ok((edge, data))
    }

    fn fail_node(&self, env: &Env, node_id: &str, name: &str, error: &FlowError) {
        warn!(node = name, error = %error, "node failed");
        env.runtime.emit(
            EventType::NodeFailed,
            json!({
                "nodeId": node_id,
                "nodeName": name,
                "error": error.to_string(),
            }),
        );
        env.runtime.set_current_node(None);
    }
}

fn empty_config() -> &'static Value {
    static EMPTY: std::sync::OnceLock<Value> = std::sync::OnceLock::new();
    EMPTY.get_or_init(|| Value::Object(Map::new()))
}

fn leaf_parts(element: &FlowElement) -> (&str, &Value) {
    match element {
        FlowElement::NodeRef(name) => (name.as_str(), empty_config()),
        FlowElement::Configured { name, config } => (name.as_str(), config),
        _ => unreachable!("leaf_parts called on a non-leaf element"),
    }
}

impl std::fmt::Debug for FlowInterpreter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowInterpreter")
            .field("max_depth", &self.max_depth)
            .finish()
    }
}
