//! The node contract: metadata, edge maps, and the execution context
//!
//! A node is a pluggable unit of work. It exposes [`NodeMetadata`] describing
//! itself and an async `execute` that receives an [`ExecutionContext`] and
//! returns an [`EdgeMap`] - a non-empty, insertion-ordered mapping from edge
//! name to a lazily-evaluated payload. The interpreter routes on the returned
//! edge name; the payload thunk runs at most once, on demand.
//!
//! # Implementing a node
//!
//! ```rust,ignore
//! use async_trait::async_trait;
//! use flowscript_core::node::{EdgeMap, ExecutionContext, Node, NodeMetadata, NodeType};
//! use flowscript_core::error::Result;
//! use serde_json::json;
//!
//! struct Greet;
//!
//! #[async_trait]
//! impl Node for Greet {
//!     fn metadata(&self) -> NodeMetadata {
//!         NodeMetadata::new("greet", "Writes a greeting into state", NodeType::Action)
//!     }
//!
//!     async fn execute(&self, ctx: &ExecutionContext) -> Result<EdgeMap> {
//!         let name = ctx.config["name"].as_str().unwrap_or("world").to_string();
//!         ctx.state.set("greeting", json!(format!("hello {name}")));
//!         Ok(EdgeMap::single("next", json!({ "greeted": name })))
//!     }
//! }
//! ```
//!
//! A node must not call back into its own execution's interpreter; it
//! communicates only through the returned edge map, state mutations, and
//! runtime emissions.

use crate::error::{FlowError, Result};
use crate::runtime::RuntimeContext;
use crate::state::StateStore;
use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Distinguished edge returned by loop controllers to run the body once more
pub const NEXT_ITERATION: &str = "next_iteration";

/// Distinguished edge returned by loop controllers to leave the loop
pub const EXIT_LOOP: &str = "exit_loop";

/// Node category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    /// Wraps an external effect (mail, HTTP, ...)
    Action,
    /// Drives flow decisions (conditions, loops, state edits)
    Control,
    /// Suspends for human input via pause tokens
    Human,
}

/// Hints for human-interaction nodes
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HumanInteraction {
    /// Default wait timeout in milliseconds, if any
    #[serde(rename = "defaultTimeoutMs", skip_serializing_if = "Option::is_none")]
    pub default_timeout_ms: Option<u64>,

    /// Skeleton of the form schema presented to the user
    #[serde(rename = "formSchema", skip_serializing_if = "Option::is_none")]
    pub form_schema: Option<Value>,
}

/// Descriptive metadata every node exposes
///
/// Control-plane fields (`ai_hints`, `expected_edges`, `human_interaction`)
/// are advisory: they feed discovery and validation tooling and never change
/// execution semantics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeMetadata {
    /// Registered node name
    pub name: String,

    /// Human-readable description
    pub description: String,

    /// Node category
    #[serde(rename = "type")]
    pub node_type: NodeType,

    /// Freeform hints consumed by discovery tools
    #[serde(rename = "aiHints", default, skip_serializing_if = "Value::is_null")]
    pub ai_hints: Value,

    /// Edge names this node is expected to return
    #[serde(rename = "expectedEdges", default, skip_serializing_if = "Vec::is_empty")]
    pub expected_edges: Vec<String>,

    /// Human-interaction hints, for `type = human` nodes
    #[serde(rename = "humanInteraction", skip_serializing_if = "Option::is_none")]
    pub human_interaction: Option<HumanInteraction>,
}

impl NodeMetadata {
    /// Create metadata with the required fields
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        node_type: NodeType,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            node_type,
            ai_hints: Value::Null,
            expected_edges: Vec::new(),
            human_interaction: None,
        }
    }

    /// Attach freeform discovery hints
    pub fn with_ai_hints(mut self, hints: Value) -> Self {
        self.ai_hints = hints;
        self
    }

    /// Declare the edges this node can return
    pub fn with_expected_edges(mut self, edges: &[&str]) -> Self {
        self.expected_edges = edges.iter().map(|e| e.to_string()).collect();
        self
    }

    /// Attach human-interaction hints
    pub fn with_human_interaction(mut self, hints: HumanInteraction) -> Self {
        self.human_interaction = Some(hints);
        self
    }
}

/// Lazily-evaluated edge payload
///
/// `FnOnce` makes at-most-once evaluation structural: the thunk is consumed
/// when the interpreter (or an observer of `node:completed`) demands the data.
pub type EdgeProducer = Box<dyn FnOnce() -> Result<Value> + Send>;

/// The non-empty, insertion-ordered mapping a node returns
///
/// The first entry in insertion order is the node's effective outcome unless
/// the interpreter is resolving a branch, in which case the first entry whose
/// name appears in the branch map wins. Producer errors are captured into the
/// payload as `{"error": ...}` and never propagate past the interpreter.
#[derive(Default)]
pub struct EdgeMap {
    edges: IndexMap<String, EdgeProducer>,
}

impl EdgeMap {
    /// Create an empty map (must be populated before returning it)
    pub fn new() -> Self {
        Self {
            edges: IndexMap::new(),
        }
    }

    /// Shorthand for a single-edge map with an eager payload
    pub fn single(name: impl Into<String>, data: Value) -> Self {
        Self::new().with_value(name, data)
    }

    /// Add an edge with a lazy payload producer
    pub fn with_edge(
        mut self,
        name: impl Into<String>,
        producer: impl FnOnce() -> Result<Value> + Send + 'static,
    ) -> Self {
        self.edges.insert(name.into(), Box::new(producer));
        self
    }

    /// Add an edge with an already-computed payload
    pub fn with_value(self, name: impl Into<String>, data: Value) -> Self {
        self.with_edge(name, move || Ok(data))
    }

    /// Whether any edges were added
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Number of edges
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    /// Edge names in insertion order
    pub fn edge_names(&self) -> Vec<&str> {
        self.edges.keys().map(String::as_str).collect()
    }

    /// Select the effective edge and evaluate its payload exactly once
    ///
    /// With `preferred` set (branch resolution), the first edge in insertion
    /// order whose name is in the preferred set wins; otherwise, and as a
    /// fallback when nothing matches, the first edge wins. Unselected thunks
    /// are dropped unevaluated. A producer error becomes the payload
    /// `{"error": <message>}`.
    pub fn resolve(self, preferred: Option<&[String]>) -> Result<(String, Value)> {
        if self.edges.is_empty() {
            return Err(FlowError::validation("node returned an empty edge map"));
        }

        let index = preferred
            .and_then(|names| {
                self.edges
                    .keys()
                    .position(|k| names.iter().any(|n| n == k))
            })
            .unwrap_or(0);

        let (name, producer) = self
            .edges
            .into_iter()
            .nth(index)
            .expect("index within bounds");

        let data = match producer() {
            Ok(v) => v,
            Err(e) => json!({ "error": e.to_string() }),
        };
        Ok((name, data))
    }
}

impl std::fmt::Debug for EdgeMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EdgeMap")
            .field("edges", &self.edge_names())
            .finish()
    }
}

/// Per-construct loop counter
///
/// Each loop tuple gets its own scope from the interpreter, so nested loops
/// cannot collide. Controllers read and advance it; `forEach` mirrors it into
/// the `_loopIndex` state key for observers.
#[derive(Debug, Clone, Default)]
pub struct LoopScope {
    counter: Arc<AtomicUsize>,
}

impl LoopScope {
    /// Create a scope with the counter at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Current iteration index
    pub fn current(&self) -> usize {
        self.counter.load(Ordering::SeqCst)
    }

    /// Advance the counter, returning the previous value
    pub fn advance(&self) -> usize {
        self.counter.fetch_add(1, Ordering::SeqCst)
    }

    /// Reset the counter to zero
    pub fn reset(&self) {
        self.counter.store(0, Ordering::SeqCst);
    }
}

/// Everything a node invocation can see
///
/// Composed fresh by the interpreter for every invocation: the execution's
/// state store and runtime context, the node's template-interpolated config,
/// the previous node's evaluated edge data, and - for loop controllers - the
/// per-construct [`LoopScope`].
#[derive(Clone)]
pub struct ExecutionContext {
    /// The execution's state document
    pub state: Arc<StateStore>,

    /// Template-interpolated node configuration
    pub config: Value,

    /// The execution's runtime context (events, pause/resume)
    pub runtime: Arc<RuntimeContext>,

    /// Evaluated edge data from the previous node, if any
    pub previous_data: Option<Value>,

    /// Loop counter; present only when invoked as a loop controller
    pub loop_scope: Option<LoopScope>,
}

impl ExecutionContext {
    /// Convenience accessor for a config field
    pub fn config_value(&self, key: &str) -> Option<&Value> {
        self.config.get(key)
    }

    /// Convenience accessor for a string config field
    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(Value::as_str)
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("config", &self.config)
            .field("previous_data", &self.previous_data)
            .field("has_loop_scope", &self.loop_scope.is_some())
            .finish()
    }
}

/// A pluggable unit of work
///
/// Implementations must be `Send + Sync` and hold no cross-execution state;
/// the registry constructs instances on demand.
#[async_trait]
pub trait Node: Send + Sync {
    /// Descriptive metadata for this node
    fn metadata(&self) -> NodeMetadata;

    /// Execute against the given context, returning the outcome edge map
    async fn execute(&self, ctx: &ExecutionContext) -> Result<EdgeMap>;
}
