//! # flowscript-core - Declarative Workflow Orchestration
//!
//! **The FlowScript execution engine** - interpret JSON-defined trees of work
//! elements against a shared, path-addressable state document, with
//! human-in-the-loop pause/resume and a precise lifecycle event stream.
//!
//! ## Overview
//!
//! `flowscript-core` is the foundation for running declarative workflows in
//! Rust. It provides:
//!
//! - **A flow interpreter** - walks the element tree, dispatches nodes, and
//!   routes on the edge each node returns
//! - **Branching and looping** - branch tuples select a sub-sequence by edge
//!   name; loop tuples repeat a body while the controller says so
//! - **Pause/resume** - single-shot pause tokens let human nodes suspend an
//!   execution indefinitely and resume when a caller supplies data
//! - **Path-addressed state** - deep get/set/merge/delete over a JSON
//!   document with snapshot isolation and mutation hooks
//! - **Typed lifecycle events** - per-execution pub/sub with ordered,
//!   synchronous delivery
//! - **Concurrent executions** - many executions of the same or different
//!   definitions proceed independently, each on its own task
//!
//! ## Architecture
//!
//! ```text
//!                 ┌────────────────────────────────────────┐
//!                 │          ExecutionManager (C6)         │
//!                 │  start / resume / cancel / status      │
//!                 └───────────────┬────────────────────────┘
//!                                 │ one task per execution
//!                                 ▼
//!                 ┌────────────────────────────────────────┐
//!                 │          FlowInterpreter (C5)          │
//!                 │  sequence walk · branches · loops      │
//!                 └──────┬─────────────┬───────────────────┘
//!                        │             │
//!              ┌─────────▼───┐   ┌─────▼──────────┐
//!              │ NodeRegistry│   │ RuntimeContext │──► EventEmitter (C2)
//!              │    (C4)     │   │     (C3)       │──► PauseToken
//!              └─────────────┘   └─────┬──────────┘
//!                                      │
//!                                ┌─────▼──────┐
//!                                │ StateStore │ (C1)
//!                                └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use flowscript_core::{ExecutionManager, NodeRegistry, WorkflowDefinition};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> flowscript_core::Result<()> {
//!     let registry = Arc::new(NodeRegistry::new());
//!     flowscript_nodes::register_builtin_nodes(&registry)?;
//!
//!     let workflow = WorkflowDefinition::from_json_str(r#"{
//!         "id": "greeter",
//!         "name": "Greeter",
//!         "initialState": {"x": 1},
//!         "nodes": [
//!             {"setData": {"path": "greeting", "value": "hello"}},
//!             [{"checkValue": {"path": "x", "operator": "eq", "value": 1}}, {
//!                 "true":  [{"setData": {"path": "y", "value": "A"}}],
//!                 "false": [{"setData": {"path": "y", "value": "B"}}]
//!             }]
//!         ]
//!     }"#)?;
//!
//!     let manager = ExecutionManager::new(registry);
//!     let execution_id = manager.start_execution(&workflow, None)?;
//!
//!     // Attach to the event stream inside the subscribe window.
//!     let mut events = manager.get_runtime(&execution_id)?.subscribe_all();
//!     while let Some(event) = events.recv().await {
//!         println!("{}: {}", event.event, event.data);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! ### Core APIs (Start Here)
//! - [`executor`] - [`ExecutionManager`], execution lifecycle and status
//! - [`interpreter`] - [`FlowInterpreter`], the tree walker
//! - [`definition`] - [`WorkflowDefinition`], loading and validation
//!
//! ### Node Infrastructure
//! - [`node`] - [`Node`] trait, [`EdgeMap`], [`ExecutionContext`]
//! - [`registry`] - [`NodeRegistry`] with discovery search
//!
//! ### Execution Plumbing
//! - [`state`] - [`StateStore`], the path-addressed document
//! - [`events`] - [`EventEmitter`] and the event catalog
//! - [`runtime`] - [`RuntimeContext`] and [`PauseToken`]s
//!
//! ### Evaluation
//! - [`expr`] - the safe expression language for control nodes
//! - [`template`] - `{{...}}` config interpolation
//!
//! ## Design Notes
//!
//! - Nodes are constructed fresh per invocation by the registry, so node
//!   implementations cannot leak state across executions.
//! - Edges are lazy: a node returns named thunks and only the selected edge's
//!   payload is ever produced. Producer errors land in the payload, not in
//!   the execution result.
//! - The registry and catalog are injected services, not globals; wrap them
//!   in `Arc` and share as needed.

pub mod definition;
pub mod error;
pub mod events;
pub mod executor;
pub mod expr;
pub mod interpreter;
pub mod node;
pub mod registry;
pub mod runtime;
pub mod state;
pub mod template;

// Re-export main types
pub use definition::{FlowElement, WorkflowCatalog, WorkflowDefinition};
pub use error::{FlowError, Result};
pub use events::{EventEmitter, EventType, WorkflowEvent};
pub use executor::{ExecutionManager, ExecutionRecord, ExecutionStatus, ExecutorConfig};
pub use expr::{evaluate, evaluate_truthy, truthy, validate, ExprError, DENY_LIST};
pub use interpreter::{FlowInterpreter, MAX_DEPTH};
pub use node::{
    EdgeMap, EdgeProducer, ExecutionContext, HumanInteraction, LoopScope, Node, NodeMetadata,
    NodeType, EXIT_LOOP, NEXT_ITERATION,
};
pub use registry::{NodeFactory, NodeQuery, NodeRegistry};
pub use runtime::{CurrentNode, PauseToken, RuntimeContext, TokenInfo};
pub use state::StateStore;
pub use template::{interpolate_config, interpolate_string};
