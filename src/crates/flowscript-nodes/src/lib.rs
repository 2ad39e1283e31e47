//! # flowscript-nodes - Built-in Workflow Building Blocks
//!
//! **Ready-to-use control and human-interaction nodes** for FlowScript
//! workflows. This crate provides the node vocabulary most workflow
//! definitions are written against:
//!
//! - **[`SetDataNode`]** (`setData`) - write/append/merge/delete state
//! - **[`CheckValueNode`]** (`checkValue`) - branch condition over a state path
//! - **[`WhileConditionNode`]** (`whileCondition`) - expression-driven loop
//! - **[`ForEachNode`]** (`forEach`) - iterate a state sequence
//! - **[`DelayNode`]** (`delay`) - timed suspension
//! - **[`LogMessageNode`]** (`logMessage`) - structured log line
//! - **[`ApproveExpenseNode`]** (`approveExpense`) - human approval cycle
//! - **[`FormInputNode`]** (`formInput`) - generic human form request
//!
//! Use `flowscript-core` directly when you need custom node implementations;
//! anything with `metadata()` and `execute()` registers the same way.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use flowscript_core::{ExecutionManager, NodeRegistry, WorkflowDefinition};
//! use flowscript_nodes::register_builtin_nodes;
//! use std::sync::Arc;
//!
//! let registry = Arc::new(NodeRegistry::new());
//! register_builtin_nodes(&registry)?;
//!
//! let manager = ExecutionManager::new(registry);
//! let workflow = WorkflowDefinition::from_file("workflows/approval.json")?;
//! let execution_id = manager.start_execution(&workflow, None)?;
//! ```

pub mod control;
pub mod human;

pub use control::{
    CheckValueNode, DelayNode, ForEachNode, LogMessageNode, SetDataNode, WhileConditionNode,
    LOOP_INDEX_KEY,
};
pub use human::{ApproveExpenseNode, FormInputNode};

use flowscript_core::error::Result;
use flowscript_core::node::Node;
use flowscript_core::registry::NodeRegistry;
use std::sync::Arc;

/// Register every built-in node on a registry
///
/// Fails with a duplicate-node error if any of the names are already taken.
pub fn register_builtin_nodes(registry: &NodeRegistry) -> Result<()> {
    registry.register(|| Arc::new(SetDataNode) as Arc<dyn Node>)?;
    registry.register(|| Arc::new(CheckValueNode) as Arc<dyn Node>)?;
    registry.register(|| Arc::new(WhileConditionNode) as Arc<dyn Node>)?;
    registry.register(|| Arc::new(ForEachNode) as Arc<dyn Node>)?;
    registry.register(|| Arc::new(DelayNode) as Arc<dyn Node>)?;
    registry.register(|| Arc::new(LogMessageNode) as Arc<dyn Node>)?;
    registry.register(|| Arc::new(ApproveExpenseNode) as Arc<dyn Node>)?;
    registry.register(|| Arc::new(FormInputNode) as Arc<dyn Node>)?;
    Ok(())
}
