//! Error types and error handling for workflow operations
//!
//! This module defines all error types that can occur during workflow loading,
//! validation, and execution. All errors implement `std::error::Error` via the
//! `thiserror` crate.
//!
//! # Error Hierarchy
//!
//! ```text
//! FlowError
//! ├── Validation          - Malformed definitions, bad flow elements
//! ├── UnknownNode         - Registry miss during interpretation
//! ├── DuplicateNode       - Double registration in the registry
//! ├── NodeExecution       - A node's execute() failed
//! ├── Execution           - General execution errors
//! ├── Expression          - Expression parse/eval failures
//! ├── TokenNotFound       - Resume/cancel of an unknown pause token
//! ├── TokenAlreadyResolved- Second completion of a pause token
//! ├── TokenOwnership      - Token presented to the wrong execution
//! ├── NoCurrentNode       - pause() outside a node invocation
//! ├── ExecutionNotFound   - Manager lookup miss
//! ├── NotPaused           - Resume of an execution with no matching token
//! ├── Cancelled           - Execution or token cancellation
//! ├── Timeout             - Human-node wait exceeded
//! ├── DepthExceeded       - Pathologically nested flow elements
//! ├── Serialization       - JSON errors
//! ├── Yaml                - YAML errors
//! └── Io                  - File loading errors
//! ```
//!
//! # Propagation policy
//!
//! Within the interpreter, errors bubble to the execution level only: a
//! failing node marks the execution `failed` and surfaces through status and
//! events, never by terminating the process. Lazy edge-data errors are the
//! one exception to bubbling - they are captured into the edge payload and
//! execution continues (see [`crate::node::EdgeMap`]).

use thiserror::Error;

/// Convenience result type using [`FlowError`]
pub type Result<T> = std::result::Result<T, FlowError>;

/// Comprehensive error type for all workflow operations
///
/// # Examples
///
/// ```rust
/// use flowscript_core::error::FlowError;
///
/// let err = FlowError::node_execution("sendMail", "SMTP connection refused");
/// assert_eq!(
///     format!("{}", err),
///     "Node 'sendMail' execution failed: SMTP connection refused"
/// );
/// ```
#[derive(Error, Debug)]
pub enum FlowError {
    /// Workflow definition or flow element failed validation
    ///
    /// Raised before any node runs: malformed tuples, empty edge maps,
    /// missing definition fields.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A flow element referenced a node name the registry does not know
    #[error("Unknown node: '{0}'")]
    UnknownNode(String),

    /// A node name was registered twice
    #[error("Node '{0}' is already registered")]
    DuplicateNode(String),

    /// Node execution failed with context
    #[error("Node '{node}' execution failed: {error}")]
    NodeExecution {
        /// Name of the node that failed
        node: String,
        /// Error message from node execution
        error: String,
    },

    /// Generic execution error without specific node context
    #[error("Execution failed: {0}")]
    Execution(String),

    /// Expression parse or evaluation failure
    ///
    /// Covers both syntax errors and deny-list violations reported by the
    /// expression evaluator.
    #[error("Expression error: {0}")]
    Expression(String),

    /// Resume or cancel targeted a pause token that does not exist
    #[error("Pause token not found: {0}")]
    TokenNotFound(String),

    /// A pause token was completed a second time
    #[error("Pause token already resolved: {0}")]
    TokenAlreadyResolved(String),

    /// A pause token was presented to a runtime context that did not mint it
    #[error("Pause token '{token}' does not belong to execution '{execution}'")]
    TokenOwnership {
        /// Offending token id
        token: String,
        /// Execution that was asked to wait on it
        execution: String,
    },

    /// `pause()` was called while no node was executing
    #[error("Cannot pause: no node is currently executing")]
    NoCurrentNode,

    /// Manager lookup for an execution id failed
    #[error("Execution not found: {0}")]
    ExecutionNotFound(String),

    /// Resume was requested but the execution holds no matching pause token
    #[error("Execution '{0}' is not paused at the requested node")]
    NotPaused(String),

    /// The execution or an individual token was cancelled
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Operation exceeded its time limit
    #[error("Operation timed out after {duration_ms}ms: {operation}")]
    Timeout {
        /// Description of the operation that timed out
        operation: String,
        /// Timeout duration in milliseconds
        duration_ms: u64,
    },

    /// Flow element nesting exceeded the interpreter's depth guard
    #[error("Flow nesting exceeded maximum depth of {0}")]
    DepthExceeded(usize),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FlowError {
    /// Create a node execution error with context
    pub fn node_execution(node: impl Into<String>, error: impl Into<String>) -> Self {
        Self::NodeExecution {
            node: node.into(),
            error: error.into(),
        }
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a generic execution error
    pub fn execution(msg: impl Into<String>) -> Self {
        Self::Execution(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, duration_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration_ms,
        }
    }

    /// Whether this error represents a cancellation rather than a failure
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}
