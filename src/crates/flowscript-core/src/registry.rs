//! Node registry: name → factory, with metadata and discovery search
//!
//! The registry owns the mapping from node name to the factory that produces
//! fresh instances, plus a secondary index by [`NodeType`]. It is process-wide
//! in spirit but constructor-injected in practice: the execution manager takes
//! an `Arc<NodeRegistry>` rather than reaching for a global. Read-mostly and
//! safe for concurrent `create()` calls.
//!
//! Fresh construction per invocation guarantees no shared mutable node state
//! across executions; `register_instance` opts a stateless node out of that
//! by handing every invocation the same `Arc`.

use crate::error::{FlowError, Result};
use crate::node::{Node, NodeMetadata, NodeType};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

/// Factory producing a fresh node instance
pub type NodeFactory = Box<dyn Fn() -> Arc<dyn Node> + Send + Sync>;

struct RegistryEntry {
    factory: NodeFactory,
    metadata: NodeMetadata,
}

/// Search filter for [`NodeRegistry::search`]
///
/// All populated criteria must match. `name_pattern` is a case-insensitive
/// substring match on the node name.
#[derive(Debug, Clone, Default)]
pub struct NodeQuery {
    /// Restrict to one node category
    pub node_type: Option<NodeType>,
    /// Require all of these edge names among the node's expected edges
    pub expected_edges: Vec<String>,
    /// Case-insensitive substring of the node name
    pub name_pattern: Option<String>,
}

impl NodeQuery {
    /// An unconstrained query (matches everything)
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to one node category
    pub fn with_type(mut self, node_type: NodeType) -> Self {
        self.node_type = Some(node_type);
        self
    }

    /// Require these expected edges
    pub fn with_expected_edges(mut self, edges: &[&str]) -> Self {
        self.expected_edges = edges.iter().map(|e| e.to_string()).collect();
        self
    }

    /// Filter names by substring
    pub fn with_name_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.name_pattern = Some(pattern.into());
        self
    }
}

/// Name → factory registry with a type index
pub struct NodeRegistry {
    entries: RwLock<HashMap<String, RegistryEntry>>,
    by_type: RwLock<HashMap<NodeType, HashSet<String>>>,
}

impl NodeRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            by_type: RwLock::new(HashMap::new()),
        }
    }

    /// Register a factory
    ///
    /// The factory is probed once for metadata. Duplicate names are rejected.
    pub fn register<F>(&self, factory: F) -> Result<()>
    where
        F: Fn() -> Arc<dyn Node> + Send + Sync + 'static,
    {
        let metadata = factory().metadata();
        self.insert(metadata, Box::new(factory))
    }

    /// Register a shared instance
    ///
    /// Every `create` call returns the same `Arc`; the node must therefore be
    /// stateless.
    pub fn register_instance(&self, node: Arc<dyn Node>) -> Result<()> {
        let metadata = node.metadata();
        self.insert(metadata, Box::new(move || node.clone()))
    }

    fn insert(&self, metadata: NodeMetadata, factory: NodeFactory) -> Result<()> {
        let name = metadata.name.clone();
        let node_type = metadata.node_type;

        let mut entries = self.entries.write().unwrap();
        if entries.contains_key(&name) {
            return Err(FlowError::DuplicateNode(name));
        }
        entries.insert(name.clone(), RegistryEntry { factory, metadata });

        self.by_type
            .write()
            .unwrap()
            .entry(node_type)
            .or_default()
            .insert(name);
        Ok(())
    }

    /// Remove a registration; returns whether it existed
    pub fn unregister(&self, name: &str) -> bool {
        let mut entries = self.entries.write().unwrap();
        match entries.remove(name) {
            Some(entry) => {
                if let Some(names) = self.by_type.write().unwrap().get_mut(&entry.metadata.node_type)
                {
                    names.remove(name);
                }
                true
            }
            None => false,
        }
    }

    /// Whether a name is registered
    pub fn has(&self, name: &str) -> bool {
        self.entries.read().unwrap().contains_key(name)
    }

    /// Construct a fresh node for one invocation
    pub fn create(&self, name: &str) -> Result<Arc<dyn Node>> {
        let entries = self.entries.read().unwrap();
        let entry = entries
            .get(name)
            .ok_or_else(|| FlowError::UnknownNode(name.to_string()))?;
        Ok((entry.factory)())
    }

    /// Metadata for a registered node
    pub fn metadata(&self, name: &str) -> Option<NodeMetadata> {
        self.entries
            .read()
            .unwrap()
            .get(name)
            .map(|e| e.metadata.clone())
    }

    /// Metadata for every registered node
    pub fn list(&self) -> Vec<NodeMetadata> {
        let mut all: Vec<_> = self
            .entries
            .read()
            .unwrap()
            .values()
            .map(|e| e.metadata.clone())
            .collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Discovery search over registered metadata
    pub fn search(&self, query: &NodeQuery) -> Vec<NodeMetadata> {
        let pattern = query.name_pattern.as_deref().map(str::to_lowercase);
        let mut hits: Vec<_> = self
            .entries
            .read()
            .unwrap()
            .values()
            .filter(|e| {
                query
                    .node_type
                    .map_or(true, |t| e.metadata.node_type == t)
            })
            .filter(|e| {
                query
                    .expected_edges
                    .iter()
                    .all(|edge| e.metadata.expected_edges.iter().any(|have| have == edge))
            })
            .filter(|e| {
                pattern
                    .as_deref()
                    .map_or(true, |p| e.metadata.name.to_lowercase().contains(p))
            })
            .map(|e| e.metadata.clone())
            .collect();
        hits.sort_by(|a, b| a.name.cmp(&b.name));
        hits
    }

    /// Number of registered nodes
    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.entries.read().unwrap().is_empty()
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeRegistry")
            .field("nodes", &self.len())
            .finish()
    }
}
