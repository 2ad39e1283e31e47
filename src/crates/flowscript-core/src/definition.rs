//! Workflow definitions: loading, validation, and the catalog
//!
//! A workflow definition is an immutable JSON (or YAML) document: an id, a
//! name, an initial state, and an ordered sequence of flow elements. The
//! flow-element grammar is a tagged union:
//!
//! ```text
//! "setData"                          node reference
//! {"setData": {"path": "x"}}         configured node (exactly one entry)
//! [cond, {"true": [...], ...}]       branch tuple (2 entries)
//! [controller, [body...]]            loop tuple (2 entries)
//! ```
//!
//! Tuples of any arity other than 2 are invalid. Unknown top-level fields on
//! the definition are ignored; malformed elements are rejected before any
//! node runs.

use crate::error::{FlowError, Result};
use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

/// One unit of the workflow tree
#[derive(Debug, Clone)]
pub enum FlowElement {
    /// A bare reference to a registered node, with empty config
    NodeRef(String),

    /// A node reference with configuration
    Configured {
        /// Registered node name
        name: String,
        /// Arbitrary nested config document (template-interpolated at
        /// invocation time)
        config: Value,
    },

    /// `[condition, branch-map]`: run the condition node, then the
    /// sub-sequence named by its returned edge
    Branch {
        /// Condition node (a leaf element)
        condition: Box<FlowElement>,
        /// Edge name → sub-sequence; `None` means "do nothing"
        branches: IndexMap<String, Option<Vec<FlowElement>>>,
    },

    /// `[controller, body]`: run the body while the controller returns
    /// `next_iteration`
    Loop {
        /// Controller node (a leaf element)
        controller: Box<FlowElement>,
        /// Body sub-sequence
        body: Vec<FlowElement>,
    },
}

impl FlowElement {
    /// Parse a flow element from its JSON form
    pub fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::String(name) => Ok(Self::NodeRef(name.clone())),
            Value::Object(map) => {
                if map.len() != 1 {
                    return Err(FlowError::validation(format!(
                        "configured node must have exactly one entry, found {}",
                        map.len()
                    )));
                }
                let (name, config) = map.iter().next().expect("one entry");
                Ok(Self::Configured {
                    name: name.clone(),
                    config: config.clone(),
                })
            }
            Value::Array(items) => {
                if items.len() != 2 {
                    return Err(FlowError::validation(format!(
                        "flow tuples must have exactly 2 entries, found {}",
                        items.len()
                    )));
                }
                let head = Self::from_value(&items[0])?;
                if !head.is_leaf() {
                    return Err(FlowError::validation(
                        "the first tuple entry must be a node reference or configured node",
                    ));
                }
                match &items[1] {
                    Value::Object(branch_map) => {
                        let mut branches = IndexMap::new();
                        for (edge, sub) in branch_map {
                            let sequence = match sub {
                                Value::Null => None,
                                Value::Array(elements) => Some(parse_sequence(elements)?),
                                other => {
                                    return Err(FlowError::validation(format!(
                                        "branch '{}' must be a sequence or null, found {}",
                                        edge,
                                        json_type(other)
                                    )))
                                }
                            };
                            branches.insert(edge.clone(), sequence);
                        }
                        Ok(Self::Branch {
                            condition: Box::new(head),
                            branches,
                        })
                    }
                    Value::Array(body) => Ok(Self::Loop {
                        controller: Box::new(head),
                        body: parse_sequence(body)?,
                    }),
                    other => Err(FlowError::validation(format!(
                        "the second tuple entry must be a branch map or body sequence, found {}",
                        json_type(other)
                    ))),
                }
            }
            other => Err(FlowError::validation(format!(
                "invalid flow element of type {}",
                json_type(other)
            ))),
        }
    }

    /// Whether this element is a node reference or configured node
    pub fn is_leaf(&self) -> bool {
        matches!(self, Self::NodeRef(_) | Self::Configured { .. })
    }

    /// The node name for leaf elements
    pub fn node_name(&self) -> Option<&str> {
        match self {
            Self::NodeRef(name) => Some(name),
            Self::Configured { name, .. } => Some(name),
            _ => None,
        }
    }
}

fn parse_sequence(elements: &[Value]) -> Result<Vec<FlowElement>> {
    elements.iter().map(FlowElement::from_value).collect()
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "sequence",
        Value::Object(_) => "map",
    }
}

/// An immutable, validated workflow definition
#[derive(Debug, Clone)]
pub struct WorkflowDefinition {
    /// Unique workflow id
    pub id: String,

    /// Display name
    pub name: String,

    /// Seed document for the execution's state store
    pub initial_state: Value,

    /// Ordered flow-element sequence
    pub nodes: Vec<FlowElement>,

    /// Optional freeform metadata
    pub metadata: Option<Value>,
}

impl WorkflowDefinition {
    /// Parse a definition from its JSON document form
    ///
    /// Unknown top-level fields are ignored.
    pub fn from_value(value: &Value) -> Result<Self> {
        let id = value
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| FlowError::validation("workflow definition is missing 'id'"))?
            .to_string();
        if id.is_empty() {
            return Err(FlowError::validation("workflow 'id' must be non-empty"));
        }

        let name = value
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or(&id)
            .to_string();

        let initial_state = value
            .get("initialState")
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()));

        let nodes = match value.get("nodes") {
            Some(Value::Array(elements)) => parse_sequence(elements)?,
            Some(other) => {
                return Err(FlowError::validation(format!(
                    "'nodes' must be a sequence, found {}",
                    json_type(other)
                )))
            }
            None => return Err(FlowError::validation("workflow definition is missing 'nodes'")),
        };

        let metadata = value.get("metadata").cloned();

        Ok(Self {
            id,
            name,
            initial_state,
            nodes,
            metadata,
        })
    }

    /// Parse a definition from a JSON string
    pub fn from_json_str(json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json)?;
        Self::from_value(&value)
    }

    /// Parse a definition from a YAML string
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let value: Value = serde_yaml::from_str(yaml)?;
        Self::from_value(&value)
    }

    /// Load a definition from a file, dispatching on extension
    ///
    /// `.yaml`/`.yml` files parse as YAML; everything else as JSON.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml_str(&content),
            _ => Self::from_json_str(&content),
        }
    }

    /// Re-check structural invariants
    ///
    /// Parsing already enforces the element grammar; this validates what can
    /// only be checked on the assembled tree and is called by the execution
    /// manager before any node runs.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(FlowError::validation("workflow 'id' must be non-empty"));
        }
        fn check(elements: &[FlowElement]) -> Result<()> {
            for element in elements {
                match element {
                    FlowElement::Branch { condition, branches } => {
                        if !condition.is_leaf() {
                            return Err(FlowError::validation(
                                "branch condition must be a leaf element",
                            ));
                        }
                        for sub in branches.values().flatten() {
                            check(sub)?;
                        }
                    }
                    FlowElement::Loop { controller, body } => {
                        if !controller.is_leaf() {
                            return Err(FlowError::validation(
                                "loop controller must be a leaf element",
                            ));
                        }
                        check(body)?;
                    }
                    _ => {}
                }
            }
            Ok(())
        }
        check(&self.nodes)
    }
}

/// Process-wide catalog of loaded workflow definitions
///
/// Constructor-injected like the node registry; a global instance is never
/// required.
pub struct WorkflowCatalog {
    definitions: RwLock<HashMap<String, Arc<WorkflowDefinition>>>,
}

impl WorkflowCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self {
            definitions: RwLock::new(HashMap::new()),
        }
    }

    /// Register a definition, rejecting duplicate ids
    pub fn register(&self, definition: WorkflowDefinition) -> Result<()> {
        definition.validate()?;
        let mut definitions = self.definitions.write().unwrap();
        if definitions.contains_key(&definition.id) {
            return Err(FlowError::validation(format!(
                "workflow '{}' is already registered",
                definition.id
            )));
        }
        definitions.insert(definition.id.clone(), Arc::new(definition));
        Ok(())
    }

    /// Remove a definition; returns whether it existed
    pub fn unregister(&self, id: &str) -> bool {
        self.definitions.write().unwrap().remove(id).is_some()
    }

    /// Look up a definition by id
    pub fn get(&self, id: &str) -> Option<Arc<WorkflowDefinition>> {
        self.definitions.read().unwrap().get(id).cloned()
    }

    /// Registered workflow ids, sorted
    pub fn list_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.definitions.read().unwrap().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of registered definitions
    pub fn len(&self) -> usize {
        self.definitions.read().unwrap().len()
    }

    /// Whether the catalog is empty
    pub fn is_empty(&self) -> bool {
        self.definitions.read().unwrap().is_empty()
    }
}

impl Default for WorkflowCatalog {
    fn default() -> Self {
        Self::new()
    }
}
