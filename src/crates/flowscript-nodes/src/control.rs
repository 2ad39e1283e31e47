//! Control nodes: state edits, conditions, loop controllers, delays
//!
//! These nodes drive flow decisions and state changes. Conditions return
//! `true`/`false` edges for branch tuples; loop controllers return
//! `next_iteration`/`exit_loop` for loop tuples; the rest return `next`.

use async_trait::async_trait;
use flowscript_core::error::{FlowError, Result};
use flowscript_core::expr;
use flowscript_core::node::{
    EdgeMap, ExecutionContext, Node, NodeMetadata, NodeType, EXIT_LOOP, NEXT_ITERATION,
};
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// State key `forEach` mirrors its loop counter into
pub const LOOP_INDEX_KEY: &str = "_loopIndex";

/// `setData` - write, append, merge, or delete at a state path
///
/// Config:
/// - `path` (string, required)
/// - `value` (any) - the value to write
/// - `mode` (string) - `set` (default), `append`, `merge`, or `delete`
pub struct SetDataNode;

#[async_trait]
impl Node for SetDataNode {
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::new(
            "setData",
            "Write a value into the workflow state at a path",
            NodeType::Control,
        )
        .with_expected_edges(&["next"])
        .with_ai_hints(json!({
            "use": "mutate workflow state",
            "modes": ["set", "append", "merge", "delete"]
        }))
    }

    async fn execute(&self, ctx: &ExecutionContext) -> Result<EdgeMap> {
        let path = ctx
            .config_str("path")
            .ok_or_else(|| FlowError::node_execution("setData", "config 'path' is required"))?
            .to_string();
        let value = ctx.config.get("value").cloned().unwrap_or(Value::Null);
        let mode = ctx.config_str("mode").unwrap_or("set");

        match mode {
            "set" => ctx.state.set(&path, value.clone()),
            "append" => {
                let next = match ctx.state.get(&path) {
                    Some(Value::Array(mut items)) => {
                        items.push(value.clone());
                        Value::Array(items)
                    }
                    None => Value::Array(vec![value.clone()]),
                    Some(other) => {
                        return Err(FlowError::node_execution(
                            "setData",
                            format!("cannot append to non-sequence at '{}': {}", path, other),
                        ))
                    }
                };
                ctx.state.set(&path, next);
            }
            "merge" => match (ctx.state.get(&path), &value) {
                (Some(Value::Object(base)), Value::Object(patch)) => {
                    let mut merged = base;
                    merge_maps(&mut merged, patch);
                    ctx.state.set(&path, Value::Object(merged));
                }
                (None, Value::Object(_)) => ctx.state.set(&path, value.clone()),
                _ => {
                    return Err(FlowError::node_execution(
                        "setData",
                        format!("merge mode requires maps on both sides at '{}'", path),
                    ))
                }
            },
            "delete" => ctx.state.delete(&path),
            other => {
                return Err(FlowError::node_execution(
                    "setData",
                    format!("unknown mode '{}'", other),
                ))
            }
        }

        debug!(path = %path, mode, "setData applied");
        Ok(EdgeMap::single("next", json!({ "path": path, "value": value })))
    }
}

fn merge_maps(base: &mut Map<String, Value>, patch: &Map<String, Value>) {
    for (key, value) in patch {
        match (base.get_mut(key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                merge_maps(existing, incoming)
            }
            _ => {
                base.insert(key.clone(), value.clone());
            }
        }
    }
}

/// `checkValue` - compare a state path against a literal
///
/// Config:
/// - `path` (string, required)
/// - `operator` / `op` (string) - `eq` (default), `neq`, `gt`, `gte`, `lt`,
///   `lte`, `exists`, `contains`
/// - `value` (any) - the right-hand side (unused by `exists`)
///
/// Returns a `true` or `false` edge.
pub struct CheckValueNode;

#[async_trait]
impl Node for CheckValueNode {
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::new(
            "checkValue",
            "Compare a state value and route on the outcome",
            NodeType::Control,
        )
        .with_expected_edges(&["true", "false"])
    }

    async fn execute(&self, ctx: &ExecutionContext) -> Result<EdgeMap> {
        let path = ctx
            .config_str("path")
            .ok_or_else(|| FlowError::node_execution("checkValue", "config 'path' is required"))?;
        let operator = ctx
            .config_str("operator")
            .or_else(|| ctx.config_str("op"))
            .unwrap_or("eq");
        let expected = ctx.config.get("value").cloned().unwrap_or(Value::Null);
        let actual = ctx.state.get(path);

        let result = match operator {
            "exists" => actual.is_some(),
            "eq" => actual.as_ref().map_or(false, |a| loose_eq(a, &expected)),
            "neq" => !actual.as_ref().map_or(false, |a| loose_eq(a, &expected)),
            "gt" | "gte" | "lt" | "lte" => {
                let (a, b) = match (
                    actual.as_ref().and_then(Value::as_f64),
                    expected.as_f64(),
                ) {
                    (Some(a), Some(b)) => (a, b),
                    _ => {
                        return Err(FlowError::node_execution(
                            "checkValue",
                            format!("'{}' requires numeric operands at '{}'", operator, path),
                        ))
                    }
                };
                match operator {
                    "gt" => a > b,
                    "gte" => a >= b,
                    "lt" => a < b,
                    _ => a <= b,
                }
            }
            "contains" => match &actual {
                Some(Value::Array(items)) => items.iter().any(|item| loose_eq(item, &expected)),
                Some(Value::String(s)) => expected
                    .as_str()
                    .map(|needle| s.contains(needle))
                    .unwrap_or(false),
                _ => false,
            },
            other => {
                return Err(FlowError::node_execution(
                    "checkValue",
                    format!("unknown operator '{}'", other),
                ))
            }
        };

        let edge = if result { "true" } else { "false" };
        Ok(EdgeMap::single(
            edge,
            json!({
                "path": path,
                "operator": operator,
                "expected": expected,
                "actual": actual,
                "result": result,
            }),
        ))
    }
}

fn loose_eq(left: &Value, right: &Value) -> bool {
    match (left.as_f64(), right.as_f64()) {
        (Some(a), Some(b)) if left.is_number() && right.is_number() => a == b,
        _ => left == right,
    }
}

/// `whileCondition` - loop controller over an expression
///
/// Config:
/// - `condition` (string, required) - an expression evaluated against the
///   state snapshot
///
/// A truthy condition returns `next_iteration` with the incremented iteration
/// count; a falsy one returns `exit_loop` with the total. An expression error
/// (including deny-list violations) exits the loop with an error payload
/// rather than failing the execution.
pub struct WhileConditionNode;

#[async_trait]
impl Node for WhileConditionNode {
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::new(
            "whileCondition",
            "Repeat the loop body while an expression holds",
            NodeType::Control,
        )
        .with_expected_edges(&[NEXT_ITERATION, EXIT_LOOP])
    }

    async fn execute(&self, ctx: &ExecutionContext) -> Result<EdgeMap> {
        let condition = ctx
            .config_str("condition")
            .ok_or_else(|| {
                FlowError::node_execution("whileCondition", "config 'condition' is required")
            })?;
        let scope = ctx.loop_scope.clone().unwrap_or_default();
        let iteration = scope.current();

        match expr::evaluate_truthy(condition, &ctx.state.snapshot()) {
            Ok(true) => {
                scope.advance();
                Ok(EdgeMap::single(
                    NEXT_ITERATION,
                    json!({ "iteration": iteration + 1 }),
                ))
            }
            Ok(false) => Ok(EdgeMap::single(
                EXIT_LOOP,
                json!({ "totalIterations": iteration }),
            )),
            Err(e) => {
                warn!(condition, error = %e, "whileCondition expression rejected, exiting loop");
                Ok(EdgeMap::single(EXIT_LOOP, json!({ "error": e.to_string() })))
            }
        }
    }
}

/// `forEach` - loop controller iterating a state sequence
///
/// Config:
/// - `items` (string path, default `items`) - the sequence to iterate
/// - `as` (string, default `item`) - the state key each element is bound to
///
/// Each tick binds the current element under `as`, mirrors the advanced
/// counter into [`LOOP_INDEX_KEY`], and returns `next_iteration`. Once the
/// sequence is exhausted it removes the binding, resets the mirror to 0, and
/// returns `exit_loop`. The authoritative counter is the per-construct
/// [`LoopScope`], so nested `forEach` loops do not collide.
pub struct ForEachNode;

#[async_trait]
impl Node for ForEachNode {
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::new(
            "forEach",
            "Iterate the loop body over a state sequence",
            NodeType::Control,
        )
        .with_expected_edges(&[NEXT_ITERATION, EXIT_LOOP])
    }

    async fn execute(&self, ctx: &ExecutionContext) -> Result<EdgeMap> {
        let items_path = ctx.config_str("items").unwrap_or("items").to_string();
        let binding = ctx.config_str("as").unwrap_or("item").to_string();
        let scope = ctx.loop_scope.clone().unwrap_or_default();

        let items = match ctx.state.get(&items_path) {
            Some(Value::Array(items)) => items,
            Some(other) => {
                warn!(path = %items_path, "forEach target is not a sequence, exiting loop");
                scope.reset();
                return Ok(EdgeMap::single(
                    EXIT_LOOP,
                    json!({ "error": format!("'{}' is not a sequence: {}", items_path, other) }),
                ));
            }
            None => Vec::new(),
        };

        let index = scope.current();
        if index < items.len() {
            let item = items[index].clone();
            scope.advance();
            ctx.state.set(&binding, item.clone());
            ctx.state.set(LOOP_INDEX_KEY, json!(index + 1));
            let mut payload = Map::new();
            payload.insert(binding, item);
            payload.insert("index".to_string(), json!(index));
            Ok(EdgeMap::single(NEXT_ITERATION, Value::Object(payload)))
        } else {
            scope.reset();
            ctx.state.delete(&binding);
            ctx.state.set(LOOP_INDEX_KEY, json!(0));
            Ok(EdgeMap::single(
                EXIT_LOOP,
                json!({ "totalItems": items.len() }),
            ))
        }
    }
}

/// `delay` - sleep for a configured duration
///
/// Config:
/// - `duration` (number, milliseconds, default 1000)
pub struct DelayNode;

#[async_trait]
impl Node for DelayNode {
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::new("delay", "Pause the execution for a duration", NodeType::Action)
            .with_expected_edges(&["next"])
    }

    async fn execute(&self, ctx: &ExecutionContext) -> Result<EdgeMap> {
        let duration_ms = ctx
            .config_value("duration")
            .and_then(Value::as_u64)
            .unwrap_or(1000);
        tokio::time::sleep(Duration::from_millis(duration_ms)).await;
        Ok(EdgeMap::single("next", json!({ "duration": duration_ms })))
    }
}

/// `logMessage` - emit a structured log line
///
/// Config:
/// - `message` (string, required; template-interpolated like any config)
/// - `level` (string) - `debug`, `info` (default), `warn`, or `error`
pub struct LogMessageNode;

#[async_trait]
impl Node for LogMessageNode {
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::new("logMessage", "Log a message from the workflow", NodeType::Control)
            .with_expected_edges(&["next"])
    }

    async fn execute(&self, ctx: &ExecutionContext) -> Result<EdgeMap> {
        let message = ctx.config_str("message").unwrap_or("").to_string();
        match ctx.config_str("level").unwrap_or("info") {
            "debug" => debug!(workflow = %ctx.runtime.workflow_id(), "{}", message),
            "warn" => warn!(workflow = %ctx.runtime.workflow_id(), "{}", message),
            "error" => error!(workflow = %ctx.runtime.workflow_id(), "{}", message),
            _ => info!(workflow = %ctx.runtime.workflow_id(), "{}", message),
        }
        Ok(EdgeMap::single("next", json!({ "message": message })))
    }
}
