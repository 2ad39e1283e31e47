//! Human-interaction nodes: pause, ask, resume
//!
//! A human node suspends its execution on a pause token, announces the
//! request with `human:input:required`, and waits - indefinitely, or up to a
//! configured timeout - for an external caller to resume with input. The
//! returned edge is derived from what happened:
//!
//! | Outcome | Edge |
//! |---------|------|
//! | input received | input-derived (`approved`/`rejected`/..., or `submitted`) |
//! | wait timed out | `timeout` |
//! | execution cancelled | `error` |
//!
//! The pause cycle emits, in order: `workflow:paused` (from the runtime
//! context), `human:input:required`, then on resume `human:input:received`
//! and `workflow:resumed`.

use async_trait::async_trait;
use flowscript_core::error::{FlowError, Result};
use flowscript_core::events::EventType;
use flowscript_core::node::{
    EdgeMap, ExecutionContext, HumanInteraction, Node, NodeMetadata, NodeType,
};
use flowscript_core::runtime::PauseToken;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

/// Wait outcome shared by the human nodes
enum WaitOutcome {
    Input(Value),
    Timeout,
    Cancelled(String),
}

async fn announce_and_wait(
    ctx: &ExecutionContext,
    token: PauseToken,
    form_schema: Value,
    timeout_ms: Option<u64>,
) -> Result<(WaitOutcome, String)> {
    let token_id = token.id.clone();
    let node_id = token.node_id.clone();
    let node_name = token.node_name.clone();

    ctx.runtime.emit(
        EventType::HumanInputRequired,
        json!({
            "nodeId": node_id,
            "nodeName": node_name,
            "tokenId": token_id,
            "formSchema": form_schema,
            "uiHints": ctx.config.get("uiHints").cloned().unwrap_or(json!({})),
            "timeout": timeout_ms,
            "defaultValues": ctx.config.get("defaultValues").cloned().unwrap_or(json!({})),
            "contextData": ctx.config.get("contextData").cloned().unwrap_or(json!({})),
        }),
    );

    let outcome = match timeout_ms {
        Some(ms) => {
            ctx.runtime
                .wait_for_resume_timeout(token, Duration::from_millis(ms))
                .await
        }
        None => ctx.runtime.wait_for_resume(token).await,
    };

    let outcome = match outcome {
        Ok(input) => WaitOutcome::Input(input),
        Err(FlowError::Timeout { .. }) => WaitOutcome::Timeout,
        Err(FlowError::Cancelled(reason)) => WaitOutcome::Cancelled(reason),
        Err(other) => return Err(other),
    };
    Ok((outcome, node_id))
}

fn configured_timeout(ctx: &ExecutionContext, default_ms: Option<u64>) -> Option<u64> {
    ctx.config
        .get("timeoutMs")
        .or_else(|| ctx.config.get("timeout"))
        .and_then(Value::as_u64)
        .or(default_ms)
}

/// `approveExpense` - approval decision cycle
///
/// Pauses for a reviewer decision and routes on it. The received input is
/// stored under `approvalDecision` in the state.
///
/// Config (all optional):
/// - `formSchema` - overrides the default decision schema
/// - `timeoutMs` / `timeout` - wait limit in milliseconds
/// - `uiHints`, `defaultValues`, `contextData` - forwarded verbatim on
///   `human:input:required`
///
/// Edges: `approved`, `rejected`, `needsInfo` (input-derived), `timeout`,
/// `error`.
pub struct ApproveExpenseNode;

impl ApproveExpenseNode {
    fn default_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "decision": {
                    "type": "string",
                    "enum": ["approved", "rejected", "needsInfo"]
                },
                "comment": { "type": "string" }
            },
            "required": ["decision"]
        })
    }
}

#[async_trait]
impl Node for ApproveExpenseNode {
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::new(
            "approveExpense",
            "Suspend for an expense approval decision",
            NodeType::Human,
        )
        .with_expected_edges(&["approved", "rejected", "needsInfo", "timeout", "error"])
        .with_human_interaction(HumanInteraction {
            default_timeout_ms: None,
            form_schema: Some(Self::default_schema()),
        })
    }

    async fn execute(&self, ctx: &ExecutionContext) -> Result<EdgeMap> {
        let token = ctx.runtime.pause()?;
        let schema = ctx
            .config
            .get("formSchema")
            .cloned()
            .unwrap_or_else(Self::default_schema);
        let timeout_ms = configured_timeout(ctx, None);

        let (outcome, node_id) = announce_and_wait(ctx, token, schema, timeout_ms).await?;

        match outcome {
            WaitOutcome::Input(input) => {
                ctx.state.set("approvalDecision", input.clone());
                let edge = match input.get("decision").and_then(Value::as_str) {
                    Some("approved") => "approved",
                    Some("rejected") => "rejected",
                    _ => "needsInfo",
                };
                debug!(node = %node_id, edge, "approval decision received");
                Ok(EdgeMap::single(edge, input))
            }
            WaitOutcome::Timeout => Ok(EdgeMap::single("timeout", json!({}))),
            WaitOutcome::Cancelled(reason) => {
                Ok(EdgeMap::single("error", json!({ "reason": reason })))
            }
        }
    }
}

/// `formInput` - generic schema'd form request
///
/// Pauses for arbitrary form input, checks the schema's `required` fields
/// structurally, and stores the accepted input at `statePath`.
///
/// Config:
/// - `formSchema` - object schema; its `required` array is enforced
/// - `statePath` (default `formInput`) - where accepted input lands
/// - `timeoutMs` / `timeout`, `uiHints`, `defaultValues`, `contextData` - as
///   for `approveExpense`
///
/// Edges: `submitted`, `invalid`, `timeout`, `error`.
pub struct FormInputNode;

#[async_trait]
impl Node for FormInputNode {
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::new(
            "formInput",
            "Suspend for generic form input",
            NodeType::Human,
        )
        .with_expected_edges(&["submitted", "invalid", "timeout", "error"])
        .with_human_interaction(HumanInteraction::default())
    }

    async fn execute(&self, ctx: &ExecutionContext) -> Result<EdgeMap> {
        let token = ctx.runtime.pause()?;
        let schema = ctx
            .config
            .get("formSchema")
            .cloned()
            .unwrap_or(json!({ "type": "object" }));
        let state_path = ctx.config_str("statePath").unwrap_or("formInput").to_string();
        let timeout_ms = configured_timeout(ctx, None);

        let (outcome, _node_id) = announce_and_wait(ctx, token, schema.clone(), timeout_ms).await?;

        match outcome {
            WaitOutcome::Input(input) => {
                let missing: Vec<String> = schema
                    .get("required")
                    .and_then(Value::as_array)
                    .map(|required| {
                        required
                            .iter()
                            .filter_map(Value::as_str)
                            .filter(|field| input.get(field).is_none())
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default();

                if !missing.is_empty() {
                    return Ok(EdgeMap::single("invalid", json!({ "missing": missing })));
                }

                ctx.state.set(&state_path, input.clone());
                Ok(EdgeMap::single("submitted", input))
            }
            WaitOutcome::Timeout => Ok(EdgeMap::single("timeout", json!({}))),
            WaitOutcome::Cancelled(reason) => {
                Ok(EdgeMap::single("error", json!({ "reason": reason })))
            }
        }
    }
}
