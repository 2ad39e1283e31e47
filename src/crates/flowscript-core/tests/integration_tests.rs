//! Integration tests for complete executions
//!
//! These tests verify that the state store, event bus, runtime context,
//! interpreter, and execution manager work together correctly in realistic
//! scenarios, using small purpose-built nodes rather than the shipped node
//! library.

use async_trait::async_trait;
use flowscript_core::error::{FlowError, Result};
use flowscript_core::node::{EdgeMap, ExecutionContext, Node, NodeMetadata, NodeType};
use flowscript_core::{
    EventType, ExecutionManager, ExecutionStatus, ExecutorConfig, NodeRegistry, WorkflowDefinition,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

/// Writes `config.value` to `config.path`
struct Put;

#[async_trait]
impl Node for Put {
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::new("put", "write a value", NodeType::Control)
    }

    async fn execute(&self, ctx: &ExecutionContext) -> Result<EdgeMap> {
        let path = ctx.config_str("path").unwrap_or("out").to_string();
        ctx.state.set(&path, ctx.config["value"].clone());
        Ok(EdgeMap::single("next", ctx.config["value"].clone()))
    }
}

/// Copies the previous node's edge data into state at `config.path`
struct Recall;

#[async_trait]
impl Node for Recall {
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::new("recall", "store previous edge data", NodeType::Control)
    }

    async fn execute(&self, ctx: &ExecutionContext) -> Result<EdgeMap> {
        let path = ctx.config_str("path").unwrap_or("recalled").to_string();
        let previous = ctx.previous_data.clone().unwrap_or(Value::Null);
        ctx.state.set(&path, previous.clone());
        Ok(EdgeMap::single("next", previous))
    }
}

/// Returns a single edge whose payload producer fails
struct BrokenThunk;

#[async_trait]
impl Node for BrokenThunk {
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::new("brokenThunk", "edge payload fails", NodeType::Action)
    }

    async fn execute(&self, _ctx: &ExecutionContext) -> Result<EdgeMap> {
        Ok(EdgeMap::new()
            .with_edge("next", || Err(FlowError::execution("payload unavailable"))))
    }
}

/// Pauses and waits for resume, routing on the wait outcome
struct Ask;

#[async_trait]
impl Node for Ask {
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::new("ask", "pause for external input", NodeType::Human)
    }

    async fn execute(&self, ctx: &ExecutionContext) -> Result<EdgeMap> {
        let token = ctx.runtime.pause()?;
        match ctx.runtime.wait_for_resume(token).await {
            Ok(input) => {
                ctx.state.set("answer", input.clone());
                Ok(EdgeMap::single("answered", input))
            }
            Err(FlowError::Cancelled(reason)) => {
                Ok(EdgeMap::single("error", json!({ "reason": reason })))
            }
            Err(other) => Err(other),
        }
    }
}

fn manager() -> ExecutionManager {
    let registry = Arc::new(NodeRegistry::new());
    registry.register(|| Arc::new(Put) as Arc<dyn Node>).unwrap();
    registry.register(|| Arc::new(Recall) as Arc<dyn Node>).unwrap();
    registry
        .register(|| Arc::new(BrokenThunk) as Arc<dyn Node>)
        .unwrap();
    registry.register(|| Arc::new(Ask) as Arc<dyn Node>).unwrap();
    ExecutionManager::with_config(
        registry,
        ExecutorConfig::default().with_subscribe_grace(Duration::from_millis(15)),
    )
}

fn workflow(nodes: Value) -> WorkflowDefinition {
    WorkflowDefinition::from_value(&json!({
        "id": "integration",
        "initialState": {},
        "nodes": nodes,
    }))
    .unwrap()
}

async fn wait_for(
    manager: &ExecutionManager,
    id: &str,
    predicate: impl Fn(ExecutionStatus) -> bool,
) -> flowscript_core::ExecutionRecord {
    for _ in 0..400 {
        let record = manager.get_execution_status(id).unwrap();
        if predicate(record.status) {
            return record;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("execution {} never reached the expected status", id);
}

#[tokio::test]
async fn test_event_stream_wraps_execution() {
    let manager = manager();
    let wf = workflow(json!([
        {"put": {"path": "a", "value": 1}},
        {"put": {"path": "b", "value": 2}}
    ]));

    let id = manager.start_execution(&wf, None).unwrap();
    let mut events = manager.get_runtime(&id).unwrap().subscribe_all();
    wait_for(&manager, &id, |s| s.is_terminal()).await;

    let mut names = Vec::new();
    while let Ok(event) = events.try_recv() {
        assert_eq!(event.execution_id, id);
        assert_eq!(event.workflow_id, "integration");
        names.push(event.event);
    }

    // The stream begins with workflow:started and ends with exactly one
    // terminal event.
    assert_eq!(names.first(), Some(&EventType::WorkflowStarted));
    assert_eq!(names.last(), Some(&EventType::WorkflowCompleted));
    let terminal = names
        .iter()
        .filter(|n| matches!(n, EventType::WorkflowCompleted | EventType::WorkflowFailed))
        .count();
    assert_eq!(terminal, 1);
}

#[tokio::test]
async fn test_previous_edge_data_threads_between_nodes() {
    let manager = manager();
    let wf = workflow(json!([
        {"put": {"path": "ignored", "value": {"from": "put"}}},
        {"recall": {"path": "got"}}
    ]));

    let id = manager.start_execution(&wf, None).unwrap();
    let record = wait_for(&manager, &id, |s| s.is_terminal()).await;
    assert_eq!(record.state["got"], json!({"from": "put"}));
}

#[tokio::test]
async fn test_edge_thunk_error_is_nonfatal() {
    let manager = manager();
    let wf = workflow(json!([
        "brokenThunk",
        {"recall": {"path": "afterBroken"}}
    ]));

    let id = manager.start_execution(&wf, None).unwrap();
    let mut completed = manager
        .get_runtime(&id)
        .unwrap()
        .subscribe(EventType::NodeCompleted);

    let record = wait_for(&manager, &id, |s| s.is_terminal()).await;
    assert_eq!(record.status, ExecutionStatus::Completed);

    // The broken payload is captured into the edge data, the execution
    // routes normally, and the error value flows to the next node.
    let first = completed.try_recv().unwrap();
    assert_eq!(first.data["nodeName"], "brokenThunk");
    assert!(first.data["edgeData"]["error"]
        .as_str()
        .unwrap()
        .contains("payload unavailable"));
    assert!(record.state["afterBroken"]["error"].is_string());
}

#[tokio::test]
async fn test_pause_resume_through_manager() {
    let manager = manager();
    let wf = workflow(json!(["ask"]));

    let id = manager.start_execution(&wf, None).unwrap();
    let record = wait_for(&manager, &id, |s| s == ExecutionStatus::Paused).await;
    assert_eq!(record.pause_token_ids.len(), 1);
    assert_eq!(record.current_node_name.as_deref(), Some("ask"));

    manager
        .resume_execution(&id, "ask", json!({"text": "42"}))
        .unwrap();

    let record = wait_for(&manager, &id, |s| s.is_terminal()).await;
    assert_eq!(record.status, ExecutionStatus::Completed);
    assert_eq!(record.state["answer"], json!({"text": "42"}));
    assert!(record.pause_token_ids.is_empty());
}

#[tokio::test]
async fn test_paused_events_pair_with_resumed() {
    let manager = manager();
    let wf = workflow(json!(["ask", "ask"]));

    let id = manager.start_execution(&wf, None).unwrap();
    let mut events = manager.get_runtime(&id).unwrap().subscribe_all();

    for _ in 0..2 {
        wait_for(&manager, &id, |s| s == ExecutionStatus::Paused).await;
        manager.resume_execution(&id, "ask", json!("go")).unwrap();
        // Let the resumed node finish before pausing again.
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    wait_for(&manager, &id, |s| s.is_terminal()).await;

    let mut paused = 0;
    let mut resumed = 0;
    while let Ok(event) = events.try_recv() {
        match event.event {
            EventType::WorkflowPaused => paused += 1,
            EventType::WorkflowResumed => resumed += 1,
            _ => {}
        }
    }
    assert_eq!(paused, 2);
    assert_eq!(resumed, 2);
}

#[tokio::test]
async fn test_resume_completes_before_next_node_executes() {
    let manager = manager();
    let wf = workflow(json!(["ask", {"put": {"path": "after", "value": true}}]));

    let id = manager.start_execution(&wf, None).unwrap();
    let mut events = manager.get_runtime(&id).unwrap().subscribe_all();
    wait_for(&manager, &id, |s| s == ExecutionStatus::Paused).await;

    manager.resume_execution(&id, "ask", json!("ok")).unwrap();
    wait_for(&manager, &id, |s| s.is_terminal()).await;

    // workflow:resumed is delivered before the next node:executing.
    let mut saw_resumed = false;
    while let Ok(event) = events.try_recv() {
        match event.event {
            EventType::WorkflowResumed => saw_resumed = true,
            EventType::NodeExecuting if event.data["nodeName"] == "put" => {
                assert!(saw_resumed, "put executed before workflow:resumed");
            }
            _ => {}
        }
    }
    assert!(saw_resumed);
}

#[tokio::test]
async fn test_cancellation_rejects_tokens_and_stops_flow() {
    let manager = manager();
    let wf = workflow(json!(["ask", {"put": {"path": "after", "value": true}}]));

    let id = manager.start_execution(&wf, None).unwrap();
    let mut events = manager.get_runtime(&id).unwrap().subscribe_all();
    wait_for(&manager, &id, |s| s == ExecutionStatus::Paused).await;

    manager.cancel_execution(&id).unwrap();
    let record = wait_for(&manager, &id, |s| s.is_terminal()).await;
    assert_eq!(record.status, ExecutionStatus::Cancelled);
    assert!(record.pause_token_ids.is_empty());
    assert_eq!(record.state.get("after"), None);

    tokio::time::sleep(Duration::from_millis(30)).await;
    // After cancellation no further node:executing events appear.
    let mut saw_cancel_edge = false;
    while let Ok(event) = events.try_recv() {
        if event.event == EventType::NodeExecuting {
            assert_eq!(event.data["nodeName"], "ask");
        }
        if event.event == EventType::NodeCompleted && event.data["edge"] == "error" {
            saw_cancel_edge = true;
        }
        assert_ne!(event.event, EventType::WorkflowCompleted);
    }
    assert!(saw_cancel_edge);
}

#[tokio::test]
async fn test_state_updated_events_carry_paths() {
    let manager = manager();
    let wf = workflow(json!([{"put": {"path": "deep.nested.value", "value": 7}}]));

    let id = manager.start_execution(&wf, None).unwrap();
    let mut updated = manager
        .get_runtime(&id)
        .unwrap()
        .subscribe(EventType::StateUpdated);

    wait_for(&manager, &id, |s| s.is_terminal()).await;
    let event = updated.try_recv().unwrap();
    assert_eq!(event.data["path"], "deep.nested.value");
    assert_eq!(event.data["newValue"], json!(7));
}

#[tokio::test]
async fn test_malformed_definition_rejected_before_start() {
    let manager = manager();
    let bad = WorkflowDefinition::from_value(&json!({
        "id": "bad",
        "nodes": [["put", [], "extra"]],
    }));
    assert!(matches!(bad, Err(FlowError::Validation(_))));

    // Nothing was registered with the manager.
    assert!(manager.is_empty());
}
