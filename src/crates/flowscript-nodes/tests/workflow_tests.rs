//! End-to-end workflow scenarios over the built-in node set
//!
//! These tests drive complete workflow definitions through the execution
//! manager and verify final state, event sequences, and pause/resume
//! behavior in realistic shapes: branch selection, loop counters, deny-list
//! rejection, the human approval cycle, cancellation mid-wait, and many
//! concurrent executions.

use flowscript_core::{
    EventType, ExecutionManager, ExecutionRecord, ExecutionStatus, ExecutorConfig, NodeRegistry,
    WorkflowDefinition, WorkflowEvent,
};
use flowscript_nodes::register_builtin_nodes;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

fn manager() -> ExecutionManager {
    let registry = Arc::new(NodeRegistry::new());
    register_builtin_nodes(&registry).unwrap();
    ExecutionManager::with_config(
        registry,
        ExecutorConfig::default().with_subscribe_grace(Duration::from_millis(20)),
    )
}

fn workflow(id: &str, initial_state: Value, nodes: Value) -> WorkflowDefinition {
    WorkflowDefinition::from_value(&json!({
        "id": id,
        "name": id,
        "initialState": initial_state,
        "nodes": nodes,
    }))
    .unwrap()
}

async fn wait_for_status(
    manager: &ExecutionManager,
    id: &str,
    predicate: impl Fn(ExecutionStatus) -> bool,
) -> ExecutionRecord {
    for _ in 0..400 {
        let record = manager.get_execution_status(id).unwrap();
        if predicate(record.status) {
            return record;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("execution {} never reached the expected status", id);
}

async fn wait_terminal(manager: &ExecutionManager, id: &str) -> ExecutionRecord {
    wait_for_status(manager, id, |s| s.is_terminal()).await
}

fn drain(rx: &mut tokio::sync::mpsc::UnboundedReceiver<WorkflowEvent>) -> Vec<WorkflowEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_branch_selection() {
    let manager = manager();
    let wf = workflow(
        "branch-selection",
        json!({}),
        json!([
            {"setData": {"path": "x", "value": 1}},
            [
                {"checkValue": {"path": "x", "op": "eq", "value": 1}},
                {
                    "true": [{"setData": {"path": "y", "value": "A"}}],
                    "false": [{"setData": {"path": "y", "value": "B"}}]
                }
            ]
        ]),
    );

    let id = manager.start_execution(&wf, None).unwrap();
    let mut events = manager.get_runtime(&id).unwrap().subscribe_all();

    let record = wait_terminal(&manager, &id).await;
    assert_eq!(record.status, ExecutionStatus::Completed);
    assert_eq!(record.state, json!({"x": 1, "y": "A"}));

    let completions: Vec<WorkflowEvent> = drain(&mut events)
        .into_iter()
        .filter(|e| e.event == EventType::NodeCompleted)
        .collect();
    let check = completions
        .iter()
        .find(|e| e.data["nodeName"] == "checkValue")
        .expect("checkValue completed");
    assert_eq!(check.data["edge"], "true");
}

#[tokio::test]
async fn test_for_each_counter() {
    let manager = manager();
    let wf = workflow(
        "for-each-counter",
        json!({"items": ["a", "b", "c"], "seen": []}),
        json!([[
            {"forEach": {"items": "items", "as": "item"}},
            [{"setData": {"path": "seen", "value": "{{item}}", "mode": "append"}}]
        ]]),
    );

    let id = manager.start_execution(&wf, None).unwrap();
    let mut events = manager.get_runtime(&id).unwrap().subscribe_all();

    let record = wait_terminal(&manager, &id).await;
    assert_eq!(record.status, ExecutionStatus::Completed);
    assert_eq!(
        record.state,
        json!({"items": ["a", "b", "c"], "seen": ["a", "b", "c"], "_loopIndex": 0})
    );

    let controller_edges: Vec<String> = drain(&mut events)
        .into_iter()
        .filter(|e| e.event == EventType::NodeCompleted && e.data["nodeName"] == "forEach")
        .map(|e| e.data["edge"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(
        controller_edges,
        vec![
            "next_iteration",
            "next_iteration",
            "next_iteration",
            "exit_loop"
        ]
    );
}

#[tokio::test]
async fn test_while_with_denylist_violation() {
    let manager = manager();
    let wf = workflow(
        "while-denylist",
        json!({"untouched": true}),
        json!([[
            {"whileCondition": {"condition": "process.exit()"}},
            [{"setData": {"path": "never", "value": 1}}]
        ]]),
    );

    let id = manager.start_execution(&wf, None).unwrap();
    let mut events = manager.get_runtime(&id).unwrap().subscribe_all();

    let record = wait_terminal(&manager, &id).await;
    assert_eq!(record.status, ExecutionStatus::Completed);
    assert_eq!(record.state, json!({"untouched": true}));

    let controller = drain(&mut events)
        .into_iter()
        .find(|e| e.event == EventType::NodeCompleted && e.data["nodeName"] == "whileCondition")
        .expect("controller completed");
    assert_eq!(controller.data["edge"], "exit_loop");
    assert!(controller.data["edgeData"]["error"]
        .as_str()
        .unwrap()
        .contains("forbidden"));
}

#[tokio::test]
async fn test_human_approve_cycle() {
    let manager = manager();
    let wf = workflow("approval", json!({}), json!(["approveExpense"]));

    let id = manager.start_execution(&wf, None).unwrap();
    let mut events = manager.get_runtime(&id).unwrap().subscribe_all();

    let record = wait_for_status(&manager, &id, |s| s == ExecutionStatus::Paused).await;
    assert_eq!(record.pause_token_ids.len(), 1);

    let so_far = drain(&mut events);
    assert!(so_far.iter().any(|e| e.event == EventType::WorkflowPaused));
    assert!(so_far
        .iter()
        .any(|e| e.event == EventType::HumanInputRequired));

    manager
        .resume_execution(&id, "approveExpense", json!({"decision": "approved"}))
        .unwrap();

    let record = wait_terminal(&manager, &id).await;
    assert_eq!(record.status, ExecutionStatus::Completed);
    assert_eq!(record.state["approvalDecision"]["decision"], json!("approved"));
    assert!(record.pause_token_ids.is_empty());

    let names: Vec<&'static str> = drain(&mut events)
        .iter()
        .map(|e| e.event.as_str())
        .collect();
    let position = |name: &str| {
        names
            .iter()
            .position(|n| *n == name)
            .unwrap_or_else(|| panic!("missing event {}", name))
    };
    assert!(position("human:input:received") < position("workflow:resumed"));
    assert!(position("workflow:resumed") < position("node:completed"));
    assert!(position("node:completed") < position("workflow:completed"));

    let completed = drain(&mut events);
    assert!(completed.is_empty(), "no events after workflow:completed");
}

#[tokio::test]
async fn test_human_approve_rejection_edge() {
    let manager = manager();
    let wf = workflow("approval-reject", json!({}), json!(["approveExpense"]));

    let id = manager.start_execution(&wf, None).unwrap();
    let mut events = manager.get_runtime(&id).unwrap().subscribe_all();
    wait_for_status(&manager, &id, |s| s == ExecutionStatus::Paused).await;

    manager
        .resume_execution(&id, "approveExpense", json!({"decision": "rejected"}))
        .unwrap();

    wait_terminal(&manager, &id).await;
    let completion = drain(&mut events)
        .into_iter()
        .find(|e| e.event == EventType::NodeCompleted)
        .unwrap();
    assert_eq!(completion.data["edge"], "rejected");
}

#[tokio::test]
async fn test_cancellation_during_human_wait() {
    let manager = manager();
    let wf = workflow("approval-cancel", json!({}), json!(["approveExpense"]));

    let id = manager.start_execution(&wf, None).unwrap();
    let mut events = manager.get_runtime(&id).unwrap().subscribe_all();
    wait_for_status(&manager, &id, |s| s == ExecutionStatus::Paused).await;

    manager.cancel_execution(&id).unwrap();

    let record = wait_terminal(&manager, &id).await;
    assert_eq!(record.status, ExecutionStatus::Cancelled);
    assert!(record.pause_token_ids.is_empty());

    // Give the node task time to observe the rejection and wind down.
    tokio::time::sleep(Duration::from_millis(30)).await;
    let events = drain(&mut events);
    assert!(!events
        .iter()
        .any(|e| e.event == EventType::WorkflowCompleted));

    // The human node observed the cancellation and returned its error edge.
    let completion = events
        .iter()
        .find(|e| e.event == EventType::NodeCompleted)
        .expect("node completed with error edge");
    assert_eq!(completion.data["edge"], "error");
}

#[tokio::test]
async fn test_resume_with_wrong_node_is_rejected() {
    let manager = manager();
    let wf = workflow("approval-wrong-node", json!({}), json!(["approveExpense"]));

    let id = manager.start_execution(&wf, None).unwrap();
    wait_for_status(&manager, &id, |s| s == ExecutionStatus::Paused).await;

    let result = manager.resume_execution(&id, "someOtherNode", json!({}));
    assert!(result.is_err());

    // The execution is still paused and resumable.
    let record = manager.get_execution_status(&id).unwrap();
    assert_eq!(record.status, ExecutionStatus::Paused);
    manager
        .resume_execution(&id, "approveExpense", json!({"decision": "approved"}))
        .unwrap();
    wait_terminal(&manager, &id).await;
}

#[tokio::test]
async fn test_concurrent_executions_are_isolated() {
    let manager = manager();
    let wf = workflow(
        "concurrent-delay",
        json!({}),
        json!([{"delay": {"duration": 50}}]),
    );

    let mut executions = Vec::new();
    for _ in 0..100 {
        let id = manager.start_execution(&wf, None).unwrap();
        let events = manager.get_runtime(&id).unwrap().subscribe_all();
        executions.push((id, events));
    }

    for (id, _) in &executions {
        let record = wait_terminal(&manager, id).await;
        assert_eq!(record.status, ExecutionStatus::Completed);
    }

    for (id, events) in &mut executions {
        let received = drain(events);
        let names: Vec<&'static str> = received.iter().map(|e| e.event.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "workflow:started",
                "node:executing",
                "node:completed",
                "workflow:completed"
            ],
            "event sequence for {}",
            id
        );
        // No cross-delivery from other executions.
        for event in &received {
            assert_eq!(&event.execution_id, id);
        }
    }

    assert_eq!(manager.get_all_executions().len(), 100);
}

#[tokio::test]
async fn test_nested_for_each_loops_do_not_collide() {
    let manager = manager();
    let wf = workflow(
        "nested-loops",
        json!({"outer": ["x", "y"], "inner": [1, 2, 3], "pairs": []}),
        json!([[
            {"forEach": {"items": "outer", "as": "o"}},
            [[
                {"forEach": {"items": "inner", "as": "i"}},
                [{"setData": {"path": "pairs", "value": "{{o}}{{i}}", "mode": "append"}}]
            ]]
        ]]),
    );

    let id = manager.start_execution(&wf, None).unwrap();
    let record = wait_terminal(&manager, &id).await;
    assert_eq!(record.status, ExecutionStatus::Completed);
    assert_eq!(
        record.state["pairs"],
        json!(["x1", "x2", "x3", "y1", "y2", "y3"])
    );
}

#[tokio::test]
async fn test_human_timeout_returns_timeout_edge() {
    let manager = manager();
    let wf = workflow(
        "approval-timeout",
        json!({}),
        json!([{"approveExpense": {"timeoutMs": 40}}]),
    );

    let id = manager.start_execution(&wf, None).unwrap();
    let mut events = manager.get_runtime(&id).unwrap().subscribe_all();

    let record = wait_terminal(&manager, &id).await;
    assert_eq!(record.status, ExecutionStatus::Completed);

    let completion = drain(&mut events)
        .into_iter()
        .find(|e| e.event == EventType::NodeCompleted)
        .unwrap();
    assert_eq!(completion.data["edge"], "timeout");
}
