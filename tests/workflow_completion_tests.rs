mod common;

use common::{drain_events, TestHarness, FAN_OUT, LEAF, SEQUENCE};
use futures::future::join_all;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use conductor_core::coordination::LocalLockService;
use conductor_core::orchestration::{LinearWorkflowGraph, TaskSpec};
use conductor_core::test_helpers::{
    test_config, FlakyLockService, FlakyWorkflowStore, RecordingTransport,
};
use conductor_core::{
    ConductorConfig, Execution, ExecutionStatus, OrchestrationError, OrchestrationEvent,
    WorkflowStatus,
};

const WIDE: &str = "examples.wide_fan_out";
const WIDTH: usize = 8;

fn wide_harness(config: ConductorConfig, locks: bool) -> TestHarness {
    TestHarness::build(config, RecordingTransport::new(), |builder| {
        let items = (0..WIDTH).map(|i| json!(i)).collect();
        let builder = builder.register_graph(
            WIDE,
            Arc::new(LinearWorkflowGraph::new(vec![
                TaskSpec::new("fan", LEAF).with_items(items, None)
            ])),
        );
        if locks {
            builder.with_lock_service(Arc::new(LocalLockService::new()))
        } else {
            builder
        }
    })
}

/// Settle every item of the wide fan-out from concurrent tasks and check the task was
/// recorded exactly once
async fn settle_items_concurrently(harness: &TestHarness) {
    let root = harness.request(WIDE).await;
    let items = harness.children(root.id).await;
    assert_eq!(items.len(), WIDTH);
    let mut events = harness.core.subscribe();

    let handles = items.into_iter().map(|item| {
        let core = harness.core.clone();
        tokio::spawn(async move {
            core.handle_dispatch_report(
                item.id,
                conductor_core::DispatchReport::succeeded(json!(item.id.to_string())),
            )
            .await
        })
    });
    for joined in join_all(handles).await {
        let settled = joined.expect("task panicked").expect("report should apply");
        assert_eq!(settled.status, ExecutionStatus::Succeeded);
    }

    assert_eq!(harness.status(root.id).await, ExecutionStatus::Succeeded);
    let instance = harness.workflow_instance(root.id).await;
    assert_eq!(instance.status, WorkflowStatus::Succeeded);
    assert_eq!(instance.sequence.len(), 1, "task recorded exactly once");

    let completions = drain_events(&mut events)
        .into_iter()
        .filter(|event| matches!(event, OrchestrationEvent::TaskCompleted { .. }))
        .count();
    assert_eq!(completions, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_item_completions_with_named_locks() {
    let harness = wide_harness(test_config(), true);
    settle_items_concurrently(&harness).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_item_completions_with_revision_checks_only() {
    let mut config = test_config();
    config.workflow_engine.max_conflict_retries = 50;
    let harness = wide_harness(config, false);
    settle_items_concurrently(&harness).await;
}

#[tokio::test]
async fn test_fan_out_respects_concurrency() {
    let harness = TestHarness::new();
    let root = harness.request(FAN_OUT).await;

    let mut items = harness.children(root.id).await;
    assert_eq!(items.len(), 2);
    items.sort_by_key(|item| item.workflow_task().and_then(|r| r.item_index));
    assert_eq!(items[0].parameter("item"), Some(&json!("a")));
    assert_eq!(items[1].parameter("item"), Some(&json!("b")));

    harness.succeed(items[0].id, json!("A")).await;
    let children = harness.children(root.id).await;
    assert_eq!(children.len(), 3);
    let third = children
        .iter()
        .find(|child| child.workflow_task().and_then(|r| r.item_index) == Some(2))
        .expect("third item requested once a slot frees up")
        .clone();
    assert_eq!(third.parameter("item"), Some(&json!("c")));

    harness.succeed(items[1].id, json!("B")).await;
    assert_eq!(harness.status(root.id).await, ExecutionStatus::Running);
    harness.succeed(third.id, json!("C")).await;

    let root = harness.get(root.id).await;
    assert_eq!(root.status, ExecutionStatus::Succeeded);
    let tasks = root.result.unwrap()["tasks"].as_array().unwrap().clone();
    assert_eq!(tasks.len(), 1);
}

#[tokio::test]
async fn test_failed_item_fails_the_workflow_once_siblings_finish() {
    let harness = TestHarness::new();
    let root = harness.request(FAN_OUT).await;
    let items = harness.children(root.id).await;

    harness
        .core
        .handle_dispatch_report(items[0].id, conductor_core::DispatchReport::failed("boom"))
        .await
        .unwrap();
    assert_eq!(harness.status(root.id).await, ExecutionStatus::Running);

    for child in harness.children(root.id).await {
        if child.status == ExecutionStatus::Running {
            harness.succeed(child.id, json!("ok")).await;
        }
    }
    // The last item may only be requested after another one finishes
    for child in harness.children(root.id).await {
        if child.status == ExecutionStatus::Running {
            harness.succeed(child.id, json!("ok")).await;
        }
    }

    assert_eq!(harness.status(root.id).await, ExecutionStatus::Failed);
}

async fn item(harness: &TestHarness, root_id: Uuid, index: usize) -> Execution {
    harness
        .children(root_id)
        .await
        .into_iter()
        .find(|child| child.workflow_task().and_then(|r| r.item_index) == Some(index))
        .expect("item requested")
}

#[tokio::test]
async fn test_canceled_item_with_later_successes_fails_the_workflow() {
    let harness = TestHarness::new();
    let root = harness.request(FAN_OUT).await;

    let first = item(&harness, root.id, 0).await;
    harness.cancel(first.id).await;
    harness.report_canceled(first.id).await;
    assert_eq!(harness.status(root.id).await, ExecutionStatus::Running);

    let second = item(&harness, root.id, 1).await;
    harness.succeed(second.id, json!("B")).await;
    let third = item(&harness, root.id, 2).await;
    harness.succeed(third.id, json!("C")).await;

    assert_eq!(harness.status(root.id).await, ExecutionStatus::Failed);
}

#[tokio::test]
async fn test_canceling_the_last_active_item_cancels_the_workflow() {
    let harness = TestHarness::new();
    let root = harness.request(FAN_OUT).await;

    harness.succeed(item(&harness, root.id, 0).await.id, json!("A")).await;
    harness.succeed(item(&harness, root.id, 1).await.id, json!("B")).await;
    let last = item(&harness, root.id, 2).await;
    assert_eq!(last.status, ExecutionStatus::Running);

    harness.cancel(last.id).await;
    harness.report_canceled(last.id).await;

    assert_eq!(harness.status(root.id).await, ExecutionStatus::Canceled);
}

#[tokio::test]
async fn test_sequence_runs_tasks_in_order() {
    let harness = TestHarness::new();
    let root = harness.request(SEQUENCE).await;

    let task1 = harness.child_for_task(root.id, "task1").await;
    harness.succeed(task1.id, json!("one")).await;
    let task2 = harness.child_for_task(root.id, "task2").await;
    assert_eq!(task2.status, ExecutionStatus::Running);
    harness.succeed(task2.id, json!("two")).await;

    let root = harness.get(root.id).await;
    assert_eq!(root.status, ExecutionStatus::Succeeded);
    let result = root.result.unwrap();
    assert_eq!(result["output"], json!("two"));
    let tasks = result["tasks"].as_array().unwrap();
    assert_eq!(tasks.len(), 2);
    assert_eq!(tasks[0]["task_id"], json!("task1"));
    assert_eq!(tasks[1]["task_id"], json!("task2"));
}

#[tokio::test]
async fn test_failed_task_ends_sequence() {
    let harness = TestHarness::new();
    let root = harness.request(SEQUENCE).await;
    let task1 = harness.only_child(root.id).await;

    harness
        .core
        .handle_dispatch_report(task1.id, conductor_core::DispatchReport::failed("boom"))
        .await
        .unwrap();

    assert_eq!(harness.status(root.id).await, ExecutionStatus::Failed);
    assert_eq!(harness.children(root.id).await.len(), 1);
}

#[tokio::test]
async fn test_write_conflicts_are_retried() {
    let store = Arc::new(FlakyWorkflowStore::with_conflicts(0));
    let store_handle = store.clone();
    let harness = TestHarness::build(test_config(), RecordingTransport::new(), move |builder| {
        builder.with_workflow_store(store)
    });
    let root = harness.request(SEQUENCE).await;
    let task1 = harness.only_child(root.id).await;

    store_handle.inject_conflicts(2);
    harness.succeed(task1.id, json!("one")).await;

    assert_eq!(store_handle.conflicts_injected(), 2);
    let task2 = harness.child_for_task(root.id, "task2").await;
    assert_eq!(task2.status, ExecutionStatus::Running);
}

#[tokio::test]
async fn test_write_conflict_retries_are_bounded() {
    let mut config = test_config();
    config.workflow_engine.max_conflict_retries = 2;
    let store = Arc::new(FlakyWorkflowStore::with_conflicts(0));
    let store_handle = store.clone();
    let harness = TestHarness::build(config, RecordingTransport::new(), move |builder| {
        builder.with_workflow_store(store)
    });
    let root = harness.request(SEQUENCE).await;
    let task1 = harness.only_child(root.id).await;

    store_handle.inject_conflicts(10);
    let result = harness
        .core
        .handle_dispatch_report(task1.id, conductor_core::DispatchReport::succeeded(json!(1)))
        .await;

    assert!(matches!(result, Err(OrchestrationError::WriteConflict { .. })));
    assert_eq!(store_handle.conflicts_injected(), 3);
    // The child keeps its own outcome; the workflow simply did not advance
    assert_eq!(harness.status(task1.id).await, ExecutionStatus::Succeeded);
    assert_eq!(harness.children(root.id).await.len(), 1);

    // Re-driving the completion once the store recovers picks up where it stopped
    store_handle.inject_conflicts(0);
    harness
        .core
        .handle_action_execution_completion(task1.id)
        .await
        .unwrap();
    assert_eq!(harness.children(root.id).await.len(), 2);
}

#[tokio::test]
async fn test_lock_backend_outage_is_retried_then_surfaced() {
    let mut config = test_config();
    config.coordination.connection_retry_attempts = 3;
    let locks = Arc::new(FlakyLockService::with_failures(0));
    let locks_handle = locks.clone();
    let harness = TestHarness::build(config, RecordingTransport::new(), move |builder| {
        builder.with_lock_service(locks)
    });
    let root = harness.request(SEQUENCE).await;
    let task1 = harness.only_child(root.id).await;

    locks_handle.inject_failures(2);
    harness.succeed(task1.id, json!("one")).await;
    let task2 = harness.child_for_task(root.id, "task2").await;

    locks_handle.inject_failures(3);
    let before = locks_handle.attempts();
    let result = harness
        .core
        .handle_dispatch_report(task2.id, conductor_core::DispatchReport::succeeded(json!(2)))
        .await;

    assert!(matches!(result, Err(OrchestrationError::Connection { .. })));
    assert_eq!(locks_handle.attempts() - before, 3);
    assert_eq!(harness.status(root.id).await, ExecutionStatus::Running);
}
