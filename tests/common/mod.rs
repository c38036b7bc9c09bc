#![allow(dead_code)]

pub mod strategies;

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

use conductor_core::events::PublishedEvent;
use conductor_core::orchestration::{LinearWorkflowGraph, TaskSpec, WorkflowGraph};
use conductor_core::test_helpers::{
    setup_test_environment, test_config, RecordingTransport, ScriptedDispatcher,
};
use conductor_core::{
    ConductorConfig, DispatchReport, Execution, ExecutionStatus, OrchestrationCore,
    OrchestrationCoreBuilder, OrchestrationEvent, WorkflowInstance,
};

pub const LEAF: &str = "core.local";
pub const SEQUENCE: &str = "examples.sequence";
pub const FAN_OUT: &str = "examples.fan_out";
pub const PARENT: &str = "examples.parent";

/// Workflows every harness knows about:
/// - `examples.sequence`: two leaf tasks, `task1` then `task2`
/// - `examples.fan_out`: one task fanned out over three items, two at a time
/// - `examples.parent`: a single task that runs `examples.sequence`
pub fn standard_graphs() -> Vec<(&'static str, Arc<dyn WorkflowGraph>)> {
    vec![
        (
            SEQUENCE,
            Arc::new(LinearWorkflowGraph::new(vec![
                TaskSpec::new("task1", LEAF),
                TaskSpec::new("task2", LEAF),
            ])),
        ),
        (
            FAN_OUT,
            Arc::new(LinearWorkflowGraph::new(vec![TaskSpec::new("fan", LEAF)
                .with_items(vec![json!("a"), json!("b"), json!("c")], Some(2))])),
        ),
        (
            PARENT,
            Arc::new(LinearWorkflowGraph::new(vec![TaskSpec::new("sub", SEQUENCE)])),
        ),
    ]
}

pub struct TestHarness {
    pub core: OrchestrationCore,
    pub dispatcher: Arc<ScriptedDispatcher>,
    pub transport: Arc<RecordingTransport>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::build(test_config(), RecordingTransport::new(), |builder| builder)
    }

    pub fn with_config(config: ConductorConfig) -> Self {
        Self::build(config, RecordingTransport::new(), |builder| builder)
    }

    /// Full control over configuration, callback transport and extra builder steps
    pub fn build(
        config: ConductorConfig,
        transport: RecordingTransport,
        customize: impl FnOnce(OrchestrationCoreBuilder) -> OrchestrationCoreBuilder,
    ) -> Self {
        setup_test_environment();

        let dispatcher = Arc::new(ScriptedDispatcher::new());
        let transport = Arc::new(transport);
        let mut builder = OrchestrationCore::builder()
            .with_config(config)
            .with_dispatcher(dispatcher.clone())
            .with_callback_transport(transport.clone());
        for (action_ref, graph) in standard_graphs() {
            builder = builder.register_graph(action_ref, graph);
        }
        let core = customize(builder)
            .build()
            .expect("Failed to build orchestration core");

        Self {
            core,
            dispatcher,
            transport,
        }
    }

    pub async fn request(&self, action_ref: &str) -> Execution {
        self.request_execution(Execution::new(action_ref, json!({})))
            .await
    }

    pub async fn request_execution(&self, execution: Execution) -> Execution {
        self.core
            .request(execution)
            .await
            .expect("Request should succeed")
            .execution
    }

    pub async fn get(&self, execution_id: Uuid) -> Execution {
        self.core
            .get(execution_id)
            .await
            .expect("Execution should exist")
    }

    pub async fn status(&self, execution_id: Uuid) -> ExecutionStatus {
        self.get(execution_id).await.status
    }

    pub async fn children(&self, execution_id: Uuid) -> Vec<Execution> {
        self.core
            .children(execution_id)
            .await
            .expect("Children query should succeed")
    }

    pub async fn only_child(&self, execution_id: Uuid) -> Execution {
        let mut children = self.children(execution_id).await;
        assert_eq!(children.len(), 1, "Expected exactly one child");
        children.remove(0)
    }

    /// Child of a workflow execution running the given task
    pub async fn child_for_task(&self, execution_id: Uuid, task_id: &str) -> Execution {
        let instance = self.workflow_instance(execution_id).await;
        let tasks = self
            .core
            .coordinator()
            .workflows()
            .tasks_for_workflow(instance.id)
            .await
            .expect("Tasks should load");
        let task = tasks
            .iter()
            .find(|task| task.task_id == task_id)
            .unwrap_or_else(|| panic!("Task {task_id} was never started"));
        self.children(execution_id)
            .await
            .into_iter()
            .find(|child| {
                child
                    .workflow_task()
                    .is_some_and(|r| r.task_instance_id == task.id)
            })
            .unwrap_or_else(|| panic!("No execution for task {task_id}"))
    }

    pub async fn workflow_instance(&self, execution_id: Uuid) -> WorkflowInstance {
        self.core
            .coordinator()
            .workflows()
            .find_instance_for_execution(execution_id)
            .await
            .expect("Workflow store should answer")
            .expect("Workflow instance should exist")
    }

    pub async fn succeed(&self, execution_id: Uuid, result: Value) -> Execution {
        self.core
            .handle_dispatch_report(execution_id, DispatchReport::succeeded(result))
            .await
            .expect("Report should apply")
    }

    pub async fn report_canceled(&self, execution_id: Uuid) -> Execution {
        self.core
            .handle_dispatch_report(execution_id, DispatchReport::canceled())
            .await
            .expect("Report should apply")
    }

    pub async fn cancel(&self, execution_id: Uuid) -> Execution {
        self.core
            .request_cancellation(execution_id, "stanley")
            .await
            .expect("Cancellation should succeed")
    }

    /// Every execution beneath `execution_id`
    pub async fn descendants(&self, execution_id: Uuid) -> Vec<Execution> {
        let mut found = Vec::new();
        let mut frontier = vec![execution_id];
        while let Some(next) = frontier.pop() {
            for child in self.children(next).await {
                frontier.push(child.id);
                found.push(child);
            }
        }
        found
    }

    /// Wait until the execution reaches `status`, giving spawned timers a chance to run
    pub async fn wait_for_status(&self, execution_id: Uuid, status: ExecutionStatus) -> Execution {
        for _ in 0..200 {
            let current = self.get(execution_id).await;
            if current.status == status {
                return current;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("Execution {execution_id} never reached {status}");
    }
}

/// Everything published so far, without waiting
pub fn drain_events(receiver: &mut broadcast::Receiver<PublishedEvent>) -> Vec<OrchestrationEvent> {
    let mut events = Vec::new();
    while let Ok(published) = receiver.try_recv() {
        events.push(published.event);
    }
    events
}
