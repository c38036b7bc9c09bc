//! # Workflow Graph Evaluation
//!
//! The completion coordinator asks a [`WorkflowGraph`] what happens next after every
//! change to a workflow instance: advance to new tasks, finish with a status, or wait.
//! How a graph is described is up to the implementation; [`LinearWorkflowGraph`] runs
//! an ordered list of task specs.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Debug;
use std::sync::Arc;

use crate::errors::{OrchestrationError, OrchestrationResult};
use crate::models::{TaskInstance, WorkflowInstance};
use crate::state_machine::states::WorkflowStatus;

/// One task the graph wants started
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub task_id: String,
    pub action_ref: String,
    #[serde(default)]
    pub parameters: Value,
    #[serde(default)]
    pub route: usize,
    /// Scheduling delay applied to the task's executions, in milliseconds
    #[serde(default)]
    pub delay: Option<u64>,
    /// Fan out one execution per item
    #[serde(default)]
    pub with_items: Option<Vec<Value>>,
    #[serde(default)]
    pub concurrency: Option<usize>,
}

impl TaskSpec {
    pub fn new(task_id: impl Into<String>, action_ref: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            action_ref: action_ref.into(),
            parameters: Value::Object(Default::default()),
            route: 0,
            delay: None,
            with_items: None,
            concurrency: None,
        }
    }

    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_delay(mut self, delay_ms: u64) -> Self {
        self.delay = Some(delay_ms);
        self
    }

    pub fn with_items(mut self, items: Vec<Value>, concurrency: Option<usize>) -> Self {
        self.with_items = Some(items);
        self.concurrency = concurrency;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GraphDecision {
    Advance(Vec<TaskSpec>),
    Complete(WorkflowStatus),
    Wait,
}

pub trait WorkflowGraph: Send + Sync + Debug {
    /// Decide the next step from the instance and all of its task instances
    fn evaluate(&self, instance: &WorkflowInstance, tasks: &[TaskInstance]) -> GraphDecision;

    /// Workflow output rendered on completion
    fn output(&self, _tasks: &[TaskInstance]) -> Option<Value> {
        None
    }
}

/// Runs task specs one after another; the first task that does not succeed ends the
/// workflow with that task's status.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearWorkflowGraph {
    tasks: Vec<TaskSpec>,
}

impl LinearWorkflowGraph {
    pub fn new(tasks: Vec<TaskSpec>) -> Self {
        Self { tasks }
    }

    pub fn tasks(&self) -> &[TaskSpec] {
        &self.tasks
    }
}

impl WorkflowGraph for LinearWorkflowGraph {
    fn evaluate(&self, _instance: &WorkflowInstance, tasks: &[TaskInstance]) -> GraphDecision {
        for spec in &self.tasks {
            let Some(task) = tasks.iter().find(|task| task.task_id == spec.task_id) else {
                return GraphDecision::Advance(vec![spec.clone()]);
            };
            if !task.status.is_terminal() {
                return GraphDecision::Wait;
            }
            if task.status != WorkflowStatus::Succeeded {
                return GraphDecision::Complete(task.status);
            }
        }
        GraphDecision::Complete(WorkflowStatus::Succeeded)
    }

    /// Result of the last task that ran
    fn output(&self, tasks: &[TaskInstance]) -> Option<Value> {
        self.tasks
            .iter()
            .rev()
            .find_map(|spec| tasks.iter().find(|task| task.task_id == spec.task_id))
            .and_then(|task| task.result.clone())
    }
}

/// Workflow graphs by the action they implement
#[derive(Debug, Default)]
pub struct WorkflowGraphRegistry {
    graphs: DashMap<String, Arc<dyn WorkflowGraph>>,
}

impl WorkflowGraphRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, action_ref: impl Into<String>, graph: Arc<dyn WorkflowGraph>) {
        self.graphs.insert(action_ref.into(), graph);
    }

    pub fn contains(&self, action_ref: &str) -> bool {
        self.graphs.contains_key(action_ref)
    }

    pub fn get(&self, action_ref: &str) -> OrchestrationResult<Arc<dyn WorkflowGraph>> {
        self.graphs
            .get(action_ref)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| {
                OrchestrationError::Internal(format!(
                    "No workflow graph registered for {action_ref}"
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::states::ExecutionStatus;
    use serde_json::json;
    use uuid::Uuid;

    fn graph() -> LinearWorkflowGraph {
        LinearWorkflowGraph::new(vec![
            TaskSpec::new("task1", "core.local"),
            TaskSpec::new("task2", "core.local"),
        ])
    }

    fn task(instance: &WorkflowInstance, task_id: &str, status: ExecutionStatus) -> TaskInstance {
        let mut task = TaskInstance::new(instance.id, task_id, 0, "core.local", json!({}));
        task.record_outcome(None, status, Some(json!(task_id)));
        task
    }

    #[test]
    fn test_linear_graph_advances_in_order() {
        let instance = WorkflowInstance::new(Uuid::new_v4(), "examples.seq");
        let graph = graph();

        match graph.evaluate(&instance, &[]) {
            GraphDecision::Advance(specs) => assert_eq!(specs[0].task_id, "task1"),
            other => panic!("unexpected decision {other:?}"),
        }

        let first = task(&instance, "task1", ExecutionStatus::Running);
        assert_eq!(graph.evaluate(&instance, &[first]), GraphDecision::Wait);

        let first = task(&instance, "task1", ExecutionStatus::Succeeded);
        match graph.evaluate(&instance, &[first.clone()]) {
            GraphDecision::Advance(specs) => assert_eq!(specs[0].task_id, "task2"),
            other => panic!("unexpected decision {other:?}"),
        }

        let second = task(&instance, "task2", ExecutionStatus::Succeeded);
        let tasks = [first, second];
        assert_eq!(
            graph.evaluate(&instance, &tasks),
            GraphDecision::Complete(WorkflowStatus::Succeeded)
        );
        assert_eq!(graph.output(&tasks), Some(json!("task2")));
    }

    #[test]
    fn test_linear_graph_stops_on_unsuccessful_task() {
        let instance = WorkflowInstance::new(Uuid::new_v4(), "examples.seq");
        let first = task(&instance, "task1", ExecutionStatus::Canceled);
        assert_eq!(
            graph().evaluate(&instance, &[first]),
            GraphDecision::Complete(WorkflowStatus::Canceled)
        );
    }

    #[test]
    fn test_registry_lookup() {
        let registry = WorkflowGraphRegistry::new();
        registry.register("examples.seq", Arc::new(graph()));
        assert!(registry.contains("examples.seq"));
        assert!(registry.get("examples.other").is_err());
    }
}
