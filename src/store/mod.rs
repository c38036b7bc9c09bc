//! # Stores
//!
//! Persistence seams for executions and workflow bookkeeping. Every write carries an
//! optimistic precondition: execution writes are checked against the last-known status,
//! workflow writes against the last-read revision. A failed precondition is a
//! `WriteConflict`; the caller re-reads and re-decides.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::fmt::Debug;
use uuid::Uuid;

use crate::errors::OrchestrationResult;
use crate::models::{Execution, ExecutionContext, TaskInstance, WorkflowInstance};
use crate::state_machine::states::ExecutionStatus;

pub use memory::{InMemoryExecutionStore, InMemoryWorkflowStore};

/// Durable record of every execution
#[async_trait]
pub trait ExecutionStore: Send + Sync + Debug {
    async fn get(&self, id: Uuid) -> OrchestrationResult<Execution>;

    async fn query(&self, filter: &ExecutionFilter) -> OrchestrationResult<Vec<Execution>>;

    async fn create(&self, execution: Execution) -> OrchestrationResult<Execution>;

    /// Apply `update` only if the stored status still equals `expected_status`
    async fn compare_and_set(
        &self,
        id: Uuid,
        expected_status: ExecutionStatus,
        update: ExecutionUpdate,
    ) -> OrchestrationResult<Execution>;
}

/// Query filter; every populated field must match
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionFilter {
    pub action_ref: Option<String>,
    pub statuses: Vec<ExecutionStatus>,
    pub parent_id: Option<Uuid>,
    /// Top-level parameter values that must be equal
    pub parameters: Vec<(String, Value)>,
    pub exclude_id: Option<Uuid>,
}

impl ExecutionFilter {
    /// Children are found through the weak `context.parent` back-reference
    pub fn children_of(parent_id: Uuid) -> Self {
        Self {
            parent_id: Some(parent_id),
            ..Self::default()
        }
    }

    pub fn with_action_ref(mut self, action_ref: impl Into<String>) -> Self {
        self.action_ref = Some(action_ref.into());
        self
    }

    pub fn with_statuses(mut self, statuses: &[ExecutionStatus]) -> Self {
        self.statuses = statuses.to_vec();
        self
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: Value) -> Self {
        self.parameters.push((name.into(), value));
        self
    }

    pub fn excluding(mut self, id: Uuid) -> Self {
        self.exclude_id = Some(id);
        self
    }

    pub fn matches(&self, execution: &Execution) -> bool {
        if self.exclude_id == Some(execution.id) {
            return false;
        }
        if let Some(action_ref) = &self.action_ref {
            if &execution.action_ref != action_ref {
                return false;
            }
        }
        if !self.statuses.is_empty() && !self.statuses.contains(&execution.status) {
            return false;
        }
        if let Some(parent_id) = self.parent_id {
            if execution.parent_id() != Some(parent_id) {
                return false;
            }
        }
        self.parameters
            .iter()
            .all(|(name, value)| execution.parameter(name) == Some(value))
    }
}

/// Fields written by a compare-and-set
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionUpdate {
    pub status: ExecutionStatus,
    pub result: Option<Value>,
    pub context: Option<ExecutionContext>,
    pub end_timestamp: Option<DateTime<Utc>>,
}

impl ExecutionUpdate {
    pub fn status(status: ExecutionStatus) -> Self {
        Self {
            status,
            result: None,
            context: None,
            end_timestamp: None,
        }
    }

    pub fn with_result(mut self, result: Option<Value>) -> Self {
        self.result = result;
        self
    }

    pub fn with_context(mut self, context: ExecutionContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_end_timestamp(mut self, end_timestamp: DateTime<Utc>) -> Self {
        self.end_timestamp = Some(end_timestamp);
        self
    }

    /// Apply onto a stored record; `None` fields leave the record untouched
    pub fn apply(self, execution: &mut Execution) {
        execution.status = self.status;
        if let Some(result) = self.result {
            execution.result = Some(result);
        }
        if let Some(context) = self.context {
            execution.context = context;
        }
        if let Some(end_timestamp) = self.end_timestamp {
            execution.end_timestamp = Some(end_timestamp);
        }
    }
}

/// Workflow instance and task instance persistence
#[async_trait]
pub trait WorkflowStore: Send + Sync + Debug {
    async fn get_instance(&self, id: Uuid) -> OrchestrationResult<WorkflowInstance>;

    /// The instance orchestrating `execution_id`, if one was started
    async fn find_instance_for_execution(
        &self,
        execution_id: Uuid,
    ) -> OrchestrationResult<Option<WorkflowInstance>>;

    async fn get_task(&self, id: Uuid) -> OrchestrationResult<TaskInstance>;

    async fn tasks_for_workflow(
        &self,
        workflow_instance_id: Uuid,
    ) -> OrchestrationResult<Vec<TaskInstance>>;

    /// Atomically persist an instance together with its touched and new tasks.
    ///
    /// Each record's `revision` must equal the stored revision (new records must not
    /// exist yet). On success every written record's revision is incremented.
    async fn commit(&self, commit: WorkflowCommit) -> OrchestrationResult<WorkflowInstance>;
}

/// One read-modify-write of a workflow instance
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowCommit {
    pub instance: WorkflowInstance,
    /// Set when the instance itself is being created
    pub create_instance: bool,
    pub updated_tasks: Vec<TaskInstance>,
    pub new_tasks: Vec<TaskInstance>,
}

impl WorkflowCommit {
    pub fn create(instance: WorkflowInstance, tasks: Vec<TaskInstance>) -> Self {
        Self {
            instance,
            create_instance: true,
            updated_tasks: Vec::new(),
            new_tasks: tasks,
        }
    }

    pub fn update(instance: WorkflowInstance) -> Self {
        Self {
            instance,
            create_instance: false,
            updated_tasks: Vec::new(),
            new_tasks: Vec::new(),
        }
    }
}
