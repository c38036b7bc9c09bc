//! In-memory stores used when no external persistence layer is wired in

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use uuid::Uuid;

use super::{ExecutionFilter, ExecutionStore, ExecutionUpdate, WorkflowCommit, WorkflowStore};
use crate::errors::{OrchestrationError, OrchestrationResult};
use crate::models::{Execution, TaskInstance, WorkflowInstance};
use crate::state_machine::states::ExecutionStatus;

#[derive(Debug, Default)]
pub struct InMemoryExecutionStore {
    executions: DashMap<Uuid, Execution>,
}

impl InMemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.executions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executions.is_empty()
    }
}

#[async_trait]
impl ExecutionStore for InMemoryExecutionStore {
    async fn get(&self, id: Uuid) -> OrchestrationResult<Execution> {
        self.executions
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(OrchestrationError::ExecutionNotFound { execution_id: id })
    }

    async fn query(&self, filter: &ExecutionFilter) -> OrchestrationResult<Vec<Execution>> {
        let mut matching: Vec<Execution> = self
            .executions
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        matching.sort_by_key(|execution| execution.start_timestamp);
        Ok(matching)
    }

    async fn create(&self, execution: Execution) -> OrchestrationResult<Execution> {
        match self.executions.entry(execution.id) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(OrchestrationError::Internal(
                format!("Execution {} already exists", execution.id),
            )),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(execution.clone());
                Ok(execution)
            }
        }
    }

    async fn compare_and_set(
        &self,
        id: Uuid,
        expected_status: ExecutionStatus,
        update: ExecutionUpdate,
    ) -> OrchestrationResult<Execution> {
        // The shard write lock makes the check and the write one step
        let mut entry = self
            .executions
            .get_mut(&id)
            .ok_or(OrchestrationError::ExecutionNotFound { execution_id: id })?;

        if entry.status != expected_status {
            return Err(OrchestrationError::write_conflict(
                "execution",
                id,
                expected_status,
                entry.status,
            ));
        }

        update.apply(entry.value_mut());
        Ok(entry.value().clone())
    }
}

#[derive(Debug, Default)]
struct WorkflowTables {
    instances: HashMap<Uuid, WorkflowInstance>,
    tasks: HashMap<Uuid, TaskInstance>,
    by_execution: HashMap<Uuid, Uuid>,
}

/// Workflow store whose commit is atomic across the instance and its tasks
#[derive(Debug, Default)]
pub struct InMemoryWorkflowStore {
    tables: Mutex<WorkflowTables>,
}

impl InMemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowStore for InMemoryWorkflowStore {
    async fn get_instance(&self, id: Uuid) -> OrchestrationResult<WorkflowInstance> {
        self.tables
            .lock()
            .instances
            .get(&id)
            .cloned()
            .ok_or(OrchestrationError::WorkflowInstanceNotFound {
                workflow_instance_id: id,
            })
    }

    async fn find_instance_for_execution(
        &self,
        execution_id: Uuid,
    ) -> OrchestrationResult<Option<WorkflowInstance>> {
        let tables = self.tables.lock();
        Ok(tables
            .by_execution
            .get(&execution_id)
            .and_then(|id| tables.instances.get(id))
            .cloned())
    }

    async fn get_task(&self, id: Uuid) -> OrchestrationResult<TaskInstance> {
        self.tables
            .lock()
            .tasks
            .get(&id)
            .cloned()
            .ok_or(OrchestrationError::TaskInstanceNotFound {
                task_instance_id: id,
            })
    }

    async fn tasks_for_workflow(
        &self,
        workflow_instance_id: Uuid,
    ) -> OrchestrationResult<Vec<TaskInstance>> {
        let mut tasks: Vec<TaskInstance> = self
            .tables
            .lock()
            .tasks
            .values()
            .filter(|task| task.workflow_instance_id == workflow_instance_id)
            .cloned()
            .collect();
        tasks.sort_by(|a, b| a.task_id.cmp(&b.task_id).then(a.route.cmp(&b.route)));
        Ok(tasks)
    }

    async fn commit(&self, commit: WorkflowCommit) -> OrchestrationResult<WorkflowInstance> {
        let mut tables = self.tables.lock();
        let instance_id = commit.instance.id;

        // Check every precondition before writing anything
        if commit.create_instance {
            if let Some(existing) = tables.by_execution.get(&commit.instance.action_execution) {
                return Err(OrchestrationError::write_conflict(
                    "workflow_instance",
                    *existing,
                    "absent",
                    "present",
                ));
            }
        }
        match tables.instances.get(&instance_id) {
            Some(stored) if commit.create_instance => {
                return Err(OrchestrationError::write_conflict(
                    "workflow_instance",
                    instance_id,
                    "absent",
                    format!("revision {}", stored.revision),
                ));
            }
            Some(stored) if stored.revision != commit.instance.revision => {
                return Err(OrchestrationError::write_conflict(
                    "workflow_instance",
                    instance_id,
                    format!("revision {}", commit.instance.revision),
                    format!("revision {}", stored.revision),
                ));
            }
            None if !commit.create_instance => {
                return Err(OrchestrationError::WorkflowInstanceNotFound {
                    workflow_instance_id: instance_id,
                });
            }
            _ => {}
        }

        for task in &commit.updated_tasks {
            let stored = tables
                .tasks
                .get(&task.id)
                .ok_or(OrchestrationError::TaskInstanceNotFound {
                    task_instance_id: task.id,
                })?;
            if stored.revision != task.revision {
                return Err(OrchestrationError::write_conflict(
                    "task_instance",
                    task.id,
                    format!("revision {}", task.revision),
                    format!("revision {}", stored.revision),
                ));
            }
        }
        if let Some(existing) = commit
            .new_tasks
            .iter()
            .find(|task| tables.tasks.contains_key(&task.id))
        {
            return Err(OrchestrationError::write_conflict(
                "task_instance",
                existing.id,
                "absent",
                "present",
            ));
        }

        for mut task in commit.updated_tasks.into_iter().chain(commit.new_tasks) {
            task.revision += 1;
            tables.tasks.insert(task.id, task);
        }

        let mut instance = commit.instance;
        instance.revision += 1;
        instance.updated_at = chrono::Utc::now();
        tables
            .by_execution
            .insert(instance.action_execution, instance.id);
        tables.instances.insert(instance.id, instance.clone());

        Ok(instance)
    }
}
