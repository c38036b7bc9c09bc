//! # Workflow Instance and Task Instance Models
//!
//! Orchestration bookkeeping for a workflow-typed execution. Both records carry a
//! `revision` that the workflow store checks on commit; a stale revision is a write
//! conflict and the writer must re-read before deciding again.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::state_machine::states::{ExecutionStatus, WorkflowStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub id: Uuid,
    /// The execution this instance orchestrates (weak back-reference)
    pub action_execution: Uuid,
    pub action_ref: String,
    pub status: WorkflowStatus,
    /// Ordered log of task terminal transitions
    pub sequence: Vec<SequenceEntry>,
    pub output: Option<Value>,
    pub revision: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceEntry {
    pub task_instance_id: Uuid,
    pub task_id: String,
    pub route: usize,
    pub status: WorkflowStatus,
    pub recorded_at: DateTime<Utc>,
}

impl WorkflowInstance {
    pub fn new(action_execution: Uuid, action_ref: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            action_execution,
            action_ref: action_ref.into(),
            status: WorkflowStatus::Running,
            sequence: Vec::new(),
            output: None,
            revision: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Current task id, derived from the last sequence entry
    pub fn current_task_id(&self) -> Option<&str> {
        self.sequence.last().map(|entry| entry.task_id.as_str())
    }

    pub fn has_sequence_entry(&self, task_instance_id: Uuid) -> bool {
        self.sequence
            .iter()
            .any(|entry| entry.task_instance_id == task_instance_id)
    }

    /// Append the task's terminal status; a task is recorded at most once
    pub fn record_sequence(&mut self, task: &TaskInstance) -> bool {
        if !task.status.is_terminal() || self.has_sequence_entry(task.id) {
            return false;
        }
        self.sequence.push(SequenceEntry {
            task_instance_id: task.id,
            task_id: task.task_id.clone(),
            route: task.route,
            status: task.status,
            recorded_at: Utc::now(),
        });
        true
    }

    pub fn is_canceling(&self) -> bool {
        matches!(
            self.status,
            WorkflowStatus::Canceling | WorkflowStatus::Canceled
        )
    }

    pub fn is_pausing(&self) -> bool {
        matches!(self.status, WorkflowStatus::Pausing | WorkflowStatus::Paused)
    }
}

/// One item of a fanned-out task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemState {
    pub input: Value,
    /// Assigned when the item's execution is requested; `None` means still queued
    pub execution_id: Option<Uuid>,
    pub status: Option<ExecutionStatus>,
    pub result: Option<Value>,
}

impl ItemState {
    pub fn is_queued(&self) -> bool {
        self.execution_id.is_none()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_some_and(|s| s.is_terminal())
    }

    pub fn is_active(&self) -> bool {
        self.execution_id.is_some()
            && !self.is_terminal()
            && self.status != Some(ExecutionStatus::Paused)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInstance {
    pub id: Uuid,
    pub workflow_instance_id: Uuid,
    pub task_id: String,
    /// Branch index for parallel routes
    pub route: usize,
    pub delay: Option<u64>,
    pub action_ref: String,
    pub parameters: Value,
    pub status: WorkflowStatus,
    /// Present when the task fans out over a list of items
    pub items: Option<Vec<ItemState>>,
    /// Maximum number of item executions in flight at once
    pub concurrency: Option<usize>,
    pub action_executions: Vec<Uuid>,
    /// Index of the item that settled most recently
    #[serde(default)]
    pub last_settled_item: Option<usize>,
    pub result: Option<Value>,
    pub revision: u64,
}

impl TaskInstance {
    pub fn new(
        workflow_instance_id: Uuid,
        task_id: impl Into<String>,
        route: usize,
        action_ref: impl Into<String>,
        parameters: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_instance_id,
            task_id: task_id.into(),
            route,
            delay: None,
            action_ref: action_ref.into(),
            parameters,
            status: WorkflowStatus::Running,
            items: None,
            concurrency: None,
            action_executions: Vec::new(),
            last_settled_item: None,
            result: None,
            revision: 0,
        }
    }

    pub fn with_items(mut self, inputs: Vec<Value>, concurrency: Option<usize>) -> Self {
        self.items = Some(
            inputs
                .into_iter()
                .map(|input| ItemState {
                    input,
                    execution_id: None,
                    status: None,
                    result: None,
                })
                .collect(),
        );
        self.concurrency = concurrency.filter(|c| *c > 0);
        self
    }

    pub fn with_delay(mut self, delay_ms: Option<u64>) -> Self {
        self.delay = delay_ms;
        self
    }

    pub fn is_itemized(&self) -> bool {
        self.items.is_some()
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Record an owned execution reaching `status`. Returns true when something changed.
    pub fn record_outcome(
        &mut self,
        item_index: Option<usize>,
        status: ExecutionStatus,
        result: Option<Value>,
    ) -> bool {
        match (self.items.as_mut(), item_index) {
            (Some(items), Some(index)) => {
                let Some(item) = items.get_mut(index) else {
                    return false;
                };
                if item.status == Some(status) {
                    return false;
                }
                item.status = Some(status);
                if result.is_some() {
                    item.result = result;
                }
                if status.is_terminal() {
                    self.last_settled_item = Some(index);
                }
                true
            }
            _ => {
                let next = WorkflowStatus::from(status);
                if self.status == next {
                    return false;
                }
                self.status = next;
                if result.is_some() {
                    self.result = result;
                }
                true
            }
        }
    }

    /// Queued item indexes that fit under the concurrency limit
    pub fn next_items_to_request(&self) -> Vec<usize> {
        let Some(items) = self.items.as_ref() else {
            return Vec::new();
        };
        let active = items.iter().filter(|item| item.is_active()).count();
        let limit = self.concurrency.unwrap_or(items.len());
        let room = limit.saturating_sub(active);
        items
            .iter()
            .enumerate()
            .filter(|(_, item)| item.is_queued())
            .map(|(index, _)| index)
            .take(room)
            .collect()
    }

    pub fn has_queued_items(&self) -> bool {
        self.items
            .as_ref()
            .is_some_and(|items| items.iter().any(ItemState::is_queued))
    }

    pub fn has_active_items(&self) -> bool {
        self.items
            .as_ref()
            .is_some_and(|items| items.iter().any(ItemState::is_active))
    }

    /// Derive a fanned-out task's status from its items.
    ///
    /// The task is terminal only once every item is terminal. Returns true when the
    /// task status changed.
    pub fn settle_items(&mut self, instance_status: WorkflowStatus) -> bool {
        let Some(items) = self.items.as_ref() else {
            return false;
        };
        let before = self.status;

        if items.iter().all(ItemState::is_terminal) {
            let all_succeeded = items
                .iter()
                .all(|item| item.status == Some(ExecutionStatus::Succeeded));
            self.status = if all_succeeded {
                WorkflowStatus::Succeeded
            } else if matches!(
                instance_status,
                WorkflowStatus::Canceling | WorkflowStatus::Canceled
            ) {
                WorkflowStatus::Canceled
            } else if items.iter().any(|item| {
                matches!(
                    item.status,
                    Some(ExecutionStatus::Failed | ExecutionStatus::Timeout | ExecutionStatus::Abandoned)
                )
            }) {
                WorkflowStatus::Failed
            } else {
                // A canceled item cancels the task only when nothing settled after it
                let last_canceled = self
                    .last_settled_item
                    .and_then(|index| items.get(index))
                    .is_some_and(|item| item.status == Some(ExecutionStatus::Canceled));
                if last_canceled {
                    WorkflowStatus::Canceled
                } else {
                    WorkflowStatus::Failed
                }
            };
            self.result = Some(json!({
                "items": items
                    .iter()
                    .map(|item| json!({"status": item.status, "result": item.result}))
                    .collect::<Vec<_>>()
            }));
        } else if !items.iter().any(ItemState::is_active)
            && matches!(
                instance_status,
                WorkflowStatus::Pausing | WorkflowStatus::Paused
            )
        {
            self.status = WorkflowStatus::Paused;
        } else if self.status == WorkflowStatus::Paused && items.iter().any(ItemState::is_active) {
            self.status = WorkflowStatus::Running;
        }

        self.status != before
    }

    /// Summary used in the owning workflow execution's `result.tasks`
    pub fn summary(&self) -> Value {
        json!({
            "task_id": self.task_id,
            "route": self.route,
            "status": self.status,
            "result": self.result,
            "execution_ids": self.action_executions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fan_out(count: usize, concurrency: Option<usize>) -> TaskInstance {
        let inputs = (0..count).map(|i| json!(i)).collect();
        TaskInstance::new(Uuid::new_v4(), "fan", 0, "core.echo", json!({}))
            .with_items(inputs, concurrency)
    }

    fn assign(task: &mut TaskInstance, index: usize) {
        let id = Uuid::new_v4();
        let items = task.items.as_mut().unwrap();
        items[index].execution_id = Some(id);
        task.action_executions.push(id);
    }

    #[test]
    fn test_sequence_records_task_once() {
        let mut instance = WorkflowInstance::new(Uuid::new_v4(), "examples.wf");
        let mut task = TaskInstance::new(instance.id, "task1", 0, "core.local", json!({}));

        assert!(!instance.record_sequence(&task), "running task is not recorded");

        task.record_outcome(None, ExecutionStatus::Succeeded, Some(json!("ok")));
        assert!(instance.record_sequence(&task));
        assert!(!instance.record_sequence(&task));
        assert_eq!(instance.sequence.len(), 1);
        assert_eq!(instance.current_task_id(), Some("task1"));
    }

    #[test]
    fn test_concurrency_limits_requested_items() {
        let mut task = fan_out(3, Some(2));
        assert_eq!(task.next_items_to_request(), vec![0, 1]);

        assign(&mut task, 0);
        assign(&mut task, 1);
        assert!(task.next_items_to_request().is_empty());

        task.record_outcome(Some(0), ExecutionStatus::Succeeded, None);
        assert_eq!(task.next_items_to_request(), vec![2]);
    }

    #[test]
    fn test_fan_out_not_terminal_until_all_items_terminal() {
        let mut task = fan_out(2, None);
        assign(&mut task, 0);
        assign(&mut task, 1);

        task.record_outcome(Some(0), ExecutionStatus::Succeeded, None);
        assert!(!task.settle_items(WorkflowStatus::Running));
        assert_eq!(task.status, WorkflowStatus::Running);

        task.record_outcome(Some(1), ExecutionStatus::Succeeded, None);
        assert!(task.settle_items(WorkflowStatus::Running));
        assert_eq!(task.status, WorkflowStatus::Succeeded);
    }

    #[test]
    fn test_fan_out_outcome_depends_on_instance_cancellation() {
        let mut task = fan_out(2, None);
        assign(&mut task, 0);
        assign(&mut task, 1);
        task.record_outcome(Some(0), ExecutionStatus::Succeeded, None);
        task.record_outcome(Some(1), ExecutionStatus::Canceled, None);

        let mut canceled = task.clone();
        canceled.settle_items(WorkflowStatus::Canceling);
        assert_eq!(canceled.status, WorkflowStatus::Canceled);

        let mut failed = task.clone();
        failed.record_outcome(Some(0), ExecutionStatus::Failed, None);
        failed.settle_items(WorkflowStatus::Running);
        assert_eq!(failed.status, WorkflowStatus::Failed);

        task.settle_items(WorkflowStatus::Running);
        assert_eq!(task.status, WorkflowStatus::Canceled);
    }

    #[test]
    fn test_canceled_item_followed_by_success_fails_the_task() {
        let mut task = fan_out(2, None);
        assign(&mut task, 0);
        assign(&mut task, 1);
        task.record_outcome(Some(0), ExecutionStatus::Canceled, None);
        task.record_outcome(Some(1), ExecutionStatus::Succeeded, None);
        assert_eq!(task.last_settled_item, Some(1));

        task.settle_items(WorkflowStatus::Running);
        assert_eq!(task.status, WorkflowStatus::Failed);
    }

    #[test]
    fn test_fan_out_pauses_when_nothing_active() {
        let mut task = fan_out(3, Some(1));
        assign(&mut task, 0);
        task.record_outcome(Some(0), ExecutionStatus::Succeeded, None);

        assert!(task.settle_items(WorkflowStatus::Pausing));
        assert_eq!(task.status, WorkflowStatus::Paused);
    }

    #[test]
    fn test_duplicate_outcome_is_not_a_change() {
        let mut task = TaskInstance::new(Uuid::new_v4(), "t", 0, "core.local", json!({}));
        assert!(task.record_outcome(None, ExecutionStatus::Failed, None));
        assert!(!task.record_outcome(None, ExecutionStatus::Failed, None));
    }
}
