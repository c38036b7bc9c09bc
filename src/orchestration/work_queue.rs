//! # Work Queue
//!
//! Follow-up work produced while handling one request. Every step that would otherwise
//! recurse (a settled child notifying its workflow, a finished workflow notifying its
//! parent, new children being admitted) pushes an item here instead, and the orchestrator
//! drains the queue in FIFO order before returning to the caller.

use std::collections::VecDeque;
use uuid::Uuid;

use super::workflow_coordinator::CompletionOutcome;
use crate::dispatcher::DispatchReport;
use crate::models::Execution;
use crate::state_machine::states::ExecutionStatus;

#[derive(Debug, Clone, PartialEq)]
pub enum WorkItem {
    /// Run admission control for a freshly created execution
    Admit(Execution),
    /// Hand a scheduled execution to the dispatcher
    Dispatch(Uuid),
    /// Apply a dispatcher report
    Report(Uuid, DispatchReport),
    /// An execution reached a terminal status
    Settled(Execution),
    /// A workflow execution settled in `paused`
    Paused(Execution),
    /// Re-decide a node after its subtree changed
    Reevaluate(Uuid),
}

#[derive(Debug, Default)]
pub struct WorkQueue {
    items: VecDeque<WorkItem>,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_item(item: WorkItem) -> Self {
        let mut queue = Self::new();
        queue.push(item);
        queue
    }

    pub fn push(&mut self, item: WorkItem) {
        self.items.push_back(item);
    }

    pub fn pop(&mut self) -> Option<WorkItem> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Queue the follow-ups of a workflow advancement
    pub fn extend_outcome(&mut self, outcome: CompletionOutcome) {
        for child in outcome.children {
            self.push(WorkItem::Admit(child));
        }
        if let Some(owner) = outcome.finalized {
            self.push_settled(owner);
        }
    }

    /// Queue the follow-up for an execution that just changed status
    pub fn push_settled(&mut self, execution: Execution) {
        if execution.status.is_terminal() {
            self.push(WorkItem::Settled(execution));
        } else if execution.status == ExecutionStatus::Paused {
            self.push(WorkItem::Paused(execution));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_outcome_admits_children_before_settling_owner() {
        let child = Execution::new("core.local", json!({}));
        let mut owner = Execution::new("examples.wf", json!({}));
        owner.status = ExecutionStatus::Succeeded;

        let mut queue = WorkQueue::new();
        queue.extend_outcome(CompletionOutcome {
            children: vec![child.clone()],
            finalized: Some(owner.clone()),
        });

        assert_eq!(queue.pop(), Some(WorkItem::Admit(child)));
        assert_eq!(queue.pop(), Some(WorkItem::Settled(owner)));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_non_settled_status_queues_nothing() {
        let mut queue = WorkQueue::new();
        let mut execution = Execution::new("core.local", json!({}));
        execution.status = ExecutionStatus::Running;
        queue.push_settled(execution.clone());
        assert!(queue.is_empty());

        execution.status = ExecutionStatus::Paused;
        queue.push_settled(execution.clone());
        assert_eq!(queue.pop(), Some(WorkItem::Paused(execution)));
    }
}
