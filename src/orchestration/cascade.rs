//! # Cascade Controller
//!
//! Tree-wide cancel, pause and resume. Each request starts at the requested node and
//! walks its live descendants depth first, found through the weak `context.parent`
//! back-reference. The walk uses an explicit stack instead of recursion: entering a node
//! changes its status and queues its children, and leaving a workflow node queues a
//! re-evaluation so it converges once its subtree has settled.
//!
//! Upward propagation is not walked here. A child that settles is queued as a
//! [`WorkItem::Settled`] and the completion coordinator advances its parent workflow,
//! which in turn settles and notifies its own parent.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use super::admission::{AdmissionController, AdmissionDecision};
use super::work_queue::{WorkItem, WorkQueue};
use super::workflow_coordinator::WorkflowCompletionCoordinator;
use crate::constants::status_groups::LIVE_STATUSES;
use crate::dispatcher::InFlightRegistry;
use crate::errors::{OrchestrationError, OrchestrationResult};
use crate::logging::log_cascade_operation;
use crate::models::Execution;
use crate::state_machine::states::ExecutionStatus;
use crate::state_machine::ExecutionStateMachine;
use crate::store::{ExecutionFilter, ExecutionUpdate};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Frame {
    Enter(Uuid),
    Exit(Uuid),
}

#[derive(Debug, Clone)]
pub struct CascadeController {
    state_machine: ExecutionStateMachine,
    coordinator: WorkflowCompletionCoordinator,
    in_flight: Arc<InFlightRegistry>,
    admission: Arc<AdmissionController>,
}

impl CascadeController {
    pub fn new(
        state_machine: ExecutionStateMachine,
        coordinator: WorkflowCompletionCoordinator,
        in_flight: Arc<InFlightRegistry>,
        admission: Arc<AdmissionController>,
    ) -> Self {
        Self {
            state_machine,
            coordinator,
            in_flight,
            admission,
        }
    }

    async fn children(
        &self,
        execution_id: Uuid,
        statuses: &[ExecutionStatus],
    ) -> OrchestrationResult<Vec<Execution>> {
        self.state_machine
            .store()
            .query(&ExecutionFilter::children_of(execution_id).with_statuses(statuses))
            .await
    }

    /// Cancel `execution_id` and every live descendant.
    ///
    /// Nodes that are terminal or already canceling are left alone, so repeating a
    /// cancellation does nothing.
    pub async fn cancel(
        &self,
        execution_id: Uuid,
        requester: &str,
        queue: &mut WorkQueue,
    ) -> OrchestrationResult<()> {
        // Surface a missing root as an error rather than a silent no-op
        self.state_machine.current(execution_id).await?;

        let mut stack = vec![Frame::Enter(execution_id)];
        let mut visited = HashSet::new();

        while let Some(frame) = stack.pop() {
            match frame {
                Frame::Enter(id) => {
                    if !visited.insert(id) {
                        continue;
                    }
                    let Some(node) = self.cancel_node(id, requester, queue).await? else {
                        continue;
                    };
                    if node.is_workflow && node.status == ExecutionStatus::Canceling {
                        stack.push(Frame::Exit(id));
                    }
                    for child in self.children(id, LIVE_STATUSES).await? {
                        stack.push(Frame::Enter(child.id));
                    }
                }
                Frame::Exit(id) => queue.push(WorkItem::Reevaluate(id)),
            }
        }
        Ok(())
    }

    async fn cancel_node(
        &self,
        execution_id: Uuid,
        requester: &str,
        queue: &mut WorkQueue,
    ) -> OrchestrationResult<Option<Execution>> {
        let updated = self
            .state_machine
            .update_with_retry(execution_id, |current| {
                if !current.status.is_cancelable() {
                    return None;
                }
                // Nothing was handed to a runner yet, so there is nothing to wait for
                let target = if current.status.is_pre_dispatch() {
                    ExecutionStatus::Canceled
                } else {
                    ExecutionStatus::Canceling
                };
                let mut context = current.context.clone();
                context.cancelled_by = Some(requester.to_string());
                Some(ExecutionUpdate::status(target).with_context(context))
            })
            .await?;

        let Some(node) = updated else {
            debug!(execution_id = %execution_id, "Nothing to cancel");
            return Ok(None);
        };
        log_cascade_operation("cancel", node.id, node.status, requester, None);

        if node.status == ExecutionStatus::Canceled {
            queue.push(WorkItem::Settled(node.clone()));
        } else if node.is_workflow {
            if let Some(outcome) = self
                .coordinator
                .request_workflow_cancellation(node.id)
                .await?
            {
                queue.extend_outcome(outcome);
            }
        } else if !self.in_flight.cancel(node.id) {
            debug!(
                execution_id = %node.id,
                "No in-flight runner to signal, waiting for its report"
            );
        }
        Ok(Some(node))
    }

    /// Pause a workflow execution and its running sub-workflows.
    ///
    /// Plain actions below the node keep running; the workflow settles in `paused` once
    /// nothing is progressing.
    pub async fn pause(
        &self,
        execution_id: Uuid,
        requester: &str,
        queue: &mut WorkQueue,
    ) -> OrchestrationResult<()> {
        let root = self.state_machine.current(execution_id).await?;
        ensure_workflow(&root, "pause")?;

        let mut stack = vec![Frame::Enter(execution_id)];
        while let Some(frame) = stack.pop() {
            match frame {
                Frame::Enter(id) => {
                    let updated = self
                        .state_machine
                        .update_with_retry(id, |current| {
                            if !current.is_workflow || current.status != ExecutionStatus::Running {
                                return None;
                            }
                            let mut context = current.context.clone();
                            context.paused_by = Some(requester.to_string());
                            Some(
                                ExecutionUpdate::status(ExecutionStatus::Pausing)
                                    .with_context(context),
                            )
                        })
                        .await?;
                    let Some(node) = updated else {
                        continue;
                    };
                    log_cascade_operation("pause", node.id, node.status, requester, None);

                    if let Some(outcome) = self.coordinator.request_workflow_pause(id).await? {
                        queue.extend_outcome(outcome);
                    }
                    stack.push(Frame::Exit(id));
                    for child in self.children(id, &[ExecutionStatus::Running]).await? {
                        if child.is_workflow {
                            stack.push(Frame::Enter(child.id));
                        }
                    }
                }
                Frame::Exit(id) => queue.push(WorkItem::Reevaluate(id)),
            }
        }
        Ok(())
    }

    /// Resume a paused workflow execution, its paused sub-workflows and its paused
    /// ancestors.
    ///
    /// The execution is re-admitted first; a denial cancels it instead of resuming.
    pub async fn resume(
        &self,
        execution_id: Uuid,
        requester: &str,
        queue: &mut WorkQueue,
    ) -> OrchestrationResult<AdmissionDecision> {
        let root = self.state_machine.current(execution_id).await?;
        ensure_workflow(&root, "resume")?;
        if root.status != ExecutionStatus::Paused {
            debug!(
                execution_id = %execution_id,
                status = %root.status,
                "Execution is not paused, nothing to resume"
            );
            return Ok(AdmissionDecision::Admitted);
        }

        let decision = self.admission.evaluate(&root).await?;
        if !decision.is_admitted() {
            info!(
                execution_id = %execution_id,
                "Resume refused by admission policy, canceling"
            );
            self.admission.publish_denied(&root, &decision);
            self.cancel(execution_id, requester, queue).await?;
            return Ok(decision);
        }

        let mut stack = vec![execution_id];
        while let Some(id) = stack.pop() {
            if !self.resume_node(id, requester, queue).await? {
                continue;
            }
            for child in self.children(id, &[ExecutionStatus::Paused]).await? {
                if child.is_workflow {
                    stack.push(child.id);
                }
            }
        }

        // Paused ancestors have work progressing again
        let mut parent_id = root.parent_id();
        while let Some(id) = parent_id {
            let parent = self.state_machine.current(id).await?;
            if parent.status != ExecutionStatus::Paused
                || !self.resume_node(id, requester, queue).await?
            {
                break;
            }
            parent_id = parent.parent_id();
        }
        Ok(decision)
    }

    async fn resume_node(
        &self,
        execution_id: Uuid,
        requester: &str,
        queue: &mut WorkQueue,
    ) -> OrchestrationResult<bool> {
        let updated = self
            .state_machine
            .update_with_retry(execution_id, |current| {
                if !current.is_workflow || current.status != ExecutionStatus::Paused {
                    return None;
                }
                let mut context = current.context.clone();
                context.resumed_by = Some(requester.to_string());
                Some(ExecutionUpdate::status(ExecutionStatus::Running).with_context(context))
            })
            .await?;
        let Some(node) = updated else {
            return Ok(false);
        };
        log_cascade_operation("resume", node.id, node.status, requester, None);

        if let Some(outcome) = self.coordinator.resume_workflow(node.id).await? {
            queue.extend_outcome(outcome);
        }
        Ok(true)
    }
}

fn ensure_workflow(execution: &Execution, operation: &'static str) -> OrchestrationResult<()> {
    if execution.is_workflow {
        Ok(())
    } else {
        Err(OrchestrationError::UnsupportedOperation {
            execution_id: execution.id,
            operation,
            reason: "only workflow executions can be paused or resumed".to_string(),
        })
    }
}
