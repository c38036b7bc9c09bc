//! # Workflow Completion Coordinator
//!
//! Advances workflow instances when something happens to them: an owned execution
//! settles or pauses, or the instance itself is asked to cancel, pause or resume.
//!
//! Every advancement runs under the instance's named lock and follows the same shape:
//! re-read the instance and its tasks, apply the trigger, let the workflow graph decide,
//! then commit against the read revisions. A write conflict means another writer got
//! there first; the whole read-decide-commit pass is repeated up to a bounded number of
//! attempts. Child executions are created only after the commit lands, so a retried pass
//! never duplicates them.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::backoff::BackoffPolicy;
use super::graph::WorkflowGraphRegistry;
use super::workflow_plan::{PlanEffects, Trigger, WorkflowPlan};
use crate::config::ConductorConfig;
use crate::coordination::{acquire_with_retry, LockGuard, LockService};
use crate::errors::{OrchestrationError, OrchestrationResult};
use crate::events::{EventPublisher, OrchestrationEvent};
use crate::logging::log_workflow_operation;
use crate::models::{Execution, WorkflowInstance};
use crate::state_machine::states::{ExecutionStatus, WorkflowStatus};
use crate::state_machine::ExecutionStateMachine;
use crate::store::WorkflowStore;

/// What an advancement produced for the caller to carry on with
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionOutcome {
    /// Child executions created by this pass, still `requested`
    pub children: Vec<Execution>,
    /// The owning execution, when the workflow reached a terminal or paused state
    pub finalized: Option<Execution>,
}

impl CompletionOutcome {
    pub fn is_empty(&self) -> bool {
        self.children.is_empty() && self.finalized.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct WorkflowCompletionCoordinator {
    workflows: Arc<dyn WorkflowStore>,
    state_machine: ExecutionStateMachine,
    locks: Arc<dyn LockService>,
    graphs: Arc<WorkflowGraphRegistry>,
    event_publisher: EventPublisher,
    lock_timeout: Duration,
    lock_retry: BackoffPolicy,
    max_conflict_retries: u32,
    default_items_concurrency: Option<usize>,
}

impl WorkflowCompletionCoordinator {
    pub fn new(
        workflows: Arc<dyn WorkflowStore>,
        state_machine: ExecutionStateMachine,
        locks: Arc<dyn LockService>,
        graphs: Arc<WorkflowGraphRegistry>,
        event_publisher: EventPublisher,
        config: &ConductorConfig,
    ) -> Self {
        Self {
            workflows,
            state_machine,
            locks,
            graphs,
            event_publisher,
            lock_timeout: config.coordination.lock_timeout(),
            lock_retry: BackoffPolicy::from_coordination_config(&config.coordination),
            max_conflict_retries: config.workflow_engine.max_conflict_retries,
            default_items_concurrency: config.workflow_engine.default_items_concurrency,
        }
    }

    pub fn workflows(&self) -> &Arc<dyn WorkflowStore> {
        &self.workflows
    }

    /// Create the workflow instance for a running workflow execution and request its
    /// first tasks. Starting an execution that already has an instance does nothing.
    #[instrument(skip(self, execution), fields(execution_id = %execution.id))]
    pub async fn start_workflow(
        &self,
        execution: &Execution,
    ) -> OrchestrationResult<CompletionOutcome> {
        if execution.status != ExecutionStatus::Running {
            return Err(OrchestrationError::UnexpectedStatus {
                execution_id: execution.id,
                status: execution.status,
                operation: "start_workflow",
            });
        }
        if self
            .workflows
            .find_instance_for_execution(execution.id)
            .await?
            .is_some()
        {
            debug!(execution_id = %execution.id, "Workflow instance already exists");
            return Ok(CompletionOutcome::default());
        }

        let graph = self.graphs.get(&execution.action_ref)?;
        let instance = WorkflowInstance::new(execution.id, &execution.action_ref);
        let instance_id = instance.id;

        let guard = self.lock(instance_id).await?;
        let mut plan = WorkflowPlan::create(instance);
        plan.decide(graph.as_ref(), execution, self.default_items_concurrency);
        let result = plan.workflow_result();
        let (commit, effects) = plan.into_commit();

        let outcome = match self.workflows.commit(commit).await {
            Ok(committed) => {
                self.event_publisher
                    .publish(OrchestrationEvent::WorkflowStarted {
                        workflow_instance_id: committed.id,
                        execution_id: execution.id,
                    });
                log_workflow_operation(
                    "start",
                    committed.id,
                    None,
                    committed.status.as_str(),
                    Some(&execution.action_ref),
                );
                self.apply_effects(&committed, execution, effects, result)
                    .await
            }
            Err(err) => Err(err),
        };
        guard.release();
        outcome
    }

    /// Advance the owning workflow after one of its executions reached a terminal status
    #[instrument(skip(self, execution), fields(execution_id = %execution.id))]
    pub async fn handle_action_execution_completion(
        &self,
        execution: &Execution,
    ) -> OrchestrationResult<CompletionOutcome> {
        if !execution.status.is_terminal() {
            return Err(OrchestrationError::UnexpectedStatus {
                execution_id: execution.id,
                status: execution.status,
                operation: "handle_action_execution_completion",
            });
        }
        self.advance_for_child(execution).await
    }

    /// Record a paused child; a pausing workflow settles once nothing is progressing
    #[instrument(skip(self, execution), fields(execution_id = %execution.id))]
    pub async fn handle_action_execution_pause(
        &self,
        execution: &Execution,
    ) -> OrchestrationResult<CompletionOutcome> {
        if execution.status != ExecutionStatus::Paused {
            return Err(OrchestrationError::UnexpectedStatus {
                execution_id: execution.id,
                status: execution.status,
                operation: "handle_action_execution_pause",
            });
        }
        self.advance_for_child(execution).await
    }

    async fn advance_for_child(
        &self,
        execution: &Execution,
    ) -> OrchestrationResult<CompletionOutcome> {
        let task = execution
            .workflow_task()
            .ok_or(OrchestrationError::NotWorkflowTask {
                execution_id: execution.id,
            })?;
        self.advance(task.workflow_instance_id, Trigger::for_child(execution, task))
            .await
    }

    /// Mark the workflow owned by `execution_id` as canceling. `None` when the execution
    /// has no workflow instance (not started yet).
    pub async fn request_workflow_cancellation(
        &self,
        execution_id: Uuid,
    ) -> OrchestrationResult<Option<CompletionOutcome>> {
        self.advance_owned(execution_id, Trigger::Status(WorkflowStatus::Canceling))
            .await
    }

    pub async fn request_workflow_pause(
        &self,
        execution_id: Uuid,
    ) -> OrchestrationResult<Option<CompletionOutcome>> {
        self.advance_owned(execution_id, Trigger::Status(WorkflowStatus::Pausing))
            .await
    }

    /// Return the workflow to running and tell the parent workflow, if any, that this
    /// execution is progressing again.
    pub async fn resume_workflow(
        &self,
        execution_id: Uuid,
    ) -> OrchestrationResult<Option<CompletionOutcome>> {
        let Some(mut outcome) = self
            .advance_owned(execution_id, Trigger::Status(WorkflowStatus::Running))
            .await?
        else {
            return Ok(None);
        };

        let execution = self.state_machine.current(execution_id).await?;
        if execution.status == ExecutionStatus::Running {
            if let Some(task) = execution.workflow_task() {
                let parent = self
                    .advance(
                        task.workflow_instance_id,
                        Trigger::ChildResumed {
                            task_instance_id: task.task_instance_id,
                            item_index: task.item_index,
                        },
                    )
                    .await?;
                outcome.children.extend(parent.children);
                outcome.finalized = outcome.finalized.or(parent.finalized);
            }
        }
        Ok(Some(outcome))
    }

    /// Finish the instance owned by `execution_id` after its owner was moved to a
    /// terminal status from outside the workflow, so later completions start nothing.
    pub async fn terminate_workflow(
        &self,
        execution_id: Uuid,
        status: ExecutionStatus,
    ) -> OrchestrationResult<Option<CompletionOutcome>> {
        self.advance_owned(execution_id, Trigger::Terminate(WorkflowStatus::from(status)))
            .await
    }

    /// Re-run the graph decision without any new input
    pub async fn reevaluate_workflow(
        &self,
        execution_id: Uuid,
    ) -> OrchestrationResult<Option<CompletionOutcome>> {
        self.advance_owned(execution_id, Trigger::Reevaluate).await
    }

    async fn advance_owned(
        &self,
        execution_id: Uuid,
        trigger: Trigger,
    ) -> OrchestrationResult<Option<CompletionOutcome>> {
        match self.workflows.find_instance_for_execution(execution_id).await? {
            Some(instance) => self.advance(instance.id, trigger).await.map(Some),
            None => Ok(None),
        }
    }

    async fn lock(&self, instance_id: Uuid) -> OrchestrationResult<LockGuard> {
        acquire_with_retry(
            self.locks.as_ref(),
            &instance_id.to_string(),
            self.lock_timeout,
            &self.lock_retry,
        )
        .await
    }

    async fn advance(
        &self,
        instance_id: Uuid,
        trigger: Trigger,
    ) -> OrchestrationResult<CompletionOutcome> {
        let guard = self.lock(instance_id).await?;
        let outcome = self.advance_locked(instance_id, &trigger).await;
        guard.release();
        outcome
    }

    async fn advance_locked(
        &self,
        instance_id: Uuid,
        trigger: &Trigger,
    ) -> OrchestrationResult<CompletionOutcome> {
        let mut attempt = 0u32;
        loop {
            // State read before the lock is never trusted
            let instance = self.workflows.get_instance(instance_id).await?;
            if instance.status.is_terminal() {
                debug!(
                    workflow_instance_id = %instance_id,
                    status = %instance.status,
                    "Workflow instance already finished"
                );
                return Ok(CompletionOutcome::default());
            }
            let tasks = self.workflows.tasks_for_workflow(instance_id).await?;
            let owner = self.state_machine.current(instance.action_execution).await?;
            let graph = self.graphs.get(&instance.action_ref)?;

            let mut plan = WorkflowPlan::new(instance, tasks);
            plan.apply(trigger)?;
            plan.decide(graph.as_ref(), &owner, self.default_items_concurrency);
            if !plan.has_changes() {
                return Ok(CompletionOutcome::default());
            }

            let result = plan.workflow_result();
            let (commit, effects) = plan.into_commit();
            match self.workflows.commit(commit).await {
                Ok(committed) => {
                    return self.apply_effects(&committed, &owner, effects, result).await;
                }
                Err(err) if err.is_write_conflict() => {
                    if attempt >= self.max_conflict_retries {
                        error!(
                            workflow_instance_id = %instance_id,
                            attempts = attempt + 1,
                            error = %err,
                            "Workflow write conflict retries exhausted"
                        );
                        return Err(err);
                    }
                    attempt += 1;
                    warn!(
                        workflow_instance_id = %instance_id,
                        attempt = attempt,
                        error = %err,
                        "Workflow write conflict, re-reading instance"
                    );
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn apply_effects(
        &self,
        instance: &WorkflowInstance,
        owner: &Execution,
        effects: PlanEffects,
        result: serde_json::Value,
    ) -> OrchestrationResult<CompletionOutcome> {
        let mut outcome = CompletionOutcome::default();

        for mut child in effects.children {
            child.is_workflow = self.graphs.contains(&child.action_ref);
            child.context.pack = child.pack_name().map(str::to_string);
            let created = self.state_machine.store().create(child).await?;
            outcome.children.push(created);
        }

        for event in effects.events {
            if let OrchestrationEvent::TaskCompleted {
                task_id, status, ..
            } = &event
            {
                log_workflow_operation(
                    "task_completed",
                    instance.id,
                    Some(task_id),
                    status.as_str(),
                    None,
                );
            }
            self.event_publisher.publish(event);
        }

        let Some(status) = effects.outcome else {
            return Ok(outcome);
        };

        let finalized = if status == WorkflowStatus::Paused {
            self.state_machine
                .settle(owner.id, ExecutionStatus::Paused, None)
                .await?
        } else {
            let target = status.to_execution_status();
            // An owner already canceling can only end canceled
            self.state_machine
                .settle_with(owner.id, Some(result), |current| {
                    if current == ExecutionStatus::Canceling {
                        Some(ExecutionStatus::Canceled)
                    } else {
                        Some(target)
                    }
                })
                .await?
        };

        let event = if status == WorkflowStatus::Paused {
            OrchestrationEvent::WorkflowPaused {
                workflow_instance_id: instance.id,
                execution_id: owner.id,
            }
        } else {
            OrchestrationEvent::WorkflowCompleted {
                workflow_instance_id: instance.id,
                execution_id: owner.id,
                status,
            }
        };
        self.event_publisher.publish(event);
        info!(
            workflow_instance_id = %instance.id,
            execution_id = %owner.id,
            status = %status,
            "Workflow settled"
        );

        outcome.finalized = finalized;
        Ok(outcome)
    }
}
