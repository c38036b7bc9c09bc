//! # Workflow Plan
//!
//! One read-modify-write pass over a workflow instance. A plan is built from freshly
//! read state, applies a single trigger, asks the workflow graph what happens next and
//! produces the commit plus the side effects to run once the commit lands. Nothing here
//! performs I/O, so a plan can be thrown away and rebuilt after a write conflict.

use serde_json::{json, Map, Value};
use std::collections::HashSet;
use uuid::Uuid;

use super::graph::{GraphDecision, TaskSpec, WorkflowGraph};
use crate::errors::{OrchestrationError, OrchestrationResult};
use crate::events::OrchestrationEvent;
use crate::models::{Execution, TaskInstance, WorkflowInstance, WorkflowTaskRef};
use crate::state_machine::states::{ExecutionStatus, WorkflowStatus};
use crate::store::WorkflowCommit;

/// Upper bound on decide iterations; each iteration either makes progress or stops
const MAX_DECIDE_ROUNDS: usize = 64;

/// What changed to prompt this pass
#[derive(Debug, Clone, PartialEq)]
pub enum Trigger {
    /// An owned execution reached a terminal status
    ChildSettled {
        task_instance_id: Uuid,
        item_index: Option<usize>,
        status: ExecutionStatus,
        result: Option<Value>,
    },
    ChildPaused {
        task_instance_id: Uuid,
        item_index: Option<usize>,
    },
    ChildResumed {
        task_instance_id: Uuid,
        item_index: Option<usize>,
    },
    /// Cancel, pause or resume of the instance itself
    Status(WorkflowStatus),
    /// The owning execution was forced into a terminal status; nothing more may start
    Terminate(WorkflowStatus),
    Reevaluate,
}

impl Trigger {
    pub fn for_child(execution: &Execution, task: WorkflowTaskRef) -> Self {
        match execution.status {
            ExecutionStatus::Paused => Self::ChildPaused {
                task_instance_id: task.task_instance_id,
                item_index: task.item_index,
            },
            ExecutionStatus::Running => Self::ChildResumed {
                task_instance_id: task.task_instance_id,
                item_index: task.item_index,
            },
            status => Self::ChildSettled {
                task_instance_id: task.task_instance_id,
                item_index: task.item_index,
                status,
                result: execution.result.clone(),
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkflowPlan {
    pub instance: WorkflowInstance,
    pub tasks: Vec<TaskInstance>,
    create_instance: bool,
    touched: HashSet<Uuid>,
    new_tasks: HashSet<Uuid>,
    changed: bool,
    /// Child executions to create once the commit lands
    pub children: Vec<Execution>,
    pub events: Vec<OrchestrationEvent>,
    /// Final instance status (terminal or paused) reached by this pass
    pub outcome: Option<WorkflowStatus>,
}

impl WorkflowPlan {
    pub fn new(instance: WorkflowInstance, tasks: Vec<TaskInstance>) -> Self {
        Self {
            instance,
            tasks,
            create_instance: false,
            touched: HashSet::new(),
            new_tasks: HashSet::new(),
            changed: false,
            children: Vec::new(),
            events: Vec::new(),
            outcome: None,
        }
    }

    /// Plan for an instance that does not exist yet
    pub fn create(instance: WorkflowInstance) -> Self {
        Self {
            create_instance: true,
            changed: true,
            ..Self::new(instance, Vec::new())
        }
    }

    pub fn has_changes(&self) -> bool {
        self.changed
    }

    fn task_mut(&mut self, task_instance_id: Uuid) -> OrchestrationResult<&mut TaskInstance> {
        self.tasks
            .iter_mut()
            .find(|task| task.id == task_instance_id)
            .ok_or(OrchestrationError::TaskInstanceNotFound { task_instance_id })
    }

    fn touch(&mut self, task_instance_id: Uuid) {
        self.touched.insert(task_instance_id);
        self.changed = true;
    }

    pub fn apply(&mut self, trigger: &Trigger) -> OrchestrationResult<()> {
        let (task_instance_id, changed) = match trigger {
            Trigger::ChildSettled {
                task_instance_id,
                item_index,
                status,
                result,
            } => {
                let task = self.task_mut(*task_instance_id)?;
                let changed = task.record_outcome(*item_index, *status, result.clone());
                (*task_instance_id, changed)
            }
            Trigger::ChildPaused {
                task_instance_id,
                item_index,
            } => {
                let task = self.task_mut(*task_instance_id)?;
                let changed = task.record_outcome(*item_index, ExecutionStatus::Paused, None);
                (*task_instance_id, changed)
            }
            Trigger::ChildResumed {
                task_instance_id,
                item_index,
            } => {
                let task = self.task_mut(*task_instance_id)?;
                let changed = task.record_outcome(*item_index, ExecutionStatus::Running, None);
                (*task_instance_id, changed)
            }
            Trigger::Status(status) => {
                self.set_instance_status(*status);
                return Ok(());
            }
            Trigger::Terminate(status) => {
                self.terminate(*status);
                return Ok(());
            }
            Trigger::Reevaluate => return Ok(()),
        };

        if changed {
            self.touch(task_instance_id);
        }
        Ok(())
    }

    fn set_instance_status(&mut self, status: WorkflowStatus) {
        let current = self.instance.status;
        let allowed = match status {
            WorkflowStatus::Canceling => !current.is_terminal() && current != status,
            WorkflowStatus::Pausing => current == WorkflowStatus::Running,
            WorkflowStatus::Running => {
                matches!(current, WorkflowStatus::Paused | WorkflowStatus::Pausing)
            }
            _ => false,
        };
        if allowed {
            self.instance.status = status;
            self.changed = true;
        }
    }

    fn terminate(&mut self, status: WorkflowStatus) {
        if self.instance.status.is_terminal() || !status.is_terminal() {
            return;
        }
        self.instance.status = status;
        self.outcome = Some(status);
        self.changed = true;
    }

    /// Advance the instance as far as current state allows
    pub fn decide(
        &mut self,
        graph: &dyn WorkflowGraph,
        owner: &Execution,
        default_items_concurrency: Option<usize>,
    ) {
        for _ in 0..MAX_DECIDE_ROUNDS {
            let mut progress = false;

            if self.instance.is_canceling() {
                progress |= self.cancel_queued_items();
            }
            progress |= self.settle_fan_outs();
            if self.instance.status == WorkflowStatus::Running {
                progress |= self.request_queued_items(owner);
            }
            progress |= self.record_terminal_tasks();

            let active = self.tasks.iter().any(TaskInstance::is_active);
            match self.instance.status {
                WorkflowStatus::Canceling => {
                    if self.tasks.iter().all(|task| task.status.is_terminal()) {
                        self.finish(graph, WorkflowStatus::Canceled);
                    }
                }
                WorkflowStatus::Pausing => {
                    if !active {
                        self.instance.status = WorkflowStatus::Paused;
                        self.outcome = Some(WorkflowStatus::Paused);
                        self.changed = true;
                    }
                }
                WorkflowStatus::Running => match graph.evaluate(&self.instance, &self.tasks) {
                    GraphDecision::Advance(specs) => {
                        for spec in specs {
                            progress |= self.start_task(spec, owner, default_items_concurrency);
                        }
                    }
                    GraphDecision::Complete(status) if !active => self.finish(graph, status),
                    GraphDecision::Complete(_) | GraphDecision::Wait => {}
                },
                _ => {}
            }

            if self.outcome.is_some() || !progress {
                break;
            }
        }
    }

    /// Items never requested cannot run once the instance is canceling
    fn cancel_queued_items(&mut self) -> bool {
        let mut touched = Vec::new();
        for task in &mut self.tasks {
            if let Some(items) = task.items.as_mut() {
                let mut changed = false;
                for item in items.iter_mut().filter(|item| item.is_queued() && item.status.is_none()) {
                    item.status = Some(ExecutionStatus::Canceled);
                    changed = true;
                }
                if changed {
                    touched.push(task.id);
                }
            }
        }
        let progress = !touched.is_empty();
        for id in touched {
            self.touch(id);
        }
        progress
    }

    fn settle_fan_outs(&mut self) -> bool {
        let instance_status = self.instance.status;
        let settled: Vec<Uuid> = self
            .tasks
            .iter_mut()
            .filter(|task| task.is_itemized() && !task.status.is_terminal())
            .filter_map(|task| task.settle_items(instance_status).then_some(task.id))
            .collect();
        let progress = !settled.is_empty();
        for id in settled {
            self.touch(id);
        }
        progress
    }

    fn request_queued_items(&mut self, owner: &Execution) -> bool {
        let instance_id = self.instance.id;
        let mut requested = Vec::new();
        let mut children = Vec::new();

        for task in self
            .tasks
            .iter_mut()
            .filter(|task| task.is_itemized() && !task.status.is_terminal())
        {
            let indexes = task.next_items_to_request();
            if indexes.is_empty() {
                continue;
            }
            if task.status == WorkflowStatus::Paused {
                task.status = WorkflowStatus::Running;
            }
            for index in indexes {
                let Some(input) = task
                    .items
                    .as_ref()
                    .and_then(|items| items.get(index))
                    .map(|item| item.input.clone())
                else {
                    continue;
                };
                let parameters = item_parameters(&task.parameters, input);
                let child = child_execution(owner, instance_id, task, Some(index), parameters);
                if let Some(item) = task.items.as_mut().and_then(|items| items.get_mut(index)) {
                    item.execution_id = Some(child.id);
                }
                task.action_executions.push(child.id);
                children.push(child);
            }
            requested.push(task.id);
        }

        let progress = !requested.is_empty();
        for id in requested {
            self.touch(id);
        }
        self.children.extend(children);
        progress
    }

    fn record_terminal_tasks(&mut self) -> bool {
        let mut progress = false;
        let terminal: Vec<usize> = self
            .tasks
            .iter()
            .enumerate()
            .filter(|(_, task)| {
                task.status.is_terminal() && !self.instance.has_sequence_entry(task.id)
            })
            .map(|(index, _)| index)
            .collect();

        for index in terminal {
            let task = &self.tasks[index];
            if !self.instance.record_sequence(task) {
                continue;
            }
            self.events.push(OrchestrationEvent::TaskCompleted {
                workflow_instance_id: self.instance.id,
                task_instance_id: task.id,
                task_id: task.task_id.clone(),
                status: task.status,
            });
            let canceled = task.status == WorkflowStatus::Canceled;
            self.changed = true;
            progress = true;

            // A canceled child that leaves nothing else progressing cancels the workflow
            if canceled
                && matches!(
                    self.instance.status,
                    WorkflowStatus::Running | WorkflowStatus::Pausing
                )
                && !self.tasks.iter().any(TaskInstance::is_active)
            {
                self.instance.status = WorkflowStatus::Canceling;
            }
        }
        progress
    }

    fn start_task(
        &mut self,
        spec: TaskSpec,
        owner: &Execution,
        default_items_concurrency: Option<usize>,
    ) -> bool {
        if self.tasks.iter().any(|task| task.task_id == spec.task_id) {
            return false;
        }

        let mut task = TaskInstance::new(
            self.instance.id,
            spec.task_id,
            spec.route,
            spec.action_ref,
            spec.parameters,
        )
        .with_delay(spec.delay);

        match spec.with_items {
            // Items are requested by the next decide round, under the concurrency limit
            Some(items) => {
                task = task.with_items(items, spec.concurrency.or(default_items_concurrency));
            }
            None => {
                let child = child_execution(
                    owner,
                    self.instance.id,
                    &task,
                    None,
                    task.parameters.clone(),
                );
                task.action_executions.push(child.id);
                self.children.push(child);
            }
        }

        self.new_tasks.insert(task.id);
        self.tasks.push(task);
        self.changed = true;
        true
    }

    fn finish(&mut self, graph: &dyn WorkflowGraph, status: WorkflowStatus) {
        self.instance.status = status;
        self.instance.output = graph.output(&self.tasks);
        self.outcome = Some(status);
        self.changed = true;
    }

    /// Result stored on the owning execution: output plus terminal tasks in sequence order
    pub fn workflow_result(&self) -> Value {
        let tasks: Vec<Value> = self
            .instance
            .sequence
            .iter()
            .filter_map(|entry| self.tasks.iter().find(|task| task.id == entry.task_instance_id))
            .map(TaskInstance::summary)
            .collect();
        json!({
            "output": self.instance.output,
            "tasks": tasks,
        })
    }

    pub fn into_commit(self) -> (WorkflowCommit, PlanEffects) {
        let effects = PlanEffects {
            children: self.children,
            events: self.events,
            outcome: self.outcome,
        };
        let mut updated_tasks = Vec::new();
        let mut new_tasks = Vec::new();
        for task in self.tasks {
            if self.new_tasks.contains(&task.id) {
                new_tasks.push(task);
            } else if self.touched.contains(&task.id) {
                updated_tasks.push(task);
            }
        }
        let commit = WorkflowCommit {
            instance: self.instance,
            create_instance: self.create_instance,
            updated_tasks,
            new_tasks,
        };
        (commit, effects)
    }
}

/// Side effects of a committed plan
#[derive(Debug, Clone, Default)]
pub struct PlanEffects {
    pub children: Vec<Execution>,
    pub events: Vec<OrchestrationEvent>,
    pub outcome: Option<WorkflowStatus>,
}

fn item_parameters(base: &Value, item: Value) -> Value {
    let mut parameters = match base {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };
    parameters.insert("item".to_string(), item);
    Value::Object(parameters)
}

/// Child execution for a task, spawned on behalf of the owning workflow execution
fn child_execution(
    owner: &Execution,
    workflow_instance_id: Uuid,
    task: &TaskInstance,
    item_index: Option<usize>,
    parameters: Value,
) -> Execution {
    let mut child = Execution::new(task.action_ref.clone(), parameters).with_parent(owner.id);
    child.context.user = owner.context.user.clone();
    child.context.workflow = Some(WorkflowTaskRef {
        workflow_instance_id,
        task_instance_id: task.id,
        item_index,
    });
    child.delay = task.delay;
    child
}
