//! # Orchestration Core
//!
//! The facade every entry point goes through: API requests, dispatcher reports, polling
//! and delay timers. Each call performs its own step and then drains a [`WorkQueue`] of
//! follow-ups (admission of new children, callbacks, workflow advancement of parents)
//! before returning, so the caller observes the converged state of its request.
//!
//! There is no global scheduler. Calls may run concurrently from many tasks; safety comes
//! from status compare-and-set writes on executions and per-instance locks in the
//! completion coordinator.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::admission::{AdmissionController, AdmissionDecision};
use super::callback::{CallbackRetrier, CallbackTransport, HttpCallbackTransport};
use super::cascade::CascadeController;
use super::graph::{WorkflowGraph, WorkflowGraphRegistry};
use super::work_queue::{WorkItem, WorkQueue};
use super::workflow_coordinator::WorkflowCompletionCoordinator;
use crate::config::{ConductorConfig, ConfigManager};
use crate::constants::status_groups::LIVE_STATUSES;
use crate::constants::system::SYSTEM_REQUESTER;
use crate::coordination::{lock_service_from_config, LockService};
use crate::dispatcher::{DispatchReport, Dispatcher, InFlightRegistry};
use crate::errors::{OrchestrationError, OrchestrationResult};
use crate::events::{EventPublisher, OrchestrationEvent, PublishedEvent};
use crate::logging::log_error;
use crate::models::{Execution, Policy};
use crate::state_machine::states::ExecutionStatus;
use crate::state_machine::ExecutionStateMachine;
use crate::store::{
    ExecutionFilter, ExecutionStore, ExecutionUpdate, InMemoryExecutionStore,
    InMemoryWorkflowStore, WorkflowStore,
};

/// Result of a request or resume: the execution as it stands after the call, and the
/// admission decision that was taken for it
#[derive(Debug, Clone, PartialEq)]
pub struct RequestOutcome {
    pub execution: Execution,
    pub admission: AdmissionDecision,
}

#[derive(Debug, Clone)]
pub struct OrchestrationCore {
    inner: Arc<CoreInner>,
}

#[derive(Debug)]
struct CoreInner {
    config: ConductorConfig,
    state_machine: ExecutionStateMachine,
    coordinator: WorkflowCompletionCoordinator,
    cascade: CascadeController,
    admission: Arc<AdmissionController>,
    callbacks: CallbackRetrier,
    dispatcher: Arc<dyn Dispatcher>,
    in_flight: Arc<InFlightRegistry>,
    graphs: Arc<WorkflowGraphRegistry>,
    event_publisher: EventPublisher,
}

impl OrchestrationCore {
    pub fn builder() -> OrchestrationCoreBuilder {
        OrchestrationCoreBuilder::default()
    }

    /// Build a core from the environment's configuration with in-memory stores
    pub fn new(dispatcher: Arc<dyn Dispatcher>) -> OrchestrationResult<Self> {
        info!("🔧 Initializing OrchestrationCore with auto-detected environment configuration");
        let manager = ConfigManager::load()?;
        Self::builder()
            .with_config(manager.config().clone())
            .with_dispatcher(dispatcher)
            .build()
    }

    pub fn config(&self) -> &ConductorConfig {
        &self.inner.config
    }

    pub fn state_machine(&self) -> &ExecutionStateMachine {
        &self.inner.state_machine
    }

    pub fn coordinator(&self) -> &WorkflowCompletionCoordinator {
        &self.inner.coordinator
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.inner.admission
    }

    pub fn register_graph(&self, action_ref: impl Into<String>, graph: Arc<dyn WorkflowGraph>) {
        self.inner.graphs.register(action_ref, graph);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.inner.event_publisher.subscribe()
    }

    pub async fn get(&self, execution_id: Uuid) -> OrchestrationResult<Execution> {
        self.inner.state_machine.current(execution_id).await
    }

    /// Direct children, found through their parent back-reference
    pub async fn children(&self, execution_id: Uuid) -> OrchestrationResult<Vec<Execution>> {
        self.inner
            .state_machine
            .store()
            .query(&ExecutionFilter::children_of(execution_id))
            .await
    }

    /// Record a new execution and take it as far as it can go: admission, scheduling
    /// and dispatch. A refused execution comes back canceled.
    #[instrument(skip(self, execution), fields(execution_id = %execution.id, action_ref = %execution.action_ref))]
    pub async fn request(&self, mut execution: Execution) -> OrchestrationResult<RequestOutcome> {
        if execution.status != ExecutionStatus::Requested {
            return Err(OrchestrationError::UnexpectedStatus {
                execution_id: execution.id,
                status: execution.status,
                operation: "request",
            });
        }

        if execution.context.pack.is_none() {
            execution.context.pack = execution.pack_name().map(str::to_string);
        }
        if let Some(parent_id) = execution.parent_id() {
            if execution.context.user.is_none() {
                let parent = self.get(parent_id).await?;
                execution.context.user = parent.context.user;
            }
        }
        execution.is_workflow = self.inner.graphs.contains(&execution.action_ref);
        execution.start_timestamp = Utc::now();

        let created = self.inner.state_machine.store().create(execution).await?;
        debug!(execution_id = %created.id, "Execution requested");

        let mut queue = WorkQueue::new();
        let admission = self.admit(created.id, &mut queue).await;
        let drained = self.drain(queue).await;
        let admission = admission?;
        drained?;

        Ok(RequestOutcome {
            execution: self.get(created.id).await?,
            admission,
        })
    }

    /// Cancel an execution and everything running beneath it
    #[instrument(skip(self))]
    pub async fn request_cancellation(
        &self,
        execution_id: Uuid,
        requester: &str,
    ) -> OrchestrationResult<Execution> {
        let mut queue = WorkQueue::new();
        let cascaded = self
            .inner
            .cascade
            .cancel(execution_id, requester, &mut queue)
            .await;
        self.finish(cascaded, queue).await?;
        self.get(execution_id).await
    }

    #[instrument(skip(self))]
    pub async fn request_pause(
        &self,
        execution_id: Uuid,
        requester: &str,
    ) -> OrchestrationResult<Execution> {
        let mut queue = WorkQueue::new();
        let cascaded = self
            .inner
            .cascade
            .pause(execution_id, requester, &mut queue)
            .await;
        self.finish(cascaded, queue).await?;
        self.get(execution_id).await
    }

    #[instrument(skip(self))]
    pub async fn request_resume(
        &self,
        execution_id: Uuid,
        requester: &str,
    ) -> OrchestrationResult<RequestOutcome> {
        let mut queue = WorkQueue::new();
        let cascaded = self
            .inner
            .cascade
            .resume(execution_id, requester, &mut queue)
            .await;
        let admission = self.finish(cascaded, queue).await?;
        Ok(RequestOutcome {
            execution: self.get(execution_id).await?,
            admission,
        })
    }

    /// Operator override of an execution's status, e.g. marking lost work `abandoned`.
    ///
    /// The execution walks through `canceling` or `running` when there is no direct
    /// edge. A workflow forced into a terminal status stops its instance and cancels
    /// whatever is still live beneath it.
    #[instrument(skip(self))]
    pub async fn update_status(
        &self,
        execution_id: Uuid,
        status: ExecutionStatus,
    ) -> OrchestrationResult<Execution> {
        let updated = self
            .inner
            .state_machine
            .transition_along(execution_id, status)
            .await?;
        let mut queue = WorkQueue::new();
        let stopped = if updated.status.is_terminal() {
            self.stop_beneath(&updated, &mut queue).await
        } else {
            Ok(())
        };
        queue.push_settled(updated);
        self.finish(stopped, queue).await?;
        self.get(execution_id).await
    }

    async fn stop_beneath(
        &self,
        execution: &Execution,
        queue: &mut WorkQueue,
    ) -> OrchestrationResult<()> {
        self.inner.in_flight.cancel(execution.id);
        self.inner.in_flight.remove(execution.id);
        if !execution.is_workflow {
            return Ok(());
        }

        if let Some(outcome) = self
            .inner
            .coordinator
            .terminate_workflow(execution.id, execution.status)
            .await?
        {
            queue.extend_outcome(outcome);
        }
        let live = self
            .inner
            .state_machine
            .store()
            .query(&ExecutionFilter::children_of(execution.id).with_statuses(LIVE_STATUSES))
            .await?;
        for child in live {
            self.inner
                .cascade
                .cancel(child.id, SYSTEM_REQUESTER, queue)
                .await?;
        }
        Ok(())
    }

    /// Apply a report delivered by a runner outside of a dispatch call
    pub async fn handle_dispatch_report(
        &self,
        execution_id: Uuid,
        report: DispatchReport,
    ) -> OrchestrationResult<Execution> {
        let mut queue = WorkQueue::with_item(WorkItem::Report(execution_id, report));
        let drained = self.drain_from(&mut queue).await;
        drained?;
        self.get(execution_id).await
    }

    /// Ask the dispatcher for news about a running execution and apply it
    pub async fn poll(&self, execution_id: Uuid) -> OrchestrationResult<Execution> {
        let current = self.get(execution_id).await?;
        if !matches!(
            current.status,
            ExecutionStatus::Running | ExecutionStatus::Canceling
        ) || current.is_workflow
        {
            return Ok(current);
        }
        match self.inner.dispatcher.poll(&current).await? {
            Some(report) => self.handle_dispatch_report(execution_id, report).await,
            None => Ok(current),
        }
    }

    /// Move a delayed execution on to scheduling and dispatch
    pub async fn release_delayed(&self, execution_id: Uuid) -> OrchestrationResult<Execution> {
        let released = self
            .inner
            .state_machine
            .update_with_retry(execution_id, |current| {
                (current.status == ExecutionStatus::Delayed)
                    .then(|| ExecutionUpdate::status(ExecutionStatus::Scheduled))
            })
            .await?;
        if released.is_none() {
            debug!(execution_id = %execution_id, "Execution no longer delayed");
            return self.get(execution_id).await;
        }
        self.drain(WorkQueue::with_item(WorkItem::Dispatch(execution_id)))
            .await?;
        self.get(execution_id).await
    }

    /// Advance the owning workflow for an execution that already settled
    pub async fn handle_action_execution_completion(
        &self,
        execution_id: Uuid,
    ) -> OrchestrationResult<Execution> {
        let execution = self.get(execution_id).await?;
        let mut queue = WorkQueue::new();
        let outcome = self
            .inner
            .coordinator
            .handle_action_execution_completion(&execution)
            .await
            .map(|outcome| queue.extend_outcome(outcome));
        self.finish(outcome, queue).await?;
        Ok(execution)
    }

    /// Drain after a step that may have queued work before failing
    async fn finish<T>(
        &self,
        step: OrchestrationResult<T>,
        queue: WorkQueue,
    ) -> OrchestrationResult<T> {
        let drained = self.drain(queue).await;
        let value = step?;
        drained?;
        Ok(value)
    }

    async fn drain(&self, mut queue: WorkQueue) -> OrchestrationResult<()> {
        self.drain_from(&mut queue).await
    }

    /// Process queued items in order. An item that fails does not stop the rest; the
    /// first error is returned once the queue is empty.
    async fn drain_from(&self, queue: &mut WorkQueue) -> OrchestrationResult<()> {
        let mut first_error = None;
        while let Some(item) = queue.pop() {
            if let Err(err) = self.process(item, queue).await {
                log_error("orchestration_core", "drain", &err.to_string(), None);
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn process(&self, item: WorkItem, queue: &mut WorkQueue) -> OrchestrationResult<()> {
        match item {
            WorkItem::Admit(execution) => self.admit(execution.id, queue).await.map(|_| ()),
            WorkItem::Dispatch(execution_id) => self.dispatch(execution_id, queue).await,
            WorkItem::Report(execution_id, report) => {
                self.apply_report(execution_id, report, queue).await
            }
            WorkItem::Settled(execution) => self.settled(execution, queue).await,
            WorkItem::Paused(execution) => {
                if execution.workflow_task().is_some() {
                    let outcome = self
                        .inner
                        .coordinator
                        .handle_action_execution_pause(&execution)
                        .await?;
                    queue.extend_outcome(outcome);
                }
                Ok(())
            }
            WorkItem::Reevaluate(execution_id) => self.reevaluate(execution_id, queue).await,
        }
    }

    async fn admit(
        &self,
        execution_id: Uuid,
        queue: &mut WorkQueue,
    ) -> OrchestrationResult<AdmissionDecision> {
        let execution = self.get(execution_id).await?;
        if execution.status != ExecutionStatus::Requested {
            return Ok(AdmissionDecision::Admitted);
        }

        // Children requested under a parent that is going away or gone are not started
        if let Some(parent_id) = execution.parent_id() {
            let parent = self.get(parent_id).await?;
            if parent.status.is_terminal() || parent.status == ExecutionStatus::Canceling {
                self.inner
                    .cascade
                    .cancel(execution.id, SYSTEM_REQUESTER, queue)
                    .await?;
                return Ok(AdmissionDecision::Admitted);
            }
        }

        let (decision, canceled) = self.inner.admission.admit(&execution).await?;
        if let Some(canceled) = canceled {
            // The callback runs in this same drain, before the request returns
            queue.push_settled(canceled);
            return Ok(decision);
        }

        match execution.delay_duration() {
            Some(delay) => {
                let delayed = self
                    .inner
                    .state_machine
                    .transition(&execution, ExecutionStatus::Delayed)
                    .await?;
                self.schedule_delayed_release(delayed.id, delay);
            }
            None => {
                self.inner
                    .state_machine
                    .transition(&execution, ExecutionStatus::Scheduled)
                    .await?;
                queue.push(WorkItem::Dispatch(execution.id));
            }
        }
        Ok(decision)
    }

    fn schedule_delayed_release(&self, execution_id: Uuid, delay: Duration) {
        let core = self.clone();
        debug!(
            execution_id = %execution_id,
            delay_ms = delay.as_millis() as u64,
            "Execution delayed"
        );
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(err) = core.release_delayed(execution_id).await {
                log_error(
                    "orchestration_core",
                    "release_delayed",
                    &err.to_string(),
                    Some(&execution_id.to_string()),
                );
            }
        });
    }

    async fn dispatch(&self, execution_id: Uuid, queue: &mut WorkQueue) -> OrchestrationResult<()> {
        // Registered ahead of the running transition so a cancel landing in between finds the token
        let token = self.inner.in_flight.register(execution_id);
        let running = self
            .inner
            .state_machine
            .update_with_retry(execution_id, |current| {
                (current.status == ExecutionStatus::Scheduled)
                    .then(|| ExecutionUpdate::status(ExecutionStatus::Running))
            })
            .await;
        let running = match running {
            Ok(Some(running)) => running,
            Ok(None) => {
                self.inner.in_flight.remove(execution_id);
                debug!(execution_id = %execution_id, "Execution no longer scheduled, skipping dispatch");
                return Ok(());
            }
            Err(err) => {
                self.inner.in_flight.remove(execution_id);
                return Err(err);
            }
        };

        if running.is_workflow {
            self.inner.in_flight.remove(execution_id);
            let outcome = self.inner.coordinator.start_workflow(&running).await?;
            queue.extend_outcome(outcome);
            return Ok(());
        }

        let report = match self.inner.dispatcher.dispatch(&running, token).await {
            Ok(report) => report,
            Err(err) => {
                warn!(execution_id = %execution_id, error = %err, "Dispatch failed");
                DispatchReport::failed(err.to_string())
            }
        };
        self.apply_report(execution_id, report, queue).await
    }

    async fn apply_report(
        &self,
        execution_id: Uuid,
        report: DispatchReport,
        queue: &mut WorkQueue,
    ) -> OrchestrationResult<()> {
        report.validate(execution_id)?;
        if report.status == ExecutionStatus::Running {
            debug!(execution_id = %execution_id, "Runner reported execution still running");
            return Ok(());
        }

        let reported = report.status;
        let settled = self
            .inner
            .state_machine
            .settle_with(execution_id, report.into_result(), |current| {
                if current == ExecutionStatus::Canceling {
                    Some(ExecutionStatus::Canceled)
                } else {
                    Some(reported)
                }
            })
            .await?;
        self.inner.in_flight.remove(execution_id);

        if let Some(settled) = settled {
            queue.push_settled(settled);
        }
        Ok(())
    }

    async fn settled(&self, execution: Execution, queue: &mut WorkQueue) -> OrchestrationResult<()> {
        let callback = self.report_callback(&execution).await;

        if execution.workflow_task().is_some() {
            let outcome = self
                .inner
                .coordinator
                .handle_action_execution_completion(&execution)
                .await?;
            queue.extend_outcome(outcome);
        }
        callback
    }

    async fn report_callback(&self, execution: &Execution) -> OrchestrationResult<()> {
        let Some(callback) = execution.context.callback.as_ref() else {
            return Ok(());
        };
        let delivered = self
            .inner
            .callbacks
            .callback(
                &callback.url,
                execution.id,
                execution.status,
                execution.result.clone(),
            )
            .await;
        if let Err(err) = &delivered {
            self.inner
                .event_publisher
                .publish(OrchestrationEvent::CallbackFailed {
                    execution_id: execution.id,
                    url: callback.url.clone(),
                    error: err.to_string(),
                });
        }
        delivered
    }

    async fn reevaluate(&self, execution_id: Uuid, queue: &mut WorkQueue) -> OrchestrationResult<()> {
        if let Some(outcome) = self
            .inner
            .coordinator
            .reevaluate_workflow(execution_id)
            .await?
        {
            queue.extend_outcome(outcome);
            return Ok(());
        }

        // A workflow that never started has no pending work to wait for
        let current = self.get(execution_id).await?;
        if !current.is_workflow {
            return Ok(());
        }
        let target = match current.status {
            ExecutionStatus::Canceling => ExecutionStatus::Canceled,
            ExecutionStatus::Pausing => ExecutionStatus::Paused,
            _ => return Ok(()),
        };
        if let Some(settled) = self
            .inner
            .state_machine
            .settle(execution_id, target, None)
            .await?
        {
            queue.push_settled(settled);
        }
        Ok(())
    }
}

/// Assembles an [`OrchestrationCore`]; anything not supplied falls back to the
/// in-memory collaborators and the lock service selected by configuration
#[derive(Default)]
pub struct OrchestrationCoreBuilder {
    config: ConductorConfig,
    dispatcher: Option<Arc<dyn Dispatcher>>,
    callback_transport: Option<Arc<dyn CallbackTransport>>,
    execution_store: Option<Arc<dyn ExecutionStore>>,
    workflow_store: Option<Arc<dyn WorkflowStore>>,
    lock_service: Option<Arc<dyn LockService>>,
    graphs: Vec<(String, Arc<dyn WorkflowGraph>)>,
    policies: Vec<Policy>,
}

impl OrchestrationCoreBuilder {
    pub fn with_config(mut self, config: ConductorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn Dispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn with_callback_transport(mut self, transport: Arc<dyn CallbackTransport>) -> Self {
        self.callback_transport = Some(transport);
        self
    }

    pub fn with_execution_store(mut self, store: Arc<dyn ExecutionStore>) -> Self {
        self.execution_store = Some(store);
        self
    }

    pub fn with_workflow_store(mut self, store: Arc<dyn WorkflowStore>) -> Self {
        self.workflow_store = Some(store);
        self
    }

    pub fn with_lock_service(mut self, locks: Arc<dyn LockService>) -> Self {
        self.lock_service = Some(locks);
        self
    }

    pub fn register_graph(
        mut self,
        action_ref: impl Into<String>,
        graph: Arc<dyn WorkflowGraph>,
    ) -> Self {
        self.graphs.push((action_ref.into(), graph));
        self
    }

    pub fn add_policy(mut self, policy: Policy) -> Self {
        self.policies.push(policy);
        self
    }

    pub fn build(self) -> OrchestrationResult<OrchestrationCore> {
        self.config.validate()?;
        let config = self.config;

        let dispatcher = self.dispatcher.ok_or_else(|| {
            OrchestrationError::Configuration("A dispatcher is required".to_string())
        })?;
        let callback_transport = match self.callback_transport {
            Some(transport) => transport,
            None => Arc::new(HttpCallbackTransport::from_config(&config.callback)?),
        };
        let execution_store = self
            .execution_store
            .unwrap_or_else(|| Arc::new(InMemoryExecutionStore::new()));
        let workflow_store = self
            .workflow_store
            .unwrap_or_else(|| Arc::new(InMemoryWorkflowStore::new()));
        let lock_service = self
            .lock_service
            .unwrap_or_else(|| lock_service_from_config(&config.coordination));

        let event_publisher = EventPublisher::new(config.events.channel_capacity);
        let state_machine = ExecutionStateMachine::new(execution_store, event_publisher.clone())
            .with_conflict_retries(config.workflow_engine.max_conflict_retries);

        let graphs = Arc::new(WorkflowGraphRegistry::new());
        for (action_ref, graph) in self.graphs {
            graphs.register(action_ref, graph);
        }

        let admission = Arc::new(AdmissionController::new(
            state_machine.clone(),
            event_publisher.clone(),
        ));
        for policy in self.policies {
            admission.add_policy(policy);
        }

        let coordinator = WorkflowCompletionCoordinator::new(
            workflow_store,
            state_machine.clone(),
            lock_service,
            graphs.clone(),
            event_publisher.clone(),
            &config,
        );
        let in_flight = Arc::new(InFlightRegistry::new());
        let cascade = CascadeController::new(
            state_machine.clone(),
            coordinator.clone(),
            in_flight.clone(),
            admission.clone(),
        );
        let callbacks = CallbackRetrier::from_config(callback_transport, &config.callback);

        info!(
            coordination_backend = ?config.coordination.backend,
            max_conflict_retries = config.workflow_engine.max_conflict_retries,
            "✅ OrchestrationCore initialized"
        );

        Ok(OrchestrationCore {
            inner: Arc::new(CoreInner {
                config,
                state_machine,
                coordinator,
                cascade,
                admission,
                callbacks,
                dispatcher,
                in_flight,
                graphs,
                event_publisher,
            }),
        })
    }
}
