//! Scripted dispatcher: returns queued reports per action instead of running anything.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::dispatcher::{DispatchReport, Dispatcher};
use crate::errors::{OrchestrationError, OrchestrationResult};
use crate::models::Execution;

#[derive(Debug)]
pub struct ScriptedDispatcher {
    default_report: DispatchReport,
    on_dispatch: Mutex<HashMap<String, VecDeque<OrchestrationResult<DispatchReport>>>>,
    on_poll: Mutex<HashMap<String, VecDeque<DispatchReport>>>,
    dispatched: Mutex<Vec<Execution>>,
    tokens: DashMap<Uuid, CancellationToken>,
}

impl Default for ScriptedDispatcher {
    fn default() -> Self {
        Self::with_default(DispatchReport::running())
    }
}

impl ScriptedDispatcher {
    /// Unscripted dispatches report `running`
    pub fn new() -> Self {
        Self::default()
    }

    /// Report returned when nothing is scripted for an action
    pub fn with_default(default_report: DispatchReport) -> Self {
        Self {
            default_report,
            on_dispatch: Mutex::new(HashMap::new()),
            on_poll: Mutex::new(HashMap::new()),
            dispatched: Mutex::new(Vec::new()),
            tokens: DashMap::new(),
        }
    }

    /// Queue the report for the next dispatch of `action_ref`
    pub fn script(&self, action_ref: &str, report: DispatchReport) {
        self.on_dispatch
            .lock()
            .entry(action_ref.to_string())
            .or_default()
            .push_back(Ok(report));
    }

    /// Make the next dispatch of `action_ref` fail outright
    pub fn script_error(&self, action_ref: &str, reason: &str) {
        self.on_dispatch
            .lock()
            .entry(action_ref.to_string())
            .or_default()
            .push_back(Err(OrchestrationError::Internal(reason.to_string())));
    }

    pub fn script_poll(&self, action_ref: &str, report: DispatchReport) {
        self.on_poll
            .lock()
            .entry(action_ref.to_string())
            .or_default()
            .push_back(report);
    }

    pub fn dispatched(&self) -> Vec<Execution> {
        self.dispatched.lock().clone()
    }

    pub fn dispatched_ids(&self) -> Vec<Uuid> {
        self.dispatched.lock().iter().map(|e| e.id).collect()
    }

    pub fn dispatch_count(&self) -> usize {
        self.dispatched.lock().len()
    }

    /// Whether the runner of `execution_id` was asked to stop
    pub fn was_cancelled(&self, execution_id: Uuid) -> bool {
        self.tokens
            .get(&execution_id)
            .is_some_and(|token| token.is_cancelled())
    }
}

#[async_trait]
impl Dispatcher for ScriptedDispatcher {
    async fn dispatch(
        &self,
        execution: &Execution,
        cancellation: CancellationToken,
    ) -> OrchestrationResult<DispatchReport> {
        self.dispatched.lock().push(execution.clone());
        self.tokens.insert(execution.id, cancellation);

        let scripted = self
            .on_dispatch
            .lock()
            .get_mut(&execution.action_ref)
            .and_then(VecDeque::pop_front);
        scripted.unwrap_or_else(|| Ok(self.default_report.clone()))
    }

    async fn poll(&self, execution: &Execution) -> OrchestrationResult<Option<DispatchReport>> {
        Ok(self
            .on_poll
            .lock()
            .get_mut(&execution.action_ref)
            .and_then(VecDeque::pop_front))
    }
}
