//! # Dispatcher Interface
//!
//! The seam to the action runners. A dispatcher receives a runnable execution plus a
//! cancellation token and reports back a `(status, result, error_context)` triple, where
//! `status` is terminal or `running`. Cancellation is cooperative: firing the token asks
//! the runner to stop, and the stop is confirmed only by a later terminal report.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::fmt::Debug;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::errors::{OrchestrationError, OrchestrationResult};
use crate::models::Execution;
use crate::state_machine::states::ExecutionStatus;

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchReport {
    pub status: ExecutionStatus,
    pub result: Option<Value>,
    pub error_context: Option<Value>,
}

impl DispatchReport {
    pub fn new(status: ExecutionStatus, result: Option<Value>, error_context: Option<Value>) -> Self {
        Self {
            status,
            result,
            error_context,
        }
    }

    pub fn running() -> Self {
        Self::new(ExecutionStatus::Running, None, None)
    }

    pub fn succeeded(result: Value) -> Self {
        Self::new(ExecutionStatus::Succeeded, Some(result), None)
    }

    pub fn failed(error: impl Into<String>) -> Self {
        let error = error.into();
        Self::new(
            ExecutionStatus::Failed,
            Some(serde_json::json!({ "error": error })),
            Some(serde_json::json!({ "error": error })),
        )
    }

    pub fn canceled() -> Self {
        Self::new(ExecutionStatus::Canceled, None, None)
    }

    /// Reports may only carry `running` or a terminal status
    pub fn validate(&self, execution_id: Uuid) -> OrchestrationResult<()> {
        if self.status == ExecutionStatus::Running || self.status.is_terminal() {
            Ok(())
        } else {
            Err(OrchestrationError::Dispatch {
                execution_id,
                reason: format!("dispatcher reported non-reportable status {}", self.status),
            })
        }
    }

    /// Result payload to persist: the result, else the error context
    pub fn into_result(self) -> Option<Value> {
        self.result.or(self.error_context)
    }
}

#[async_trait]
pub trait Dispatcher: Send + Sync + Debug {
    /// Hand a runnable execution to a runner
    async fn dispatch(
        &self,
        execution: &Execution,
        cancellation: CancellationToken,
    ) -> OrchestrationResult<DispatchReport>;

    /// Fresh report for an execution that previously reported `running`.
    ///
    /// `None` means there is nothing new yet.
    async fn poll(&self, _execution: &Execution) -> OrchestrationResult<Option<DispatchReport>> {
        Ok(None)
    }
}

/// Cancellation tokens of dispatched executions that have not settled yet
#[derive(Debug, Default)]
pub struct InFlightRegistry {
    tokens: DashMap<Uuid, CancellationToken>,
}

impl InFlightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token handed to the dispatcher for `execution_id`
    pub fn register(&self, execution_id: Uuid) -> CancellationToken {
        self.tokens
            .entry(execution_id)
            .or_insert_with(CancellationToken::new)
            .clone()
    }

    /// Signal the runner; returns false when nothing is in flight
    pub fn cancel(&self, execution_id: Uuid) -> bool {
        match self.tokens.get(&execution_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, execution_id: Uuid) {
        self.tokens.remove(&execution_id);
    }

    pub fn contains(&self, execution_id: Uuid) -> bool {
        self.tokens.contains_key(&execution_id)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_only_running_or_terminal_reports_are_valid() {
        let id = Uuid::new_v4();
        assert!(DispatchReport::running().validate(id).is_ok());
        assert!(DispatchReport::succeeded(json!("ok")).validate(id).is_ok());
        let paused = DispatchReport::new(ExecutionStatus::Paused, None, None);
        assert!(matches!(
            paused.validate(id),
            Err(OrchestrationError::Dispatch { .. })
        ));
    }

    #[test]
    fn test_error_context_used_when_no_result() {
        let report = DispatchReport::new(
            ExecutionStatus::Failed,
            None,
            Some(json!({"stderr": "boom"})),
        );
        assert_eq!(report.into_result(), Some(json!({"stderr": "boom"})));
    }

    #[test]
    fn test_in_flight_cancel_fires_registered_token() {
        let registry = InFlightRegistry::new();
        let id = Uuid::new_v4();
        assert!(!registry.cancel(id));

        let token = registry.register(id);
        assert!(registry.cancel(id));
        assert!(token.is_cancelled());

        registry.remove(id);
        assert!(registry.is_empty());
    }
}
