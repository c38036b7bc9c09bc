//! Error types for the orchestration core.
//!

use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::state_machine::states::ExecutionStatus;

/// Errors surfaced by the orchestration core.
///
/// Contention errors (`WriteConflict`, `Connection`) are retried close to where they
/// happen and only reach callers once the configured budget is exhausted. Everything
/// else propagates unchanged.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OrchestrationError {
    /// The requested status change is not an edge of the execution status graph
    #[error("Invalid transition for execution {execution_id}: {from} -> {to}")]
    InvalidTransition {
        execution_id: Uuid,
        from: ExecutionStatus,
        to: ExecutionStatus,
    },

    /// An optimistic compare-and-set precondition no longer held
    #[error("Write conflict on {entity} {entity_id}: expected {expected}, found {actual}")]
    WriteConflict {
        entity: &'static str,
        entity_id: Uuid,
        expected: String,
        actual: String,
    },

    /// The coordination backend or a callback transport could not be reached
    #[error("Connection error talking to {service}: {reason}")]
    Connection { service: String, reason: String },

    /// A named lock could not be acquired within its bounded wait
    #[error("Timed out after {timeout:?} waiting for lock {name}")]
    LockTimeout { name: String, timeout: Duration },

    #[error("Execution {execution_id} not found")]
    ExecutionNotFound { execution_id: Uuid },

    #[error("Workflow instance {workflow_instance_id} not found")]
    WorkflowInstanceNotFound { workflow_instance_id: Uuid },

    #[error("Task instance {task_instance_id} not found")]
    TaskInstanceNotFound { task_instance_id: Uuid },

    /// The execution is not owned by a task of a workflow instance
    #[error("Execution {execution_id} is not a workflow task")]
    NotWorkflowTask { execution_id: Uuid },

    /// The execution is in a status the requested operation cannot work from
    #[error("Unable to {operation} execution {execution_id} in status {status}")]
    UnexpectedStatus {
        execution_id: Uuid,
        status: ExecutionStatus,
        operation: &'static str,
    },

    #[error("Operation {operation} is not supported for execution {execution_id}: {reason}")]
    UnsupportedOperation {
        execution_id: Uuid,
        operation: &'static str,
        reason: String,
    },

    #[error("Dispatch failed for execution {execution_id}: {reason}")]
    Dispatch { execution_id: Uuid, reason: String },

    /// The external engine refused the callback; not retried
    #[error("Callback to {url} rejected with status {status_code}: {reason}")]
    CallbackRejected {
        url: String,
        status_code: u16,
        reason: String,
    },

    /// A status without an entry in the external engine vocabulary
    #[error("No external engine status mapped for {status}")]
    UnmappedStatus { status: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl OrchestrationError {
    pub fn write_conflict(
        entity: &'static str,
        entity_id: Uuid,
        expected: impl ToString,
        actual: impl ToString,
    ) -> Self {
        Self::WriteConflict {
            entity,
            entity_id,
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    pub fn connection(service: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Connection {
            service: service.into(),
            reason: reason.into(),
        }
    }

    pub fn is_write_conflict(&self) -> bool {
        matches!(self, Self::WriteConflict { .. })
    }

    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }
}

impl From<serde_json::Error> for OrchestrationError {
    fn from(error: serde_json::Error) -> Self {
        OrchestrationError::Internal(format!("JSON serialization error: {error}"))
    }
}

impl From<crate::config::ConfigurationError> for OrchestrationError {
    fn from(error: crate::config::ConfigurationError) -> Self {
        OrchestrationError::Configuration(error.to_string())
    }
}

pub type OrchestrationResult<T> = Result<T, OrchestrationError>;
