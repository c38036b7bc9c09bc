use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::events;
use crate::state_machine::states::{ExecutionStatus, WorkflowStatus};

/// Lifecycle events emitted by the orchestration core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrchestrationEvent {
    ExecutionStatusChanged {
        execution_id: Uuid,
        action_ref: String,
        from: ExecutionStatus,
        to: ExecutionStatus,
    },
    AdmissionDenied {
        execution_id: Uuid,
        policy: String,
        running: usize,
        threshold: usize,
    },
    CallbackFailed {
        execution_id: Uuid,
        url: String,
        error: String,
    },
    WorkflowStarted {
        workflow_instance_id: Uuid,
        execution_id: Uuid,
    },
    TaskCompleted {
        workflow_instance_id: Uuid,
        task_instance_id: Uuid,
        task_id: String,
        status: WorkflowStatus,
    },
    WorkflowPaused {
        workflow_instance_id: Uuid,
        execution_id: Uuid,
    },
    WorkflowCompleted {
        workflow_instance_id: Uuid,
        execution_id: Uuid,
        status: WorkflowStatus,
    },
}

impl OrchestrationEvent {
    /// Stable event name used by subscribers for routing
    pub fn name(&self) -> &'static str {
        match self {
            Self::ExecutionStatusChanged { .. } => events::EXECUTION_STATUS_CHANGED,
            Self::AdmissionDenied { .. } => events::EXECUTION_ADMISSION_DENIED,
            Self::CallbackFailed { .. } => events::EXECUTION_CALLBACK_FAILED,
            Self::WorkflowStarted { .. } => events::WORKFLOW_STARTED,
            Self::TaskCompleted { .. } => events::WORKFLOW_TASK_COMPLETED,
            Self::WorkflowPaused { .. } => events::WORKFLOW_PAUSED,
            Self::WorkflowCompleted { .. } => events::WORKFLOW_COMPLETED,
        }
    }

    /// The execution this event concerns, when there is one
    pub fn execution_id(&self) -> Option<Uuid> {
        match self {
            Self::ExecutionStatusChanged { execution_id, .. }
            | Self::AdmissionDenied { execution_id, .. }
            | Self::CallbackFailed { execution_id, .. }
            | Self::WorkflowStarted { execution_id, .. }
            | Self::WorkflowPaused { execution_id, .. }
            | Self::WorkflowCompleted { execution_id, .. } => Some(*execution_id),
            Self::TaskCompleted { .. } => None,
        }
    }
}
