use serde::{Deserialize, Serialize};
use std::fmt;

/// Execution status lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Initial state when the execution is created
    Requested,
    /// Admitted and waiting for a dispatcher
    Scheduled,
    /// Held back by a task-level delay
    Delayed,
    /// Work is in flight
    Running,
    Succeeded,
    Failed,
    Timeout,
    /// Underlying work confirmed lost
    Abandoned,
    /// Cancel requested; in-flight work has not stopped yet
    Canceling,
    Canceled,
    /// Pause requested; the instance is still progressing
    Pausing,
    Paused,
}

impl ExecutionStatus {
    pub const ALL: [ExecutionStatus; 12] = [
        Self::Requested,
        Self::Scheduled,
        Self::Delayed,
        Self::Running,
        Self::Succeeded,
        Self::Failed,
        Self::Timeout,
        Self::Abandoned,
        Self::Canceling,
        Self::Canceled,
        Self::Pausing,
        Self::Paused,
    ];

    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::Timeout | Self::Abandoned | Self::Canceled
        )
    }

    /// Work has not been handed to a dispatcher yet
    pub fn is_pre_dispatch(&self) -> bool {
        matches!(self, Self::Requested | Self::Scheduled | Self::Delayed)
    }

    /// Check if the execution is actively progressing (not terminal, not paused)
    pub fn is_active(&self) -> bool {
        !self.is_terminal() && *self != Self::Paused
    }

    pub fn is_cancelable(&self) -> bool {
        !self.is_terminal() && *self != Self::Canceling
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::Scheduled => "scheduled",
            Self::Delayed => "delayed",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
            Self::Abandoned => "abandoned",
            Self::Canceling => "canceling",
            Self::Canceled => "canceled",
            Self::Pausing => "pausing",
            Self::Paused => "paused",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("Invalid execution status: {s}"))
    }
}

impl Default for ExecutionStatus {
    fn default() -> Self {
        Self::Requested
    }
}

/// Workflow-internal status vocabulary shared by workflow and task instances
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Requested,
    Scheduled,
    Delayed,
    Running,
    Pausing,
    Paused,
    Canceling,
    Canceled,
    Succeeded,
    Failed,
    Expired,
    Abandoned,
}

impl WorkflowStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::Canceled | Self::Expired | Self::Abandoned
        )
    }

    /// Active means the owner still has work progressing on its behalf
    pub fn is_active(&self) -> bool {
        !self.is_terminal() && *self != Self::Paused
    }

    /// Execution status the owning execution settles into when the workflow ends here
    pub fn to_execution_status(self) -> ExecutionStatus {
        match self {
            Self::Requested => ExecutionStatus::Requested,
            Self::Scheduled => ExecutionStatus::Scheduled,
            Self::Delayed => ExecutionStatus::Delayed,
            Self::Running => ExecutionStatus::Running,
            Self::Pausing => ExecutionStatus::Pausing,
            Self::Paused => ExecutionStatus::Paused,
            Self::Canceling => ExecutionStatus::Canceling,
            Self::Canceled => ExecutionStatus::Canceled,
            Self::Succeeded => ExecutionStatus::Succeeded,
            Self::Failed => ExecutionStatus::Failed,
            Self::Expired => ExecutionStatus::Timeout,
            Self::Abandoned => ExecutionStatus::Abandoned,
        }
    }
}

impl From<ExecutionStatus> for WorkflowStatus {
    fn from(status: ExecutionStatus) -> Self {
        match status {
            ExecutionStatus::Requested => Self::Requested,
            ExecutionStatus::Scheduled => Self::Scheduled,
            ExecutionStatus::Delayed => Self::Delayed,
            ExecutionStatus::Running => Self::Running,
            ExecutionStatus::Succeeded => Self::Succeeded,
            ExecutionStatus::Failed => Self::Failed,
            ExecutionStatus::Timeout => Self::Expired,
            ExecutionStatus::Abandoned => Self::Abandoned,
            ExecutionStatus::Canceling => Self::Canceling,
            ExecutionStatus::Canceled => Self::Canceled,
            ExecutionStatus::Pausing => Self::Pausing,
            ExecutionStatus::Paused => Self::Paused,
        }
    }
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::Scheduled => "scheduled",
            Self::Delayed => "delayed",
            Self::Running => "running",
            Self::Pausing => "pausing",
            Self::Paused => "paused",
            Self::Canceling => "canceling",
            Self::Canceled => "canceled",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Expired => "expired",
            Self::Abandoned => "abandoned",
        }
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
