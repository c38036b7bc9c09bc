//! # System Constants
//!
//! Event names, status groupings and operational defaults shared by the orchestration
//! core. Configuration defaults in [`crate::config`] are built from the values here.

use crate::state_machine::states::ExecutionStatus;

/// Lifecycle event names published on the event channel
pub mod events {
    pub const EXECUTION_STATUS_CHANGED: &str = "execution.status_changed";
    pub const EXECUTION_ADMISSION_DENIED: &str = "execution.admission_denied";
    pub const EXECUTION_CALLBACK_FAILED: &str = "execution.callback_failed";

    pub const WORKFLOW_STARTED: &str = "workflow.started";
    pub const WORKFLOW_TASK_COMPLETED: &str = "workflow.task_completed";
    pub const WORKFLOW_COMPLETED: &str = "workflow.completed";
    pub const WORKFLOW_PAUSED: &str = "workflow.paused";
}

/// Context keys written by the cascade operations
pub mod context_keys {
    pub const CANCELLED_BY: &str = "cancelled_by";
    pub const PAUSED_BY: &str = "paused_by";
    pub const RESUMED_BY: &str = "resumed_by";
}

/// Operational defaults
pub mod system {
    /// Requester recorded when the core itself initiates a cascade
    pub const SYSTEM_REQUESTER: &str = "system";

    pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 30_000;
    pub const DEFAULT_CONNECTION_RETRY_ATTEMPTS: u32 = 3;
    pub const DEFAULT_CONNECTION_RETRY_INITIAL_MS: u64 = 100;
    pub const DEFAULT_CONNECTION_RETRY_MAX_MS: u64 = 2_000;

    pub const DEFAULT_MAX_CONFLICT_RETRIES: u32 = 5;

    pub const DEFAULT_CALLBACK_INITIAL_DELAY_MS: u64 = 1_000;
    pub const DEFAULT_CALLBACK_MAX_DELAY_MS: u64 = 5_000;
    pub const DEFAULT_CALLBACK_MAX_ELAPSED_MS: u64 = 30_000;
    pub const DEFAULT_CALLBACK_REQUEST_TIMEOUT_MS: u64 = 10_000;

    pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 1_000;
}

/// Status sets referenced by the cascade and admission logic
pub mod status_groups {
    use super::ExecutionStatus;

    pub const TERMINAL_STATUSES: &[ExecutionStatus] = &[
        ExecutionStatus::Succeeded,
        ExecutionStatus::Failed,
        ExecutionStatus::Timeout,
        ExecutionStatus::Abandoned,
        ExecutionStatus::Canceled,
    ];

    /// Statuses counted against a concurrency policy
    pub const ADMISSION_COUNTED_STATUSES: &[ExecutionStatus] = &[ExecutionStatus::Running];

    /// Statuses a cascade still has to visit
    pub const LIVE_STATUSES: &[ExecutionStatus] = &[
        ExecutionStatus::Requested,
        ExecutionStatus::Scheduled,
        ExecutionStatus::Delayed,
        ExecutionStatus::Running,
        ExecutionStatus::Canceling,
        ExecutionStatus::Pausing,
        ExecutionStatus::Paused,
    ];
}

#[cfg(test)]
mod tests {
    use super::status_groups::*;
    use super::ExecutionStatus;

    #[test]
    fn test_status_groups_partition_all_statuses() {
        for status in ExecutionStatus::ALL {
            let terminal = TERMINAL_STATUSES.contains(&status);
            let live = LIVE_STATUSES.contains(&status);
            assert!(terminal ^ live, "{status} must be exactly one of terminal/live");
            assert_eq!(terminal, status.is_terminal());
        }
    }
}
