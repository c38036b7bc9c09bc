use super::states::ExecutionStatus;
use crate::errors::{OrchestrationError, OrchestrationResult};
use uuid::Uuid;

/// Guard conditions for execution status transitions
#[derive(Debug)]
pub struct TransitionGuard;

impl TransitionGuard {
    /// Legal targets from a given status.
    ///
    /// The only cycle in the graph is `running -> pausing -> paused -> running`.
    pub fn allowed_targets(from: ExecutionStatus) -> &'static [ExecutionStatus] {
        use ExecutionStatus::*;

        match from {
            Requested => &[Scheduled, Delayed, Canceling, Canceled, Abandoned],
            Delayed => &[Scheduled, Canceling, Canceled, Abandoned],
            Scheduled => &[Running, Canceling, Canceled, Failed, Abandoned],
            Running => &[Succeeded, Failed, Timeout, Canceling, Pausing, Abandoned],
            Canceling => &[Canceled, Abandoned],
            Pausing => &[Paused, Succeeded, Failed, Timeout, Canceling, Abandoned],
            Paused => &[Running, Canceling, Abandoned],
            Succeeded | Failed | Timeout | Abandoned | Canceled => &[],
        }
    }

    pub fn can_transition(from: ExecutionStatus, to: ExecutionStatus) -> bool {
        Self::allowed_targets(from).contains(&to)
    }

    /// Validate a transition, producing `InvalidTransition` when it is not a legal edge
    pub fn check(
        execution_id: Uuid,
        from: ExecutionStatus,
        to: ExecutionStatus,
    ) -> OrchestrationResult<()> {
        if Self::can_transition(from, to) {
            Ok(())
        } else {
            Err(OrchestrationError::InvalidTransition {
                execution_id,
                from,
                to,
            })
        }
    }
}
