use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::guards::TransitionGuard;
use super::states::ExecutionStatus;
use crate::constants::system::DEFAULT_MAX_CONFLICT_RETRIES;
use crate::errors::{OrchestrationError, OrchestrationResult};
use crate::events::{EventPublisher, OrchestrationEvent};
use crate::logging::log_execution_transition;
use crate::models::Execution;
use crate::store::{ExecutionStore, ExecutionUpdate};

/// Canonical status lifecycle of executions.
///
/// Every write is a compare-and-set against the caller's last-known status, so concurrent
/// writers never clobber each other; the loser gets `WriteConflict`.
#[derive(Debug, Clone)]
pub struct ExecutionStateMachine {
    store: Arc<dyn ExecutionStore>,
    event_publisher: EventPublisher,
    max_conflict_retries: u32,
}

impl ExecutionStateMachine {
    pub fn new(store: Arc<dyn ExecutionStore>, event_publisher: EventPublisher) -> Self {
        Self {
            store,
            event_publisher,
            max_conflict_retries: DEFAULT_MAX_CONFLICT_RETRIES,
        }
    }

    pub fn with_conflict_retries(mut self, max_conflict_retries: u32) -> Self {
        self.max_conflict_retries = max_conflict_retries;
        self
    }

    pub fn store(&self) -> &Arc<dyn ExecutionStore> {
        &self.store
    }

    pub async fn current(&self, execution_id: Uuid) -> OrchestrationResult<Execution> {
        self.store.get(execution_id).await
    }

    /// Move `last_known` to `target`
    pub async fn transition(
        &self,
        last_known: &Execution,
        target: ExecutionStatus,
    ) -> OrchestrationResult<Execution> {
        self.apply(last_known, ExecutionUpdate::status(target)).await
    }

    /// Read the execution and move it to `target`
    pub async fn transition_by_id(
        &self,
        execution_id: Uuid,
        target: ExecutionStatus,
    ) -> OrchestrationResult<Execution> {
        let current = self.store.get(execution_id).await?;
        self.transition(&current, target).await
    }

    /// Operator override: move to `target` along the shortest legal route, one
    /// compare-and-set per hop. Fails with `InvalidTransition` when no route exists.
    pub async fn transition_along(
        &self,
        execution_id: Uuid,
        target: ExecutionStatus,
    ) -> OrchestrationResult<Execution> {
        let current = self.store.get(execution_id).await?;
        let path = Self::path_to(current.status, target).ok_or(
            OrchestrationError::InvalidTransition {
                execution_id,
                from: current.status,
                to: target,
            },
        )?;
        self.walk(current, &path, None).await
    }

    /// Check legality, write with the last-known status as precondition, then publish
    pub async fn apply(
        &self,
        last_known: &Execution,
        mut update: ExecutionUpdate,
    ) -> OrchestrationResult<Execution> {
        let from = last_known.status;
        let to = update.status;
        TransitionGuard::check(last_known.id, from, to)?;

        if to.is_terminal() && update.end_timestamp.is_none() {
            update.end_timestamp = Some(Utc::now());
        }

        let updated = self
            .store
            .compare_and_set(last_known.id, from, update)
            .await?;

        log_execution_transition(updated.id, &updated.action_ref, from, to);
        self.event_publisher
            .publish(OrchestrationEvent::ExecutionStatusChanged {
                execution_id: updated.id,
                action_ref: updated.action_ref.clone(),
                from,
                to,
            });

        Ok(updated)
    }

    /// Re-read and re-decide until the write lands or the conflict budget runs out.
    ///
    /// `decide` returns `None` when nothing should be written for the status it sees.
    pub async fn update_with_retry<F>(
        &self,
        execution_id: Uuid,
        mut decide: F,
    ) -> OrchestrationResult<Option<Execution>>
    where
        F: FnMut(&Execution) -> Option<ExecutionUpdate> + Send,
    {
        let mut attempt = 0u32;
        loop {
            let current = self.store.get(execution_id).await?;
            let Some(update) = decide(&current) else {
                return Ok(None);
            };

            match self.apply(&current, update).await {
                Ok(updated) => return Ok(Some(updated)),
                Err(err) if err.is_write_conflict() => {
                    if attempt >= self.max_conflict_retries {
                        error!(
                            execution_id = %execution_id,
                            attempts = attempt + 1,
                            error = %err,
                            "Execution write conflict retries exhausted"
                        );
                        return Err(err);
                    }
                    attempt += 1;
                    warn!(
                        execution_id = %execution_id,
                        attempt = attempt,
                        error = %err,
                        "Execution write conflict, re-reading"
                    );
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Drive an execution to `target`, walking through `canceling` or `running` when
    /// there is no direct edge. Returns `None` when the execution is already terminal or
    /// already at the target.
    pub async fn settle(
        &self,
        execution_id: Uuid,
        target: ExecutionStatus,
        result: Option<Value>,
    ) -> OrchestrationResult<Option<Execution>> {
        self.settle_with(execution_id, result, |_| Some(target))
            .await
    }

    /// Like [`settle`](Self::settle) with the target chosen from the status found
    pub async fn settle_with<F>(
        &self,
        execution_id: Uuid,
        result: Option<Value>,
        choose_target: F,
    ) -> OrchestrationResult<Option<Execution>>
    where
        F: Fn(ExecutionStatus) -> Option<ExecutionStatus> + Send + Sync,
    {
        let mut attempt = 0u32;
        loop {
            let current = self.store.get(execution_id).await?;
            if current.status.is_terminal() {
                debug!(
                    execution_id = %execution_id,
                    status = %current.status,
                    "Execution already terminal, nothing to settle"
                );
                return Ok(None);
            }
            let Some(target) = choose_target(current.status) else {
                return Ok(None);
            };
            if current.status == target {
                return Ok(None);
            }

            let path = Self::path_to(current.status, target).ok_or(
                OrchestrationError::InvalidTransition {
                    execution_id,
                    from: current.status,
                    to: target,
                },
            )?;

            match self.walk(current, &path, result.clone()).await {
                Ok(updated) => return Ok(Some(updated)),
                Err(err) if err.is_write_conflict() && attempt < self.max_conflict_retries => {
                    attempt += 1;
                    warn!(
                        execution_id = %execution_id,
                        attempt = attempt,
                        target = %target,
                        "Write conflict while settling execution, re-reading"
                    );
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn walk(
        &self,
        mut current: Execution,
        path: &[ExecutionStatus],
        result: Option<Value>,
    ) -> OrchestrationResult<Execution> {
        let last = path.len().saturating_sub(1);
        for (index, status) in path.iter().enumerate() {
            let update = if index == last {
                ExecutionUpdate::status(*status).with_result(result.clone())
            } else {
                ExecutionUpdate::status(*status)
            };
            current = self.apply(&current, update).await?;
        }
        Ok(current)
    }

    /// Shortest legal route from `from` to `to`
    pub fn path_to(from: ExecutionStatus, to: ExecutionStatus) -> Option<Vec<ExecutionStatus>> {
        if TransitionGuard::can_transition(from, to) {
            return Some(vec![to]);
        }
        [ExecutionStatus::Canceling, ExecutionStatus::Running]
            .into_iter()
            .find(|via| {
                TransitionGuard::can_transition(from, *via)
                    && TransitionGuard::can_transition(*via, to)
            })
            .map(|via| vec![via, to])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryExecutionStore;
    use serde_json::json;
    use ExecutionStatus::*;

    async fn machine_with(execution: Execution) -> (ExecutionStateMachine, Execution) {
        let store: Arc<dyn ExecutionStore> = Arc::new(InMemoryExecutionStore::new());
        let created = store.create(execution).await.unwrap();
        (
            ExecutionStateMachine::new(store, EventPublisher::new(16)),
            created,
        )
    }

    #[tokio::test]
    async fn test_transition_publishes_status_change() {
        let (machine, execution) = machine_with(Execution::new("core.local", json!({}))).await;
        let mut events = machine.event_publisher.subscribe();

        let scheduled = machine.transition(&execution, Scheduled).await.unwrap();
        assert_eq!(scheduled.status, Scheduled);

        let event = events.recv().await.unwrap();
        assert_eq!(
            event.event,
            OrchestrationEvent::ExecutionStatusChanged {
                execution_id: execution.id,
                action_ref: "core.local".to_string(),
                from: Requested,
                to: Scheduled,
            }
        );
    }

    #[tokio::test]
    async fn test_illegal_transition_is_rejected_before_writing() {
        let (machine, execution) = machine_with(Execution::new("core.local", json!({}))).await;
        let err = machine.transition(&execution, Succeeded).await.unwrap_err();
        assert!(matches!(err, OrchestrationError::InvalidTransition { .. }));
        assert_eq!(machine.current(execution.id).await.unwrap().status, Requested);
    }

    #[tokio::test]
    async fn test_stale_last_known_status_conflicts() {
        let (machine, execution) = machine_with(Execution::new("core.local", json!({}))).await;
        machine.transition(&execution, Scheduled).await.unwrap();

        // `execution` still says requested
        let err = machine.transition(&execution, Canceled).await.unwrap_err();
        assert!(err.is_write_conflict());
    }

    #[tokio::test]
    async fn test_terminal_transition_stamps_end_timestamp() {
        let (machine, execution) = machine_with(Execution::new("core.local", json!({}))).await;
        let canceled = machine.transition(&execution, Canceled).await.unwrap();
        assert!(canceled.end_timestamp.is_some());
    }

    #[tokio::test]
    async fn test_settle_walks_through_canceling() {
        let (machine, execution) = machine_with(Execution::new("core.local", json!({}))).await;
        let scheduled = machine.transition(&execution, Scheduled).await.unwrap();
        machine.transition(&scheduled, Running).await.unwrap();

        let settled = machine
            .settle(execution.id, Canceled, Some(json!({"tasks": []})))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(settled.status, Canceled);
        assert_eq!(settled.result, Some(json!({"tasks": []})));

        // Already terminal
        assert!(machine.settle(execution.id, Canceled, None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_transition_along_walks_every_hop() {
        let mut execution = Execution::new("core.local", json!({}));
        execution.status = Running;
        let (machine, execution) = machine_with(execution).await;
        let mut events = machine.event_publisher.subscribe();

        let canceled = machine.transition_along(execution.id, Canceled).await.unwrap();
        assert_eq!(canceled.status, Canceled);
        assert!(canceled.end_timestamp.is_some());

        let mut hops = Vec::new();
        while let Ok(published) = events.try_recv() {
            if let OrchestrationEvent::ExecutionStatusChanged { from, to, .. } = published.event {
                hops.push((from, to));
            }
        }
        assert_eq!(hops, vec![(Running, Canceling), (Canceling, Canceled)]);

        let result = machine.transition_along(execution.id, Running).await;
        assert!(matches!(
            result,
            Err(OrchestrationError::InvalidTransition { from: Canceled, .. })
        ));
    }

    #[test]
    fn test_paths() {
        assert_eq!(
            ExecutionStateMachine::path_to(Running, Canceled),
            Some(vec![Canceling, Canceled])
        );
        assert_eq!(
            ExecutionStateMachine::path_to(Scheduled, Succeeded),
            Some(vec![Running, Succeeded])
        );
        assert_eq!(ExecutionStateMachine::path_to(Requested, Succeeded), None);
    }
}
