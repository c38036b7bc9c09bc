//! Fault-injecting wrappers around the workflow store and the lock service.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::coordination::{LockGuard, LockService, NoOpLockService};
use crate::errors::{OrchestrationError, OrchestrationResult};
use crate::models::{TaskInstance, WorkflowInstance};
use crate::store::{InMemoryWorkflowStore, WorkflowCommit, WorkflowStore};

fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
        .is_ok()
}

/// Rejects the next `n` commits with a write conflict, as if another writer had
/// committed first
#[derive(Debug)]
pub struct FlakyWorkflowStore {
    inner: Arc<dyn WorkflowStore>,
    conflicts_left: AtomicU32,
    conflicts_injected: AtomicU32,
}

impl FlakyWorkflowStore {
    pub fn with_conflicts(conflicts: u32) -> Self {
        Self::wrapping(Arc::new(InMemoryWorkflowStore::new()), conflicts)
    }

    pub fn wrapping(inner: Arc<dyn WorkflowStore>, conflicts: u32) -> Self {
        Self {
            inner,
            conflicts_left: AtomicU32::new(conflicts),
            conflicts_injected: AtomicU32::new(0),
        }
    }

    /// Arm another `conflicts` rejections
    pub fn inject_conflicts(&self, conflicts: u32) {
        self.conflicts_left.store(conflicts, Ordering::SeqCst);
    }

    pub fn conflicts_injected(&self) -> u32 {
        self.conflicts_injected.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkflowStore for FlakyWorkflowStore {
    async fn get_instance(&self, id: Uuid) -> OrchestrationResult<WorkflowInstance> {
        self.inner.get_instance(id).await
    }

    async fn find_instance_for_execution(
        &self,
        execution_id: Uuid,
    ) -> OrchestrationResult<Option<WorkflowInstance>> {
        self.inner.find_instance_for_execution(execution_id).await
    }

    async fn get_task(&self, id: Uuid) -> OrchestrationResult<TaskInstance> {
        self.inner.get_task(id).await
    }

    async fn tasks_for_workflow(
        &self,
        workflow_instance_id: Uuid,
    ) -> OrchestrationResult<Vec<TaskInstance>> {
        self.inner.tasks_for_workflow(workflow_instance_id).await
    }

    async fn commit(&self, commit: WorkflowCommit) -> OrchestrationResult<WorkflowInstance> {
        if !commit.create_instance && take_one(&self.conflicts_left) {
            self.conflicts_injected.fetch_add(1, Ordering::SeqCst);
            return Err(OrchestrationError::write_conflict(
                "workflow_instance",
                commit.instance.id,
                format!("revision {}", commit.instance.revision),
                format!("revision {}", commit.instance.revision + 1),
            ));
        }
        self.inner.commit(commit).await
    }
}

/// Reports the coordination backend unreachable for the next `n` acquisitions
#[derive(Debug)]
pub struct FlakyLockService {
    inner: Arc<dyn LockService>,
    failures_left: AtomicU32,
    attempts: AtomicU32,
}

impl FlakyLockService {
    pub fn with_failures(failures: u32) -> Self {
        Self::wrapping(Arc::new(NoOpLockService), failures)
    }

    pub fn wrapping(inner: Arc<dyn LockService>, failures: u32) -> Self {
        Self {
            inner,
            failures_left: AtomicU32::new(failures),
            attempts: AtomicU32::new(0),
        }
    }

    pub fn inject_failures(&self, failures: u32) {
        self.failures_left.store(failures, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LockService for FlakyLockService {
    async fn acquire(&self, name: &str, timeout: Duration) -> OrchestrationResult<LockGuard> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if take_one(&self.failures_left) {
            return Err(OrchestrationError::connection(
                "coordination",
                "coordination backend unreachable",
            ));
        }
        self.inner.acquire(name, timeout).await
    }
}
