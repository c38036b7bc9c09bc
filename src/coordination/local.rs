use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

use super::{LockGuard, LockService};
use crate::errors::{OrchestrationError, OrchestrationResult};

/// Named in-process mutexes with a bounded wait
#[derive(Debug, Default)]
pub struct LocalLockService {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl LocalLockService {
    pub fn new() -> Self {
        Self::default()
    }

    fn named(&self, name: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

#[async_trait]
impl LockService for LocalLockService {
    async fn acquire(&self, name: &str, timeout: Duration) -> OrchestrationResult<LockGuard> {
        let mutex = self.named(name);
        let held = tokio::time::timeout(timeout, mutex.lock_owned())
            .await
            .map_err(|_| OrchestrationError::LockTimeout {
                name: name.to_string(),
                timeout,
            })?;

        debug!(lock = %name, "Lock acquired");
        let lock_name = name.to_string();
        Ok(LockGuard::new(name, move || {
            drop(held);
            debug!(lock = %lock_name, "Lock released");
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_second_acquire_waits_for_release() {
        let service = Arc::new(LocalLockService::new());
        let guard = service.acquire("wf-1", Duration::from_secs(1)).await.unwrap();

        let contender = {
            let service = service.clone();
            tokio::spawn(async move { service.acquire("wf-1", Duration::from_secs(5)).await })
        };
        tokio::task::yield_now().await;
        assert!(!contender.is_finished());

        guard.release();
        assert!(contender.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_bounded_wait_times_out() {
        let service = LocalLockService::new();
        let _guard = service.acquire("wf-1", Duration::from_secs(1)).await.unwrap();

        let err = service
            .acquire("wf-1", Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::LockTimeout { .. }));
    }

    #[tokio::test]
    async fn test_different_names_do_not_contend() {
        let service = LocalLockService::new();
        let _a = service.acquire("wf-1", Duration::from_millis(20)).await.unwrap();
        assert!(service.acquire("wf-2", Duration::from_millis(20)).await.is_ok());
    }
}
