use async_trait::async_trait;
use std::time::Duration;

use super::{LockGuard, LockService};
use crate::errors::OrchestrationResult;

/// Fallback when no coordination backend is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpLockService;

#[async_trait]
impl LockService for NoOpLockService {
    async fn acquire(&self, name: &str, _timeout: Duration) -> OrchestrationResult<LockGuard> {
        Ok(LockGuard::unlocked(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_noop_never_blocks() {
        let service = NoOpLockService;
        let first = service.acquire("wf", Duration::from_millis(1)).await.unwrap();
        let second = service.acquire("wf", Duration::from_millis(1)).await.unwrap();
        assert_eq!(first.name(), second.name());
    }
}
