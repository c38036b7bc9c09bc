//! # Coordinator Lock Service
//!
//! Named mutual-exclusion locks serializing workflow instance advancement. The lock name
//! is the workflow instance id. When no coordination backend is configured the no-op
//! service is used and every acquisition succeeds immediately.

pub mod local;
pub mod noop;

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, warn};

use crate::config::{CoordinationBackend, CoordinationConfig};
use crate::errors::{OrchestrationError, OrchestrationResult};
use crate::orchestration::backoff::BackoffPolicy;

pub use local::LocalLockService;
pub use noop::NoOpLockService;

#[async_trait]
pub trait LockService: Send + Sync + fmt::Debug {
    /// Acquire `name`, waiting at most `timeout`.
    ///
    /// Fails with `LockTimeout` when the wait runs out and with `Connection` when the
    /// backend cannot be reached.
    async fn acquire(&self, name: &str, timeout: Duration) -> OrchestrationResult<LockGuard>;
}

/// Held lock; released explicitly or when dropped
pub struct LockGuard {
    name: String,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl LockGuard {
    pub fn new(name: impl Into<String>, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            name: name.into(),
            release: Some(Box::new(release)),
        }
    }

    /// A guard with nothing to release
    pub fn unlocked(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            release: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.release_inner();
    }
}

impl fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard")
            .field("name", &self.name)
            .field("held", &self.release.is_some())
            .finish()
    }
}

/// Build the lock service selected by configuration
pub fn lock_service_from_config(config: &CoordinationConfig) -> Arc<dyn LockService> {
    match config.backend {
        CoordinationBackend::None => Arc::new(NoOpLockService),
        CoordinationBackend::Local => Arc::new(LocalLockService::new()),
    }
}

/// Acquire a lock, retrying connection errors with bounded exponential backoff.
///
/// Timeouts and every other error propagate immediately; an exhausted retry budget
/// re-raises the last connection error.
pub async fn acquire_with_retry(
    service: &dyn LockService,
    name: &str,
    timeout: Duration,
    policy: &BackoffPolicy,
) -> OrchestrationResult<LockGuard> {
    let started = Instant::now();
    let mut retries = 0u32;

    loop {
        match service.acquire(name, timeout).await {
            Ok(guard) => return Ok(guard),
            Err(err @ OrchestrationError::Connection { .. }) => {
                match policy.next_delay(retries, started.elapsed()) {
                    Some(delay) => {
                        warn!(
                            lock = %name,
                            attempt = retries + 1,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "Coordination backend unreachable, retrying lock acquisition"
                        );
                        tokio::time::sleep(delay).await;
                        retries += 1;
                    }
                    None => {
                        error!(
                            lock = %name,
                            attempts = retries + 1,
                            error = %err,
                            "Lock acquisition retries exhausted"
                        );
                        return Err(err);
                    }
                }
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct Unreachable {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LockService for Unreachable {
        async fn acquire(&self, _name: &str, _timeout: Duration) -> OrchestrationResult<LockGuard> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(OrchestrationError::connection("coordination", "refused"))
        }
    }

    fn policy(attempts: u32) -> BackoffPolicy {
        BackoffPolicy::from_coordination_config(&CoordinationConfig {
            connection_retry_attempts: attempts,
            connection_retry_initial_ms: 10,
            connection_retry_max_ms: 40,
            ..CoordinationConfig::default()
        })
    }

    #[test]
    fn test_guard_releases_once() {
        let released = Arc::new(AtomicUsize::new(0));
        let counter = released.clone();
        let guard = LockGuard::new("wf", move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        guard.release();
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let released = Arc::new(AtomicUsize::new(0));
        let counter = released.clone();
        {
            let _guard = LockGuard::new("wf", move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_errors_exhaust_attempts() {
        let service = Unreachable::default();
        let err = acquire_with_retry(&service, "wf", Duration::from_secs(1), &policy(3))
            .await
            .unwrap_err();

        assert!(err.is_connection_error());
        assert_eq!(service.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_config_selects_backend() {
        let config = CoordinationConfig {
            backend: CoordinationBackend::Local,
            ..CoordinationConfig::default()
        };
        let service = lock_service_from_config(&config);
        assert!(format!("{service:?}").contains("LocalLockService"));
    }
}
