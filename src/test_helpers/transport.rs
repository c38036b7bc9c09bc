//! Recording callback transport with scripted failures.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::errors::{OrchestrationError, OrchestrationResult};
use crate::orchestration::callback::{CallbackPayload, CallbackTransport};

#[derive(Debug, Default)]
pub struct RecordingTransport {
    connection_failures: AtomicUsize,
    rejection: Option<u16>,
    calls: AtomicUsize,
    delivered: Mutex<Vec<(String, CallbackPayload)>>,
}

impl RecordingTransport {
    /// Accepts every callback
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the first `failures` calls with a transport error, then accepts
    pub fn failing_with_connection_errors(failures: usize) -> Self {
        Self {
            connection_failures: AtomicUsize::new(failures),
            ..Self::default()
        }
    }

    /// Rejects every callback with the given HTTP status
    pub fn rejecting(status_code: u16) -> Self {
        Self {
            rejection: Some(status_code),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn delivered(&self) -> Vec<CallbackPayload> {
        self.delivered
            .lock()
            .iter()
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    pub fn delivered_to(&self, url: &str) -> Vec<CallbackPayload> {
        self.delivered
            .lock()
            .iter()
            .filter(|(target, _)| target == url)
            .map(|(_, payload)| payload.clone())
            .collect()
    }
}

#[async_trait]
impl CallbackTransport for RecordingTransport {
    async fn send(&self, url: &str, payload: &CallbackPayload) -> OrchestrationResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(status_code) = self.rejection {
            return Err(OrchestrationError::CallbackRejected {
                url: url.to_string(),
                status_code,
                reason: "rejected by test transport".to_string(),
            });
        }

        let failed = self
            .connection_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failed {
            return Err(OrchestrationError::connection("callback", "connection refused"));
        }

        self.delivered.lock().push((url.to_string(), payload.clone()));
        Ok(())
    }
}
