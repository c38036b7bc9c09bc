//! # External Engine Callback Retrier
//!
//! Reports execution outcomes to an external workflow engine that drives the execution
//! as one of its tasks. Statuses are translated through a total mapping, so every
//! internal status has exactly one external value. Transient transport failures are
//! retried with bounded exponential backoff; a rejection from the engine is final.
//! Callback failures never change the execution's own status.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Debug;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::backoff::BackoffPolicy;
use crate::config::CallbackConfig;
use crate::errors::{OrchestrationError, OrchestrationResult};
use crate::state_machine::states::ExecutionStatus;

/// Status vocabulary of the external engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExternalStatus {
    Running,
    Success,
    Error,
    Cancelled,
    Paused,
}

impl ExternalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "RUNNING",
            Self::Success => "SUCCESS",
            Self::Error => "ERROR",
            Self::Cancelled => "CANCELLED",
            Self::Paused => "PAUSED",
        }
    }
}

/// Translate an internal status for the external engine
pub fn map_status(status: ExecutionStatus) -> ExternalStatus {
    match status {
        ExecutionStatus::Requested
        | ExecutionStatus::Scheduled
        | ExecutionStatus::Delayed
        | ExecutionStatus::Running
        | ExecutionStatus::Canceling
        | ExecutionStatus::Pausing => ExternalStatus::Running,
        ExecutionStatus::Succeeded => ExternalStatus::Success,
        ExecutionStatus::Failed | ExecutionStatus::Timeout | ExecutionStatus::Abandoned => {
            ExternalStatus::Error
        }
        ExecutionStatus::Canceled => ExternalStatus::Cancelled,
        ExecutionStatus::Paused => ExternalStatus::Paused,
    }
}

/// Translate a status name coming from outside; unknown names are a configuration error
pub fn map_status_str(status: &str) -> OrchestrationResult<ExternalStatus> {
    ExecutionStatus::from_str(status)
        .map(map_status)
        .map_err(|_| OrchestrationError::UnmappedStatus {
            status: status.to_string(),
        })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackPayload {
    pub execution_id: Uuid,
    pub status: ExternalStatus,
    pub output: Option<Value>,
}

#[async_trait]
pub trait CallbackTransport: Send + Sync + Debug {
    /// Deliver one report.
    ///
    /// Transient failures must surface as `Connection` errors to be retried.
    async fn send(&self, url: &str, payload: &CallbackPayload) -> OrchestrationResult<()>;
}

/// Posts callback payloads as JSON over HTTP
#[derive(Debug, Clone)]
pub struct HttpCallbackTransport {
    client: reqwest::Client,
}

impl HttpCallbackTransport {
    pub fn new(request_timeout: Duration) -> OrchestrationResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| {
                OrchestrationError::Configuration(format!("Failed to build HTTP client: {e}"))
            })?;
        Ok(Self { client })
    }

    pub fn from_config(config: &CallbackConfig) -> OrchestrationResult<Self> {
        Self::new(config.request_timeout())
    }
}

#[async_trait]
impl CallbackTransport for HttpCallbackTransport {
    async fn send(&self, url: &str, payload: &CallbackPayload) -> OrchestrationResult<()> {
        let response = self
            .client
            .post(url)
            .json(payload)
            .send()
            .await
            .map_err(|e| OrchestrationError::connection("callback", e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        if status.is_server_error() {
            return Err(OrchestrationError::connection(
                "callback",
                format!("HTTP {status}: {body}"),
            ));
        }
        Err(OrchestrationError::CallbackRejected {
            url: url.to_string(),
            status_code: status.as_u16(),
            reason: body,
        })
    }
}

#[derive(Debug, Clone)]
pub struct CallbackRetrier {
    transport: Arc<dyn CallbackTransport>,
    policy: BackoffPolicy,
}

impl CallbackRetrier {
    pub fn new(transport: Arc<dyn CallbackTransport>, policy: BackoffPolicy) -> Self {
        Self { transport, policy }
    }

    pub fn from_config(transport: Arc<dyn CallbackTransport>, config: &CallbackConfig) -> Self {
        Self::new(transport, BackoffPolicy::from_callback_config(config))
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Report `status` and `result` for `execution_id` to `url`.
    ///
    /// Connection errors are retried until the backoff budget runs out, then the last
    /// error is returned. Any other error is returned immediately.
    pub async fn callback(
        &self,
        url: &str,
        execution_id: Uuid,
        status: ExecutionStatus,
        result: Option<Value>,
    ) -> OrchestrationResult<()> {
        let payload = CallbackPayload {
            execution_id,
            status: map_status(status),
            output: result,
        };

        let started = Instant::now();
        let mut retries = 0u32;
        loop {
            match self.transport.send(url, &payload).await {
                Ok(()) => {
                    debug!(
                        execution_id = %execution_id,
                        status = payload.status.as_str(),
                        attempts = retries + 1,
                        "Callback delivered"
                    );
                    return Ok(());
                }
                Err(err) if err.is_connection_error() => {
                    match self.policy.next_delay(retries, started.elapsed()) {
                        Some(delay) => {
                            retries += 1;
                            warn!(
                                execution_id = %execution_id,
                                url = %url,
                                attempt = retries,
                                delay_ms = delay.as_millis() as u64,
                                error = %err,
                                "Callback transport error, retrying"
                            );
                            tokio::time::sleep(delay).await;
                        }
                        None => {
                            error!(
                                execution_id = %execution_id,
                                url = %url,
                                attempts = retries + 1,
                                error = %err,
                                "Callback retries exhausted"
                            );
                            return Err(err);
                        }
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::RecordingTransport;
    use serde_json::json;

    fn retrier(transport: Arc<RecordingTransport>, max_retries: Option<u32>) -> CallbackRetrier {
        CallbackRetrier::new(
            transport,
            BackoffPolicy {
                initial_delay: Duration::from_millis(100),
                max_delay: Duration::from_millis(400),
                max_elapsed: Some(Duration::from_secs(30)),
                max_retries,
            },
        )
    }

    #[test]
    fn test_every_status_maps() {
        for status in ExecutionStatus::ALL {
            let mapped = map_status(status);
            assert!(!mapped.as_str().is_empty());
        }
        assert_eq!(map_status(ExecutionStatus::Timeout), ExternalStatus::Error);
        assert_eq!(map_status(ExecutionStatus::Canceled), ExternalStatus::Cancelled);
    }

    #[test]
    fn test_unknown_status_name_is_an_error() {
        assert_eq!(map_status_str("paused").unwrap(), ExternalStatus::Paused);
        assert!(matches!(
            map_status_str("exploded"),
            Err(OrchestrationError::UnmappedStatus { .. })
        ));
    }

    #[test]
    fn test_payload_uses_external_vocabulary() {
        let payload = CallbackPayload {
            execution_id: Uuid::nil(),
            status: ExternalStatus::Cancelled,
            output: None,
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["status"], json!("CANCELLED"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_then_success() {
        let transport = Arc::new(RecordingTransport::failing_with_connection_errors(1));
        let retrier = retrier(transport.clone(), Some(3));

        retrier
            .callback("http://engine/cb", Uuid::new_v4(), ExecutionStatus::Succeeded, None)
            .await
            .unwrap();
        assert_eq!(transport.calls(), 2);
        assert_eq!(transport.delivered().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_cap_stops_after_four_calls() {
        let transport = Arc::new(RecordingTransport::failing_with_connection_errors(4));
        let retrier = retrier(transport.clone(), Some(3));

        let err = retrier
            .callback("http://engine/cb", Uuid::new_v4(), ExecutionStatus::Failed, None)
            .await
            .unwrap_err();
        assert!(err.is_connection_error());
        assert_eq!(transport.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_elapsed_budget_bounds_retries() {
        let transport = Arc::new(RecordingTransport::failing_with_connection_errors(100));
        let retrier = CallbackRetrier::new(
            transport.clone(),
            BackoffPolicy {
                initial_delay: Duration::from_millis(100),
                max_delay: Duration::from_millis(100),
                max_elapsed: Some(Duration::from_millis(350)),
                max_retries: None,
            },
        );

        let err = retrier
            .callback("http://engine/cb", Uuid::new_v4(), ExecutionStatus::Failed, None)
            .await
            .unwrap_err();
        assert!(err.is_connection_error());
        // Waits at 100, 200, 300 ms; a fourth wait would pass 350 ms
        assert_eq!(transport.calls(), 4);
    }

    #[tokio::test]
    async fn test_rejection_is_not_retried() {
        let transport = Arc::new(RecordingTransport::rejecting(404));
        let retrier = retrier(transport.clone(), Some(3));

        let err = retrier
            .callback("http://engine/cb", Uuid::new_v4(), ExecutionStatus::Canceled, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OrchestrationError::CallbackRejected { status_code: 404, .. }
        ));
        assert_eq!(transport.calls(), 1);
    }
}
