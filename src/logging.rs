//! # Structured Logging Module
//!
//! Environment-aware structured logging for the orchestration core, plus helpers that
//! give execution, cascade and workflow events a consistent shape.

use std::io::IsTerminal;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};
use uuid::Uuid;

use crate::state_machine::states::ExecutionStatus;

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration.
///
/// `RUST_LOG` wins when set; otherwise the level follows `CONDUCTOR_ENV`. Output is JSON
/// when `CONDUCTOR_LOG_FORMAT=json`. Calling this more than once is a no-op.
pub fn init_tracing() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(get_log_level(&environment)));

        let layer = if use_json_format() {
            fmt::layer()
                .json()
                .with_target(true)
                .with_thread_ids(true)
                .with_filter(filter)
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(std::io::stdout().is_terminal())
                .with_filter(filter)
                .boxed()
        };

        // A global subscriber may already be installed by the embedding application
        if tracing_subscriber::registry().with(layer).try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized");
        }

        tracing::info!(environment = %environment, "Structured logging initialized");
    });
}

/// Get current environment from environment variables
fn get_environment() -> String {
    std::env::var("CONDUCTOR_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

fn use_json_format() -> bool {
    std::env::var("CONDUCTOR_LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

/// Get log level based on environment
fn get_log_level(environment: &str) -> &'static str {
    match environment {
        "production" => "info",
        "test" => "warn",
        _ => "debug",
    }
}

/// Log a committed execution status change
pub fn log_execution_transition(
    execution_id: Uuid,
    action_ref: &str,
    from: ExecutionStatus,
    to: ExecutionStatus,
) {
    tracing::info!(
        execution_id = %execution_id,
        action_ref = %action_ref,
        from = %from,
        to = %to,
        "EXECUTION_TRANSITION"
    );
}

/// Log one node visited by a cancel/pause/resume cascade
pub fn log_cascade_operation(
    operation: &str,
    execution_id: Uuid,
    status: ExecutionStatus,
    requester: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        execution_id = %execution_id,
        status = %status,
        requester = %requester,
        details = details,
        "CASCADE_OPERATION"
    );
}

/// Log workflow instance bookkeeping
pub fn log_workflow_operation(
    operation: &str,
    workflow_instance_id: Uuid,
    task_id: Option<&str>,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        workflow_instance_id = %workflow_instance_id,
        task_id = task_id,
        status = %status,
        details = details,
        "WORKFLOW_OPERATION"
    );
}

/// Log error with full context
pub fn log_error(component: &str, operation: &str, error: &str, context: Option<&str>) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error = %error,
        context = context,
        "ERROR"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_mapping() {
        assert_eq!(get_log_level("test"), "warn");
        assert_eq!(get_log_level("development"), "debug");
        assert_eq!(get_log_level("production"), "info");
        assert_eq!(get_log_level("unknown"), "debug");
    }

    #[test]
    fn test_init_is_idempotent() {
        init_tracing();
        init_tracing();
        log_execution_transition(
            Uuid::new_v4(),
            "core.local",
            ExecutionStatus::Requested,
            ExecutionStatus::Scheduled,
        );
    }
}
