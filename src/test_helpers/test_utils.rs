//! # Test Utilities
//!
//! Environment setup shared by unit and integration tests.

use std::env;

use crate::config::ConductorConfig;
use crate::logging::init_tracing;

/// Mark the process as a test run and install the tracing subscriber once.
///
/// `CONDUCTOR_ENV` is only set when absent, so CI can still override it.
pub fn setup_test_environment() {
    if env::var("CONDUCTOR_ENV").is_err() {
        env::set_var("CONDUCTOR_ENV", "test");
    }
    init_tracing();
}

/// Configuration tuned for tests: short lock waits and millisecond backoffs
pub fn test_config() -> ConductorConfig {
    let mut config = ConductorConfig::default();
    config.coordination.lock_timeout_ms = 1_000;
    config.coordination.connection_retry_initial_ms = 1;
    config.coordination.connection_retry_max_ms = 5;
    config.callback.initial_delay_ms = 1;
    config.callback.max_delay_ms = 5;
    config.callback.max_elapsed_ms = 1_000;
    config
}
