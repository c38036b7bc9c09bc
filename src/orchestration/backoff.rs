//! # Backoff Calculator
//!
//! Bounded exponential backoff shared by lock acquisition retries and the external
//! engine callback retrier.
//!
//! The n-th retry (0-based) waits `min(initial * 2^n, max_delay)`. Retrying stops when
//! the retry cap is reached or when the next wait would push total elapsed time past
//! the elapsed budget.

use std::time::Duration;

use crate::config::{CallbackConfig, CoordinationConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Total time budget; `None` means only `max_retries` bounds retrying
    pub max_elapsed: Option<Duration>,
    pub max_retries: Option<u32>,
}

impl BackoffPolicy {
    /// Callback retries are capped by elapsed time, plus an optional attempt cap
    pub fn from_callback_config(config: &CallbackConfig) -> Self {
        Self {
            initial_delay: config.initial_delay(),
            max_delay: config.max_delay(),
            max_elapsed: Some(config.max_elapsed()),
            max_retries: config.max_retries,
        }
    }

    /// Lock acquisition makes a fixed number of attempts
    pub fn from_coordination_config(config: &CoordinationConfig) -> Self {
        Self {
            initial_delay: config.connection_retry_initial(),
            max_delay: config.connection_retry_max(),
            max_elapsed: None,
            max_retries: Some(config.connection_retry_attempts.saturating_sub(1)),
        }
    }

    /// Wait before the given retry (0-based)
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let factor = 2u32.checked_pow(retry).unwrap_or(u32::MAX);
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Decide whether another attempt is allowed.
    ///
    /// `retries_done` counts retries already performed; `elapsed` is the time spent since
    /// the first attempt started. Returns the wait before the next attempt.
    pub fn next_delay(&self, retries_done: u32, elapsed: Duration) -> Option<Duration> {
        if self.max_retries.is_some_and(|max| retries_done >= max) {
            return None;
        }
        let delay = self.delay_for_retry(retries_done);
        if let Some(budget) = self.max_elapsed {
            if elapsed.saturating_add(delay) > budget {
                return None;
            }
        }
        Some(delay)
    }
}
