//! Hooks into the retry loop
//!
//! The executor reports each attempt to a [`RetryObserver`]. Tools pass a
//! [`TracingObserver`] named after the operation they repeat, so a slow
//! kdump or chrony wait shows up in the logs with its attempt count.

use std::fmt::Display;
use std::time::Duration;

/// Receives the events of one retry loop
///
/// Attempts are numbered from 1.
pub trait RetryObserver {
    fn on_attempt_start(&self, attempt: u32, max_attempts: u32);

    /// The attempt failed and the next one starts after `delay`
    fn on_attempt_failed(&self, attempt: u32, error: &dyn Display, delay: Duration);

    fn on_success(&self, attempt: u32, elapsed: Duration);

    /// The final attempt failed
    fn on_exhausted(&self, attempts: u32, error: &dyn Display);

    /// The predicate refused to retry `error`
    fn on_rejected(&self, attempt: u32, error: &dyn Display) {
        let _ = (attempt, error);
    }
}

/// Reports nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpObserver;

impl RetryObserver for NoOpObserver {
    fn on_attempt_start(&self, _attempt: u32, _max_attempts: u32) {}

    fn on_attempt_failed(&self, _attempt: u32, _error: &dyn Display, _delay: Duration) {}

    fn on_success(&self, _attempt: u32, _elapsed: Duration) {}

    fn on_exhausted(&self, _attempts: u32, _error: &dyn Display) {}
}

/// Logs retry events under an operation name
///
/// Individual attempts are logged at debug level. A failure that will be
/// retried is a warning and giving up is an error.
#[derive(Debug, Clone)]
pub struct TracingObserver {
    operation: String,
}

impl TracingObserver {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
        }
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }
}

impl Default for TracingObserver {
    fn default() -> Self {
        Self::new("retry")
    }
}

impl RetryObserver for TracingObserver {
    fn on_attempt_start(&self, attempt: u32, max_attempts: u32) {
        tracing::debug!(operation = %self.operation, attempt, max_attempts, "attempt");
    }

    fn on_attempt_failed(&self, attempt: u32, error: &dyn Display, delay: Duration) {
        tracing::warn!(
            operation = %self.operation,
            attempt,
            error = %error,
            retry_in_ms = delay.as_millis() as u64,
            "attempt failed"
        );
    }

    fn on_success(&self, attempt: u32, elapsed: Duration) {
        let elapsed_ms = elapsed.as_millis() as u64;
        if attempt == 1 {
            tracing::debug!(operation = %self.operation, elapsed_ms, "done");
        } else {
            tracing::info!(operation = %self.operation, attempt, elapsed_ms, "done after retrying");
        }
    }

    fn on_exhausted(&self, attempts: u32, error: &dyn Display) {
        tracing::error!(operation = %self.operation, attempts, error = %error, "giving up");
    }

    fn on_rejected(&self, attempt: u32, error: &dyn Display) {
        tracing::debug!(
            operation = %self.operation,
            attempt,
            error = %error,
            "error is not retried"
        );
    }
}
