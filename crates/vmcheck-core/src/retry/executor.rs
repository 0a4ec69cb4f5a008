//! Retry execution engine
//!
//! Blocking: the executor sleeps on the calling thread between attempts.

use std::fmt::Display;
use std::thread;
use std::time::{Duration, Instant};

use crate::config::RetryPolicy;

use super::error::RetryError;
use super::observer::{NoOpObserver, RetryObserver, TracingObserver};
use super::strategies::{calculate_delay, AlwaysRetry, ClosurePredicate, RetryPredicate};

/// Bounded retry with a fixed delay
///
/// Runs `op` up to `attempts` times (at least once). An error rejected by
/// `should_retry` is returned immediately; after the last attempt the last
/// error is returned unchanged.
///
/// # Example
///
/// ```rust
/// use std::cell::Cell;
/// use std::time::Duration;
/// use vmcheck_core::retry::retry;
///
/// let calls = Cell::new(0);
/// let result = retry(
///     || {
///         calls.set(calls.get() + 1);
///         if calls.get() < 3 { Err("not yet") } else { Ok(calls.get()) }
///     },
///     |_| true,
///     5,
///     Duration::ZERO,
/// );
/// assert_eq!(result, Ok(3));
/// ```
pub fn retry<T, E, F, P>(op: F, should_retry: P, attempts: u32, delay: Duration) -> Result<T, E>
where
    F: FnMut() -> Result<T, E>,
    P: Fn(&E) -> bool,
    E: Display,
{
    RetryExecutorBuilder::new()
        .with_policy(RetryPolicy::fixed(attempts, delay))
        .with_predicate(ClosurePredicate::new(should_retry))
        .with_observer(TracingObserver::default())
        .with_jitter(false)
        .build()
        .execute(op)
        .map_err(RetryError::into_source)
}

/// Builder for configuring a [`RetryExecutor`]
///
/// # Example
///
/// ```rust
/// use vmcheck_core::config::RetryPolicy;
/// use vmcheck_core::retry::{RetryExecutorBuilder, TracingObserver};
///
/// let executor = RetryExecutorBuilder::new()
///     .with_policy(RetryPolicy::default())
///     .with_observer(TracingObserver::new("chrony-tracking"))
///     .with_jitter(true)
///     .build();
/// ```
pub struct RetryExecutorBuilder<P = AlwaysRetry, O = NoOpObserver> {
    policy: RetryPolicy,
    predicate: P,
    observer: O,
    jitter: bool,
}

impl Default for RetryExecutorBuilder<AlwaysRetry, NoOpObserver> {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryExecutorBuilder<AlwaysRetry, NoOpObserver> {
    pub fn new() -> Self {
        Self {
            policy: RetryPolicy::default(),
            predicate: AlwaysRetry,
            observer: NoOpObserver,
            jitter: true,
        }
    }
}

impl<P, O> RetryExecutorBuilder<P, O> {
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the predicate deciding whether an error is retried
    pub fn with_predicate<P2>(self, predicate: P2) -> RetryExecutorBuilder<P2, O> {
        RetryExecutorBuilder {
            policy: self.policy,
            predicate,
            observer: self.observer,
            jitter: self.jitter,
        }
    }

    pub fn with_observer<O2>(self, observer: O2) -> RetryExecutorBuilder<P, O2> {
        RetryExecutorBuilder {
            policy: self.policy,
            predicate: self.predicate,
            observer,
            jitter: self.jitter,
        }
    }

    /// Enable or disable jitter (enabled by default)
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn build(self) -> RetryExecutor<P, O> {
        RetryExecutor {
            policy: self.policy,
            predicate: self.predicate,
            observer: self.observer,
            jitter: self.jitter,
        }
    }
}

/// A retry executor with configurable policy, predicate, and observer
pub struct RetryExecutor<P, O> {
    policy: RetryPolicy,
    predicate: P,
    observer: O,
    jitter: bool,
}

impl<P, O> RetryExecutor<P, O>
where
    O: RetryObserver,
{
    /// Attempts actually made; a policy asking for zero still runs once
    pub fn max_attempts(&self) -> u32 {
        self.policy.max_attempts.max(1)
    }

    /// Execute an operation with retry logic
    pub fn execute<F, T, E>(&self, mut op: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Result<T, E>,
        E: Display,
        P: RetryPredicate<E>,
    {
        let start = Instant::now();
        let max_attempts = self.max_attempts();
        let mut attempt = 1;

        loop {
            self.observer.on_attempt_start(attempt, max_attempts);

            let err = match op() {
                Ok(result) => {
                    self.observer.on_success(attempt, start.elapsed());
                    return Ok(result);
                }
                Err(err) => err,
            };

            if !self.predicate.should_retry(&err) {
                self.observer.on_rejected(attempt, &err);
                return Err(RetryError::rejected(err));
            }

            if attempt >= max_attempts {
                self.observer.on_exhausted(attempt, &err);
                return Err(RetryError::exhausted(attempt, err, start.elapsed()));
            }

            let delay = calculate_delay(&self.policy, attempt, self.jitter);
            self.observer.on_attempt_failed(attempt, &err, delay);

            if delay > Duration::ZERO {
                thread::sleep(delay);
            }
            attempt += 1;
        }
    }
}
