//! Retry delay strategies and predicates

use std::time::Duration;

use rand::Rng;

use crate::config::{RetryPolicy, RetryStrategy};

/// Calculate the delay before the next retry attempt
///
/// `attempt` is 1-indexed. With `jitter` enabled up to 25% is added on top
/// of the capped delay.
///
/// # Example
///
/// ```rust
/// use vmcheck_core::config::{RetryPolicy, RetryStrategy};
/// use vmcheck_core::retry::calculate_delay;
///
/// let policy = RetryPolicy {
///     max_attempts: 3,
///     strategy: RetryStrategy::ExponentialBackoff,
///     backoff_multiplier: 2.0,
///     initial_delay_ms: 1000,
///     max_delay_ms: 30000,
/// };
///
/// assert_eq!(calculate_delay(&policy, 1, false).as_millis(), 1000);
/// assert_eq!(calculate_delay(&policy, 2, false).as_millis(), 2000);
/// ```
pub fn calculate_delay(policy: &RetryPolicy, attempt: u32, jitter: bool) -> Duration {
    let attempt_index = attempt.saturating_sub(1);

    let base_delay_ms = match policy.strategy {
        RetryStrategy::None => 0,

        RetryStrategy::FixedDelay => policy.initial_delay_ms,

        RetryStrategy::ExponentialBackoff => {
            let multiplier = policy.backoff_multiplier.powf(attempt_index as f64);
            (policy.initial_delay_ms as f64 * multiplier) as u64
        }

        RetryStrategy::LinearBackoff => policy
            .initial_delay_ms
            .saturating_mul(attempt_index as u64 + 1),
    };

    let capped_delay_ms = base_delay_ms.min(policy.max_delay_ms);

    let final_delay_ms = if jitter && capped_delay_ms > 0 {
        let jitter_range = capped_delay_ms / 4;
        let jitter_value = rand::rng().random_range(0..=jitter_range);
        capped_delay_ms + jitter_value
    } else {
        capped_delay_ms
    };

    Duration::from_millis(final_delay_ms)
}

/// Decides whether a failed attempt should be retried
///
/// # Example
///
/// ```rust
/// use vmcheck_core::retry::RetryPredicate;
/// use vmcheck_core::Error;
///
/// struct OnlyUnmetConditions;
///
/// impl RetryPredicate<Error> for OnlyUnmetConditions {
///     fn should_retry(&self, error: &Error) -> bool {
///         error.is_condition_not_met()
///     }
/// }
/// ```
pub trait RetryPredicate<E: ?Sized> {
    fn should_retry(&self, error: &E) -> bool;
}

/// Every error is retryable
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysRetry;

impl<E: ?Sized> RetryPredicate<E> for AlwaysRetry {
    fn should_retry(&self, _error: &E) -> bool {
        true
    }
}

/// A predicate backed by a closure
pub struct ClosurePredicate<F> {
    predicate: F,
}

impl<F> ClosurePredicate<F> {
    pub fn new(predicate: F) -> Self {
        Self { predicate }
    }
}

impl<E, F> RetryPredicate<E> for ClosurePredicate<F>
where
    F: Fn(&E) -> bool,
{
    fn should_retry(&self, error: &E) -> bool {
        (self.predicate)(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    fn policy(strategy: RetryStrategy, max_delay_ms: u64) -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            strategy,
            backoff_multiplier: 2.0,
            initial_delay_ms: 1000,
            max_delay_ms,
        }
    }

    #[test]
    fn test_none_strategy() {
        let policy = policy(RetryStrategy::None, 30000);
        assert_eq!(calculate_delay(&policy, 1, false), Duration::ZERO);
        assert_eq!(calculate_delay(&policy, 3, false), Duration::ZERO);
    }

    #[test]
    fn test_fixed_strategy() {
        let policy = policy(RetryStrategy::FixedDelay, 30000);
        for attempt in 1..=3 {
            assert_eq!(
                calculate_delay(&policy, attempt, false),
                Duration::from_millis(1000)
            );
        }
    }

    #[test]
    fn test_exponential_strategy() {
        let policy = policy(RetryStrategy::ExponentialBackoff, 30000);
        assert_eq!(calculate_delay(&policy, 1, false), Duration::from_millis(1000));
        assert_eq!(calculate_delay(&policy, 2, false), Duration::from_millis(2000));
        assert_eq!(calculate_delay(&policy, 3, false), Duration::from_millis(4000));
        assert_eq!(calculate_delay(&policy, 5, false), Duration::from_millis(16000));
    }

    #[test]
    fn test_linear_strategy() {
        let policy = policy(RetryStrategy::LinearBackoff, 30000);
        assert_eq!(calculate_delay(&policy, 1, false), Duration::from_millis(1000));
        assert_eq!(calculate_delay(&policy, 2, false), Duration::from_millis(2000));
        assert_eq!(calculate_delay(&policy, 3, false), Duration::from_millis(3000));
    }

    #[test]
    fn test_max_delay_cap() {
        let policy = policy(RetryStrategy::ExponentialBackoff, 5000);
        assert_eq!(calculate_delay(&policy, 5, false), Duration::from_millis(5000));
    }

    #[test]
    fn test_jitter_bounds() {
        let policy = policy(RetryStrategy::FixedDelay, 30000);
        for _ in 0..100 {
            let delay = calculate_delay(&policy, 1, true);
            assert!(delay >= Duration::from_millis(1000));
            assert!(delay <= Duration::from_millis(1250));
        }
    }

    #[test]
    fn test_jitter_no_effect_on_zero_delay() {
        let policy = policy(RetryStrategy::None, 30000);
        assert_eq!(calculate_delay(&policy, 1, true), Duration::ZERO);
    }

    #[test]
    fn test_fixed_policy_helper() {
        let policy = RetryPolicy::fixed(60, Duration::from_secs(1));
        assert_eq!(policy.max_attempts, 60);
        assert_eq!(calculate_delay(&policy, 59, false), Duration::from_secs(1));
    }

    #[test]
    fn test_always_retry() {
        let error = io::Error::new(io::ErrorKind::NotFound, "not found");
        assert!(AlwaysRetry.should_retry(&error));
    }

    #[test]
    fn test_closure_predicate() {
        let predicate = ClosurePredicate::new(|err: &io::Error| {
            matches!(
                err.kind(),
                io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
            )
        });

        let timeout_err = io::Error::new(io::ErrorKind::TimedOut, "timeout");
        let not_found_err = io::Error::new(io::ErrorKind::NotFound, "not found");

        assert!(predicate.should_retry(&timeout_err));
        assert!(!predicate.should_retry(&not_found_err));
    }
}
