//! Failure of a retried operation
//!
//! Both variants own the error of the attempt that ended the loop, so
//! callers that only care about that error use [`RetryError::into_source`].

use std::time::Duration;

use thiserror::Error;

/// How [`RetryExecutor::execute`](super::RetryExecutor::execute) gave up
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// Every attempt failed and the last one was the final allowed attempt
    #[error("gave up after {attempts} attempt(s) in {:.2}s: {last}", .elapsed.as_secs_f64())]
    Exhausted {
        attempts: u32,
        last: E,
        elapsed: Duration,
    },

    /// The predicate refused to retry this error
    #[error("not retried: {0}")]
    Rejected(E),
}

impl<E> RetryError<E> {
    pub fn exhausted(attempts: u32, last: E, elapsed: Duration) -> Self {
        Self::Exhausted {
            attempts,
            last,
            elapsed,
        }
    }

    pub fn rejected(error: E) -> Self {
        Self::Rejected(error)
    }

    /// Attempts made; a rejected error stops after the attempt that raised it
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Exhausted { attempts, .. } => *attempts,
            Self::Rejected(_) => 1,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }

    /// The error of the attempt that ended the loop
    pub fn into_source(self) -> E {
        match self {
            Self::Exhausted { last, .. } | Self::Rejected(last) => last,
        }
    }
}
