//! Retry and polling primitives
//!
//! - [`retry`]: bounded retry with a fixed delay, returning the last error
//!   unchanged once attempts run out
//! - [`RetryExecutorBuilder`]: policy-driven retry (none, fixed, linear,
//!   exponential backoff with optional jitter) with predicates and observers
//! - [`poll_until`] / [`Poller`]: read a value until it matches or a
//!   timeout elapses
//!
//! Everything here blocks the calling thread between attempts.
//!
//! # Example
//!
//! ```rust
//! use vmcheck_core::config::RetryPolicy;
//! use vmcheck_core::retry::{RetryExecutorBuilder, TracingObserver};
//! use std::time::Duration;
//!
//! let executor = RetryExecutorBuilder::new()
//!     .with_policy(RetryPolicy::fixed(3, Duration::ZERO))
//!     .with_observer(TracingObserver::new("chrony-sync"))
//!     .build();
//!
//! let value = executor.execute(|| Ok::<_, std::io::Error>(42)).unwrap();
//! assert_eq!(value, 42);
//! ```

mod error;
mod executor;
mod observer;
mod poll;
mod strategies;

pub use error::RetryError;
pub use executor::{retry, RetryExecutor, RetryExecutorBuilder};
pub use observer::{NoOpObserver, RetryObserver, TracingObserver};
pub use poll::{poll_until, Expected, PollState, Poller};
pub use strategies::{calculate_delay, AlwaysRetry, ClosurePredicate, RetryPredicate};
