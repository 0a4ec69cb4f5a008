//! Polling until an observed value matches
//!
//! [`poll_until`] reads a value immediately, then every `interval` until it
//! matches or `timeout` elapses. Read failures count as non-matches. Sleeps
//! are clamped to the remaining time.

use std::fmt::Display;
use std::thread;
use std::time::{Duration, Instant};

/// Value(s) a poll accepts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expected {
    Value(String),
    AnyOf(Vec<String>),
}

impl Expected {
    pub fn value(value: impl Into<String>) -> Self {
        Expected::Value(value.into())
    }

    pub fn any_of<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Expected::AnyOf(values.into_iter().map(Into::into).collect())
    }

    /// Compare after trimming surrounding whitespace
    pub fn matches(&self, observed: &str) -> bool {
        let observed = observed.trim();
        match self {
            Expected::Value(value) => value.trim() == observed,
            Expected::AnyOf(values) => values.iter().any(|v| v.trim() == observed),
        }
    }
}

impl From<&str> for Expected {
    fn from(value: &str) -> Self {
        Expected::value(value)
    }
}

impl std::fmt::Display for Expected {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Expected::Value(value) => write!(f, "{:?}", value),
            Expected::AnyOf(values) => write!(f, "one of {:?}", values),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Polling,
    Matched,
    TimedOut,
}

/// Step-wise poller for callers that need to observe state transitions
pub struct Poller {
    expected: Expected,
    interval: Duration,
    timeout: Duration,
    started: Instant,
    state: PollState,
    reads: u32,
}

impl Poller {
    pub fn new(expected: Expected, interval: Duration, timeout: Duration) -> Self {
        Self {
            expected,
            interval,
            timeout,
            started: Instant::now(),
            state: PollState::Polling,
            reads: 0,
        }
    }

    pub fn state(&self) -> PollState {
        self.state
    }

    /// Number of reads performed so far
    pub fn reads(&self) -> u32 {
        self.reads
    }

    /// Feed one observation and advance the state machine
    ///
    /// Terminal states are sticky.
    pub fn observe<E: Display>(&mut self, observed: Result<&str, E>) -> PollState {
        if self.state != PollState::Polling {
            return self.state;
        }
        self.reads += 1;

        match observed {
            Ok(value) if self.expected.matches(value) => {
                self.state = PollState::Matched;
                return self.state;
            }
            Ok(value) => {
                tracing::trace!(observed = value, expected = %self.expected, "poll value mismatch");
            }
            Err(err) => {
                tracing::debug!(error = %err, "poll read failed, treating as mismatch");
            }
        }

        if self.started.elapsed() >= self.timeout {
            self.state = PollState::TimedOut;
        }
        self.state
    }

    /// Sleep until the next read is due, never past the deadline
    pub fn wait(&self) {
        let remaining = self.timeout.saturating_sub(self.started.elapsed());
        let pause = self.interval.min(remaining);
        if pause > Duration::ZERO {
            thread::sleep(pause);
        }
    }
}

/// Poll `read` until it returns an expected value or `timeout` elapses
///
/// Returns `true` on match, `false` on timeout.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use vmcheck_core::retry::{poll_until, Expected};
///
/// let mut readings = vec!["0", "0", "1"].into_iter();
/// let loaded = poll_until(
///     || readings.next().map(String::from).ok_or("exhausted"),
///     &Expected::value("1"),
///     Duration::from_millis(1),
///     Duration::from_secs(1),
/// );
/// assert!(loaded);
/// ```
pub fn poll_until<F, E>(
    mut read: F,
    expected: &Expected,
    interval: Duration,
    timeout: Duration,
) -> bool
where
    F: FnMut() -> Result<String, E>,
    E: Display,
{
    let mut poller = Poller::new(expected.clone(), interval, timeout);
    loop {
        let observed = read();
        match poller.observe(observed.as_deref()) {
            PollState::Matched => {
                tracing::debug!(expected = %expected, reads = poller.reads(), "poll matched");
                return true;
            }
            PollState::TimedOut => {
                tracing::warn!(
                    expected = %expected,
                    reads = poller.reads(),
                    timeout_ms = timeout.as_millis() as u64,
                    "poll timed out"
                );
                return false;
            }
            PollState::Polling => poller.wait(),
        }
    }
}
