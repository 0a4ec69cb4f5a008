//! Lazy one-time initialization
//!
//! An [`Initializer`] runs a setup closure at most once per owner. The state
//! flips to `Initialized` before the closure runs, so a nested call made by
//! the closure itself returns immediately. A failed setup resets the state so
//! the next call tries again.

use std::cell::Cell;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InitState {
    #[default]
    Uninitialized,
    Initialized,
}

/// One-time initialization guard for single-threaded owners
#[derive(Debug, Default)]
pub struct Initializer {
    state: Cell<InitState>,
}

impl Initializer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> InitState {
        self.state.get()
    }

    pub fn is_initialized(&self) -> bool {
        self.state.get() == InitState::Initialized
    }

    /// Run `init` unless it already ran successfully
    pub fn ensure<F>(&self, init: F) -> Result<()>
    where
        F: FnOnce() -> Result<()>,
    {
        if self.is_initialized() {
            return Ok(());
        }

        self.state.set(InitState::Initialized);
        if let Err(err) = init() {
            self.state.set(InitState::Uninitialized);
            return Err(err);
        }
        Ok(())
    }

    /// Forget a previous initialization
    pub fn reset(&self) {
        self.state.set(InitState::Uninitialized);
    }
}
