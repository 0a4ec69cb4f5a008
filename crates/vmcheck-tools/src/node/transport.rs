//! Command transport abstraction
//!
//! A [`Transport`] moves one command line to a machine and brings back its
//! exit code and output. [`Node`](super::Node) builds on it and adds sudo,
//! logging, caching and OS detection.

use std::time::Duration;

use vmcheck_core::Result;

/// A fully prepared command for a transport
#[derive(Debug, Clone)]
pub struct CommandRequest {
    /// The command line, already wrapped for sudo when needed
    pub command: String,
    /// Interpret `command` with `sh -c` instead of splitting it into words
    pub shell: bool,
    pub cwd: Option<String>,
    pub env: Vec<(String, String)>,
    pub timeout: Duration,
}

impl CommandRequest {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            shell: false,
            cwd: None,
            env: Vec::new(),
            timeout,
        }
    }
}

/// Raw result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl RawOutput {
    pub fn new(exit_code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }
}

/// Moves commands to a machine and returns their output
pub trait Transport {
    /// Human readable target, e.g. `local` or `root@10.0.0.4:22`
    fn describe(&self) -> String;

    fn is_remote(&self) -> bool;

    /// Prepare the channel. Called once before the first command.
    fn connect(&self) -> Result<()> {
        Ok(())
    }

    /// Run a command to completion or until its timeout elapses
    fn run(&self, request: &CommandRequest) -> Result<RawOutput>;

    fn close(&self) -> Result<()> {
        Ok(())
    }
}
