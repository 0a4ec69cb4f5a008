use std::time::Duration;

use serde::Serialize;
use vmcheck_core::{Error, Result};

/// Per-command execution options
///
/// ```rust
/// use vmcheck_tools::node::ExecOptions;
///
/// let opts = ExecOptions::new().sudo().shell().expect_exit_code(0, "update-grub failed");
/// assert!(opts.sudo && opts.shell);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    pub sudo: bool,
    pub shell: bool,
    /// Bypass the result cache of [`Node::execute_cached`](super::Node::execute_cached)
    pub force_run: bool,
    pub no_info_log: bool,
    pub no_error_log: bool,
    pub cwd: Option<String>,
    pub env: Vec<(String, String)>,
    /// Overrides the node's default timeout
    pub timeout: Option<Duration>,
    pub expected_exit_code: Option<i32>,
    pub expected_exit_code_failure_message: Option<String>,
}

impl ExecOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sudo(mut self) -> Self {
        self.sudo = true;
        self
    }

    pub fn shell(mut self) -> Self {
        self.shell = true;
        self
    }

    pub fn force_run(mut self) -> Self {
        self.force_run = true;
        self
    }

    /// Suppress both the command log line and the failure log line
    pub fn quiet(mut self) -> Self {
        self.no_info_log = true;
        self.no_error_log = true;
        self
    }

    pub fn no_info_log(mut self) -> Self {
        self.no_info_log = true;
        self
    }

    pub fn no_error_log(mut self) -> Self {
        self.no_error_log = true;
        self
    }

    pub fn cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Fail with an execution error unless the command exits with `code`
    pub fn expect_exit_code(mut self, code: i32, message: impl Into<String>) -> Self {
        self.expected_exit_code = Some(code);
        self.expected_exit_code_failure_message = Some(message.into());
        self
    }
}

/// Outcome of a finished command; `stdout` is trimmed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionResult {
    pub command: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    #[serde(skip)]
    pub elapsed: Duration,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }

    /// Error unless the command exited with `expected`
    pub fn assert_exit_code(&self, expected: i32, message: &str) -> Result<&Self> {
        if self.exit_code == expected {
            return Ok(self);
        }
        let message = if message.is_empty() {
            format!("expected exit code {}", expected)
        } else {
            message.to_string()
        };
        Err(Error::execution(
            &self.command,
            self.exit_code,
            message,
            self.stderr.trim(),
        ))
    }

    /// Shorthand for `assert_exit_code(0, message)`
    pub fn assert_success(&self, message: &str) -> Result<&Self> {
        self.assert_exit_code(0, message)
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.stdout.lines()
    }
}
