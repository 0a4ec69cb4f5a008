//! Nodes under test and the command runner
//!
//! A [`Node`] wraps a [`Transport`] and adds what every caller needs on top
//! of raw command execution: sudo wrapping, structured logging, an optional
//! result cache, expected exit codes, lazy OS detection and the per-node
//! tool cache the registry fills.
//!
//! Nodes use interior mutability without locking and are not `Sync`;
//! callers serialize access to a node.

mod local;
mod options;
mod ssh;
mod transport;

use std::borrow::Cow;
use std::cell::{Cell, OnceCell, RefCell};
use std::collections::HashMap;
use std::time::{Duration, Instant};

use vmcheck_core::config::{ExecutionConfig, SshConfig};
use vmcheck_core::{Error, Initializer, Result};

use crate::os::OsClassification;
use crate::package::PackageManager;
use crate::tool::ToolCache;

pub use local::LocalTransport;
pub use options::{ExecOptions, ExecutionResult};
pub use ssh::SshTransport;
pub use transport::{CommandRequest, RawOutput, Transport};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

/// Check that `key` is a portable environment variable name
pub fn env_key(key: &str) -> Result<&str> {
    let mut chars = key.chars();
    let valid = chars
        .next()
        .is_some_and(|first| first == '_' || first.is_ascii_alphabetic())
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric());
    if valid {
        Ok(key)
    } else {
        Err(Error::invalid_argument(format!(
            "`{}` is not a valid environment variable name",
            key.escape_debug()
        )))
    }
}

/// Quote a single argument for a POSIX shell
pub fn shell_quote(value: &str) -> Result<String> {
    shlex::try_quote(value)
        .map(Cow::into_owned)
        .map_err(|_| {
            Error::invalid_argument(format!(
                "`{}` cannot be passed to a shell",
                value.escape_debug()
            ))
        })
}

/// A machine under test
pub struct Node {
    name: String,
    transport: Box<dyn Transport>,
    default_timeout: Duration,
    always_sudo: bool,
    connection: Initializer,
    os: OnceCell<OsClassification>,
    package_manager: OnceCell<PackageManager>,
    sudo_supported: Cell<Option<bool>>,
    results: RefCell<HashMap<String, ExecutionResult>>,
    working_dir: RefCell<Option<String>>,
    env: RefCell<Vec<(String, String)>>,
    tools: ToolCache,
}

impl Node {
    pub fn new(name: impl Into<String>, transport: impl Transport + 'static) -> Self {
        Self {
            name: name.into(),
            transport: Box::new(transport),
            default_timeout: DEFAULT_TIMEOUT,
            always_sudo: false,
            connection: Initializer::new(),
            os: OnceCell::new(),
            package_manager: OnceCell::new(),
            sudo_supported: Cell::new(None),
            results: RefCell::new(HashMap::new()),
            working_dir: RefCell::new(None),
            env: RefCell::new(Vec::new()),
            tools: ToolCache::default(),
        }
    }

    /// The machine vmcheck runs on
    pub fn local() -> Self {
        Self::new("local", LocalTransport::new())
    }

    /// A remote machine reached with the system ssh client
    pub fn ssh(host: &str, config: &SshConfig) -> Self {
        Self::new(host, SshTransport::new(host, config))
    }

    /// Apply the default timeout and sudo setting
    pub fn with_execution_config(mut self, config: &ExecutionConfig) -> Self {
        self.default_timeout = config.timeout();
        self.always_sudo = config.sudo;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Skip detection and use a known classification
    pub fn with_os(self, os: OsClassification) -> Self {
        Self {
            os: OnceCell::from(os),
            ..self
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn describe(&self) -> String {
        self.transport.describe()
    }

    pub fn is_remote(&self) -> bool {
        self.transport.is_remote()
    }

    /// Working directory for commands that do not set their own
    pub fn set_working_dir(&self, dir: Option<String>) {
        *self.working_dir.borrow_mut() = dir;
    }

    /// Add or replace an environment variable for every later command
    pub fn update_env(&self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        let mut env = self.env.borrow_mut();
        match env.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => env.push((key, value)),
        }
    }

    /// Open the transport; later calls are no-ops
    pub fn connect(&self) -> Result<()> {
        self.connection.ensure(|| {
            tracing::debug!(node = %self.name, target_host = %self.describe(), "connecting");
            self.transport.connect()
        })
    }

    /// Close the transport and forget cached command results
    pub fn close(&self) -> Result<()> {
        if self.connection.is_initialized() {
            self.connection.reset();
            self.results.borrow_mut().clear();
            self.transport.close()?;
        }
        Ok(())
    }

    /// Run a command
    ///
    /// Always executes. See [`Node::execute_cached`] for the memoized form.
    pub fn execute(&self, command: &str, opts: &ExecOptions) -> Result<ExecutionResult> {
        self.connect()?;

        let line = self.prepare(command, opts)?;
        let request = CommandRequest {
            command: line.clone(),
            shell: opts.shell,
            cwd: self.effective_cwd(opts),
            env: self.merged_env(opts)?,
            timeout: opts.timeout.unwrap_or(self.default_timeout),
        };

        if opts.no_info_log {
            tracing::debug!(node = %self.name, command = %line, "executing");
        } else {
            tracing::info!(node = %self.name, command = %line, "executing");
        }

        let started = Instant::now();
        let raw = self.transport.run(&request)?;
        let result = ExecutionResult {
            command: line,
            exit_code: raw.exit_code,
            stdout: raw.stdout.trim().to_string(),
            stderr: raw.stderr,
            elapsed: started.elapsed(),
        };

        if !result.is_success() && !opts.no_error_log {
            tracing::error!(
                node = %self.name,
                command = %result.command,
                exit_code = result.exit_code,
                stderr = %result.stderr.trim(),
                "command failed"
            );
        } else {
            tracing::debug!(
                node = %self.name,
                exit_code = result.exit_code,
                elapsed_ms = result.elapsed.as_millis() as u64,
                "command finished"
            );
        }

        if let Some(expected) = opts.expected_exit_code {
            let message = opts
                .expected_exit_code_failure_message
                .as_deref()
                .unwrap_or_default();
            result.assert_exit_code(expected, message)?;
        }

        Ok(result)
    }

    /// Run a command unless an identical one already ran on this node
    ///
    /// Results are keyed by everything that reaches the transport: the
    /// command, sudo and shell, the working directory and the merged
    /// environment. `force_run` bypasses and refreshes the cached result.
    pub fn execute_cached(&self, command: &str, opts: &ExecOptions) -> Result<ExecutionResult> {
        let mut env = self.merged_env(opts)?;
        env.sort_unstable();
        let key = format!(
            "{}|{}|{:?}|{:?}|{}",
            opts.sudo || self.always_sudo,
            opts.shell,
            self.effective_cwd(opts),
            env,
            command
        );

        if !opts.force_run {
            if let Some(hit) = self.results.borrow().get(&key) {
                tracing::trace!(node = %self.name, command = %command, "using cached result");
                return Ok(hit.clone());
            }
        }

        let result = self.execute(command, opts)?;
        self.results.borrow_mut().insert(key, result.clone());
        Ok(result)
    }

    /// Check whether a path exists on the node
    pub fn path_exists(&self, path: &str) -> Result<bool> {
        let result = self.execute(
            &format!("test -e {}", shell_quote(path)?),
            &ExecOptions::new().shell().quiet(),
        )?;
        Ok(result.is_success())
    }

    /// The node's operating system, detected on first use
    pub fn os(&self) -> Result<&OsClassification> {
        if let Some(os) = self.os.get() {
            return Ok(os);
        }
        let detected = self.detect_os()?;
        tracing::info!(node = %self.name, os = %detected, "detected operating system");
        Ok(self.os.get_or_init(|| detected))
    }

    /// The package manager matching the node's distribution
    pub fn package_manager(&self) -> Result<&PackageManager> {
        if let Some(manager) = self.package_manager.get() {
            return Ok(manager);
        }
        let manager = PackageManager::for_os(self.os()?)?;
        Ok(self.package_manager.get_or_init(|| manager))
    }

    /// Check (once) whether sudo is available
    pub fn supports_sudo(&self) -> Result<bool> {
        if let Some(supported) = self.sudo_supported.get() {
            return Ok(supported);
        }
        self.connect()?;

        let mut probe = CommandRequest::new("command -v sudo", self.default_timeout);
        probe.shell = true;
        let supported = self.transport.run(&probe)?.exit_code == 0;
        if !supported {
            tracing::debug!(
                node = %self.name,
                "node doesn't support sudo, may cause failure later"
            );
        }
        self.sudo_supported.set(Some(supported));
        Ok(supported)
    }

    pub fn tool_cache(&self) -> &ToolCache {
        &self.tools
    }

    fn prepare(&self, command: &str, opts: &ExecOptions) -> Result<String> {
        if !(opts.sudo || self.always_sudo) {
            return Ok(command.to_string());
        }
        if !self.supports_sudo()? {
            return Err(Error::missing_capability(
                "sudo",
                &self.name,
                format!("cannot execute `{}` with sudo", command),
            ));
        }
        if opts.shell {
            Ok(format!("sudo sh -c {}", shell_quote(command)?))
        } else {
            Ok(format!("sudo {}", command))
        }
    }

    fn effective_cwd(&self, opts: &ExecOptions) -> Option<String> {
        opts.cwd.clone().or_else(|| self.working_dir.borrow().clone())
    }

    fn merged_env(&self, opts: &ExecOptions) -> Result<Vec<(String, String)>> {
        let mut env = self.env.borrow().clone();
        for (key, value) in &opts.env {
            match env.iter_mut().find(|(k, _)| k == key) {
                Some(entry) => entry.1 = value.clone(),
                None => env.push((key.clone(), value.clone())),
            }
        }
        for (key, _) in &env {
            env_key(key)?;
        }
        Ok(env)
    }

    fn detect_os(&self) -> Result<OsClassification> {
        let result = self.execute("cat /etc/os-release", &ExecOptions::new().quiet())?;
        if result.is_success() {
            Ok(OsClassification::from_os_release(&result.stdout))
        } else {
            tracing::warn!(node = %self.name, "/etc/os-release is not readable");
            Ok(OsClassification::unknown())
        }
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("target", &self.describe())
            .field("os", &self.os.get())
            .finish_non_exhaustive()
    }
}
