use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Runtime configuration for vmcheck
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct RuntimeConfig {
    #[serde(default)]
    pub execution: ExecutionConfig,

    #[serde(default)]
    pub retry_policies: RetryPoliciesConfig,

    #[serde(default)]
    pub polling: PollingConfig,

    #[serde(default)]
    pub kdump: KdumpConfig,

    #[serde(default)]
    pub ssh: SshConfig,
}

impl RuntimeConfig {
    /// Policy for a named operation, falling back to the default policy
    pub fn retry_policy(&self, operation: &str) -> &RetryPolicy {
        self.retry_policies
            .operations
            .get(operation)
            .unwrap_or(&self.retry_policies.default)
    }
}

/// Command execution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ExecutionConfig {
    /// Per-command timeout in seconds
    #[serde(default = "default_exec_timeout")]
    pub timeout_secs: u64,

    /// Run every command through sudo
    #[serde(default)]
    pub sudo: bool,
}

impl ExecutionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_exec_timeout(),
            sudo: false,
        }
    }
}

fn default_exec_timeout() -> u64 {
    600
}

/// Retry policies configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RetryPoliciesConfig {
    /// Default retry policy
    #[serde(default)]
    pub default: RetryPolicy,

    /// Per-operation retry policies
    #[serde(default)]
    pub operations: HashMap<String, RetryPolicy>,
}

impl Default for RetryPoliciesConfig {
    fn default() -> Self {
        let mut operations = HashMap::new();

        // /sys/kernel/kexec_crash_loaded flips to 1 shortly after boot
        operations.insert(
            "kexec-crash-loaded".to_string(),
            RetryPolicy::fixed(60, Duration::from_secs(1)),
        );
        operations.insert(
            "chrony-tracking".to_string(),
            RetryPolicy::fixed(10, Duration::from_secs(1)),
        );

        Self {
            default: RetryPolicy::default(),
            operations,
        }
    }
}

/// Retry policy for an operation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RetryPolicy {
    /// Maximum number of attempts; zero behaves like one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default)]
    pub strategy: RetryStrategy,

    /// Backoff multiplier for exponential strategies
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Initial delay in milliseconds
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Maximum delay in milliseconds
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
}

impl RetryPolicy {
    /// Fixed attempt count with a constant delay between attempts
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        let delay_ms = delay.as_millis() as u64;
        Self {
            max_attempts,
            strategy: RetryStrategy::FixedDelay,
            backoff_multiplier: 1.0,
            initial_delay_ms: delay_ms,
            max_delay_ms: delay_ms,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            strategy: RetryStrategy::default(),
            backoff_multiplier: default_backoff_multiplier(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_initial_delay() -> u64 {
    1000
}
fn default_max_delay() -> u64 {
    30000
}

/// Retry strategy
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum RetryStrategy {
    /// Retry immediately
    None,

    /// Fixed delay between retries
    FixedDelay,

    /// Exponential backoff (default)
    #[default]
    ExponentialBackoff,

    /// Linear backoff
    LinearBackoff,
}

/// Poll-until-match defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PollingConfig {
    #[serde(default = "default_poll_interval")]
    pub interval_ms: u64,

    #[serde(default = "default_poll_timeout")]
    pub timeout_secs: u64,
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_poll_interval(),
            timeout_secs: default_poll_timeout(),
        }
    }
}

fn default_poll_interval() -> u64 {
    500
}
fn default_poll_timeout() -> u64 {
    60
}

/// Crash dump settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct KdumpConfig {
    /// Memory reserved for the crash kernel, e.g. `512M` or `auto`
    #[serde(default = "default_crashkernel")]
    pub crashkernel: String,

    /// Directory the crash kernel writes vmcore files to
    #[serde(default = "default_dump_path")]
    pub dump_path: String,

    /// Dump directory used when the VM memory exceeds the threshold
    #[serde(default = "default_relocated_dump_path")]
    pub relocated_dump_path: String,

    /// A dump file smaller than this is not considered a valid vmcore
    #[serde(default = "default_min_dump_size_mb")]
    pub min_dump_size_mb: u64,

    #[serde(default = "default_large_memory_threshold")]
    pub large_memory_threshold_tib: f64,
}

impl Default for KdumpConfig {
    fn default() -> Self {
        Self {
            crashkernel: default_crashkernel(),
            dump_path: default_dump_path(),
            relocated_dump_path: default_relocated_dump_path(),
            min_dump_size_mb: default_min_dump_size_mb(),
            large_memory_threshold_tib: default_large_memory_threshold(),
        }
    }
}

fn default_crashkernel() -> String {
    "512M".to_string()
}
fn default_dump_path() -> String {
    "/var/crash".to_string()
}
fn default_relocated_dump_path() -> String {
    "/mnt/crash".to_string()
}
fn default_min_dump_size_mb() -> u64 {
    10
}
fn default_large_memory_threshold() -> f64 {
    1.0
}

/// Defaults for remote nodes reached over SSH
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SshConfig {
    #[serde(default = "default_ssh_port")]
    pub port: u16,

    #[serde(default = "default_ssh_username")]
    pub username: String,

    /// Private key file; the ssh client default is used when unset
    #[serde(default)]
    pub private_key_file: Option<String>,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            port: default_ssh_port(),
            username: default_ssh_username(),
            private_key_file: None,
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

fn default_ssh_port() -> u16 {
    22
}
fn default_ssh_username() -> String {
    "root".to_string()
}
fn default_connect_timeout() -> u64 {
    30
}
