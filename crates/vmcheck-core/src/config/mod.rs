//! Runtime configuration
//!
//! [`RuntimeConfig`] carries the tunables (timeouts, retry policies, polling,
//! crash-dump settings, SSH defaults). [`ConfigLoader`] layers embedded
//! defaults, user files and `VMCHECK_*` environment overrides.

mod loader;
mod runtime;

pub use loader::ConfigLoader;
pub use runtime::{
    ExecutionConfig, KdumpConfig, PollingConfig, RetryPoliciesConfig, RetryPolicy, RetryStrategy,
    RuntimeConfig, SshConfig,
};
