//! Error types for vmcheck-core

use thiserror::Error;

/// Result type alias using vmcheck-core's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for vmcheck
#[derive(Error, Debug)]
pub enum Error {
    /// No concrete tool variant exists for the node's distribution
    #[error("Unsupported distro {name} {version}{}", extended(.message))]
    UnsupportedDistro {
        name: String,
        version: String,
        message: String,
    },

    /// The node's CPU architecture is not supported by a check
    #[error("Unsupported CPU architecture {arch}")]
    UnsupportedArch { arch: String },

    /// A tool could not be located, even after installation was attempted
    #[error("Tool '{tool}' is not available on node '{node}': {reason}")]
    MissingCapability {
        tool: String,
        node: String,
        reason: String,
    },

    /// The package manager could not install one or more packages
    #[error("Package manager could not install packages: {}", .packages.join(" "))]
    MissingPackages { packages: Vec<String> },

    /// A command exited with an unexpected code
    #[error("{message} (command: `{command}`, exit code: {exit_code}){}", stderr_suffix(.stderr))]
    Execution {
        command: String,
        exit_code: i32,
        message: String,
        stderr: String,
    },

    /// The command transport failed before a command could complete
    #[error("Transport error on {target}: {message}")]
    Transport { target: String, message: String },

    /// Invalid version string
    #[error("The version is invalid format: {version}")]
    InvalidVersion { version: String },

    /// A verification check did not hold after all retries or polling
    #[error("Condition not met: {message}")]
    ConditionNotMet { message: String },

    /// No tool with this identifier is registered
    #[error("Unknown tool: {id}")]
    UnknownTool { id: String },

    /// A tool was registered under an identifier used by another type
    #[error("Tool '{id}' is registered with a different implementation type")]
    ToolTypeMismatch { id: String },

    /// Circular tool dependency
    #[error("Circular dependency detected while resolving tool '{id}'")]
    CircularDependency { id: String },

    /// An argument cannot be passed to a remote shell
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Invalid configuration format
    #[error("Invalid configuration format: {message}")]
    InvalidConfig { message: String },

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    YamlParse(#[from] serde_yaml_ng::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn extended(message: &str) -> String {
    if message.is_empty() {
        String::new()
    } else {
        format!(". {}", message)
    }
}

fn stderr_suffix(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(": {}", stderr)
    }
}

impl Error {
    /// Create an unsupported distro error
    pub fn unsupported_distro(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self::UnsupportedDistro {
            name: name.into(),
            version: version.into(),
            message: String::new(),
        }
    }

    /// Attach an extended message to an unsupported distro error
    pub fn with_message(self, extra: impl Into<String>) -> Self {
        match self {
            Self::UnsupportedDistro { name, version, .. } => Self::UnsupportedDistro {
                name,
                version,
                message: extra.into(),
            },
            other => other,
        }
    }

    /// Create an unsupported architecture error
    pub fn unsupported_arch(arch: impl Into<String>) -> Self {
        Self::UnsupportedArch { arch: arch.into() }
    }

    /// Create a missing capability error
    pub fn missing_capability(
        tool: impl Into<String>,
        node: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::MissingCapability {
            tool: tool.into(),
            node: node.into(),
            reason: reason.into(),
        }
    }

    /// Create a missing packages error
    pub fn missing_packages<I, S>(packages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::MissingPackages {
            packages: packages.into_iter().map(Into::into).collect(),
        }
    }

    /// Create an execution error
    pub fn execution(
        command: impl Into<String>,
        exit_code: i32,
        message: impl Into<String>,
        stderr: impl Into<String>,
    ) -> Self {
        Self::Execution {
            command: command.into(),
            exit_code,
            message: message.into(),
            stderr: stderr.into(),
        }
    }

    /// Create a transport error
    pub fn transport(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            target: target.into(),
            message: message.into(),
        }
    }

    /// Create an invalid version error
    pub fn invalid_version(version: impl Into<String>) -> Self {
        Self::InvalidVersion {
            version: version.into(),
        }
    }

    /// Create a condition-not-met error
    pub fn condition_not_met(message: impl Into<String>) -> Self {
        Self::ConditionNotMet {
            message: message.into(),
        }
    }

    /// Create an unknown tool error
    pub fn unknown_tool(id: impl Into<String>) -> Self {
        Self::UnknownTool { id: id.into() }
    }

    /// Create a tool type mismatch error
    pub fn tool_type_mismatch(id: impl Into<String>) -> Self {
        Self::ToolTypeMismatch { id: id.into() }
    }

    /// Create a circular dependency error
    pub fn circular_dependency(id: impl Into<String>) -> Self {
        Self::CircularDependency { id: id.into() }
    }

    /// Create a config not found error
    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::ConfigNotFound { path: path.into() }
    }

    /// Create an invalid argument error
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create an invalid config error
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// True for verification failures that a bounded retry may absorb
    pub fn is_condition_not_met(&self) -> bool {
        matches!(self, Self::ConditionNotMet { .. })
    }

    /// True for unexpected exit codes
    pub fn is_execution(&self) -> bool {
        matches!(self, Self::Execution { .. })
    }
}
