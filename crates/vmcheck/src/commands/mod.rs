//! CLI command implementations

pub mod detect;
pub mod kdump;
pub mod resolve;
pub mod tools;
pub mod version;

use anyhow::{Context, Result};
use camino::Utf8Path;
use vmcheck_core::config::SshConfig;
use vmcheck_core::{ConfigLoader, RuntimeConfig};
use vmcheck_tools::Node;

use crate::cli::TargetArgs;

/// Load the layered runtime config, adding `--config` when given
pub(crate) fn load_config(config: Option<&Utf8Path>) -> Result<RuntimeConfig> {
    let mut loader = ConfigLoader::new()?;
    if let Some(path) = config {
        loader = loader.with_file(path);
    }
    loader.load().context("Failed to load configuration")
}

/// Build and connect the node selected on the command line
pub(crate) fn connect(target: &TargetArgs, config: &RuntimeConfig) -> Result<Node> {
    let node = match &target.host {
        Some(host) => Node::ssh(host, &ssh_config(target, &config.ssh)),
        None => Node::local(),
    }
    .with_execution_config(&config.execution);

    node.connect()
        .with_context(|| format!("Failed to connect to {}", node.describe()))?;
    tracing::debug!(node = %node.name(), remote = node.is_remote(), "node ready");
    Ok(node)
}

/// Command-line SSH options win over the configured defaults
fn ssh_config(target: &TargetArgs, defaults: &SshConfig) -> SshConfig {
    let mut ssh = defaults.clone();
    if let Some(port) = target.port {
        ssh.port = port;
    }
    if let Some(user) = &target.user {
        ssh.username = user.clone();
    }
    if let Some(key) = &target.key {
        ssh.private_key_file = Some(key.to_string());
    }
    ssh
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;

    #[test]
    fn test_ssh_config_overrides() {
        let target = TargetArgs {
            host: Some("10.0.0.4".to_string()),
            port: Some(2222),
            user: None,
            key: Some(Utf8PathBuf::from("/home/me/.ssh/id_ed25519")),
        };
        let defaults = SshConfig::default();

        let ssh = ssh_config(&target, &defaults);
        assert_eq!(ssh.port, 2222);
        assert_eq!(ssh.username, defaults.username);
        assert_eq!(ssh.private_key_file.as_deref(), Some("/home/me/.ssh/id_ed25519"));
        assert_eq!(ssh.connect_timeout_secs, defaults.connect_timeout_secs);
    }

    #[test]
    fn test_ssh_config_defaults_untouched() {
        let ssh = ssh_config(&TargetArgs::default(), &SshConfig::default());
        assert_eq!(ssh.port, 22);
        assert!(ssh.private_key_file.is_none());
    }

    #[test]
    fn test_config_file_is_merged() {
        let dir = tempfile::tempdir().unwrap();
        let config_dir = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let file = config_dir.join("run.yaml");
        std::fs::write(&file, "kdump:\n  crashkernel: 1G\n").unwrap();

        let config = ConfigLoader::with_dir(config_dir.clone())
            .with_file(file)
            .load()
            .unwrap();
        assert_eq!(config.kdump.crashkernel, "1G");
        assert_eq!(config.kdump.dump_path, "/var/crash");
    }
}
