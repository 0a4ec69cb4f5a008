//! Layered configuration loader
//!
//! Precedence (low to high):
//! 1. Embedded defaults (built into the binary)
//! 2. User config (`~/.vmcheck/config.yaml`)
//! 3. Explicit config file (`--config`)
//! 4. Environment variables (`VMCHECK_*`)

use std::env;
use std::fs;
use std::str::FromStr;

use camino::{Utf8Path, Utf8PathBuf};
use rust_embed::RustEmbed;
use serde_yaml_ng::Value;

use crate::config::RuntimeConfig;
use crate::error::{Error, Result};
use crate::merge::deep_merge;
use crate::utils::get_home_dir;

const DEFAULTS_FILE: &str = "runtime-defaults.yaml";
const USER_CONFIG_FILE: &str = "config.yaml";

#[derive(RustEmbed)]
#[folder = "$CARGO_MANIFEST_DIR/embedded/"]
struct EmbeddedConfigs;

/// Loads [`RuntimeConfig`] from all configuration layers
pub struct ConfigLoader {
    config_dir: Utf8PathBuf,
    explicit: Option<Utf8PathBuf>,
}

impl ConfigLoader {
    /// Loader rooted at `~/.vmcheck`
    pub fn new() -> Result<Self> {
        Ok(Self::with_dir(get_home_dir()?.join(".vmcheck")))
    }

    /// Loader with a custom config directory
    pub fn with_dir(config_dir: Utf8PathBuf) -> Self {
        Self {
            config_dir,
            explicit: None,
        }
    }

    /// Add an explicit config file; it must exist
    pub fn with_file(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.explicit = Some(path.into());
        self
    }

    pub fn config_dir(&self) -> &Utf8Path {
        &self.config_dir
    }

    /// Built-in defaults only
    pub fn defaults() -> Result<RuntimeConfig> {
        let value = Self::embedded_defaults()?;
        Self::from_value(value, DEFAULTS_FILE)
    }

    pub fn load(&self) -> Result<RuntimeConfig> {
        let mut merged = Self::embedded_defaults()?;

        let user_config = self.config_dir.join(USER_CONFIG_FILE);
        if user_config.exists() {
            tracing::debug!(path = %user_config, "loading user config");
            deep_merge(&mut merged, Self::load_yaml_file(&user_config)?);
        }

        if let Some(path) = &self.explicit {
            if !path.exists() {
                return Err(Error::config_not_found(path.as_str()));
            }
            tracing::debug!(path = %path, "loading config file");
            deep_merge(&mut merged, Self::load_yaml_file(path)?);
        }

        let config = Self::from_value(merged, "merged configuration")?;
        Self::apply_env_overrides(config)
    }

    fn embedded_defaults() -> Result<Value> {
        let embedded_file = EmbeddedConfigs::get(DEFAULTS_FILE).ok_or_else(|| {
            Error::config_not_found(format!("Embedded config not found: {}", DEFAULTS_FILE))
        })?;

        let content = std::str::from_utf8(&embedded_file.data).map_err(|_| {
            Error::invalid_config(format!("Invalid UTF-8 in embedded config: {}", DEFAULTS_FILE))
        })?;

        Ok(serde_yaml_ng::from_str(content)?)
    }

    fn load_yaml_file(path: &Utf8Path) -> Result<Value> {
        let content = fs::read_to_string(path)?;
        serde_yaml_ng::from_str(&content)
            .map_err(|e| Error::invalid_config(format!("Failed to parse {}: {}", path, e)))
    }

    fn from_value(value: Value, origin: &str) -> Result<RuntimeConfig> {
        serde_yaml_ng::from_value(value)
            .map_err(|e| Error::invalid_config(format!("Failed to parse {}: {}", origin, e)))
    }

    fn apply_env_overrides(mut config: RuntimeConfig) -> Result<RuntimeConfig> {
        if let Some(val) = env_parse("VMCHECK_EXEC_TIMEOUT_SECS")? {
            config.execution.timeout_secs = val;
        }

        if let Some(val) = env_parse("VMCHECK_POLL_INTERVAL_MS")? {
            config.polling.interval_ms = val;
        }

        if let Some(val) = env_parse("VMCHECK_POLL_TIMEOUT_SECS")? {
            config.polling.timeout_secs = val;
        }

        if let Ok(val) = env::var("VMCHECK_CRASHKERNEL") {
            config.kdump.crashkernel = val;
        }

        if let Ok(val) = env::var("VMCHECK_DUMP_PATH") {
            config.kdump.dump_path = val;
        }

        if let Some(val) = env_parse("VMCHECK_SSH_PORT")? {
            config.ssh.port = val;
        }

        Ok(config)
    }
}

fn env_parse<T: FromStr>(name: &str) -> Result<Option<T>> {
    match env::var(name) {
        Ok(val) => val
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::invalid_config(format!("{} must be a valid number", name))),
        Err(_) => Ok(None),
    }
}
