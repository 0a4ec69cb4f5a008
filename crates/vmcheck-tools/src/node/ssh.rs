//! Remote command execution through the system `ssh` client

use std::time::Duration;

use vmcheck_core::config::SshConfig;
use vmcheck_core::{Error, Result};

use super::local::run_expression;
use super::{env_key, shell_quote};
use super::transport::{CommandRequest, RawOutput, Transport};

/// Exit status the OpenSSH client reserves for its own failures
const SSH_CLIENT_ERROR: i32 = 255;

/// Runs commands on a remote host over SSH
#[derive(Debug, Clone)]
pub struct SshTransport {
    host: String,
    port: u16,
    username: String,
    private_key_file: Option<String>,
    connect_timeout: Duration,
}

impl SshTransport {
    pub fn new(host: impl Into<String>, config: &SshConfig) -> Self {
        Self {
            host: host.into(),
            port: config.port,
            username: config.username.clone(),
            private_key_file: config.private_key_file.clone(),
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Arguments passed to `ssh` ahead of the remote command
    pub fn client_args(&self) -> Vec<String> {
        let mut args = vec![
            "-p".to_string(),
            self.port.to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout.as_secs()),
        ];
        if let Some(key) = &self.private_key_file {
            args.push("-i".to_string());
            args.push(key.clone());
        }
        args.push(format!("{}@{}", self.username, self.host));
        args
    }

    /// Render the command line the remote shell executes
    pub fn remote_command(&self, request: &CommandRequest) -> Result<String> {
        let mut line = String::new();
        if let Some(cwd) = &request.cwd {
            line.push_str(&format!("cd {} && ", shell_quote(cwd)?));
        }
        for (key, value) in &request.env {
            line.push_str(&format!("export {}={}; ", env_key(key)?, shell_quote(value)?));
        }
        line.push_str(&request.command);
        Ok(line)
    }
}

impl Transport for SshTransport {
    fn describe(&self) -> String {
        format!("{}@{}:{}", self.username, self.host, self.port)
    }

    fn is_remote(&self) -> bool {
        true
    }

    fn connect(&self) -> Result<()> {
        which::which("ssh").map_err(|e| {
            Error::transport(self.describe(), format!("ssh client not found: {}", e))
        })?;

        let probe = CommandRequest::new("true", self.connect_timeout);
        let output = self.run(&probe)?;
        if output.exit_code != 0 {
            return Err(Error::transport(
                self.describe(),
                format!("connection check exited with {}", output.exit_code),
            ));
        }
        tracing::debug!(target_host = %self.describe(), "ssh connection established");
        Ok(())
    }

    fn run(&self, request: &CommandRequest) -> Result<RawOutput> {
        let mut args = self.client_args();
        args.push("--".to_string());
        args.push(self.remote_command(request)?);

        let output = run_expression(
            duct::cmd("ssh", args),
            &request.command,
            request.timeout,
            &self.describe(),
        )?;

        if output.exit_code == SSH_CLIENT_ERROR {
            return Err(Error::transport(self.describe(), output.stderr.trim().to_string()));
        }
        Ok(output)
    }
}
