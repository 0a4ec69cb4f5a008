//! Local command execution through `duct`

use std::thread;
use std::time::{Duration, Instant};

use duct::Expression;
use vmcheck_core::{Error, Result};

use super::transport::{CommandRequest, RawOutput, Transport};

const WAIT_STEP: Duration = Duration::from_millis(20);

/// Runs commands on the machine vmcheck itself runs on
#[derive(Debug, Default)]
pub struct LocalTransport;

impl LocalTransport {
    pub fn new() -> Self {
        Self
    }
}

impl Transport for LocalTransport {
    fn describe(&self) -> String {
        "local".to_string()
    }

    fn is_remote(&self) -> bool {
        false
    }

    fn connect(&self) -> Result<()> {
        which::which("sh")
            .map(|_| ())
            .map_err(|e| Error::transport("local", format!("no POSIX shell found: {}", e)))
    }

    fn run(&self, request: &CommandRequest) -> Result<RawOutput> {
        let mut expression = if request.shell {
            duct::cmd("sh", ["-c", request.command.as_str()])
        } else {
            let words = shlex::split(&request.command).ok_or_else(|| {
                Error::transport("local", format!("cannot split command `{}`", request.command))
            })?;
            let (program, args) = words.split_first().ok_or_else(|| {
                Error::transport("local", "empty command".to_string())
            })?;
            duct::cmd(program.as_str(), args)
        };

        if let Some(cwd) = &request.cwd {
            expression = expression.dir(cwd);
        }
        for (key, value) in &request.env {
            expression = expression.env(key, value);
        }

        run_expression(expression, &request.command, request.timeout, "local")
    }
}

/// Start `expression`, capture its output and kill it once `timeout` elapses
pub(super) fn run_expression(
    expression: Expression,
    command: &str,
    timeout: Duration,
    target: &str,
) -> Result<RawOutput> {
    let handle = expression
        .stdin_null()
        .stdout_capture()
        .stderr_capture()
        .unchecked()
        .start()
        .map_err(|e| Error::transport(target, format!("failed to start `{}`: {}", command, e)))?;

    let deadline = Instant::now() + timeout;
    loop {
        let finished = handle.try_wait().map_err(|e| {
            Error::transport(target, format!("failed waiting for `{}`: {}", command, e))
        })?;

        if let Some(output) = finished {
            return Ok(RawOutput {
                exit_code: output.status.code().unwrap_or(-1),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        let now = Instant::now();
        if now >= deadline {
            if let Err(err) = handle.kill() {
                tracing::warn!(
                    command = %command,
                    error = %err,
                    "failed to kill timed out command"
                );
            }
            return Err(Error::transport(
                target,
                format!("command timed out after {}s: {}", timeout.as_secs(), command),
            ));
        }
        thread::sleep(WAIT_STEP.min(deadline - now));
    }
}
