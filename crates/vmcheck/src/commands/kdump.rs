//! Kdump commands
//!
//! Each step runs in its own invocation: a reboot separates `configure`
//! from `verify-loaded` and a kernel crash separates `verify-loaded` from
//! `verify-dump`.

use anyhow::{Context, Result};
use camino::Utf8Path;
use owo_colors::OwoColorize;
use vmcheck_tools::tools::kdump::KdumpSession;
use vmcheck_tools::ToolRegistry;

use crate::cli::{KdumpCommands, TargetArgs};
use crate::commands::{connect, load_config};
use crate::output;

pub fn run(cmd: KdumpCommands, target: &TargetArgs, config: Option<&Utf8Path>) -> Result<()> {
    let registry = ToolRegistry::builtin(load_config(config)?);
    let node = connect(target, registry.config())?;

    let spinner = output::spinner("Resolving kdump...");
    let session = KdumpSession::new(registry.context(&node));
    spinner.finish_and_clear();
    let mut session =
        session.with_context(|| format!("kdump is not available on {}", node.describe()))?;

    if let Some(crashkernel) = crashkernel_override(&cmd) {
        session = session.with_crashkernel(crashkernel);
    }

    output::header(&format!("kdump on {}", node.describe()));
    output::kv("Service", session.kdump().service_name());
    output::kv("Crash kernel", session.crashkernel());

    match cmd {
        KdumpCommands::Configure(_) => {
            session.configure().context("Failed to configure kdump")?;
            output::success("kdump configured");
            output::info(&format!(
                "Reboot the node, then run {}",
                "vmcheck kdump verify-loaded".cyan()
            ));
        }
        KdumpCommands::VerifyLoaded(_) => {
            session
                .verify_loaded()
                .context("The crash kernel is not loaded")?;
            output::success("Crash kernel loaded");
            output::info(&format!(
                "Trigger a kernel panic, then run {}",
                "vmcheck kdump verify-dump".cyan()
            ));
        }
        KdumpCommands::VerifyDump => {
            session.verify_dump().context("No crash dump found")?;
            output::success(&format!("vmcore found in {}", session.kdump().dump_path()));
        }
    }

    output::kv("State", &session.state().to_string());
    node.close()?;
    Ok(())
}

fn crashkernel_override(cmd: &KdumpCommands) -> Option<&str> {
    match cmd {
        KdumpCommands::Configure(args) | KdumpCommands::VerifyLoaded(args) => {
            args.crashkernel.as_deref()
        }
        KdumpCommands::VerifyDump => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::KdumpArgs;

    #[test]
    fn test_crashkernel_override() {
        let configure = KdumpCommands::Configure(KdumpArgs {
            crashkernel: Some("auto".to_string()),
        });
        assert_eq!(crashkernel_override(&configure), Some("auto"));

        let loaded = KdumpCommands::VerifyLoaded(KdumpArgs { crashkernel: None });
        assert_eq!(crashkernel_override(&loaded), None);
        assert_eq!(crashkernel_override(&KdumpCommands::VerifyDump), None);
    }
}
