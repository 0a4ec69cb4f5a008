//! Resolve command

use anyhow::{bail, Result};
use camino::Utf8Path;
use owo_colors::OwoColorize;
use vmcheck_tools::ToolRegistry;

use crate::cli::{ResolveArgs, TargetArgs};
use crate::commands::{connect, load_config};
use crate::output;

pub fn run(args: ResolveArgs, target: &TargetArgs, config: Option<&Utf8Path>) -> Result<()> {
    let registry = ToolRegistry::builtin(load_config(config)?);
    let node = connect(target, registry.config())?;

    output::header(&format!("Resolving tools on {}", node.describe()));

    let mut failed = Vec::new();
    for id in &args.ids {
        let spinner = output::spinner(&format!("Resolving {}...", id));
        let result = registry.resolve_by_id(&node, id);
        spinner.finish_and_clear();

        match result {
            Ok(tool) => {
                let command = format!("({})", tool.command());
                output::success(&format!("{} {}", id, command.dimmed()));
            }
            Err(e) if !args.keep_going => {
                node.close()?;
                return Err(anyhow::Error::new(e).context(format!("Failed to resolve {}", id)));
            }
            Err(e) => {
                output::error(&format!("{}: {}", id, e));
                failed.push(id.as_str());
            }
        }
    }

    node.close()?;
    if !failed.is_empty() {
        bail!("Failed to resolve {}", failed.join(", "));
    }
    Ok(())
}
