//! Tools command

use anyhow::Result;
use camino::Utf8Path;
use owo_colors::OwoColorize;
use serde::Serialize;
use vmcheck_tools::{ToolId, ToolRegistry};

use crate::cli::ToolsArgs;
use crate::commands::load_config;
use crate::output;

#[derive(Debug, Serialize)]
struct ToolEntry {
    id: ToolId,
    dependencies: &'static [ToolId],
}

pub fn run(args: ToolsArgs, config: Option<&Utf8Path>) -> Result<()> {
    let registry = ToolRegistry::builtin(load_config(config)?);
    let entries = entries(&registry)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    output::header("Built-in tools");
    for entry in &entries {
        if entry.dependencies.is_empty() {
            println!("  {}", entry.id.cyan());
        } else {
            println!(
                "  {} {}",
                entry.id.cyan(),
                format!("(needs {})", entry.dependencies.join(", ")).dimmed()
            );
        }
    }
    Ok(())
}

fn entries(registry: &ToolRegistry) -> Result<Vec<ToolEntry>> {
    registry
        .tool_ids()
        .into_iter()
        .map(|id| {
            Ok(ToolEntry {
                id,
                dependencies: registry.dependencies(id)?,
            })
        })
        .collect()
}
