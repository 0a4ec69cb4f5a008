//! Detect command

use anyhow::Result;
use camino::Utf8Path;
use owo_colors::OwoColorize;
use serde::Serialize;
use vmcheck_tools::{Node, OsClassification};

use crate::cli::{DetectArgs, TargetArgs};
use crate::commands::{connect, load_config};
use crate::output;

#[derive(Debug, Serialize)]
struct DetectReport<'a> {
    node: &'a str,
    remote: bool,
    os: &'a OsClassification,
    package_manager: Option<String>,
    sudo: bool,
}

pub fn run(args: DetectArgs, target: &TargetArgs, config: Option<&Utf8Path>) -> Result<()> {
    let config = load_config(config)?;
    let node = connect(target, &config)?;

    let report = detect(&node)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        output::header(&format!("Node {}", node.describe()));
        output::kv("OS", &report.os.name);
        output::kv("ID", &report.os.id);
        output::kv("Family", &report.os.family.to_string());
        output::kv("Version", &report.os.version.to_string());
        output::kv(
            "Package manager",
            &report
                .package_manager
                .clone()
                .unwrap_or_else(|| "unsupported".red().to_string()),
        );
        output::kv("Sudo", if report.sudo { "yes" } else { "no" });
    }

    node.close()?;
    Ok(())
}

fn detect(node: &Node) -> Result<DetectReport<'_>> {
    let os = node.os()?;
    // unknown families have no package manager, detection still succeeds
    let package_manager = node.package_manager().ok().map(|pm| pm.kind().to_string());
    Ok(DetectReport {
        node: node.name(),
        remote: node.is_remote(),
        os,
        package_manager,
        sudo: node.supports_sudo()?,
    })
}
