//! Version command

use anyhow::{Context, Result};
use vmcheck_core::{parse_version, VersionInfo};

use crate::cli::VersionArgs;
use crate::output;

pub fn run(args: VersionArgs) -> Result<()> {
    let version = parse_version(&args.text)
        .with_context(|| format!("Failed to parse `{}`", args.text))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&to_json(&version))?);
    } else {
        output::header(&version.to_string());
        output::kv("Major", &version.major.to_string());
        output::kv("Minor", &version.minor.to_string());
        output::kv("Patch", &version.patch.to_string());
        if let Some(pre) = &version.prerelease {
            output::kv("Prerelease", pre);
        }
        if let Some(build) = &version.build {
            output::kv("Build", build);
        }
    }

    Ok(())
}

fn to_json(version: &VersionInfo) -> serde_json::Value {
    serde_json::json!({
        "version": version,
        "major": version.major,
        "minor": version.minor,
        "patch": version.patch,
        "prerelease": version.prerelease,
        "build": version.build,
    })
}
