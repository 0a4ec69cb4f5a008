//! CLI argument parsing with clap

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};

/// vmcheck - probe and prepare Linux VMs for validation
#[derive(Parser, Debug)]
#[command(name = "vmcheck")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Extra config file merged over ~/.vmcheck/config.yaml
    #[arg(short, long, global = true)]
    pub config: Option<Utf8PathBuf>,

    #[command(flatten)]
    pub target: TargetArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Node selection. Without `--host` commands run on this machine.
#[derive(Args, Debug, Default, Clone)]
pub struct TargetArgs {
    /// Remote host reached over ssh
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// SSH port
    #[arg(long, global = true, requires = "host")]
    pub port: Option<u16>,

    /// SSH user
    #[arg(long, global = true, requires = "host")]
    pub user: Option<String>,

    /// SSH private key file
    #[arg(long, global = true, requires = "host")]
    pub key: Option<Utf8PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Parse a version string the way node versions are parsed
    Version(VersionArgs),

    /// Detect the operating system of the node
    Detect(DetectArgs),

    /// List the built-in tools
    Tools(ToolsArgs),

    /// Resolve tools on the node, installing them when possible
    Resolve(ResolveArgs),

    /// Configure and verify crash dumps
    #[command(subcommand)]
    Kdump(KdumpCommands),
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Version text, e.g. `18.04` or `v1.2.3-beta`
    pub text: String,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct DetectArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct ToolsArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct ResolveArgs {
    /// Tool ids, see `vmcheck tools`
    #[arg(required = true, num_args = 1..)]
    pub ids: Vec<String>,

    /// Keep resolving after a tool fails
    #[arg(long)]
    pub keep_going: bool,
}

#[derive(Subcommand, Debug)]
pub enum KdumpCommands {
    /// Reserve crash kernel memory and enable the kdump service
    Configure(KdumpArgs),

    /// After a reboot, check the crash kernel is loaded
    VerifyLoaded(KdumpArgs),

    /// After a crash, check a vmcore was written
    VerifyDump,
}

#[derive(Args, Debug)]
pub struct KdumpArgs {
    /// Crash kernel reservation, overrides `kdump.crashkernel`
    #[arg(long)]
    pub crashkernel: Option<String>,
}
