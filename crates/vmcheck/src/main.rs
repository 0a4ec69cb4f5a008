//! vmcheck CLI - probe and prepare Linux VMs
//!
//! Entry point for the vmcheck command-line interface.

mod cli;
mod commands;
mod output;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::{Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose, cli.quiet);

    match cli.command {
        Commands::Version(args) => commands::version::run(args),
        Commands::Detect(args) => commands::detect::run(args, &cli.target, cli.config.as_deref()),
        Commands::Tools(args) => commands::tools::run(args, cli.config.as_deref()),
        Commands::Resolve(args) => commands::resolve::run(args, &cli.target, cli.config.as_deref()),
        Commands::Kdump(args) => commands::kdump::run(args, &cli.target, cli.config.as_deref()),
    }
}

/// Initialize tracing with appropriate verbosity
fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            // command lines are logged at info
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();
}
