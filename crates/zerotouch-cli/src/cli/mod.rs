//! CLI argument parsing and command dispatch.

pub mod args;
pub mod commands;

use anyhow::Result;
use args::{Cli, Commands};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

/// Run the CLI application.
pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = Config::load(cli.config.as_deref())?;
    let packet_trace = cli.packet_trace.or_else(|| config.node.packet_trace.clone());

    let ctx = commands::Context {
        config,
        config_path: cli.config,
        packet_trace,
        verbose: cli.verbose,
    };

    match cli.command {
        Commands::Demo(args) => commands::demo::execute(ctx, args).await,
        Commands::Config(args) => commands::config::execute(ctx, args).await,
    }
}

/// `RUST_LOG` applies unless `-v` asks for debug output.
fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
