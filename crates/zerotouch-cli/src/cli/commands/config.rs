//! `zerotouch config` - configuration inspection.

use anyhow::Result;
use colored::Colorize;

use super::Context;
use crate::cli::args::{ConfigArgs, ConfigCommands};
use crate::config::Config;

pub async fn execute(ctx: Context, args: ConfigArgs) -> Result<()> {
    match args.command {
        ConfigCommands::Show => show_config(&ctx),
        ConfigCommands::Path => show_path(&ctx),
    }
}

fn show_config(ctx: &Context) -> Result<()> {
    let config = &ctx.config;

    println!("{}", "Current Configuration:".bold());
    println!();
    println!("  {} {}", "server_name:".bold(), config.server_name());
    println!("  {} {}", "device_name:".bold(), config.device_name());
    println!("  {} {}", "operator_name:".bold(), config.operator_name());
    println!();
    println!("{}", "[node]".bold());
    print!("{}", config.node.to_toml()?);

    if let Some(path) = &ctx.packet_trace {
        println!();
        println!("  {} {}", "packet trace:".bold(), path.display());
    }
    Ok(())
}

fn show_path(ctx: &Context) -> Result<()> {
    let path = match &ctx.config_path {
        Some(path) => path.clone(),
        None => Config::path()?,
    };
    let state = if path.exists() {
        "exists".green()
    } else {
        "not created, defaults apply".dimmed()
    };
    println!("{} ({state})", path.display());
    Ok(())
}
