//! Command-line argument definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Zero-touch bootstrapping for named-data networks
///
/// An operator shares a PIN with an authentication server and a new device;
/// the server finds the device, connects to it and certifies it.
#[derive(Parser, Debug)]
#[command(name = "zerotouch")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file (default: the per-user config directory)
    #[arg(short, long, global = true, env = "ZEROTOUCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Append every packet to this file
    #[arg(long, global = true)]
    pub packet_trace: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Bootstrap a device on an in-memory link
    Demo(DemoArgs),

    /// Inspect the configuration
    Config(ConfigArgs),
}

// ============================================================================
// Demo command
// ============================================================================

#[derive(Args, Debug)]
pub struct DemoArgs {
    /// PIN shared by the operator and the device
    #[arg(short, long, env = "ZEROTOUCH_SECRET")]
    pub secret: String,

    /// PIN the operator hands to the server, if different from the device's
    #[arg(long)]
    pub operator_secret: Option<String>,

    /// Name of the authentication server
    #[arg(long)]
    pub server_name: Option<String>,

    /// Name of the device
    #[arg(long)]
    pub device_name: Option<String>,

    /// Also route probes over the device's multicast faces
    #[arg(long)]
    pub enable_discovery: bool,

    /// Print the outcome as JSON
    #[arg(long)]
    pub json: bool,
}

// ============================================================================
// Config command
// ============================================================================

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,

    /// Show the configuration file path
    Path,
}
