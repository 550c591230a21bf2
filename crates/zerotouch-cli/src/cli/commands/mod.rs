//! Command implementations.

pub mod config;
pub mod demo;

use std::path::PathBuf;

use crate::config::Config;

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Effective configuration
    pub config: Config,

    /// Configuration file given on the command line
    pub config_path: Option<PathBuf>,

    /// Packet trace file
    pub packet_trace: Option<PathBuf>,

    /// Verbose output
    pub verbose: bool,
}
