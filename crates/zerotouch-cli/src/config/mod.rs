//! Configuration management.

use std::path::{Path, PathBuf};

use anyhow::Result;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use zerotouch::NodeConfig;

/// Default name of the authentication server
pub const DEFAULT_SERVER_NAME: &str = "/ndn/zerotouch/as";

/// Default name of the device
pub const DEFAULT_DEVICE_NAME: &str = "/ndn/zerotouch/device";

/// Default identity of the operator tool
pub const DEFAULT_OPERATOR_NAME: &str = "/ndn/zerotouch/operator";

/// CLI configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Name of the authentication server.
    pub server_name: Option<String>,

    /// Name of the device.
    pub device_name: Option<String>,

    /// Identity the operator signs commands with.
    pub operator_name: Option<String>,

    /// Node tunables.
    #[serde(default)]
    pub node: NodeConfig,
}

impl Config {
    /// Get the default config file path.
    pub fn path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("net", "zerotouch", "zerotouch")
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;

        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Load configuration from `explicit`, or from the default path.
    ///
    /// A missing file yields the defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => Self::path()?,
        };

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)?;
        Self::parse(&content)
    }

    /// Parse and validate configuration text.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.node.validate()?;
        Ok(config)
    }

    /// Server name, falling back to the default.
    pub fn server_name(&self) -> &str {
        self.server_name.as_deref().unwrap_or(DEFAULT_SERVER_NAME)
    }

    /// Device name, falling back to the default.
    pub fn device_name(&self) -> &str {
        self.device_name.as_deref().unwrap_or(DEFAULT_DEVICE_NAME)
    }

    /// Operator identity, falling back to the default.
    pub fn operator_name(&self) -> &str {
        self.operator_name.as_deref().unwrap_or(DEFAULT_OPERATOR_NAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.server_name(), DEFAULT_SERVER_NAME);
    }

    #[test]
    fn test_node_section() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "device_name = \"/home/lamp\"\n\n[node]\nprobe_lifetime_ms = 750\n",
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.device_name(), "/home/lamp");
        assert_eq!(config.node.probe_lifetime_ms, 750);
        assert_eq!(config.node.command_lifetime_ms, 4000);
    }

    #[test]
    fn test_invalid_node_section() {
        assert!(Config::parse("[node]\nmax_chain_depth = 0\n").is_err());
    }
}
