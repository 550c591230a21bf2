//! Node configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{NodeError, Result};

/// Tunables shared by every role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Lifetime of command interests, in milliseconds
    pub command_lifetime_ms: u64,

    /// Lifetime of probe broadcasts, in milliseconds. Should stay below the
    /// command lifetime of the operator waiting on add-device.
    pub probe_lifetime_ms: u64,

    /// Bound on canonizing one device address, in milliseconds
    pub canonize_timeout_ms: u64,

    /// Lifetime of the certificate fetch, in milliseconds
    pub cert_fetch_lifetime_ms: u64,

    /// Maximum number of certificates fetched while walking a signer chain
    pub max_chain_depth: usize,

    /// Append every packet to this file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub packet_trace: Option<PathBuf>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            command_lifetime_ms: 4000,
            probe_lifetime_ms: 2000,
            canonize_timeout_ms: 100,
            cert_fetch_lifetime_ms: 4000,
            max_chain_depth: 4,
            packet_trace: None,
        }
    }
}

impl NodeConfig {
    /// Parse from TOML
    pub fn from_toml(input: &str) -> Result<Self> {
        let config: Self = toml::from_str(input).map_err(|e| NodeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::from_toml(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Render as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| NodeError::Config(e.to_string()))
    }

    /// Reject zero lifetimes and a zero chain depth
    pub fn validate(&self) -> Result<()> {
        if self.command_lifetime_ms == 0 || self.probe_lifetime_ms == 0 {
            return Err(NodeError::Config("interest lifetimes must be positive".into()));
        }
        if self.max_chain_depth == 0 {
            return Err(NodeError::Config("max_chain_depth must be at least 1".into()));
        }
        Ok(())
    }

    /// Command interest lifetime
    #[must_use]
    pub const fn command_lifetime(&self) -> Duration {
        Duration::from_millis(self.command_lifetime_ms)
    }

    /// Probe interest lifetime
    #[must_use]
    pub const fn probe_lifetime(&self) -> Duration {
        Duration::from_millis(self.probe_lifetime_ms)
    }

    /// Canonization bound
    #[must_use]
    pub const fn canonize_timeout(&self) -> Duration {
        Duration::from_millis(self.canonize_timeout_ms)
    }

    /// Certificate fetch lifetime
    #[must_use]
    pub const fn cert_fetch_lifetime(&self) -> Duration {
        Duration::from_millis(self.cert_fetch_lifetime_ms)
    }
}
