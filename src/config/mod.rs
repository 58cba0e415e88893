//! Configuration options for the node: an optional TOML file, layered with
//! CLI overrides, deserialized with `serde` via the `config` crate.

use std::path::Path;

use serde_derive::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Configuration {
    pub node: NodeConfig,
    pub consensus: ConsensusConfig,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NodeConfig {
    /// Address to bind the UDP gossip/consensus socket to.
    pub host: String,
    /// `0` means "let the OS assign one".
    pub udp_port: u16,
    /// TCP port for the CLI dispatcher. `0` means OS-assigned.
    pub tcp_port: u16,
    /// Bootstrap peers as `host:port`, seeded before any gossip arrives.
    #[serde(default)]
    pub bootstrap_peers: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ConsensusConfig {
    /// Initial lying policy percentage, in `[0, 100]`.
    #[serde(default)]
    pub lie_percent: u8,
    /// Configured upper bound on Byzantine peers. See DESIGN.md for how (and
    /// why) this does not currently feed into the `om` formula.
    #[serde(default = "default_fault_bound")]
    pub fault_bound: usize,
}

fn default_fault_bound() -> usize {
    1
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            udp_port: 0,
            tcp_port: 0,
            bootstrap_peers: Vec::new(),
        }
    }
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            lie_percent: 0,
            fault_bound: default_fault_bound(),
        }
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            node: NodeConfig::default(),
            consensus: ConsensusConfig::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("configuration file does not exist: '{0}'")]
    FileDoesNotExist(String),
    #[error("could not parse bootstrap peer '{0}'")]
    InvalidBootstrapPeer(String),
    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, ConfigurationError>;

impl Configuration {
    /// Loads configuration from a TOML file. Missing files are a hard error;
    /// callers that want a config-optional startup should check existence
    /// (or catch `FileDoesNotExist`) and fall back to [`Configuration::default`].
    pub fn try_load(path: &Path) -> Result<Configuration> {
        if !path.exists() {
            return Err(ConfigurationError::FileDoesNotExist(
                path.display().to_string(),
            ));
        }
        let config = config::Config::builder()
            .add_source(config::File::from(path))
            .build()
            .map_err(|e| ConfigurationError::Other(e.to_string()))?;

        config
            .try_deserialize()
            .map_err(|e| ConfigurationError::Other(e.to_string()))
    }
}
