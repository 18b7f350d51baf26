//! Node configuration.
//!
//! Loaded from a TOML file at a fixed path; missing fields are filled
//! with runtime data (node id defaults to the hostname, iface to `eth0`).

use crate::constants::{DEFAULT_IFACE, DEFAULT_NAMESERVERS, DEFAULT_ROOT, DEFAULT_STORE_PORT};
use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Default path of the node config file.
pub const CONFIG_PATH: &str = "/etc/boss/boss.toml";

/// Top-level node configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Node id; defaults to the hostname.
    #[serde(default)]
    pub id: String,
    /// Interface used for node addressing; defaults to `eth0`.
    #[serde(default)]
    pub iface: String,
    /// On-disk root for agent state.
    #[serde(default = "default_root")]
    pub root: PathBuf,
    #[serde(default)]
    pub domain: String,
    /// Nameservers for container resolv.conf bind sources.
    #[serde(default)]
    pub nameservers: Vec<String>,
    #[serde(default)]
    pub agent: AgentConfig,
}

/// The `[agent]` stanza.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub master: bool,
    /// Gossip addresses of peers to join at startup.
    #[serde(default)]
    pub peers: Vec<String>,
    /// TCP port the replicated store listens on.
    #[serde(default = "default_store_port")]
    pub store_port: u16,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            master: false,
            peers: Vec::new(),
            store_port: DEFAULT_STORE_PORT,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let mut c = Self {
            id: String::new(),
            iface: String::new(),
            root: default_root(),
            domain: String::new(),
            nameservers: Vec::new(),
            agent: AgentConfig::default(),
        };
        c.fill_defaults();
        c
    }
}

fn default_root() -> PathBuf {
    PathBuf::from(DEFAULT_ROOT)
}

fn default_store_port() -> u16 {
    DEFAULT_STORE_PORT
}

impl Config {
    /// Loads the config from disk and fills missing fields.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Self::from_toml(&data)
    }

    /// Parses a TOML document and fills missing fields.
    pub fn from_toml(data: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(data).map_err(|e| Error::Config(e.to_string()))?;
        config.fill_defaults();
        Ok(config)
    }

    fn fill_defaults(&mut self) {
        if self.id.is_empty() {
            self.id = hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "localhost".to_string());
        }
        if self.iface.is_empty() {
            self.iface = DEFAULT_IFACE.to_string();
        }
    }

    /// Nameservers for container resolv.conf files, with the stock
    /// fallback when none are configured.
    pub fn nameservers(&self) -> Vec<String> {
        if self.nameservers.is_empty() {
            return DEFAULT_NAMESERVERS.iter().map(|s| s.to_string()).collect();
        }
        self.nameservers.clone()
    }

    /// The replicated store's data directory for this node.
    pub fn store_data_dir(&self) -> PathBuf {
        self.root.join(&self.id)
    }
}
