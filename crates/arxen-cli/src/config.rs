//! Arxen CLI Configuration Management
//!
//! Configuration is a TOML file with a `[node]` table and any number of `[[friends]]`
//! entries:
//!
//! ```toml
//! [node]
//! address = "192.168.1.10:7878"
//! reconcile_interval_secs = 10
//!
//! [[friends]]
//! name = "alice"
//! address = "192.168.1.11:7878"
//! ```
//!
//! The node address is resolved with priority: `--address` / `USER_ADDR` >
//! `--detect-ip` > config file > `127.0.0.1:7878`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::info;

use arxen_core::{Friend, FriendList, NodeAddress, NodeConfig};

use crate::cli::Cli;
use crate::error::{CliError, Result};

/// Address used when nothing else is configured
pub const DEFAULT_ADDRESS: &str = "127.0.0.1:7878";

// ----------------------------------------------------------------------------
// CLI Application Configuration
// ----------------------------------------------------------------------------

/// Complete configuration for the CLI application
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub node: NodeSection,
    pub friends: Vec<Friend>,
}

/// Node settings exposed in the config file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSection {
    /// Listen and announce address (host:port)
    pub address: Option<String>,
    /// Seconds between reconnect passes
    pub reconcile_interval_secs: u64,
    /// Milliseconds to wait on a full peer queue before dropping
    pub send_timeout_ms: u64,
    /// Seconds between re-advertisements of owned chats, 0 disables
    pub readvertise_interval_secs: u64,
    /// Envelopes buffered per peer
    pub peer_queue_size: usize,
    /// Interactive prompt
    pub prompt: String,
}

impl Default for NodeSection {
    fn default() -> Self {
        let defaults = NodeConfig::default();
        Self {
            address: None,
            reconcile_interval_secs: defaults.supervisor.reconcile_interval.as_secs(),
            send_timeout_ms: defaults.delivery.send_timeout.as_millis() as u64,
            readvertise_interval_secs: 0,
            peer_queue_size: defaults.channels.peer_queue_size,
            prompt: "arxen> ".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config = Self::from_toml(&raw)?;
        info!(
            "Loaded configuration from {} ({} friends)",
            path.display(),
            config.friends.len()
        );
        Ok(config)
    }

    /// Load `~/.arxen/arxen.toml` if it exists, defaults otherwise
    pub fn load_default() -> Result<Self> {
        match Self::default_config_path() {
            Some(path) if path.exists() => Self::load_from_file(path),
            _ => Ok(Self::default()),
        }
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn default_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".arxen/arxen.toml"))
    }

    /// Validate the configuration for consistency and correctness
    pub fn validate(&self) -> Result<()> {
        if let Some(address) = &self.node.address {
            NodeAddress::parse(address)?;
        }
        self.friend_list()?;
        self.node_config().validate().map_err(CliError::Config)?;
        Ok(())
    }

    /// Runtime configuration derived from the `[node]` table
    pub fn node_config(&self) -> NodeConfig {
        let mut config = NodeConfig::default();
        config.supervisor.reconcile_interval =
            Duration::from_secs(self.node.reconcile_interval_secs);
        config.delivery.send_timeout = Duration::from_millis(self.node.send_timeout_ms);
        config.channels.peer_queue_size = self.node.peer_queue_size;
        config.gossip.readvertise_interval = match self.node.readvertise_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        config
    }

    /// Friends as a name-indexed list
    pub fn friend_list(&self) -> Result<FriendList> {
        let mut list = FriendList::new();
        for friend in &self.friends {
            list.add(friend.clone())?;
        }
        Ok(list)
    }

    /// Resolve this node's address from flags, environment and file
    pub fn resolve_address(&self, cli: &Cli) -> Result<NodeAddress> {
        if let Some(address) = &cli.address {
            return Ok(NodeAddress::parse(address)?);
        }
        if cli.detect_ip {
            let ip = arxen_tcp::detect_local_ip()?;
            let address = NodeAddress::parse(&format!("{}:{}", ip, cli.port))?;
            info!("Detected local address {}", address);
            return Ok(address);
        }
        let configured = self.node.address.as_deref().unwrap_or(DEFAULT_ADDRESS);
        Ok(NodeAddress::parse(configured)?)
    }
}
