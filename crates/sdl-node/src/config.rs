use crate::error::NodeError;
use crate::node::NodeId;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const TRACKER_SERVER_ADDRESS: &str = "localhost:3000";
pub const NODE_PORT: u16 = 40000;

/// Tendermint listens next to the node port: +1 p2p, +2 rpc, +3 ABCI.
pub const TENDERMINT_RPC_PORT_OFFSET: u16 = 2;

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Node configuration, loadable from TOML or `SDL_*` environment variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub node_id: NodeId,
    pub node_port: u16,
    pub tracker_address: String,
    /// Tendermint RPC `host:port`; derived from `node_port` when unset
    pub tendermint_address: Option<String>,
    pub request_timeout_secs: u64,
    pub peers: Vec<PeerConfig>,
    pub pattern: PatternConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConfig {
    pub id: NodeId,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternConfig {
    pub min_amount: u64,
    pub max_amount: u64,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    pub limit: Option<u64>,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            min_amount: 1,
            max_amount: 100,
            min_delay_ms: 500,
            max_delay_ms: 2000,
            limit: None,
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: 0,
            node_port: NODE_PORT,
            tracker_address: TRACKER_SERVER_ADDRESS.to_string(),
            tendermint_address: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            peers: Vec::new(),
            pattern: PatternConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Load node config from TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, NodeError> {
        let content =
            fs::read_to_string(path).map_err(|e| NodeError::Io("read config file", e))?;
        toml::from_str(&content).map_err(|e| NodeError::Config(e.to_string()))
    }

    /// Load node config from environment variables, falling back to defaults.
    ///
    /// Env vars:
    ///   - SDL_NODE_ID
    ///   - SDL_NODE_PORT
    ///   - SDL_TRACKER            = tracker `host:port`
    ///   - SDL_TENDERMINT         = Tendermint RPC `host:port`
    ///   - SDL_REQUEST_TIMEOUT_SECS
    pub fn load_from_env() -> Result<Self, NodeError> {
        let mut config = Self::default();

        if let Some(id) = env_parsed("SDL_NODE_ID")? {
            config.node_id = id;
        }
        if let Some(port) = env_parsed("SDL_NODE_PORT")? {
            config.node_port = port;
        }
        if let Ok(tracker) = std::env::var("SDL_TRACKER") {
            config.tracker_address = tracker;
        }
        if let Ok(tendermint) = std::env::var("SDL_TENDERMINT") {
            config.tendermint_address = Some(tendermint);
        }
        if let Some(secs) = env_parsed("SDL_REQUEST_TIMEOUT_SECS")? {
            config.request_timeout_secs = secs;
        }

        Ok(config)
    }

    /// Save node config to TOML file
    pub fn save_to_file(&self, path: &Path) -> Result<(), NodeError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| NodeError::Config(e.to_string()))?;
        fs::write(path, content).map_err(|e| NodeError::Io("write config file", e))
    }

    pub fn tendermint_address(&self) -> String {
        self.tendermint_address.clone().unwrap_or_else(|| {
            format!(
                "localhost:{}",
                self.node_port.saturating_add(TENDERMINT_RPC_PORT_OFFSET)
            )
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), NodeError> {
        if self.node_port > u16::MAX - TENDERMINT_RPC_PORT_OFFSET - 1 {
            return Err(NodeError::Config(format!(
                "node_port {} leaves no room for the Tendermint ports",
                self.node_port
            )));
        }
        if self.tracker_address.trim().is_empty() {
            return Err(NodeError::Config("tracker_address cannot be empty".to_string()));
        }
        if self.request_timeout_secs == 0 {
            return Err(NodeError::Config("request_timeout_secs must be positive".to_string()));
        }
        for peer in &self.peers {
            if peer.id == self.node_id {
                return Err(NodeError::Config(format!(
                    "peer list contains own node id {}",
                    peer.id
                )));
            }
            if peer.address.trim().is_empty() {
                return Err(NodeError::Config(format!("peer {} has no address", peer.id)));
            }
        }
        if self.pattern.min_amount > self.pattern.max_amount
            || self.pattern.min_delay_ms > self.pattern.max_delay_ms
        {
            return Err(NodeError::Config("pattern ranges are inverted".to_string()));
        }
        Ok(())
    }
}

fn env_parsed<T: std::str::FromStr>(name: &str) -> Result<Option<T>, NodeError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| NodeError::Config(format!("{}={:?}: {}", name, value, e))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = NodeConfig::default();
        assert_eq!(config.node_port, 40000);
        assert_eq!(config.tracker_address, "localhost:3000");
        assert_eq!(config.tendermint_address(), "localhost:40002");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.toml");

        let mut config = NodeConfig::default();
        config.node_id = 3;
        config.tendermint_address = Some("10.0.0.5:26657".to_string());
        config.peers.push(PeerConfig {
            id: 4,
            address: "10.0.0.6:40000".to_string(),
        });
        config.pattern.limit = Some(50);
        config.save_to_file(&path).unwrap();

        let loaded = NodeConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.tendermint_address(), "10.0.0.5:26657");
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.toml");
        fs::write(&path, "node_id = 9\n[pattern]\nmax_amount = 5\n").unwrap();

        let loaded = NodeConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.node_id, 9);
        assert_eq!(loaded.node_port, NODE_PORT);
        assert_eq!(loaded.pattern.max_amount, 5);
        assert_eq!(loaded.pattern.min_amount, 1);
    }

    #[test]
    fn test_validate_rejects_self_peer() {
        let mut config = NodeConfig::default();
        config.peers.push(PeerConfig {
            id: 0,
            address: "localhost:40010".to_string(),
        });
        assert!(matches!(config.validate(), Err(NodeError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_port_without_room() {
        let config = NodeConfig {
            node_port: u16::MAX,
            ..NodeConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
