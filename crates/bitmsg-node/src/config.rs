//! Configuration types for bitmsg-node.
//! Parsed from ~/.bitmsg/config.toml.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use bitmsg_protocol::{PowParams, ProtocolVersion, MAINNET};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub node: NodeSection,
    #[serde(default)]
    pub network: NetworkSection,
    #[serde(default)]
    pub pow: PowSection,
    #[serde(default)]
    pub storage: StorageSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSection {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Address advertised to peers. Defaults to the listen address.
    pub external_ip: Option<String>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_services")]
    pub services: u64,
    #[serde(default = "default_streams")]
    pub streams: Vec<u64>,
    /// Protocol version used for outbound handshakes (1 or 2).
    #[serde(default = "default_protocol")]
    pub protocol: u32,
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            external_ip: None,
            user_agent: default_user_agent(),
            services: default_services(),
            streams: default_streams(),
            protocol: default_protocol(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSection {
    #[serde(default)]
    pub bootstrap: Vec<BootstrapEntry>,
    #[serde(default = "default_dial_timeout")]
    pub dial_timeout_secs: u64,
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
    #[serde(default = "default_relay_fanout")]
    pub relay_fanout: usize,
    /// Objects older than this are pruned from the inventory.
    #[serde(default = "default_object_ttl")]
    pub object_ttl_secs: u64,
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            bootstrap: Vec::new(),
            dial_timeout_secs: default_dial_timeout(),
            read_timeout_secs: default_read_timeout(),
            relay_fanout: default_relay_fanout(),
            object_ttl_secs: default_object_ttl(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapEntry {
    pub addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PowSection {
    #[serde(default = "default_trials_per_byte")]
    pub trials_per_byte: u64,
    #[serde(default = "default_extra_bytes")]
    pub extra_bytes: u64,
}

impl Default for PowSection {
    fn default() -> Self {
        Self {
            trials_per_byte: default_trials_per_byte(),
            extra_bytes: default_extra_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSection {
    /// `"memory"` or a path to a SQLite database.
    #[serde(default = "default_inventory")]
    pub inventory: String,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            inventory: default_inventory(),
        }
    }
}

// Default value functions
fn default_listen_addr() -> String {
    "0.0.0.0:8444".into()
}
fn default_user_agent() -> String {
    "/bitmsg:0.2/".into()
}
fn default_services() -> u64 {
    1
}
fn default_streams() -> Vec<u64> {
    vec![1]
}
fn default_protocol() -> u32 {
    MAINNET.default_protocol.number()
}
fn default_dial_timeout() -> u64 {
    MAINNET.dial_timeout_secs
}
fn default_read_timeout() -> u64 {
    MAINNET.read_timeout_secs
}
fn default_relay_fanout() -> usize {
    MAINNET.relay_fanout
}
fn default_object_ttl() -> u64 {
    2 * 24 * 3600
}
fn default_trials_per_byte() -> u64 {
    MAINNET.pow.trials_per_byte
}
fn default_extra_bytes() -> u64 {
    MAINNET.pow.extra_bytes
}
fn default_inventory() -> String {
    "~/.bitmsg/inventory.db".into()
}

impl NodeConfig {
    /// Load config from file, or create default if missing.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: NodeConfig = toml::from_str(&content)?;
            config.protocol_version()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    pub fn protocol_version(&self) -> anyhow::Result<ProtocolVersion> {
        Ok(ProtocolVersion::try_from(self.node.protocol)?)
    }

    pub fn pow_params(&self) -> PowParams {
        PowParams::new(self.pow.trials_per_byte, self.pow.extra_bytes)
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_secs(self.network.dial_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.network.read_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = NodeConfig::default();
        assert_eq!(cfg.node.listen_addr, "0.0.0.0:8444");
        assert_eq!(cfg.node.streams, vec![1]);
        assert_eq!(cfg.network.dial_timeout_secs, 7);
        assert_eq!(cfg.network.relay_fanout, 10);
        assert_eq!(cfg.pow_params(), PowParams::new(320, 14_000));
        assert_eq!(cfg.protocol_version().unwrap(), ProtocolVersion::V2);
    }

    #[test]
    fn test_parse_toml() {
        let toml_str = r#"
[node]
listen_addr = "0.0.0.0:8555"
external_ip = "203.0.113.7"
user_agent = "/custom:1.0/"
protocol = 1

[network]
read_timeout_secs = 30

[[network.bootstrap]]
addr = "192.0.2.10:8444"

[[network.bootstrap]]
addr = "192.0.2.11:8444"

[pow]
trials_per_byte = 2

[storage]
inventory = "memory"
"#;

        let cfg: NodeConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.node.listen_addr, "0.0.0.0:8555");
        assert_eq!(cfg.node.external_ip.as_deref(), Some("203.0.113.7"));
        assert_eq!(cfg.protocol_version().unwrap(), ProtocolVersion::V1);
        assert_eq!(cfg.network.bootstrap.len(), 2);
        assert_eq!(cfg.network.bootstrap[1].addr, "192.0.2.11:8444");
        assert_eq!(cfg.read_timeout(), Duration::from_secs(30));
        // Unset fields keep their defaults.
        assert_eq!(cfg.network.dial_timeout_secs, 7);
        assert_eq!(cfg.pow_params(), PowParams::new(2, 14_000));
        assert_eq!(cfg.storage.inventory, "memory");
    }

    #[test]
    fn test_empty_file_is_default() {
        let cfg: NodeConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.node.user_agent, "/bitmsg:0.2/");
        assert_eq!(cfg.network.object_ttl_secs, 172_800);
    }

    #[test]
    fn test_load_rejects_unknown_protocol() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[node]\nprotocol = 5\n").unwrap();
        assert!(NodeConfig::load_or_default(&path).is_err());
    }

    #[test]
    fn test_load_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = NodeConfig::load_or_default(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(cfg.node.listen_addr, "0.0.0.0:8444");
    }

    #[test]
    fn test_serialise_default() {
        let cfg = NodeConfig::default();
        let toml_str = toml::to_string_pretty(&cfg).unwrap();
        assert!(toml_str.contains("[node]"));
        assert!(toml_str.contains("relay_fanout"));
    }
}
