//! CLI configuration file.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use weft_node::NodeConfig;
use weft_proto::NodeId;

/// On-disk node configuration (TOML)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Rendezvous service address
    pub rendezvous: Option<SocketAddr>,

    /// Peer listener bind address
    pub listen: Option<SocketAddr>,

    /// Address advertised to peers (when behind a mapped port)
    pub advertised: Option<SocketAddr>,

    /// Path to the identity seed file
    pub identity: Option<String>,

    /// Whitelist member ids, in schedule order
    pub whitelist: Vec<String>,

    /// Whether this node whitelists itself
    pub whitelist_self: bool,
}

impl Config {
    /// Load from a TOML file; a missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Fails on unreadable files or invalid TOML.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Fold the file settings into a node configuration.
    ///
    /// # Errors
    ///
    /// Fails on malformed whitelist entries.
    pub fn apply(&self, mut node: NodeConfig) -> anyhow::Result<NodeConfig> {
        if let Some(addr) = self.rendezvous {
            node.rendezvous_addr = addr;
        }
        if let Some(addr) = self.listen {
            node.listen_addr = addr;
        }
        node.advertised_addr = self.advertised;
        node.whitelist_self = self.whitelist_self;
        for entry in &self.whitelist {
            let id = NodeId::parse(entry)
                .with_context(|| format!("whitelist entry {entry:?} is not a node id"))?;
            node.whitelist.push(id);
        }
        Ok(node)
    }
}

/// Read a 32-byte hex identity seed from a file.
///
/// # Errors
///
/// Fails on unreadable files or content that is not 64 hex characters.
pub fn load_seed(path: &Path) -> anyhow::Result<[u8; 32]> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading identity {}", path.display()))?;
    let bytes = hex::decode(text.trim()).context("identity file is not hex")?;
    bytes
        .try_into()
        .map_err(|_| anyhow::anyhow!("identity seed must be exactly 32 bytes"))
}

/// Write a 32-byte identity seed as hex.
///
/// # Errors
///
/// Fails when the file cannot be written.
pub fn store_seed(path: &Path, seed: &[u8; 32]) -> anyhow::Result<()> {
    std::fs::write(path, format!("{}\n", hex::encode(seed)))
        .with_context(|| format!("writing identity {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = Config::load(Path::new("/nonexistent/weft.toml")).unwrap();
        assert!(config.rendezvous.is_none());
        assert!(config.whitelist.is_empty());
    }

    #[test]
    fn test_parse_and_apply() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weft.toml");
        std::fs::write(
            &path,
            "rendezvous = \"127.0.0.1:8080\"\nwhitelist = [\"0123456789abcdef\"]\nwhitelist_self = true\n",
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        let node = config.apply(NodeConfig::default()).unwrap();
        assert_eq!(node.rendezvous_addr, "127.0.0.1:8080".parse().unwrap());
        assert!(node.whitelist_self);
        assert_eq!(node.whitelist.len(), 1);
    }

    #[test]
    fn test_bad_whitelist_entry_fails() {
        let config = Config {
            whitelist: vec!["nope".to_string()],
            ..Config::default()
        };
        assert!(config.apply(NodeConfig::default()).is_err());
    }

    #[test]
    fn test_seed_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity");
        let seed = [7u8; 32];
        store_seed(&path, &seed).unwrap();
        assert_eq!(load_seed(&path).unwrap(), seed);
    }
}
