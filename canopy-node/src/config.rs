// Copyright (c) The Libra Core Contributors
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;

use canopy_consensus::config::{OperatorRouterConfig, PackerConfig, PreCommitConfig};
use canopy_dealer::config::DealerConfig;
use serde::{Deserialize, Serialize};

/// Aggregates every component's tunables plus this node's identity and storage locations.
/// Loaded from an optional TOML file, then overridden by environment variables — no component
/// reads process globals directly.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct NodeConfig {
    pub peer_id: String,
    pub listen_addr: String,
    pub bootstrap_peer_id: String,
    pub block_store_addr: String,
    pub state_db_path: PathBuf,
    pub dealer_kv_path: PathBuf,
    pub http_port: u16,
    pub packer: PackerConfig,
    pub pre_commit: PreCommitConfig,
    pub operator_router: OperatorRouterConfig,
    pub dealer: DealerConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let home = canopy_home();
        NodeConfig {
            peer_id: String::new(),
            listen_addr: "0.0.0.0:4001".to_string(),
            bootstrap_peer_id: String::new(),
            block_store_addr: "127.0.0.1:5001".to_string(),
            state_db_path: home.join("state.json"),
            dealer_kv_path: home.join("dealer.json"),
            http_port: 8080,
            packer: PackerConfig::default(),
            pre_commit: PreCommitConfig::default(),
            operator_router: OperatorRouterConfig::default(),
            dealer: DealerConfig::default(),
        }
    }
}

/// Reads `CANOPY_HOME`, the directory holding this node's state and dealer files.
fn canopy_home() -> PathBuf {
    PathBuf::from(std::env::var("CANOPY_HOME").unwrap_or_else(|_| "./".to_string()))
}

impl NodeConfig {
    /// Loads defaults, overlays a TOML file at `path` if one exists, then overlays the
    /// `peer_id`/`bootstrap_peer_id` environment overrides.
    pub fn load(path: Option<&std::path::Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(p) if p.exists() => {
                let text = std::fs::read_to_string(p)?;
                toml::from_str(&text)?
            }
            _ => NodeConfig::default(),
        };
        if let Ok(peer_id) = std::env::var("CANOPY_PEER_ID") {
            config.peer_id = peer_id;
        }
        if let Ok(bootstrap) = std::env::var("CANOPY_BOOTSTRAP_PEER_ID") {
            config.bootstrap_peer_id = bootstrap;
        }
        Ok(config)
    }

    /// Whether this node bootstraps its own single-member cluster rather than joining one
    /// pointed at by `bootstrap_peer_id`.
    pub fn is_bootstrap(&self) -> bool {
        self.bootstrap_peer_id.is_empty() || self.bootstrap_peer_id == self.peer_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_self_consistent() {
        let config = NodeConfig::default();
        assert!(config.is_bootstrap());
        assert_eq!(config.packer.flush_max_items, 100);
    }

    #[test]
    fn load_missing_file_falls_back_to_defaults() {
        let config = NodeConfig::load(Some(std::path::Path::new("/nonexistent/canopy.toml"))).unwrap();
        assert_eq!(config, NodeConfig::default());
    }

    #[test]
    fn load_overlays_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("canopy.toml");
        std::fs::write(&path, "http_port = 9999\npeer_id = \"node-a\"\n").unwrap();
        let config = NodeConfig::load(Some(&path)).unwrap();
        assert_eq!(config.http_port, 9999);
        assert_eq!(config.peer_id, "node-a");
    }
}
