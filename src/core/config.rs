// Copyright (c) 2026 Concilium
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Node configuration, loaded from a TOML file at startup.

use serde::{Deserialize, Serialize};

/// Node configuration root.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node settings.
    pub node: NodeSettings,
    /// HTTP/metrics endpoint settings.
    pub http: HttpConfig,
    /// P2P settings.
    pub p2p: NodeP2pConfig,
    /// Consensus settings.
    pub consensus: ConsensusConfig,
}

/// Node settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeSettings {
    /// Human-readable name.
    pub name: String,
    /// Data directory (db + keys).
    pub data_dir: String,
}

/// HTTP config for the metrics/health endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Listen address, e.g. 0.0.0.0:9090.
    pub listen_addr: String,
}

/// P2P configuration embedded in node config.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeP2pConfig {
    /// Address to bind the raw TCP listener to, e.g. 0.0.0.0:8223.
    pub listen_addr: String,

    /// Static peer addresses (`host:port`) dialed at every startup in addition to bootstrap.
    #[serde(default)]
    pub static_peers: Vec<String>,

    /// DNS seed hostnames resolved at startup to discover additional peer addresses.
    #[serde(default)]
    pub dns_seeds: Vec<String>,

    /// Upper bound on simultaneously connected peers.
    #[serde(default = "default_max_peers")]
    pub max_peers: usize,

    /// Lower bound on connected peers the watchdog tries to maintain via reconnection.
    #[serde(default = "default_min_peers")]
    pub min_peers: usize,

    /// Services this node advertises in its `MsgVersion`.
    #[serde(default)]
    pub capabilities: Vec<CapabilityConfig>,

    /// Optional path to a signed concilium registry file (TOML).
    #[serde(default)]
    pub concilium_registry_path: Option<String>,

    /// Ed25519 public key (hex, 32 bytes) used to verify `concilium_registry_path` signatures.
    /// Required when `concilium_registry_path` is set.
    #[serde(default)]
    pub concilium_registry_pubkey_hex: Option<String>,

    /// Minimum required concilium registry format version. If 0, accept any supported.
    #[serde(default)]
    pub concilium_registry_min_version: u32,

    /// Max age (now - issued_at_ms) allowed for the registry in milliseconds. If 0, no age limit.
    #[serde(default)]
    pub concilium_registry_max_age_ms: u64,

    /// Grace period after expires_at_ms in milliseconds. If 0, no grace.
    #[serde(default)]
    pub concilium_registry_grace_ms: u64,

    /// Require registry freshness fields (issued_at_ms/expires_at_ms/network) to be present.
    #[serde(default)]
    pub concilium_registry_require_fresh: bool,
}

fn default_max_peers() -> usize {
    crate::core::constants::MAX_PEERS
}

fn default_min_peers() -> usize {
    crate::core::constants::MIN_PEERS
}

/// One advertised capability, as written in the config file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CapabilityConfig {
    /// `"node"` or `"witness"`.
    pub service: String,
    /// Opaque service data, hex-encoded (e.g. witness public key).
    #[serde(default)]
    pub data_hex: String,
}

/// Consensus configuration: which conciliums this node witnesses for.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConsensusConfig {
    /// Concilium ids this node participates in as a witness.
    #[serde(default)]
    pub witnessed_conciliums: Vec<u32>,
    /// Validator public keys in hex (32 bytes each), keyed by concilium id, for conciliums
    /// not sourced from a signed registry.
    #[serde(default)]
    pub validators_hex: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_toml() {
        let toml_str = r#"
            [node]
            name = "test-node"
            data_dir = "/tmp/concilium-data"

            [http]
            listen_addr = "127.0.0.1:9090"

            [p2p]
            listen_addr = "0.0.0.0:8223"

            [consensus]
        "#;
        let cfg: NodeConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.p2p.max_peers, crate::core::constants::MAX_PEERS);
        assert_eq!(cfg.p2p.min_peers, crate::core::constants::MIN_PEERS);
        assert!(cfg.p2p.static_peers.is_empty());
    }
}
