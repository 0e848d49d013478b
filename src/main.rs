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

//! Concilium node entrypoint (systemd-friendly).
//! Loads configuration, opens storage, starts the metrics server, and runs
//! the P2P listener + watchdog until the process is killed.

use std::sync::Arc;
use std::time::Duration;

use concilium_node::core::config::NodeConfig;
use concilium_node::core::storage::Storage;
use concilium_node::monitoring::metrics::Metrics;
use concilium_node::networking::node::Node;
use concilium_node::networking::transport;
use ring::rand::{SecureRandom, SystemRandom};
use tracing::{error, info, warn};

fn env(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn load_config(path: &str) -> NodeConfig {
    let raw = std::fs::read_to_string(path).unwrap_or_else(|e| {
        eprintln!("failed to read config at {path}: {e}");
        std::process::exit(1);
    });
    toml::from_str(&raw).unwrap_or_else(|e| {
        eprintln!("failed to parse config at {path}: {e}");
        std::process::exit(1);
    })
}

fn random_nonce() -> u64 {
    let rng = SystemRandom::new();
    let mut buf = [0u8; 8];
    rng.fill(&mut buf).expect("system rng unavailable");
    u64::from_le_bytes(buf)
}

#[tokio::main]
async fn main() {
    let _ = tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .compact()
        .try_init();

    let config_path = env("CONCILIUM_CONFIG", "./config.toml");
    let config = load_config(&config_path);

    let storage = Arc::new(
        Storage::open(&config.node.data_dir).unwrap_or_else(|e| {
            error!(?e, "failed to open storage");
            std::process::exit(1);
        }),
    );
    let metrics = Arc::new(Metrics::new().expect("metrics init failed"));

    let http_addr = config.http.listen_addr.clone();
    let metrics_for_http = metrics.clone();
    tokio::spawn(async move {
        if let Err(e) = concilium_node::monitoring::server::serve(&http_addr, metrics_for_http).await {
            error!(?e, "metrics server exited");
        }
    });

    let p2p_listen_addr: std::net::SocketAddr = config.p2p.listen_addr.parse().unwrap_or_else(|e| {
        error!(?e, addr = %config.p2p.listen_addr, "invalid p2p listen address");
        std::process::exit(1);
    });

    let node = Arc::new(Node::new(config, storage, metrics, random_nonce()));

    info!(addr = %p2p_listen_addr, "concilium node starting");

    let bootstrap = node.bootstrap().await;
    info!(count = bootstrap.len(), "bootstrap peers resolved");
    for addr in bootstrap {
        let dial_node = node.clone();
        tokio::spawn(async move {
            if let Err(e) = dial_node.dial(addr).await {
                warn!(?e, %addr, "dial failed");
            }
        });
    }

    let listener = match transport::listen(p2p_listen_addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(?e, "failed to bind p2p listener");
            std::process::exit(1);
        }
    };

    let accept_node = node.clone();
    let accept_task = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, peer_addr)) => {
                    info!(%peer_addr, "inbound connection accepted");
                    let conn_node = accept_node.clone();
                    tokio::spawn(async move {
                        conn_node.run_connection(stream, true).await;
                    });
                }
                Err(e) => {
                    warn!(?e, "accept failed");
                }
            }
        }
    });

    let watchdog_node = node.clone();
    let watchdog_task = tokio::spawn(async move {
        let mut since_backup = Duration::ZERO;
        loop {
            tokio::time::sleep(concilium_node::core::constants::PEER_TICK_TIMEOUT).await;
            if let Err(e) = watchdog_node.tick(&mut since_backup).await {
                warn!(?e, "watchdog tick failed");
            }
        }
    });

    let _ = tokio::join!(accept_task, watchdog_task);
}
