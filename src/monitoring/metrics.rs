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

//! Prometheus metrics registry.

use prometheus::{IntCounter, IntGauge, Registry};
use thiserror::Error;

/// Metrics errors.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("prometheus")]
    Prom,
}

/// Metrics container.
#[derive(Clone)]
pub struct Metrics {
    /// Registry.
    pub registry: Registry,

    /// Currently connected peers (any state short of disconnected/banned).
    pub p2p_peers: IntGauge,
    /// Current chain height.
    pub block_height: IntGauge,
    /// Total transactions accepted into the mempool.
    pub transactions_total: IntCounter,
    /// Current mempool size.
    pub mempool_size: IntGauge,

    /// Dropped replay messages.
    pub p2p_replay_dropped_total: IntCounter,
    /// Invalid decoded messages.
    pub p2p_invalid_msg_total: IntCounter,
    /// Rate-limited messages.
    pub p2p_rate_limited_total: IntCounter,
    /// Reputation-based throttled messages.
    pub p2p_reputation_throttled_total: IntCounter,
    /// Banned peer events.
    pub p2p_banned_total: IntCounter,
    /// Misbehavior points assessed across all peers.
    pub p2p_misbehavior_points_total: IntCounter,
    /// Bytes received across all peers.
    pub p2p_bytes_in_total: IntCounter,
    /// Bytes sent across all peers.
    pub p2p_bytes_out_total: IntCounter,
    /// Reconnection attempts made by the watchdog.
    pub p2p_reconnect_attempts_total: IntCounter,
    /// Handshake failures (self-connection, incompatible protocol, duplicate version).
    pub p2p_handshake_failures_total: IntCounter,
    /// BFT commits reached across all conciliums this node tracks.
    pub consensus_commits_total: IntCounter,
}

impl Metrics {
    /// Create and register metrics.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        macro_rules! gauge {
            ($name:literal, $help:literal) => {
                IntGauge::new($name, $help).map_err(|_| MetricsError::Prom)?
            };
        }
        macro_rules! counter {
            ($name:literal, $help:literal) => {
                IntCounter::new($name, $help).map_err(|_| MetricsError::Prom)?
            };
        }

        let p2p_peers = gauge!("concilium_p2p_peers", "Connected peers");
        let block_height = gauge!("concilium_block_height", "Current block height");
        let transactions_total = counter!("concilium_transactions_total", "Total tx processed");
        let mempool_size = gauge!("concilium_mempool_size", "Current mempool size");

        let p2p_replay_dropped_total = counter!(
            "concilium_p2p_replay_dropped_total",
            "Dropped replay messages"
        );
        let p2p_invalid_msg_total = counter!(
            "concilium_p2p_invalid_msg_total",
            "Invalid decoded messages"
        );
        let p2p_rate_limited_total = counter!(
            "concilium_p2p_rate_limited_total",
            "Rate-limited messages"
        );
        let p2p_reputation_throttled_total = counter!(
            "concilium_p2p_reputation_throttled_total",
            "Reputation-based throttled messages"
        );
        let p2p_banned_total = counter!("concilium_p2p_banned_total", "Banned peer events");
        let p2p_misbehavior_points_total = counter!(
            "concilium_p2p_misbehavior_points_total",
            "Misbehavior points assessed across all peers"
        );
        let p2p_bytes_in_total = counter!("concilium_p2p_bytes_in_total", "Bytes received from peers");
        let p2p_bytes_out_total = counter!("concilium_p2p_bytes_out_total", "Bytes sent to peers");
        let p2p_reconnect_attempts_total = counter!(
            "concilium_p2p_reconnect_attempts_total",
            "Reconnection attempts made by the watchdog"
        );
        let p2p_handshake_failures_total = counter!(
            "concilium_p2p_handshake_failures_total",
            "Handshake failures (self-connection, incompatible protocol, duplicate version)"
        );
        let consensus_commits_total = counter!(
            "concilium_consensus_commits_total",
            "BFT commits reached across all conciliums this node tracks"
        );

        for metric in [&p2p_peers, &block_height, &mempool_size] {
            registry
                .register(Box::new(metric.clone()))
                .map_err(|_| MetricsError::Prom)?;
        }
        for metric in [
            &transactions_total,
            &p2p_replay_dropped_total,
            &p2p_invalid_msg_total,
            &p2p_rate_limited_total,
            &p2p_reputation_throttled_total,
            &p2p_banned_total,
            &p2p_misbehavior_points_total,
            &p2p_bytes_in_total,
            &p2p_bytes_out_total,
            &p2p_reconnect_attempts_total,
            &p2p_handshake_failures_total,
            &consensus_commits_total,
        ] {
            registry
                .register(Box::new(metric.clone()))
                .map_err(|_| MetricsError::Prom)?;
        }

        Ok(Self {
            registry,
            p2p_peers,
            block_height,
            transactions_total,
            mempool_size,
            p2p_replay_dropped_total,
            p2p_invalid_msg_total,
            p2p_rate_limited_total,
            p2p_reputation_throttled_total,
            p2p_banned_total,
            p2p_misbehavior_points_total,
            p2p_bytes_in_total,
            p2p_bytes_out_total,
            p2p_reconnect_attempts_total,
            p2p_handshake_failures_total,
            consensus_commits_total,
        })
    }
}
