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

//! Protocol-wide constants. Values are authoritative wire-protocol
//! parameters, not tunables — changing them changes the protocol.

use std::time::Duration;

/// Magic number prefixed to every wire frame.
pub const NETWORK_MAGIC: u32 = 0x1288_2304;
/// Protocol version advertised in `MsgVersion`.
pub const PROTOCOL_VERSION: u16 = 0x0123;
/// Default P2P listen port.
pub const DEFAULT_PORT: u16 = 8223;

/// Upper bound on live peers the watchdog will dial toward.
pub const MAX_PEERS: usize = 10;
/// Lower bound on live peers the watchdog tries to maintain.
pub const MIN_PEERS: usize = 3;
/// Maximum number of `PeerInfo` entries carried in one `MsgAddr`.
pub const ADDR_MAX_LENGTH: usize = 1000;

/// Timeout for DNS bootstrap and per-peer initial load.
pub const PEER_QUERY_TIMEOUT: Duration = Duration::from_secs(30);
/// Timeout for an outbound connection attempt.
pub const CONNECTION_TIMEOUT: Duration = Duration::from_secs(60);

/// Misbehavior score at which a peer is banned.
pub const BAN_PEER_SCORE: i64 = 100;
/// Duration of a ban once `BAN_PEER_SCORE` is reached.
pub const BAN_PEER_TIME: Duration = Duration::from_secs(24 * 60 * 60);

/// Heartbeat ping interval.
pub const PEER_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(2 * 60);
/// Silence duration past which a peer is force-disconnected.
pub const PEER_DEAD_TIME: Duration = Duration::from_secs(6 * 60);
/// Maximum age of a connection before it is recycled.
pub const PEER_CONNECTION_LIFETIME: Duration = Duration::from_secs(60 * 60);
/// Maximum cumulative bytes (in + out) before a peer is recycled.
pub const PEER_MAX_BYTES_COUNT: u64 = 10 * 1024 * 1024;
/// Minimum time between reconnection attempts to the same address.
pub const PEER_RESTRICT_TIME: Duration = Duration::from_secs(2 * 60);

/// Maximum size of a single wire frame.
pub const MAX_BLOCK_SIZE: u32 = 1024 * 1024;

/// Flat transaction fee, in the chain's base unit.
pub const TX_FEE: u64 = 100;
/// Fee surcharge for contract-creating transactions.
pub const CONTRACT_FEE: u64 = 3_000;
/// Fee surcharge per internal transaction produced by contract execution.
pub const INTERNAL_TX_FEE: u64 = 300;
/// Fee per byte of contract storage written.
pub const STORAGE_PER_BYTE_FEE: u64 = 10;

/// Maximum number of pending transactions the mempool holds.
pub const MEMPOOL_TX_QTY: usize = 500;
/// Maximum age of a mempool entry before it is evicted.
pub const MEMPOOL_TX_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);

/// Interval between `PeerManager` address-book persistence sweeps.
pub const PEERMANAGER_BACKUP_TIMEOUT: Duration = Duration::from_secs(10 * 60);
/// Interval between reconnection-loop passes.
pub const PEER_RECONNECT_INTERVAL: Duration = Duration::from_secs(2 * 60);
/// Watchdog tick interval.
pub const PEER_TICK_TIMEOUT: Duration = Duration::from_secs(1);

/// Wall-clock budget for block assembly (consensus-side, consumed by `core::consensus`).
pub const BLOCK_CREATION_TIME_LIMIT: Duration = Duration::from_millis(1_500);

/// Reject code for a duplicate inbound connection from an already-connected address.
pub const REJECT_DUPLICATE: u8 = 1;

/// Human-readable address prefix (checked strings).
pub const ADDRESS_PREFIX: &str = "Ux";
