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

//! Concilium node - the networking core of a multi-lane BFT blockchain.
//!
//! This crate provides:
//! - Deterministic types & canonical (bincode, fixint) encoding
//! - A BFT vote/commit finality boundary, generalized over concilium lanes
//! - A hand-rolled raw-TCP peer transport with version/verack handshake,
//!   address gossip, and transaction relay
//! - Persistent key-value state with deterministic Merkle roots and proofs
//! - Monitoring via Prometheus metrics and structured logging

/// Core protocol primitives (types, consensus, state, security, runtime).
pub mod core;
/// Observability (metrics, HTTP exposition).
pub mod monitoring;
/// P2P networking stack (transport, peer lifecycle, node orchestrator).
pub mod networking;
