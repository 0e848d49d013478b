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

//! Per-peer state machine and the record the rest of the node acts on.
//!
//! A `Peer` does not own a socket directly: the reader/writer task pair
//! (spawned by `node`) owns the `TcpStream`; `Peer` holds only the address,
//! capability descriptor, and a channel back to the writer half. There is no
//! back-pointer to `Node` or `PeerManager`.

use crate::core::constants::{
    BAN_PEER_SCORE, BAN_PEER_TIME, PEER_CONNECTION_LIFETIME, PEER_DEAD_TIME,
    PEER_HEARTBEAT_TIMEOUT, PEER_MAX_BYTES_COUNT, PEER_RESTRICT_TIME,
};
use crate::core::types::{Envelope, PeerInfo};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;

/// Peer-level errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PeerError {
    /// The peer is disconnected or banned; the message was not queued.
    #[error("peer not connectable")]
    NotConnectable,
    /// A dial was attempted within `PEER_RESTRICT_TIME` of a prior failure.
    #[error("peer restricted")]
    Restricted,
}

/// Explicit peer lifecycle state (REDESIGN FLAGS: no independently-mutated
/// booleans — a peer is in exactly one of these states at a time).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeerState {
    /// Freshly accepted or dialed; no `Version` exchanged yet.
    New,
    /// `Version` received, awaiting `VerAck`.
    VersionKnown,
    /// Handshake complete; eligible for relay and gossip.
    FullyConnected,
    /// Connection closed; may be redialed after `PEER_RESTRICT_TIME`.
    Disconnected,
    /// Permanently rejected until `banned_until` elapses.
    Banned,
}

/// Runtime record for one remote peer.
pub struct Peer {
    /// Capability/address descriptor as learned from handshake or gossip.
    pub peer_info: PeerInfo,
    /// Canonical address-book identity key.
    pub address: Vec<u8>,
    /// Current lifecycle state.
    state: PeerState,
    /// True if this peer connected to us (vs. us dialing them).
    pub inbound: bool,
    /// Protocol version, once known.
    pub version: Option<u32>,
    /// Accumulated misbehavior points; banned at `BAN_PEER_SCORE`.
    pub misbehavior_score: i64,
    /// Wall-clock deadline after which a ban lifts.
    banned_until: Option<Instant>,
    /// Earliest time a new dial to this address is allowed.
    restricted_until: Option<Instant>,
    /// Cumulative bytes received.
    pub bytes_in: u64,
    /// Cumulative bytes sent.
    pub bytes_out: u64,
    /// When this connection was established.
    connected_at: Instant,
    /// Last time any message was received.
    last_seen: Instant,
    /// Whether the initial address/capability load has completed.
    load_done: bool,
    /// Channel to this peer's writer task.
    outbound: mpsc::UnboundedSender<Envelope>,
}

impl Peer {
    /// Construct a new peer in `PeerState::New`.
    pub fn new(
        peer_info: PeerInfo,
        address: Vec<u8>,
        inbound: bool,
        outbound: mpsc::UnboundedSender<Envelope>,
    ) -> Self {
        let now = Instant::now();
        Self {
            peer_info,
            address,
            state: PeerState::New,
            inbound,
            version: None,
            misbehavior_score: 0,
            banned_until: None,
            restricted_until: None,
            bytes_in: 0,
            bytes_out: 0,
            connected_at: now,
            last_seen: now,
            load_done: false,
            outbound,
        }
    }

    /// Construct a book-only record for an address learned via gossip, not
    /// yet dialed. Starts `Disconnected` with no redial restriction, so the
    /// watchdog's reconnect sweep can pick it up immediately.
    pub fn from_gossip(peer_info: PeerInfo) -> Self {
        let now = Instant::now();
        let (outbound, _rx) = mpsc::unbounded_channel();
        Self {
            address: peer_info.address.clone(),
            peer_info,
            state: PeerState::Disconnected,
            inbound: false,
            version: None,
            misbehavior_score: 0,
            banned_until: None,
            restricted_until: None,
            bytes_in: 0,
            bytes_out: 0,
            connected_at: now,
            last_seen: now,
            load_done: false,
            outbound,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PeerState {
        self.state
    }

    /// Queue a message for this peer's writer task.
    ///
    /// Fails `NotConnectable` once the peer is `Disconnected` or `Banned`;
    /// the caller owns deciding whether that is an error worth logging.
    pub fn push_message(&self, env: Envelope) -> Result<(), PeerError> {
        if matches!(self.state, PeerState::Disconnected | PeerState::Banned) {
            return Err(PeerError::NotConnectable);
        }
        self.outbound.send(env).map_err(|_| PeerError::NotConnectable)
    }

    /// Record an inbound `Version` and advance to `VersionKnown`.
    pub fn receive_version(&mut self, version: u32, info: PeerInfo) {
        self.version = Some(version);
        self.peer_info.merge_capabilities(&info);
        self.state = PeerState::VersionKnown;
        self.touch();
    }

    /// Record an inbound `VerAck`, completing the handshake.
    pub fn receive_verack(&mut self) {
        if self.state == PeerState::VersionKnown {
            self.state = PeerState::FullyConnected;
        }
        self.touch();
    }

    /// True once the handshake has completed.
    pub fn is_fully_connected(&self) -> bool {
        self.state == PeerState::FullyConnected
    }

    /// Mark the initial load (address/capability exchange) complete.
    pub fn mark_loaded(&mut self) {
        self.load_done = true;
    }

    /// Whether the initial load has completed.
    pub fn loaded(&self) -> bool {
        self.load_done
    }

    /// Add `points` of misbehavior; returns `true` if this crossed the ban
    /// threshold (the caller should then disconnect and record the ban).
    pub fn misbehave(&mut self, points: i64) -> bool {
        self.misbehavior_score = self.misbehavior_score.saturating_add(points);
        if self.misbehavior_score >= BAN_PEER_SCORE {
            self.ban();
            true
        } else {
            false
        }
    }

    /// Immediately ban this peer for `BAN_PEER_TIME`.
    pub fn ban(&mut self) {
        self.state = PeerState::Banned;
        self.banned_until = Some(Instant::now() + BAN_PEER_TIME);
    }

    /// True if a ban is active.
    pub fn is_banned(&self) -> bool {
        matches!(self.state, PeerState::Banned)
            && self.banned_until.map(|t| Instant::now() < t).unwrap_or(false)
    }

    /// Attempt to (re)connect; idempotent, and rejected while restricted.
    pub fn connect(&mut self) -> Result<(), PeerError> {
        if self.is_banned() {
            return Err(PeerError::NotConnectable);
        }
        if let Some(until) = self.restricted_until {
            if Instant::now() < until {
                return Err(PeerError::Restricted);
            }
        }
        if self.state == PeerState::New {
            return Ok(());
        }
        self.state = PeerState::New;
        self.connected_at = Instant::now();
        self.touch();
        Ok(())
    }

    /// Close the connection and start the redial restriction window.
    pub fn disconnect(&mut self) {
        if matches!(self.state, PeerState::Banned) {
            return;
        }
        self.state = PeerState::Disconnected;
        self.restricted_until = Some(Instant::now() + PEER_RESTRICT_TIME);
    }

    /// Record traffic and update the liveness clock.
    pub fn record_bytes(&mut self, in_bytes: u64, out_bytes: u64) {
        self.bytes_in = self.bytes_in.saturating_add(in_bytes);
        self.bytes_out = self.bytes_out.saturating_add(out_bytes);
        if in_bytes > 0 {
            self.touch();
        }
    }

    fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    /// True once this connection should be recycled: too old, or carrying
    /// too much cumulative traffic.
    pub fn should_recycle(&self) -> bool {
        self.connected_at.elapsed() > PEER_CONNECTION_LIFETIME
            || self.bytes_in.saturating_add(self.bytes_out) > PEER_MAX_BYTES_COUNT
    }

    /// True if this peer has gone silent past `PEER_DEAD_TIME` and should be
    /// force-disconnected by the watchdog.
    pub fn is_dead(&self) -> bool {
        self.last_seen.elapsed() > PEER_DEAD_TIME
    }

    /// True if a heartbeat ping is due.
    pub fn heartbeat_due(&self) -> bool {
        self.last_seen.elapsed() > PEER_HEARTBEAT_TIMEOUT
    }

    /// Time remaining, if any, before this address may be redialed.
    pub fn restriction_remaining(&self) -> Option<Duration> {
        self.restricted_until.and_then(|until| {
            let now = Instant::now();
            if now < until {
                Some(until - now)
            } else {
                None
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Capability, ServiceKind};
    use std::collections::BTreeSet;

    fn info() -> PeerInfo {
        PeerInfo {
            address: vec![127, 0, 0, 1],
            port: 8223,
            capabilities: BTreeSet::new(),
        }
    }

    fn peer() -> (Peer, mpsc::UnboundedReceiver<Envelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Peer::new(info(), vec![127, 0, 0, 1], false, tx), rx)
    }

    #[test]
    fn handshake_advances_new_to_version_known_to_fully_connected() {
        let (mut p, _rx) = peer();
        assert_eq!(p.state(), PeerState::New);
        p.receive_version(0x0123, info());
        assert_eq!(p.state(), PeerState::VersionKnown);
        p.receive_verack();
        assert_eq!(p.state(), PeerState::FullyConnected);
    }

    #[test]
    fn verack_before_version_is_ignored() {
        let (mut p, _rx) = peer();
        p.receive_verack();
        assert_eq!(p.state(), PeerState::New);
    }

    #[test]
    fn misbehave_bans_at_threshold() {
        let (mut p, _rx) = peer();
        assert!(!p.misbehave(BAN_PEER_SCORE - 1));
        assert!(p.misbehave(1));
        assert_eq!(p.state(), PeerState::Banned);
        assert!(p.is_banned());
    }

    #[test]
    fn push_message_fails_once_disconnected() {
        let (mut p, mut rx) = peer();
        p.push_message(Envelope::unsigned(crate::core::types::Message::GetAddr))
            .unwrap();
        assert!(rx.try_recv().is_ok());
        p.disconnect();
        assert!(p
            .push_message(Envelope::unsigned(crate::core::types::Message::GetAddr))
            .is_err());
    }

    #[test]
    fn reconnect_is_restricted_right_after_disconnect() {
        let (mut p, _rx) = peer();
        p.disconnect();
        assert_eq!(p.connect(), Err(PeerError::Restricted));
    }

    #[test]
    fn gossiped_record_starts_disconnected_and_unrestricted() {
        let p = Peer::from_gossip(info());
        assert_eq!(p.state(), PeerState::Disconnected);
        assert!(p.restriction_remaining().is_none());
    }

    #[test]
    fn capability_merge_accumulates_services() {
        let (mut p, _rx) = peer();
        let mut witness_info = info();
        witness_info.capabilities.insert(Capability {
            service: ServiceKind::Witness,
            data: vec![1, 2, 3],
        });
        p.receive_version(1, witness_info);
        assert!(p.peer_info.has_service(ServiceKind::Witness));
    }
}
