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

//! `Node`: the orchestrator. Owns `PeerManager` and `Mempool`; dials
//! bootstrap peers, dispatches inbound messages by policy (the codec stays
//! peer-unaware), relays transactions, and runs the watchdog tick.
//!
//! Ownership graph: `Node` owns `PeerManager` owns `Peer`s. A `Peer` holds
//! only its own address and a channel back to its writer task — no
//! back-pointer to `Node` or `PeerManager` (REDESIGN FLAGS #6).

use crate::core::config::NodeConfig;
use crate::core::consensus::driver::ConsensusDriver;
use crate::core::constants::{
    MAX_PEERS, PEER_QUERY_TIMEOUT, PEER_TICK_TIMEOUT, PEERMANAGER_BACKUP_TIMEOUT,
    PROTOCOL_VERSION, TX_FEE,
};
use crate::core::crypto::{self, CryptoError};
use crate::core::mempool::Mempool;
use crate::core::storage::{Storage, Store};
use crate::core::types::{
    encode_canonical, Capability, ConciliumId, ConsensusMsg, Envelope, JoinTransaction, Message,
    PeerInfo, RejectCode, RejectPayload, ServiceKind, Transaction, VersionPayload,
    WBlockPayload, WExposePayload, WNextRoundPayload,
};
use crate::monitoring::metrics::Metrics;
use crate::networking::codec;
use crate::networking::peer::{Peer, PeerError, PeerState};
use crate::networking::peer_manager::{PeerManager, PeerManagerError};
use crate::networking::transport::{self, TransportError};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Frame-level type tag for all application messages. The codec
/// self-describes the message kind via the `Message` enum discriminant, so
/// this is a constant rather than a dispatch key.
const MESSAGE_TYPE_TAG: u32 = 1;

/// Node-level errors.
#[derive(Debug, Error)]
pub enum NodeError {
    /// A peer dialed or announced itself with our own session nonce.
    #[error("self connection")]
    SelfConnection,
    /// Peer's advertised protocol version does not match ours.
    #[error("incompatible protocol")]
    IncompatibleProtocol,
    /// Transaction referenced an account unknown to storage.
    #[error("unknown account")]
    UnknownAccount,
    /// Caller referenced a peer address the manager has no record of.
    #[error("unknown peer")]
    UnknownPeer,
    /// Transaction would overdraw the sender's balance.
    #[error("insufficient funds")]
    InsufficientFunds,
    /// Transaction nonce is not the sender's next expected nonce.
    #[error("bad nonce")]
    BadNonce,
    /// Peer bookkeeping failure.
    #[error("peer manager")]
    PeerManager(#[from] PeerManagerError),
    /// Peer messaging failure.
    #[error("peer")]
    Peer(#[from] PeerError),
    /// Storage failure.
    #[error("storage")]
    Storage(#[from] crate::core::storage::StorageError),
    /// Crypto failure deriving a sender address.
    #[error("crypto")]
    Crypto(#[from] CryptoError),
    /// Transport failure during bootstrap/dial.
    #[error("transport")]
    Transport(#[from] TransportError),
    /// A witness join or consensus-vote message failed to verify or route.
    #[error("consensus handshake")]
    ConsensusHandshake,
}

/// The node orchestrator.
pub struct Node {
    config: NodeConfig,
    storage: Arc<Storage>,
    metrics: Arc<Metrics>,
    peer_manager: Mutex<PeerManager>,
    mempool: Mutex<Mempool>,
    consensus: Mutex<ConsensusDriver>,
    self_nonce: u64,
    my_info: PeerInfo,
}

impl Node {
    /// Construct a node. `self_nonce` should be a fresh CSPRNG value per
    /// process start, used to detect self-connections during handshake.
    ///
    /// Registers a `ConsensusDriver` lane for every concilium this node
    /// witnesses (`config.consensus.witnessed_conciliums`), seeded with the
    /// statically configured validator set; malformed hex entries are
    /// skipped with a warning rather than failing construction — a signed
    /// concilium registry (§15) is the normal way a production witness set
    /// is loaded, this path only covers the static-config fallback.
    pub fn new(config: NodeConfig, storage: Arc<Storage>, metrics: Arc<Metrics>, self_nonce: u64) -> Self {
        let my_info = PeerInfo {
            address: Vec::new(),
            port: 0,
            capabilities: std::collections::BTreeSet::new(),
        };

        let mut validators = std::collections::BTreeSet::new();
        for hex_key in &config.consensus.validators_hex {
            match hex::decode(hex_key) {
                Ok(bytes) => {
                    validators.insert(crate::core::types::ValidatorId(bytes));
                }
                Err(_) => warn!(key = %hex_key, "invalid validator hex in config, skipping"),
            }
        }
        let mut consensus = ConsensusDriver::new();
        for &id in &config.consensus.witnessed_conciliums {
            consensus.register_concilium(ConciliumId(id), validators.clone());
        }

        Self {
            config,
            storage,
            metrics,
            peer_manager: Mutex::new(PeerManager::new()),
            mempool: Mutex::new(Mempool::default()),
            consensus: Mutex::new(consensus),
            self_nonce,
            my_info,
        }
    }

    /// Resolve DNS seeds in parallel (partial results kept on timeout or
    /// per-seed failure), merge with configured static peers, insert every
    /// resolved address into the address book as a bare `NODE` descriptor,
    /// then return the best-peer set to dial: every `WITNESS`-advertising
    /// peer already in the book if any exist, else every `NODE` peer
    /// (spec §4.5 bootstrap steps 2–3).
    pub async fn bootstrap(&self) -> Vec<SocketAddr> {
        let mut out = Vec::new();

        let resolutions = self.config.p2p.dns_seeds.iter().map(|seed| {
            let seed = seed.clone();
            async move {
                match tokio::time::timeout(PEER_QUERY_TIMEOUT, transport::resolve_name(&seed)).await {
                    Ok(Ok(addrs)) => addrs,
                    Ok(Err(e)) => {
                        warn!(seed = %seed, error = %e, "dns seed resolution failed");
                        Vec::new()
                    }
                    Err(_) => {
                        warn!(seed = %seed, "dns seed resolution timed out");
                        Vec::new()
                    }
                }
            }
        });
        for addrs in futures::future::join_all(resolutions).await {
            out.extend(addrs);
        }

        for s in &self.config.p2p.static_peers {
            match s.parse::<SocketAddr>() {
                Ok(addr) => out.push(addr),
                Err(_) => warn!(peer = %s, "invalid static peer address, skipping"),
            }
        }

        {
            let mut mgr = self.peer_manager.lock().await;
            for addr in &out {
                let address = match transport::str_to_address(&addr.ip().to_string()) {
                    Ok(a) => a,
                    Err(_) => continue,
                };
                let mut capabilities = std::collections::BTreeSet::new();
                capabilities.insert(Capability { service: ServiceKind::Node, data: Vec::new() });
                mgr.merge_peer_info(PeerInfo { address, port: addr.port(), capabilities });
            }
        }

        self.best_peers().await
    }

    /// The book's current best-peer set: every `WITNESS` peer if any exist,
    /// else every `NODE` peer (spec §4.5 step 3).
    async fn best_peers(&self) -> Vec<SocketAddr> {
        let mgr = self.peer_manager.lock().await;
        let mut addrs = mgr.filter_peers(|p| p.peer_info.has_service(ServiceKind::Witness));
        if addrs.is_empty() {
            addrs = mgr.filter_peers(|p| p.peer_info.has_service(ServiceKind::Node));
        }
        addrs
            .iter()
            .filter_map(|a| mgr.get(a))
            .filter_map(|p| transport::address_to_socket(&p.peer_info.address, p.peer_info.port).ok())
            .collect()
    }

    /// Poll a peer's `loaded()` latch until it completes, the peer record
    /// disappears, or `PEER_QUERY_TIMEOUT` elapses (spec §4.3 `loaded()`,
    /// §4.5 bootstrap step 4: "dial … push MsgVersion … await loaded()").
    async fn await_loaded(&self, address: &[u8]) {
        let deadline = tokio::time::Instant::now() + PEER_QUERY_TIMEOUT;
        loop {
            {
                let mgr = self.peer_manager.lock().await;
                match mgr.get(address) {
                    Some(p) if p.loaded() => return,
                    None => return,
                    _ => {}
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Handle an inbound `Version`: self-connection ban, protocol-version
    /// gate, duplicate-version penalty, or admission to `VersionKnown`.
    pub fn handle_version(&self, peer: &mut Peer, payload: VersionPayload) -> Result<(), NodeError> {
        if payload.nonce == self.self_nonce {
            peer.ban();
            self.metrics.p2p_banned_total.inc();
            self.metrics.p2p_handshake_failures_total.inc();
            return Err(NodeError::SelfConnection);
        }
        if payload.protocol_version != PROTOCOL_VERSION as u32 {
            peer.disconnect();
            self.metrics.p2p_handshake_failures_total.inc();
            return Err(NodeError::IncompatibleProtocol);
        }
        if matches!(peer.state(), PeerState::VersionKnown | PeerState::FullyConnected) {
            peer.misbehave(1);
            self.metrics.p2p_misbehavior_points_total.inc();
            self.metrics.p2p_handshake_failures_total.inc();
            return Ok(());
        }
        peer.receive_version(payload.protocol_version, payload.node_info);
        Ok(())
    }

    /// Handle an inbound `VerAck`, promoting the peer and queuing a
    /// `GetAddr` follow-up.
    pub fn handle_verack(&self, peer: &mut Peer) -> Result<(), NodeError> {
        peer.receive_verack();
        if peer.is_fully_connected() {
            peer.push_message(Envelope::unsigned(Message::GetAddr))?;
        }
        Ok(())
    }

    /// Add a freshly accepted/dialed peer, resolving duplicate live
    /// connections per spec (`MsgReject{REJECT_DUPLICATE}`, close the new
    /// one, leave the original untouched).
    pub async fn admit_peer(&self, peer: Peer) -> Result<(), NodeError> {
        let mut mgr = self.peer_manager.lock().await;
        match mgr.add_peer(peer) {
            Ok(()) => {
                self.metrics.p2p_peers.set(mgr.live_count() as i64);
                Ok(())
            }
            Err(PeerManagerError::DuplicateConnection) => Err(NodeError::PeerManager(
                PeerManagerError::DuplicateConnection,
            )),
            Err(e) => Err(e.into()),
        }
    }

    /// Build the `MsgReject{REJECT_DUPLICATE}` sent to a rejected duplicate
    /// connection before it is closed.
    pub fn duplicate_reject() -> Envelope {
        Envelope::unsigned(Message::Reject(RejectPayload {
            code: RejectCode::Duplicate,
            reason: "Duplicate connection detected".to_string(),
        }))
    }

    /// Validate and admit a relayed transaction into the mempool, then
    /// inventory-relay it to every other fully-connected peer.
    ///
    /// Validates balance, fee, and nonce monotonicity against the account's
    /// on-disk state (the authoritative check set, not a partial subset).
    pub async fn relay_tx(&self, tx: Transaction, from_peer: &[u8]) -> Result<(), NodeError> {
        let sender = crypto::address_from_pubkey(&tx.public_key);
        let account = self.storage.get_account(&sender)?;

        if account.nonce.saturating_add(1) != tx.payload.nonce {
            return Err(NodeError::BadNonce);
        }

        let total_out: u64 = tx.payload.outs.iter().map(|o| o.amount).sum();
        let required = total_out.saturating_add(TX_FEE);
        if required > account.balance {
            return Err(NodeError::InsufficientFunds);
        }

        let mut mempool = self.mempool.lock().await;
        let accepted = mempool.accept(tx.clone(), sender);
        drop(mempool);
        accepted.map_err(|_| NodeError::BadNonce)?;

        self.metrics.transactions_total.inc();

        let mgr = self.peer_manager.lock().await;
        mgr.broadcast(&Envelope::unsigned(Message::Tx(tx)), Some(from_peer));
        Ok(())
    }

    /// Send `Addr` gossip in response to `GetAddr`, chunked at
    /// `ADDR_MAX_LENGTH`.
    pub async fn handle_get_addr(&self, peer_addr: &[u8]) -> Result<(), NodeError> {
        let mgr = self.peer_manager.lock().await;
        let peer = mgr.get(peer_addr).ok_or(NodeError::UnknownPeer)?;
        let known: Vec<PeerInfo> = mgr.snapshot();
        for chunk in PeerManager::chunk_addr(known) {
            peer.push_message(Envelope::unsigned(Message::Addr(chunk)))?;
        }
        Ok(())
    }

    /// Merge gossiped peer descriptors into the address book: each entry is
    /// admitted via `addPeer(peerInfo)` (capability-merge if known, fresh
    /// not-yet-dialed book entry otherwise), then the sending peer's initial
    /// load latch is marked complete (spec §4.5 `MsgAddr`).
    pub async fn handle_addr(&self, sender: &[u8], peers: Vec<PeerInfo>) {
        let mut mgr = self.peer_manager.lock().await;
        for info in peers {
            mgr.merge_peer_info(info);
        }
        if let Some(p) = mgr.get_mut(sender) {
            p.mark_loaded();
        }
    }

    /// Admit a witness self-registration into the `ConsensusDriver`. A bad
    /// join proof is a peer-attributable failure (`misbehave(1)`), not a
    /// local one — it is the peer's own claim that failed to verify.
    pub async fn handle_w_handshake(&self, peer: &mut Peer, join: JoinTransaction) -> Result<(), NodeError> {
        let mut driver = self.consensus.lock().await;
        match driver.on_join(join) {
            Ok(()) => Ok(()),
            Err(_) => {
                peer.misbehave(1);
                self.metrics.p2p_misbehavior_points_total.inc();
                Err(NodeError::ConsensusHandshake)
            }
        }
    }

    /// Route a `WBlockVote` (a BFT `Vote` or `Commit`) to its concilium's
    /// finalizer. A malformed or unrouteable message costs the sender a
    /// misbehavior point.
    pub async fn handle_w_block_vote(&self, peer: &mut Peer, msg: ConsensusMsg) -> Result<(), NodeError> {
        let mut driver = self.consensus.lock().await;
        match driver.on_msg(msg) {
            Ok(Some(_commit)) => {
                self.metrics.consensus_commits_total.inc();
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(_) => {
                peer.misbehave(1);
                self.metrics.p2p_misbehavior_points_total.inc();
                Err(NodeError::ConsensusHandshake)
            }
        }
    }

    /// Record advance notice of a peer's witness capability for a
    /// concilium (`WExpose`), ahead of a formal `WHandshake` join. Purely
    /// informational — capability merge only, no membership change.
    pub async fn handle_w_expose(&self, peer_addr: &[u8], expose: WExposePayload) {
        let mut mgr = self.peer_manager.lock().await;
        if let Some(p) = mgr.get_mut(peer_addr) {
            p.peer_info.capabilities.insert(Capability {
                service: ServiceKind::Witness,
                data: expose.witness.0,
            });
        }
    }

    /// Log the round-robin producer a peer announces for a concilium slot.
    /// Every member computes the same schedule locally (`core::consensus::hydro`);
    /// this is a liveness/diagnostic signal, not an input to the schedule.
    pub fn handle_w_next_round(&self, payload: &WNextRoundPayload) {
        debug!(
            concilium = payload.concilium_id.0,
            slot = payload.slot,
            "peer announced next-round producer"
        );
    }

    /// Persist a proposed block body by its header hash. Fork choice and
    /// reorg policy are external collaborators (spec Non-goals); the
    /// networking core's only responsibility is making the bytes available.
    pub async fn handle_w_block(&self, payload: WBlockPayload) -> Result<(), NodeError> {
        let hash = payload.block.header.hash().map_err(|_| NodeError::ConsensusHandshake)?;
        let encoded = encode_canonical(&payload.block).map_err(|_| NodeError::ConsensusHandshake)?;
        self.storage.put(Store::BlockState, hash.as_bytes(), &encoded)?;
        Ok(())
    }

    /// One watchdog tick: evict dead and recycle-eligible peers, send
    /// heartbeats to peers that have gone quiet, redial toward `MIN_PEERS`,
    /// sweep the mempool, and (every `PEERMANAGER_BACKUP_TIMEOUT`) persist
    /// the address book.
    pub async fn tick(&self, ticks_since_backup: &mut Duration) -> Result<(), NodeError> {
        {
            let mut mgr = self.peer_manager.lock().await;
            let recycle: Vec<Vec<u8>> = mgr.filter_peers(|p| p.is_dead() || p.should_recycle());
            for addr in recycle {
                if let Some(p) = mgr.get_mut(&addr) {
                    p.disconnect();
                }
            }
            let heartbeats: Vec<Vec<u8>> = mgr.filter_peers(|p| p.is_fully_connected() && p.heartbeat_due());
            for addr in heartbeats {
                if let Some(p) = mgr.get_mut(&addr) {
                    let _ = p.push_message(Envelope::unsigned(Message::Ping(
                        crate::core::types::PingPongPayload { nonce: self.self_nonce },
                    )));
                }
            }
            let candidates = mgr.reconnect_candidates();
            for addr in candidates.iter().take(MAX_PEERS.saturating_sub(mgr.live_count())) {
                self.metrics.p2p_reconnect_attempts_total.inc();
                if let Some(p) = mgr.get_mut(addr) {
                    let _ = p.connect();
                }
            }
            self.metrics.p2p_peers.set(mgr.live_count() as i64);
        }

        {
            let mut mempool = self.mempool.lock().await;
            mempool.evict_expired();
            self.metrics.mempool_size.set(mempool.len() as i64);
        }

        *ticks_since_backup += PEER_TICK_TIMEOUT;
        if *ticks_since_backup >= PEERMANAGER_BACKUP_TIMEOUT {
            *ticks_since_backup = Duration::ZERO;
            let mgr = self.peer_manager.lock().await;
            mgr.save_peer_book(&self.storage)?;
            info!("persisted peer address book");
        }

        Ok(())
    }

    /// Minimum peers the watchdog tries to keep connected.
    pub fn min_peers(&self) -> usize {
        self.config.p2p.min_peers
    }

    /// Record traffic against a peer's byte counters and touch its liveness
    /// clock (`PEER_MAX_BYTES_COUNT`/`PEER_DEAD_TIME` bookkeeping, spec §3).
    async fn record_bytes(&self, addr: &[u8], in_bytes: u64, out_bytes: u64) {
        {
            let mut mgr = self.peer_manager.lock().await;
            if let Some(p) = mgr.get_mut(addr) {
                p.record_bytes(in_bytes, out_bytes);
            }
        }
        if in_bytes > 0 {
            self.metrics.p2p_bytes_in_total.inc_by(in_bytes);
        }
        if out_bytes > 0 {
            self.metrics.p2p_bytes_out_total.inc_by(out_bytes);
        }
    }

    /// Dial `addr` and drive the resulting connection.
    /// Dial `addr`, hand the connection to a background task, then await
    /// the new peer's `loaded()` latch (bounded by `PEER_QUERY_TIMEOUT`)
    /// before returning — spec §4.5 bootstrap step 4.
    pub async fn dial(self: Arc<Self>, addr: SocketAddr) -> Result<(), NodeError> {
        let stream = transport::connect(addr).await?;
        let address = transport::str_to_address(&addr.ip().to_string())?;
        let conn_node = self.clone();
        tokio::spawn(async move {
            conn_node.run_connection(stream, false).await;
        });
        self.await_loaded(&address).await;
        Ok(())
    }

    /// Drive one peer connection end to end: register it, announce our
    /// `Version`, then dispatch inbound frames until the socket closes.
    ///
    /// Splits the socket into independent reader/writer halves so the
    /// writer task can drain `Peer::outbound` concurrently with the
    /// blocking read loop — neither half holds a back-pointer to `Node`.
    pub async fn run_connection(self: Arc<Self>, stream: TcpStream, inbound: bool) {
        let peer_addr = match stream.peer_addr() {
            Ok(a) => a,
            Err(_) => return,
        };
        let address = match transport::str_to_address(&peer_addr.ip().to_string()) {
            Ok(a) => a,
            Err(_) => return,
        };

        let (mut read_half, mut write_half) = stream.into_split();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Envelope>();

        let peer_info = PeerInfo {
            address: address.clone(),
            port: peer_addr.port(),
            capabilities: std::collections::BTreeSet::new(),
        };
        let peer = Peer::new(peer_info, address.clone(), inbound, tx);
        if self.admit_peer(peer).await.is_err() {
            // Duplicate live connection: send exactly one MsgReject on the
            // new socket, then close it, leaving the original untouched.
            if let Ok(bytes) = codec::encode(&Self::duplicate_reject()) {
                let _ = transport::write_frame(&mut write_half, MESSAGE_TYPE_TAG, &bytes).await;
            }
            return;
        }

        let writer_node = self.clone();
        let writer_addr = address.clone();
        let writer_task = tokio::spawn(async move {
            while let Some(env) = rx.recv().await {
                let bytes = match codec::encode(&env) {
                    Ok(b) => b,
                    Err(_) => continue,
                };
                if transport::write_frame(&mut write_half, MESSAGE_TYPE_TAG, &bytes)
                    .await
                    .is_err()
                {
                    break;
                }
                writer_node.record_bytes(&writer_addr, 0, bytes.len() as u64).await;
            }
        });

        let version = Envelope::unsigned(Message::Version(VersionPayload {
            protocol_version: PROTOCOL_VERSION as u32,
            node_info: self.my_info.clone(),
            best_height: 0,
            nonce: self.self_nonce,
        }));
        {
            let mgr = self.peer_manager.lock().await;
            if let Some(p) = mgr.get(&address) {
                let _ = p.push_message(version);
            }
        }

        loop {
            match transport::read_frame(&mut read_half).await {
                Ok((_, payload)) => {
                    self.record_bytes(&address, payload.len() as u64, 0).await;
                    match codec::decode(&payload) {
                        Ok(env) => self.dispatch(&address, env).await,
                        Err(_) => {
                            let mut mgr = self.peer_manager.lock().await;
                            if let Some(p) = mgr.get_mut(&address) {
                                p.misbehave(1);
                            }
                            self.metrics.p2p_misbehavior_points_total.inc();
                        }
                    }
                }
                Err(_) => break,
            }
        }

        {
            let mut mgr = self.peer_manager.lock().await;
            if let Some(p) = mgr.get_mut(&address) {
                p.disconnect();
            }
        }
        writer_task.abort();
    }

    /// Message kinds admitted from a peer that has not finished the
    /// version/verack handshake: `VERSION`/`VERACK` drive the handshake
    /// itself, and `REJECT` is explicitly allowed through (it still costs a
    /// misbehavior point, ambiguous between a race and malice). Every other
    /// kind is a handshake violation.
    fn allowed_before_handshake(message: &Message) -> bool {
        matches!(message, Message::Version(_) | Message::VerAck | Message::Reject(_))
    }

    async fn dispatch(&self, addr: &[u8], env: Envelope) {
        let fully_connected = {
            let mgr = self.peer_manager.lock().await;
            mgr.get(addr).map(|p| p.is_fully_connected()).unwrap_or(false)
        };

        if !fully_connected && !Self::allowed_before_handshake(&env.message) {
            let mut mgr = self.peer_manager.lock().await;
            if let Some(p) = mgr.get_mut(addr) {
                p.misbehave(1);
            }
            self.metrics.p2p_misbehavior_points_total.inc();
            return;
        }

        match env.message {
            Message::Version(payload) => {
                let mut mgr = self.peer_manager.lock().await;
                if let Some(p) = mgr.get_mut(addr) {
                    let _ = self.handle_version(p, payload);
                }
            }
            Message::VerAck => {
                let mut mgr = self.peer_manager.lock().await;
                if let Some(p) = mgr.get_mut(addr) {
                    let _ = self.handle_verack(p);
                }
            }
            Message::GetAddr => {
                let _ = self.handle_get_addr(addr).await;
            }
            Message::Addr(payload) => {
                self.handle_addr(addr, payload.peers).await;
            }
            Message::Tx(tx) => {
                let _ = self.relay_tx(tx, addr).await;
            }
            Message::Reject(payload) => {
                warn!(code = ?payload.code, reason = %payload.reason, "peer sent reject");
                let mut mgr = self.peer_manager.lock().await;
                if let Some(p) = mgr.get_mut(addr) {
                    p.misbehave(1);
                }
                self.metrics.p2p_misbehavior_points_total.inc();
            }
            Message::WHandshake(join) => {
                let mut mgr = self.peer_manager.lock().await;
                if let Some(p) = mgr.get_mut(addr) {
                    let _ = self.handle_w_handshake(p, join).await;
                }
            }
            Message::WBlockVote(msg) => {
                let mut mgr = self.peer_manager.lock().await;
                if let Some(p) = mgr.get_mut(addr) {
                    let _ = self.handle_w_block_vote(p, msg).await;
                }
            }
            Message::WExpose(payload) => {
                self.handle_w_expose(addr, payload).await;
            }
            Message::WNextRound(payload) => {
                self.handle_w_next_round(&payload);
            }
            Message::WBlock(payload) => {
                let _ = self.handle_w_block(payload).await;
            }
            Message::Ping(payload) => {
                let mgr = self.peer_manager.lock().await;
                if let Some(p) = mgr.get(addr) {
                    let _ = p.push_message(Envelope::unsigned(Message::Pong(payload)));
                }
            }
            // `Pong` needs no reply; receiving it already touched the
            // peer's liveness clock via `record_bytes` above. Chain sync
            // (`Block`/`Inv`/`GetData`/`GetBlocks`) is bundled with the
            // fork-choice/reorg policy the spec names out of scope.
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{ConsensusConfig, HttpConfig, NodeP2pConfig, NodeSettings};
    use crate::core::constants::MIN_PEERS;
    use crate::core::types::{Account, Address};
    use std::collections::BTreeSet;
    use tempfile::tempdir;
    use tokio::sync::mpsc;

    fn test_config(data_dir: &str) -> NodeConfig {
        NodeConfig {
            node: NodeSettings {
                name: "test".into(),
                data_dir: data_dir.into(),
            },
            http: HttpConfig {
                listen_addr: "127.0.0.1:0".into(),
            },
            p2p: NodeP2pConfig {
                listen_addr: "127.0.0.1:0".into(),
                static_peers: vec![],
                dns_seeds: vec![],
                max_peers: MAX_PEERS,
                min_peers: MIN_PEERS,
                capabilities: vec![],
                concilium_registry_path: None,
                concilium_registry_pubkey_hex: None,
                concilium_registry_min_version: 0,
                concilium_registry_max_age_ms: 0,
                concilium_registry_grace_ms: 0,
                concilium_registry_require_fresh: false,
            },
            consensus: ConsensusConfig {
                witnessed_conciliums: vec![],
                validators_hex: vec![],
            },
        }
    }

    fn test_node() -> (Node, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let storage = Arc::new(Storage::open(dir.path().to_str().unwrap()).unwrap());
        let metrics = Arc::new(Metrics::new().unwrap());
        (Node::new(test_config(dir.path().to_str().unwrap()), storage, metrics, 42), dir)
    }

    fn make_peer(addr: Vec<u8>) -> (Peer, mpsc::UnboundedReceiver<Envelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Peer::new(
                PeerInfo { address: addr.clone(), port: 8223, capabilities: BTreeSet::new() },
                addr,
                true,
                tx,
            ),
            rx,
        )
    }

    #[test]
    fn self_connection_is_banned() {
        let (node, _dir) = test_node();
        let (mut peer, _rx) = make_peer(vec![1]);
        let payload = VersionPayload {
            protocol_version: PROTOCOL_VERSION as u32,
            node_info: peer.peer_info.clone(),
            best_height: 0,
            nonce: 42,
        };
        let err = node.handle_version(&mut peer, payload).unwrap_err();
        assert!(matches!(err, NodeError::SelfConnection));
        assert!(peer.is_banned());
    }

    #[test]
    fn incompatible_protocol_disconnects_without_ban() {
        let (node, _dir) = test_node();
        let (mut peer, _rx) = make_peer(vec![1]);
        let payload = VersionPayload {
            protocol_version: 0xffff,
            node_info: peer.peer_info.clone(),
            best_height: 0,
            nonce: 7,
        };
        let err = node.handle_version(&mut peer, payload).unwrap_err();
        assert!(matches!(err, NodeError::IncompatibleProtocol));
        assert_eq!(peer.state(), PeerState::Disconnected);
        assert!(!peer.is_banned());
    }

    #[test]
    fn duplicate_version_is_a_misbehavior_point_not_a_disconnect() {
        let (node, _dir) = test_node();
        let (mut peer, _rx) = make_peer(vec![1]);
        let payload = VersionPayload {
            protocol_version: PROTOCOL_VERSION as u32,
            node_info: peer.peer_info.clone(),
            best_height: 0,
            nonce: 7,
        };
        node.handle_version(&mut peer, payload.clone()).unwrap();
        node.handle_version(&mut peer, payload).unwrap();
        assert_eq!(peer.misbehavior_score, 1);
    }

    #[test]
    fn normal_handshake_reaches_fully_connected_and_queues_get_addr() {
        let (node, _dir) = test_node();
        let (mut peer, mut rx) = make_peer(vec![1]);
        let payload = VersionPayload {
            protocol_version: PROTOCOL_VERSION as u32,
            node_info: peer.peer_info.clone(),
            best_height: 0,
            nonce: 99,
        };
        node.handle_version(&mut peer, payload).unwrap();
        node.handle_verack(&mut peer).unwrap();
        assert!(peer.is_fully_connected());
        assert!(matches!(rx.try_recv().unwrap().message, Message::GetAddr));
    }

    #[tokio::test]
    async fn admitting_duplicate_live_peer_is_rejected() {
        let (node, _dir) = test_node();
        let (p1, _rx1) = make_peer(vec![5]);
        let (p2, _rx2) = make_peer(vec![5]);
        node.admit_peer(p1).await.unwrap();
        let err = node.admit_peer(p2).await.unwrap_err();
        assert!(matches!(err, NodeError::PeerManager(PeerManagerError::DuplicateConnection)));
    }

    #[tokio::test]
    async fn relay_tx_rejects_unfunded_sender() {
        let (node, _dir) = test_node();
        let tx = Transaction {
            payload: crate::core::types::TransactionPayload {
                version: 1,
                concilium_id: crate::core::types::ConciliumId(0),
                ins: vec![],
                outs: vec![crate::core::types::TxOutput {
                    amount: 1_000,
                    receiver_addr: Address::from_bytes([2u8; 20]),
                    contract_code: None,
                    addr_change_receiver: None,
                }],
                nonce: 1,
            },
            claim_proofs: vec![],
            tx_signature: None,
            public_key: vec![9u8; 32],
        };
        let err = node.relay_tx(tx, &[1]).await.unwrap_err();
        assert!(matches!(err, NodeError::InsufficientFunds));
    }

    #[tokio::test]
    async fn relay_tx_succeeds_for_funded_sender_with_correct_nonce() {
        let (node, _dir) = test_node();
        let sender_pubkey = vec![9u8; 32];
        let sender_addr = crypto::address_from_pubkey(&sender_pubkey);
        node.storage
            .put_account(&sender_addr, &Account { balance: 10_000, nonce: 0 })
            .unwrap();

        let tx = Transaction {
            payload: crate::core::types::TransactionPayload {
                version: 1,
                concilium_id: crate::core::types::ConciliumId(0),
                ins: vec![],
                outs: vec![crate::core::types::TxOutput {
                    amount: 1_000,
                    receiver_addr: Address::from_bytes([2u8; 20]),
                    contract_code: None,
                    addr_change_receiver: None,
                }],
                nonce: 1,
            },
            claim_proofs: vec![],
            tx_signature: None,
            public_key: sender_pubkey,
        };
        node.relay_tx(tx, &[1]).await.unwrap();
        assert_eq!(node.metrics.transactions_total.get(), 1);
    }

    #[tokio::test]
    async fn bootstrap_tolerates_an_invalid_static_peer_entry() {
        let dir = tempdir().unwrap();
        let storage = Arc::new(Storage::open(dir.path().to_str().unwrap()).unwrap());
        let metrics = Arc::new(Metrics::new().unwrap());
        let mut cfg = test_config(dir.path().to_str().unwrap());
        cfg.p2p.static_peers = vec!["127.0.0.1:9000".into(), "not-an-address".into()];
        let node = Node::new(cfg, storage, metrics, 1);
        let addrs = node.bootstrap().await;
        assert_eq!(addrs, vec!["127.0.0.1:9000".parse::<SocketAddr>().unwrap()]);
    }

    #[tokio::test]
    async fn handle_addr_grows_the_book_from_an_unknown_address_and_marks_sender_loaded() {
        let (node, _dir) = test_node();
        let (sender, _rx) = make_peer(vec![1]);
        node.admit_peer(sender).await.unwrap();

        let gossiped = PeerInfo { address: vec![7, 7], port: 1, capabilities: BTreeSet::new() };
        node.handle_addr(&[1], vec![gossiped]).await;

        let mgr = node.peer_manager.lock().await;
        assert!(mgr.get(&[7, 7]).is_some());
        assert!(mgr.get(&[1]).unwrap().loaded());
    }

    #[tokio::test]
    async fn bootstrap_prefers_witness_peers_over_node_peers() {
        let (node, _dir) = test_node();
        {
            let mut mgr = node.peer_manager.lock().await;
            let mut node_caps = BTreeSet::new();
            node_caps.insert(crate::core::types::Capability {
                service: crate::core::types::ServiceKind::Node,
                data: vec![],
            });
            mgr.merge_peer_info(PeerInfo { address: vec![0, 0, 0, 1], port: 1, capabilities: node_caps });

            let mut witness_caps = BTreeSet::new();
            witness_caps.insert(crate::core::types::Capability {
                service: crate::core::types::ServiceKind::Witness,
                data: vec![9],
            });
            mgr.merge_peer_info(PeerInfo { address: vec![0, 0, 0, 2], port: 2, capabilities: witness_caps });
        }

        let chosen = node.best_peers().await;
        assert_eq!(chosen, vec!["0.0.0.2:2".parse::<SocketAddr>().unwrap()]);
    }

    #[tokio::test]
    async fn await_loaded_returns_immediately_once_the_latch_is_set() {
        let (node, _dir) = test_node();
        let (mut peer, _rx) = make_peer(vec![3]);
        peer.mark_loaded();
        node.admit_peer(peer).await.unwrap();

        let start = std::time::Instant::now();
        node.await_loaded(&[3]).await;
        assert!(start.elapsed() < PEER_QUERY_TIMEOUT);
    }

    #[tokio::test]
    async fn await_loaded_returns_immediately_for_an_unknown_address() {
        let (node, _dir) = test_node();
        let start = std::time::Instant::now();
        node.await_loaded(&[99]).await;
        assert!(start.elapsed() < std::time::Duration::from_millis(100));
    }

    #[tokio::test]
    async fn duplicate_connection_receives_exactly_one_reject_frame_before_closing() {
        let (node, _dir) = test_node();
        let node = Arc::new(node);

        let listener = transport::listen("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let local_addr = listener.local_addr().unwrap();

        let mut client = transport::connect(local_addr).await.unwrap();
        let (server, peer_addr) = listener.accept().await.unwrap();
        let address = transport::str_to_address(&peer_addr.ip().to_string()).unwrap();

        // Stand in for an already-live connection at this address.
        let (existing, _rx) = make_peer(address);
        node.admit_peer(existing).await.unwrap();

        node.clone().run_connection(server, true).await;

        let (_, payload) = transport::read_frame(&mut client).await.unwrap();
        let env = codec::decode(&payload).unwrap();
        assert!(matches!(env.message, Message::Reject(_)));
    }

    #[tokio::test]
    async fn message_before_handshake_is_a_misbehavior_and_is_dropped() {
        let (node, _dir) = test_node();
        let (peer, _rx) = make_peer(vec![1]);
        node.admit_peer(peer).await.unwrap();

        let tx = Transaction {
            payload: crate::core::types::TransactionPayload {
                version: 1,
                concilium_id: ConciliumId(0),
                ins: vec![],
                outs: vec![],
                nonce: 1,
            },
            claim_proofs: vec![],
            tx_signature: None,
            public_key: vec![9u8; 32],
        };
        node.dispatch(&[1], Envelope::unsigned(Message::Tx(tx))).await;

        let mgr = node.peer_manager.lock().await;
        assert_eq!(mgr.get(&[1]).unwrap().misbehavior_score, 1);
        assert_eq!(node.mempool.lock().await.len(), 0);
    }

    #[tokio::test]
    async fn reject_before_handshake_is_allowed_through_but_still_costs_a_point() {
        let (node, _dir) = test_node();
        let (peer, _rx) = make_peer(vec![1]);
        node.admit_peer(peer).await.unwrap();

        node.dispatch(
            &[1],
            Envelope::unsigned(Message::Reject(RejectPayload {
                code: RejectCode::Duplicate,
                reason: "dup".into(),
            })),
        )
        .await;

        let mgr = node.peer_manager.lock().await;
        assert_eq!(mgr.get(&[1]).unwrap().misbehavior_score, 1);
    }

    #[tokio::test]
    async fn w_handshake_admits_a_witness_with_a_valid_proof() {
        use crate::core::consensus::signing::join_signing_bytes;
        use crate::core::security::keystore::{FileEd25519Backend, SignerBackend};
        use crate::core::types::ValidatorId;

        let (node, _dir) = test_node();
        let key_dir = tempdir().unwrap();
        let mut key_path = key_dir.path().to_path_buf();
        key_path.push("validator.key");
        let backend = FileEd25519Backend::load_or_create(&key_path).unwrap();
        let witness = ValidatorId(backend.public_key().to_vec());

        let concilium_id = ConciliumId(3);
        node.consensus
            .lock()
            .await
            .register_concilium(concilium_id, BTreeSet::new());

        let msg = join_signing_bytes(concilium_id).unwrap();
        let proof = backend.sign(&msg).unwrap();
        let join = crate::core::types::JoinTransaction {
            concilium_id,
            witness: witness.clone(),
            proof,
        };

        let (mut peer, _rx) = make_peer(vec![2]);
        node.handle_w_handshake(&mut peer, join).await.unwrap();

        let driver = node.consensus.lock().await;
        assert!(driver.witnesses_of(concilium_id).unwrap().contains(&witness));
        assert_eq!(peer.misbehavior_score, 0);
    }

    #[tokio::test]
    async fn w_handshake_with_forged_proof_misbehaves_and_does_not_join() {
        use crate::core::types::{Signature, ValidatorId};

        let (node, _dir) = test_node();
        let concilium_id = ConciliumId(4);
        node.consensus
            .lock()
            .await
            .register_concilium(concilium_id, BTreeSet::new());

        let join = crate::core::types::JoinTransaction {
            concilium_id,
            witness: ValidatorId(vec![1u8; 32]),
            proof: Signature(vec![0u8; 64]),
        };

        let (mut peer, _rx) = make_peer(vec![2]);
        let err = node.handle_w_handshake(&mut peer, join).await.unwrap_err();
        assert!(matches!(err, NodeError::ConsensusHandshake));
        assert_eq!(peer.misbehavior_score, 1);
    }

    #[tokio::test]
    async fn w_block_vote_for_unknown_concilium_misbehaves() {
        use crate::core::types::{Commit, H256};

        let (node, _dir) = test_node();
        let (mut peer, _rx) = make_peer(vec![2]);
        let commit = ConsensusMsg::Commit(Commit {
            concilium_id: ConciliumId(99),
            height: 1,
            round: 0,
            epoch: 0,
            msg_counter: 0,
            sent_ts_ms: 0,
            ttl_ms: 0,
            block_hash: H256::from_bytes([1u8; 32]),
            signatures: Default::default(),
        });
        let err = node.handle_w_block_vote(&mut peer, commit).await.unwrap_err();
        assert!(matches!(err, NodeError::ConsensusHandshake));
        assert_eq!(peer.misbehavior_score, 1);
    }

    #[tokio::test]
    async fn w_block_persists_the_block_body_to_block_state() {
        let (node, _dir) = test_node();
        let block = crate::core::types::Block {
            header: crate::core::types::BlockHeader {
                parent_hashes: vec![],
                merkle_root: crate::core::types::H256::from_bytes([0u8; 32]),
                concilium_id: ConciliumId(0),
                timestamp: 0,
                version: 1,
                height: 1,
            },
            txns: vec![],
            signatures: vec![],
        };
        let hash = block.header.hash().unwrap();
        node.handle_w_block(WBlockPayload { block }).await.unwrap();

        let stored = node.storage.get(Store::BlockState, hash.as_bytes()).unwrap();
        assert!(stored.is_some());
    }
}
