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

//! Address book and single-writer peer registry.
//!
//! `PeerManager` is the sole mutator of the address book (spec's
//! single-writer concurrency requirement): every add/remove/persist call
//! goes through `&mut self`, so there is no cross-task races to reason
//! about beyond the usual `&mut` borrow rules.

use crate::core::constants::{ADDR_MAX_LENGTH, MIN_PEERS};
use crate::core::storage::{Storage, StorageError};
use crate::core::storage::Store;
use crate::core::types::{decode_canonical_limited, encode_canonical, AddrPayload, Envelope, PeerInfo};
use crate::networking::peer::{Peer, PeerState};
use thiserror::Error;

/// Peer manager errors.
#[derive(Debug, Error)]
pub enum PeerManagerError {
    /// A live connection to this address already exists.
    #[error("duplicate connection")]
    DuplicateConnection,
    /// Underlying storage failure while persisting/loading the address book.
    #[error("storage")]
    Storage(#[from] StorageError),
}

const PEER_BOOK_KEY: &[u8] = b"book";

/// Owns every known `Peer` keyed by its canonical address.
#[derive(Default)]
pub struct PeerManager {
    peers: std::collections::BTreeMap<Vec<u8>, Peer>,
}

impl PeerManager {
    /// Construct an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a newly accepted/dialed peer.
    ///
    /// If a live (non-disconnected, non-banned) connection to this address
    /// already exists, returns `DuplicateConnection` and leaves the
    /// original peer untouched — the caller sends
    /// `MsgReject{REJECT_DUPLICATE}` to the new connection and closes it.
    pub fn add_peer(&mut self, peer: Peer) -> Result<(), PeerManagerError> {
        if let Some(existing) = self.peers.get(&peer.address) {
            if !matches!(existing.state(), PeerState::Disconnected | PeerState::Banned) {
                return Err(PeerManagerError::DuplicateConnection);
            }
        }
        self.peers.insert(peer.address.clone(), peer);
        Ok(())
    }

    /// Merge a bare `PeerInfo` learned via gossip into the book: capability-merge
    /// onto an existing entry (live or not — never disturbs a live connection),
    /// or insert a fresh not-yet-dialed entry keyed by address if this is the
    /// first time we've heard of it. Calling this twice with the same address
    /// yields the same book size (spec's idempotent address merge).
    pub fn merge_peer_info(&mut self, info: PeerInfo) {
        if let Some(existing) = self.peers.get_mut(&info.address) {
            existing.peer_info.merge_capabilities(&info);
        } else {
            self.peers.insert(info.address.clone(), Peer::from_gossip(info));
        }
    }

    /// Remove a peer entirely (e.g. after a permanent ban expiry cleanup).
    pub fn remove_peer(&mut self, address: &[u8]) -> Option<Peer> {
        self.peers.remove(address)
    }

    /// Borrow a peer by address.
    pub fn get(&self, address: &[u8]) -> Option<&Peer> {
        self.peers.get(address)
    }

    /// Mutably borrow a peer by address.
    pub fn get_mut(&mut self, address: &[u8]) -> Option<&mut Peer> {
        self.peers.get_mut(address)
    }

    /// Addresses of every peer satisfying `predicate`.
    pub fn filter_peers(&self, predicate: impl Fn(&Peer) -> bool) -> Vec<Vec<u8>> {
        self.peers
            .iter()
            .filter(|(_, p)| predicate(p))
            .map(|(addr, _)| addr.clone())
            .collect()
    }

    /// Number of peers not yet disconnected or banned.
    pub fn live_count(&self) -> usize {
        self.filter_peers(|p| !matches!(p.state(), PeerState::Disconnected | PeerState::Banned))
            .len()
    }

    /// Addresses eligible for a reconnection attempt: disconnected, not
    /// banned, past their restriction window — only while live count is
    /// under `MIN_PEERS`.
    pub fn reconnect_candidates(&self) -> Vec<Vec<u8>> {
        if self.live_count() >= MIN_PEERS {
            return Vec::new();
        }
        self.filter_peers(|p| {
            p.state() == PeerState::Disconnected && p.restriction_remaining().is_none()
        })
    }

    /// Fan a message out to every fully-connected peer except `exclude`.
    pub fn broadcast(&self, env: &Envelope, exclude: Option<&[u8]>) {
        for (addr, peer) in self.peers.iter() {
            if Some(addr.as_slice()) == exclude {
                continue;
            }
            if peer.is_fully_connected() {
                let _ = peer.push_message(env.clone());
            }
        }
    }

    /// Split a peer-info list into `Addr` payloads no larger than
    /// `ADDR_MAX_LENGTH` entries each.
    pub fn chunk_addr(peers: Vec<PeerInfo>) -> Vec<AddrPayload> {
        peers
            .chunks(ADDR_MAX_LENGTH)
            .map(|chunk| AddrPayload {
                peers: chunk.to_vec(),
            })
            .collect()
    }

    /// Current descriptors for every known peer, for persistence or gossip.
    pub fn snapshot(&self) -> Vec<PeerInfo> {
        self.peers.values().map(|p| p.peer_info.clone()).collect()
    }

    /// Persist the address book to the `PeerState` store.
    pub fn save_peer_book(&self, storage: &Storage) -> Result<(), PeerManagerError> {
        let book = self.snapshot();
        let bytes = encode_canonical(&book).map_err(|_| {
            PeerManagerError::Storage(StorageError::State(
                crate::core::state::persistent_state::StateError::DbIo,
            ))
        })?;
        storage.put(Store::PeerState, PEER_BOOK_KEY, &bytes)?;
        Ok(())
    }

    /// Load a previously persisted address book (descriptors only; callers
    /// reconstitute live `Peer`s around them as connections are made).
    pub fn load_peer_book(storage: &Storage) -> Result<Vec<PeerInfo>, PeerManagerError> {
        match storage.get(Store::PeerState, PEER_BOOK_KEY)? {
            None => Ok(Vec::new()),
            Some(bytes) => {
                let book: Vec<PeerInfo> = decode_canonical_limited(&bytes, 16 * 1024 * 1024)
                    .map_err(|_| {
                        PeerManagerError::Storage(StorageError::State(
                            crate::core::state::persistent_state::StateError::DbIo,
                        ))
                    })?;
                Ok(book)
            }
        }
    }
}
