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

//! Pending-transaction pool: bounded, deduplicated, nonce-checked staging
//! area between gossip ingress and block assembly.

use crate::core::constants::{MEMPOOL_TX_LIFETIME, MEMPOOL_TX_QTY};
use crate::core::types::{Address, CanonicalMap, H256, Transaction};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Mempool admission errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MempoolError {
    /// The pool is at `MEMPOOL_TX_QTY` capacity.
    #[error("mempool full")]
    Full,
    /// A transaction with this hash is already pending.
    #[error("duplicate transaction")]
    Duplicate,
    /// The transaction's nonce is not strictly greater than the sender's last accepted nonce.
    #[error("stale or replayed nonce")]
    StaleNonce,
    /// The transaction could not be hashed (codec failure).
    #[error("codec")]
    Codec,
}

struct Entry {
    tx: Transaction,
    sender: Address,
    nonce: u64,
    inserted_at: Instant,
}

/// In-memory pending-transaction pool.
///
/// Single-writer discipline: callers are expected to serialize access to one
/// `Mempool` per node (see `networking::node`), so no internal locking is used.
pub struct Mempool {
    by_hash: CanonicalMap<H256, Entry>,
    last_nonce: BTreeMap<Address, u64>,
    capacity: usize,
    lifetime: Duration,
}

impl Default for Mempool {
    fn default() -> Self {
        Self::new(MEMPOOL_TX_QTY, MEMPOOL_TX_LIFETIME)
    }
}

impl Mempool {
    /// Construct a pool with an explicit capacity and eviction lifetime.
    pub fn new(capacity: usize, lifetime: Duration) -> Self {
        Self {
            by_hash: CanonicalMap::new(),
            last_nonce: BTreeMap::new(),
            capacity,
            lifetime,
        }
    }

    /// Number of pending transactions.
    pub fn len(&self) -> usize {
        self.by_hash.len()
    }

    /// True if no transactions are pending.
    pub fn is_empty(&self) -> bool {
        self.by_hash.is_empty()
    }

    /// Evict entries past `lifetime`. Callers should invoke this on a timer.
    pub fn evict_expired(&mut self) {
        let now = Instant::now();
        let lifetime = self.lifetime;
        self.by_hash
            .retain(|_, e| now.saturating_duration_since(e.inserted_at) < lifetime);
    }

    /// Atomically validate and admit a transaction.
    ///
    /// Rejects: pool at capacity, an identical pending hash, or a nonce that
    /// does not strictly exceed the sender's last accepted nonce.
    pub fn accept(&mut self, tx: Transaction, sender: Address) -> Result<H256, MempoolError> {
        let hash = tx.hash().map_err(|_| MempoolError::Codec)?;

        if self.by_hash.contains_key(&hash) {
            return Err(MempoolError::Duplicate);
        }
        if self.by_hash.len() >= self.capacity {
            return Err(MempoolError::Full);
        }
        let nonce = tx.payload.nonce;
        if let Some(&last) = self.last_nonce.get(&sender) {
            if nonce <= last {
                return Err(MempoolError::StaleNonce);
            }
        }

        self.last_nonce.insert(sender, nonce);
        self.by_hash.insert(
            hash,
            Entry {
                tx,
                sender,
                nonce,
                inserted_at: Instant::now(),
            },
        );
        Ok(hash)
    }

    /// Alias for `accept` matching the external capability surface (`addTx`).
    pub fn add_tx(&mut self, tx: Transaction, sender: Address) -> Result<H256, MempoolError> {
        self.accept(tx, sender)
    }

    /// True if a transaction with this hash is currently pending.
    pub fn contains(&self, hash: &H256) -> bool {
        self.by_hash.contains_key(hash)
    }

    /// Fetch a pending transaction by hash.
    pub fn get(&self, hash: &H256) -> Option<&Transaction> {
        self.by_hash.get(hash).map(|e| &e.tx)
    }

    /// Remove a transaction (e.g. once included in a finalized block).
    pub fn remove(&mut self, hash: &H256) -> Option<Transaction> {
        self.by_hash.remove(hash).map(|e| e.tx)
    }

    /// Final candidate set for block assembly: all currently pending
    /// transactions, oldest first, up to `limit`.
    pub fn get_final_txns(&self, limit: usize) -> Vec<Transaction> {
        let mut entries: Vec<&Entry> = self.by_hash.values().collect();
        entries.sort_by_key(|e| e.inserted_at);
        entries
            .into_iter()
            .take(limit)
            .map(|e| e.tx.clone())
            .collect()
    }

    /// Drop sender/nonce bookkeeping for transactions no longer pending.
    /// Call after `remove` when the sender has no other pending transactions.
    pub fn forget_sender(&mut self, sender: &Address) {
        let still_pending = self.by_hash.values().any(|e| &e.sender == sender);
        if !still_pending {
            self.last_nonce.remove(sender);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{ConciliumId, TransactionPayload, TxInput, TxOutput};

    fn tx(nonce: u64, amount: u64) -> Transaction {
        Transaction {
            payload: TransactionPayload {
                version: 1,
                concilium_id: ConciliumId(0),
                ins: vec![TxInput {
                    tx_hash: H256::from_bytes([1u8; 32]),
                    n_tx_output: 0,
                }],
                outs: vec![TxOutput {
                    amount,
                    receiver_addr: Address::from_bytes([2u8; 20]),
                    contract_code: None,
                    addr_change_receiver: None,
                }],
                nonce,
            },
            claim_proofs: vec![],
            tx_signature: None,
            public_key: vec![3u8; 32],
        }
    }

    #[test]
    fn accepts_increasing_nonces_and_rejects_replay() {
        let mut mp = Mempool::default();
        let sender = Address::from_bytes([9u8; 20]);
        mp.accept(tx(1, 10), sender).unwrap();
        mp.accept(tx(2, 11), sender).unwrap();
        assert_eq!(mp.accept(tx(2, 12), sender), Err(MempoolError::StaleNonce));
        assert_eq!(mp.len(), 2);
    }

    #[test]
    fn rejects_duplicate_hash() {
        let mut mp = Mempool::default();
        let sender = Address::from_bytes([9u8; 20]);
        let t = tx(1, 10);
        mp.accept(t.clone(), sender).unwrap();
        assert_eq!(mp.accept(t, sender), Err(MempoolError::Duplicate));
    }

    #[test]
    fn rejects_when_full() {
        let mut mp = Mempool::new(1, MEMPOOL_TX_LIFETIME);
        let a = Address::from_bytes([1u8; 20]);
        let b = Address::from_bytes([2u8; 20]);
        mp.accept(tx(1, 10), a).unwrap();
        assert_eq!(mp.accept(tx(1, 10), b), Err(MempoolError::Full));
    }

    #[test]
    fn get_final_txns_respects_limit_and_order() {
        let mut mp = Mempool::default();
        let sender = Address::from_bytes([9u8; 20]);
        mp.accept(tx(1, 1), sender).unwrap();
        mp.accept(tx(2, 2), sender).unwrap();
        mp.accept(tx(3, 3), sender).unwrap();
        let final_txns = mp.get_final_txns(2);
        assert_eq!(final_txns.len(), 2);
        assert_eq!(final_txns[0].payload.nonce, 1);
        assert_eq!(final_txns[1].payload.nonce, 2);
    }
}
