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

//! The `Storage` external-interface collaborator: opaque get/put/iterate-by-prefix
//! over four logical stores, backed by `core::state::persistent_state`.

use crate::core::state::merkle::{Hash32, MerkleProof};
use crate::core::state::persistent_state::{KvOp, PersistentState, StateError};
use crate::core::types::{decode_canonical_limited, encode_canonical, Account, Address};
use thiserror::Error;

/// The four logical stores a node keeps, each a separate sled tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Store {
    /// Account balances, contract storage, nonces.
    ChainState,
    /// Finalized block headers and bodies, by hash.
    BlockState,
    /// The persisted peer address book.
    PeerState,
    /// Transaction-hash to containing-block-hash index.
    TxIndex,
}

impl Store {
    fn tree_name(self) -> &'static str {
        match self {
            Store::ChainState => "chainstate",
            Store::BlockState => "blockstate",
            Store::PeerState => "peerstate",
            Store::TxIndex => "txindex",
        }
    }
}

/// Storage errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Underlying sled/state error.
    #[error("state")]
    State(#[from] StateError),
}

/// Sled-backed storage collaborator over the four logical stores.
///
/// Each `Store` is a physically separate sled tree; a single
/// `sled::Db::open` at `data_dir/db` owns all of them.
pub struct Storage {
    db: sled::Db,
    chainstate: PersistentState,
}

impl Storage {
    /// Open (or create) the on-disk database under `data_dir/db`.
    ///
    /// `ChainState` lives in its own sled instance (`data_dir/db/chainstate`)
    /// so its Merkle root covers exactly the committed account/contract
    /// state, not the other three logical stores.
    pub fn open(data_dir: &str) -> Result<Self, StorageError> {
        let mut path = std::path::PathBuf::from(data_dir);
        path.push("db");
        let db = sled::open(&path).map_err(|_| StateError::DbOpen)?;

        let mut chainstate_path = path.clone();
        chainstate_path.push("chainstate");
        let chainstate = PersistentState::open(chainstate_path.to_str().unwrap_or("./db/chainstate"))?;

        Ok(Self { db, chainstate })
    }

    fn tree(&self, store: Store) -> Result<sled::Tree, StorageError> {
        self.db
            .open_tree(store.tree_name())
            .map_err(|_| StorageError::State(StateError::DbIo))
    }

    /// Fetch a value by key from the given logical store.
    ///
    /// `ChainState` reads go through the Merkle-committed instance; the
    /// other three stores are plain sled trees.
    pub fn get(&self, store: Store, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        if matches!(store, Store::ChainState) {
            return self.chainstate.get(key).map_err(StorageError::from);
        }
        let t = self.tree(store)?;
        Ok(t.get(key)
            .map_err(|_| StorageError::State(StateError::DbIo))?
            .map(|v| v.to_vec()))
    }

    /// Write a value to the given logical store.
    ///
    /// `ChainState` writes must go through [`Storage::commit_chainstate`] to
    /// keep the Merkle root consistent; this rejects direct puts to it.
    pub fn put(&self, store: Store, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        if matches!(store, Store::ChainState) {
            return self.commit_chainstate(vec![KvOp::Put {
                key: key.to_vec(),
                value: value.to_vec(),
            }]);
        }
        let t = self.tree(store)?;
        t.insert(key, value)
            .map_err(|_| StorageError::State(StateError::DbIo))?;
        Ok(())
    }

    /// Delete a key from the given logical store.
    pub fn delete(&self, store: Store, key: &[u8]) -> Result<(), StorageError> {
        if matches!(store, Store::ChainState) {
            return self.commit_chainstate(vec![KvOp::Del { key: key.to_vec() }]);
        }
        let t = self.tree(store)?;
        t.remove(key)
            .map_err(|_| StorageError::State(StateError::DbIo))?;
        Ok(())
    }

    /// Iterate all key/value pairs whose key starts with `prefix`.
    ///
    /// Not supported for `Store::ChainState`; use [`Storage::state_root`] and
    /// [`Storage::prove_chainstate_key`] instead.
    pub fn iterate_prefix(
        &self,
        store: Store,
        prefix: &[u8],
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        let t = self.tree(store)?;
        let mut out = Vec::new();
        for item in t.scan_prefix(prefix) {
            let (k, v) = item.map_err(|_| StorageError::State(StateError::DbIo))?;
            out.push((k.to_vec(), v.to_vec()));
        }
        Ok(out)
    }

    /// Atomically apply a batch of puts/deletes to `ChainState` (the Merkle-committed store).
    pub fn commit_chainstate(&self, ops: Vec<KvOp>) -> Result<(), StorageError> {
        self.chainstate.commit_atomic(ops).map_err(StorageError::from)
    }

    /// Current `ChainState` Merkle root.
    pub fn state_root(&self) -> Result<Hash32, StorageError> {
        self.chainstate.state_root().map_err(StorageError::from)
    }

    /// Inclusion proof for a `ChainState` key, if present.
    pub fn prove_chainstate_key(
        &self,
        key: &[u8],
    ) -> Result<Option<(Vec<u8>, Vec<u8>, Hash32, MerkleProof)>, StorageError> {
        self.chainstate.prove_key(key).map_err(StorageError::from)
    }

    /// Fetch an account record, defaulting to zero balance/nonce if unseen.
    pub fn get_account(&self, address: &Address) -> Result<Account, StorageError> {
        match self.get(Store::ChainState, address.as_bytes())? {
            None => Ok(Account::default()),
            Some(bytes) => decode_canonical_limited(&bytes, 1024).map_err(|_| {
                StorageError::State(StateError::DbIo)
            }),
        }
    }

    /// Persist an account record.
    pub fn put_account(&self, address: &Address, account: &Account) -> Result<(), StorageError> {
        let bytes = encode_canonical(account).map_err(|_| StorageError::State(StateError::DbIo))?;
        self.put(Store::ChainState, address.as_bytes(), &bytes)
    }
}
