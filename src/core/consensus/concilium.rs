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

//! A concilium: a named, independently-finalizing set of witnesses.

use crate::core::consensus::signing::{join_signing_bytes, SigningError};
use crate::core::crypto::{self, CryptoError};
use crate::core::types::{ConciliumId, JoinTransaction, ValidatorId};
use std::collections::BTreeSet;
use thiserror::Error;

/// Concilium membership errors.
#[derive(Debug, Error)]
pub enum ConciliumError {
    /// The join proof did not verify against the claimed witness key.
    #[error("bad join proof")]
    BadProof,
    /// The witness public key was malformed.
    #[error("bad witness key")]
    BadWitnessKey,
}

impl From<CryptoError> for ConciliumError {
    fn from(_: CryptoError) -> Self {
        ConciliumError::BadProof
    }
}
impl From<SigningError> for ConciliumError {
    fn from(_: SigningError) -> Self {
        ConciliumError::BadProof
    }
}

/// A concilium's current witness set.
#[derive(Clone, Debug, Default)]
pub struct Concilium {
    /// This concilium's id.
    pub id: ConciliumId,
    /// Current witness set, sorted.
    pub witnesses: BTreeSet<ValidatorId>,
}

impl Concilium {
    /// Start an empty concilium.
    pub fn new(id: ConciliumId) -> Self {
        Self {
            id,
            witnesses: BTreeSet::new(),
        }
    }

    /// Verify a join transaction and, if valid, add the witness to the set.
    ///
    /// `join.concilium_id` must match `self.id`; `join.proof` must be a
    /// signature by `join.witness` over the concilium-id join bytes.
    pub fn apply_join(&mut self, join: &JoinTransaction) -> Result<(), ConciliumError> {
        if join.concilium_id != self.id {
            return Err(ConciliumError::BadProof);
        }
        let pk = join
            .witness
            .as_public_key_bytes()
            .ok_or(ConciliumError::BadWitnessKey)?;
        let msg = join_signing_bytes(self.id)?;
        crypto::verify(&pk, &msg, &join.proof)?;
        self.witnesses.insert(join.witness.clone());
        Ok(())
    }

    /// BFT vote/commit threshold for the current witness set: `2n/3 + 1`.
    pub fn threshold(&self) -> usize {
        (2 * self.witnesses.len()) / 3 + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::security::keystore::{FileEd25519Backend, SignerBackend};
    use crate::core::types::Signature;
    use tempfile::tempdir;

    #[test]
    fn join_with_valid_proof_is_accepted() {
        let dir = tempdir().unwrap();
        let mut path = dir.path().to_path_buf();
        path.push("validator.key");
        let backend = FileEd25519Backend::load_or_create(&path).unwrap();
        let id = ConciliumId(7);
        let msg = join_signing_bytes(id).unwrap();
        let sig = backend.sign(&msg).unwrap();

        let join = JoinTransaction {
            concilium_id: id,
            witness: ValidatorId(backend.public_key().to_vec()),
            proof: sig,
        };

        let mut c = Concilium::new(id);
        c.apply_join(&join).unwrap();
        assert_eq!(c.witnesses.len(), 1);
    }

    #[test]
    fn join_with_wrong_concilium_is_rejected() {
        let dir = tempdir().unwrap();
        let mut path = dir.path().to_path_buf();
        path.push("validator.key");
        let backend = FileEd25519Backend::load_or_create(&path).unwrap();
        let msg = join_signing_bytes(ConciliumId(7)).unwrap();
        let sig = backend.sign(&msg).unwrap();

        let join = JoinTransaction {
            concilium_id: ConciliumId(7),
            witness: ValidatorId(backend.public_key().to_vec()),
            proof: sig,
        };

        let mut c = Concilium::new(ConciliumId(8));
        assert!(c.apply_join(&join).is_err());
    }

    #[test]
    fn join_with_forged_proof_is_rejected() {
        let id = ConciliumId(1);
        let join = JoinTransaction {
            concilium_id: id,
            witness: ValidatorId(vec![1u8; 32]),
            proof: Signature(vec![0u8; 64]),
        };
        let mut c = Concilium::new(id);
        assert!(c.apply_join(&join).is_err());
    }
}
