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

//! The `Crypto` external-interface capability: pure signature verification and
//! address derivation, independent of any particular keystore backend.

use crate::core::security::keystore::{verify_pubkey_bytes, KeystoreError};
use crate::core::types::{Address, Signature};
use thiserror::Error;

/// Crypto capability errors.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Public key was not 32 bytes.
    #[error("bad public key")]
    BadPublicKey,
    /// Signature verification failed.
    #[error("bad signature")]
    BadSignature,
}

impl From<KeystoreError> for CryptoError {
    fn from(_: KeystoreError) -> Self {
        CryptoError::BadSignature
    }
}

/// Verify `sig` is a valid Ed25519 signature by `pubkey` over `msg`.
pub fn verify(pubkey: &[u8], msg: &[u8], sig: &Signature) -> Result<(), CryptoError> {
    if pubkey.len() != 32 {
        return Err(CryptoError::BadPublicKey);
    }
    let mut pk = [0u8; 32];
    pk.copy_from_slice(pubkey);
    verify_pubkey_bytes(&pk, msg, sig).map_err(CryptoError::from)
}

/// Derive the 20-byte chain address for a public key: the low 20 bytes of
/// `SHA-256(pubkey)`.
pub fn address_from_pubkey(pubkey: &[u8]) -> Address {
    let digest = ring::digest::digest(&ring::digest::SHA256, pubkey);
    let full = digest.as_ref();
    let mut out = [0u8; 20];
    out.copy_from_slice(&full[12..32]);
    Address::from_bytes(out)
}
