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
#![deny(missing_docs)]

//! Signed concilium registry: a node's pinned allowlist of which witness
//! identities are trusted for a concilium.
//!
//! ## Format (TOML)
//! Out-of-band artifact (object storage, config management, etc.),
//! verified locally before use.
//!
//! ```text
//! version = 1
//! network = "concilium/consensus/v1"
//! issued_at_ms = 1730000000000
//! expires_at_ms = 1730003600000
//! witnesses = ["<hex ed25519 pubkey>", "..."]
//! signature_hex = "..."   # Ed25519 signature over canonical bytes (see below)
//! ```
//!
//! ## Canonical bytes
//! ```text
//! v1
//! network=<network>
//! issued_at_ms=<u64>
//! expires_at_ms=<u64>
//! witnesses
//! <witness1>
//! <witness2>
//! ...
//! ```
//!
//! A pinned Ed25519 public key verifies `signature_hex`.
//!
//! ## Security properties
//! - **Integrity/authenticity:** verified signature with pinned public key.
//! - **Freshness:** enforced with `issued_at_ms`, `expires_at_ms`, and node policy.
//! - **Rollback safety:** optional minimum version policy (and operationally,
//!   monotonically increasing `issued_at_ms` via config management).

use crate::core::security::keystore::verify_pubkey_bytes;
use crate::core::types::{Signature, ValidatorId};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fs;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Concilium registry verification errors.
#[derive(Debug, Error)]
pub enum ConciliumRegistryError {
    /// Cannot read registry file.
    #[error("read registry")]
    Read,
    /// Cannot parse TOML.
    #[error("parse registry")]
    Parse,
    /// Registry public key is invalid.
    #[error("bad registry public key")]
    BadPubkey,
    /// Registry signature is invalid.
    #[error("bad registry signature")]
    BadSignature,
    /// Registry contains an invalid witness identity.
    #[error("invalid witness id")]
    InvalidWitness,
    /// Registry version is unsupported.
    #[error("unsupported registry version")]
    UnsupportedVersion,
    /// Registry not valid yet.
    #[error("registry not valid yet")]
    NotYetValid,
    /// Registry is expired.
    #[error("registry expired")]
    Expired,
    /// Registry issued time is too old per policy.
    #[error("registry too old per policy")]
    TooOld,
    /// Registry network does not match node topic.
    #[error("registry network mismatch")]
    NetworkMismatch,
    /// Missing required field.
    #[error("missing required field")]
    MissingField,
}

/// Registry verification policy (node-side).
#[derive(Clone, Debug)]
pub struct ConciliumRegistryPolicy<'a> {
    /// Current time in ms since UNIX epoch.
    pub now_ms: u64,
    /// Max accepted age for a registry (now - issued_at_ms) in ms. If 0, no age limit.
    pub max_age_ms: u64,
    /// Acceptable grace window in ms after `expires_at_ms`. If 0, no grace.
    pub grace_ms: u64,
    /// Minimum required registry format version. If 0, accept any supported.
    pub min_version: u32,
    /// If set, require `network` to match this value.
    pub expected_network: Option<&'a str>,
    /// If true, require freshness fields (issued/expires) to be present and non-zero.
    pub require_freshness_fields: bool,
}

impl<'a> ConciliumRegistryPolicy<'a> {
    /// Create a policy with sane defaults.
    pub fn default_with_now(now_ms: u64) -> Self {
        Self {
            now_ms,
            max_age_ms: 0,
            grace_ms: 0,
            min_version: 0,
            expected_network: None,
            require_freshness_fields: true,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ConciliumRegistryFile {
    version: u32,
    #[serde(default)]
    network: Option<String>,
    #[serde(default)]
    issued_at_ms: Option<u64>,
    #[serde(default)]
    expires_at_ms: Option<u64>,
    #[serde(default)]
    witnesses: Vec<String>,
    signature_hex: String,
}

fn parse_hex_32(s: &str) -> Result<[u8; 32], ConciliumRegistryError> {
    let bytes = hex::decode(s.trim()).map_err(|_| ConciliumRegistryError::BadPubkey)?;
    if bytes.len() != 32 {
        return Err(ConciliumRegistryError::BadPubkey);
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(out)
}

fn parse_witness_hex(s: &str) -> Result<ValidatorId, ConciliumRegistryError> {
    let bytes = hex::decode(s.trim()).map_err(|_| ConciliumRegistryError::InvalidWitness)?;
    if bytes.len() != 32 {
        return Err(ConciliumRegistryError::InvalidWitness);
    }
    Ok(ValidatorId(bytes))
}

fn canonical_bytes(
    reg: &ConciliumRegistryFile,
    witnesses: &BTreeSet<ValidatorId>,
) -> Result<Vec<u8>, ConciliumRegistryError> {
    if reg.version != 1 {
        return Err(ConciliumRegistryError::UnsupportedVersion);
    }
    let net = reg.network.as_deref().ok_or(ConciliumRegistryError::MissingField)?;
    let issued = reg.issued_at_ms.ok_or(ConciliumRegistryError::MissingField)?;
    let expires = reg.expires_at_ms.ok_or(ConciliumRegistryError::MissingField)?;

    let mut out = Vec::new();
    out.extend_from_slice(b"v1\n");
    out.extend_from_slice(format!("network={}\n", net).as_bytes());
    out.extend_from_slice(format!("issued_at_ms={}\n", issued).as_bytes());
    out.extend_from_slice(format!("expires_at_ms={}\n", expires).as_bytes());
    out.extend_from_slice(b"witnesses\n");
    for w in witnesses.iter() {
        out.extend_from_slice(hex::encode(&w.0).as_bytes());
        out.push(b'\n');
    }
    Ok(out)
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Parse a concilium registry TOML document (syntax + schema only).
///
/// This does **not** verify signatures. Intended for tooling and fuzzing.
pub fn parse_concilium_registry_toml(raw: &str) -> Result<(), ConciliumRegistryError> {
    let _reg: ConciliumRegistryFile =
        toml::from_str(raw).map_err(|_| ConciliumRegistryError::Parse)?;
    Ok(())
}

/// Load and verify a signed concilium registry, returning a deduplicated
/// witness allowlist.
///
/// Node policy can enforce freshness (issued_at / expires_at), age limits,
/// grace windows, and topic binding.
pub fn load_and_verify_concilium_registry(
    path: &str,
    pubkey_hex: &str,
    policy: &ConciliumRegistryPolicy<'_>,
) -> Result<Vec<ValidatorId>, ConciliumRegistryError> {
    let pk = parse_hex_32(pubkey_hex)?;

    let raw = fs::read_to_string(path).map_err(|_| ConciliumRegistryError::Read)?;
    let reg: ConciliumRegistryFile =
        toml::from_str(&raw).map_err(|_| ConciliumRegistryError::Parse)?;

    if reg.version != 1 {
        return Err(ConciliumRegistryError::UnsupportedVersion);
    }
    if policy.min_version != 0 && reg.version < policy.min_version {
        return Err(ConciliumRegistryError::UnsupportedVersion);
    }

    let issued = reg.issued_at_ms.unwrap_or(0);
    let expires = reg.expires_at_ms.unwrap_or(0);
    if policy.require_freshness_fields && (issued == 0 || expires == 0) {
        return Err(ConciliumRegistryError::MissingField);
    }
    if issued != 0 && policy.now_ms < issued {
        return Err(ConciliumRegistryError::NotYetValid);
    }
    if expires != 0 {
        let deadline = expires.saturating_add(policy.grace_ms);
        if policy.now_ms > deadline {
            return Err(ConciliumRegistryError::Expired);
        }
    }
    if policy.max_age_ms != 0 && issued != 0 {
        let age = policy.now_ms.saturating_sub(issued);
        if age > policy.max_age_ms {
            return Err(ConciliumRegistryError::TooOld);
        }
    }

    if let Some(expected) = policy.expected_network {
        match reg.network.as_deref() {
            Some(n) if n == expected => {}
            _ => return Err(ConciliumRegistryError::NetworkMismatch),
        }
    }

    let mut witnesses = BTreeSet::new();
    for s in reg.witnesses.iter() {
        witnesses.insert(parse_witness_hex(s)?);
    }

    let sig = hex::decode(reg.signature_hex.trim()).map_err(|_| ConciliumRegistryError::BadSignature)?;
    let msg = canonical_bytes(&reg, &witnesses)?;
    verify_pubkey_bytes(&pk, &msg, &Signature(sig)).map_err(|_| ConciliumRegistryError::BadSignature)?;

    Ok(witnesses.into_iter().collect())
}

/// Convenience helper using system time for `now_ms`.
pub fn load_and_verify_concilium_registry_now(
    path: &str,
    pubkey_hex: &str,
    policy: &ConciliumRegistryPolicy<'_>,
) -> Result<Vec<ValidatorId>, ConciliumRegistryError> {
    let mut p = policy.clone();
    if p.now_ms == 0 {
        p.now_ms = now_ms();
    }
    load_and_verify_concilium_registry(path, pubkey_hex, &p)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::security::keystore::{FileEd25519Backend, SignerBackend};
    use tempfile::tempdir;

    fn write_registry(
        dir: &std::path::Path,
        network: &str,
        issued_at_ms: u64,
        expires_at_ms: u64,
        witnesses: &[ValidatorId],
        signer: &FileEd25519Backend,
    ) -> String {
        let set: BTreeSet<ValidatorId> = witnesses.iter().cloned().collect();
        let file = ConciliumRegistryFile {
            version: 1,
            network: Some(network.to_string()),
            issued_at_ms: Some(issued_at_ms),
            expires_at_ms: Some(expires_at_ms),
            witnesses: set.iter().map(|w| hex::encode(&w.0)).collect(),
            signature_hex: String::new(),
        };
        let msg = canonical_bytes(&file, &set).unwrap();
        let sig = signer.sign(&msg).unwrap();

        let path = dir.join("registry.toml");
        let contents = format!(
            "version = 1\nnetwork = \"{}\"\nissued_at_ms = {}\nexpires_at_ms = {}\nwitnesses = [{}]\nsignature_hex = \"{}\"\n",
            network,
            issued_at_ms,
            expires_at_ms,
            file.witnesses
                .iter()
                .map(|w| format!("\"{}\"", w))
                .collect::<Vec<_>>()
                .join(", "),
            hex::encode(&sig.0)
        );
        fs::write(&path, contents).unwrap();
        path.to_str().unwrap().to_string()
    }

    #[test]
    fn valid_signed_registry_is_accepted() {
        let dir = tempdir().unwrap();
        let mut key_path = dir.path().to_path_buf();
        key_path.push("registry-signer.key");
        let signer = FileEd25519Backend::load_or_create(&key_path).unwrap();
        let witness = ValidatorId(vec![9u8; 32]);

        let path = write_registry(dir.path(), "concilium/consensus/v1", 1000, 2000, &[witness.clone()], &signer);

        let policy = ConciliumRegistryPolicy {
            now_ms: 1500,
            max_age_ms: 0,
            grace_ms: 0,
            min_version: 0,
            expected_network: Some("concilium/consensus/v1"),
            require_freshness_fields: true,
        };
        let got = load_and_verify_concilium_registry(&path, &hex::encode(signer.public_key()), &policy).unwrap();
        assert_eq!(got, vec![witness]);
    }

    #[test]
    fn expired_registry_past_grace_is_rejected() {
        let dir = tempdir().unwrap();
        let mut key_path = dir.path().to_path_buf();
        key_path.push("registry-signer.key");
        let signer = FileEd25519Backend::load_or_create(&key_path).unwrap();

        let path = write_registry(dir.path(), "net", 1000, 2000, &[ValidatorId(vec![1u8; 32])], &signer);

        let policy = ConciliumRegistryPolicy {
            now_ms: 5000,
            max_age_ms: 0,
            grace_ms: 0,
            min_version: 0,
            expected_network: None,
            require_freshness_fields: true,
        };
        let err = load_and_verify_concilium_registry(&path, &hex::encode(signer.public_key()), &policy).unwrap_err();
        assert!(matches!(err, ConciliumRegistryError::Expired));
    }

    #[test]
    fn network_mismatch_is_rejected() {
        let dir = tempdir().unwrap();
        let mut key_path = dir.path().to_path_buf();
        key_path.push("registry-signer.key");
        let signer = FileEd25519Backend::load_or_create(&key_path).unwrap();

        let path = write_registry(dir.path(), "net-a", 1000, 2000, &[ValidatorId(vec![1u8; 32])], &signer);

        let policy = ConciliumRegistryPolicy {
            now_ms: 1500,
            max_age_ms: 0,
            grace_ms: 0,
            min_version: 0,
            expected_network: Some("net-b"),
            require_freshness_fields: true,
        };
        let err = load_and_verify_concilium_registry(&path, &hex::encode(signer.public_key()), &policy).unwrap_err();
        assert!(matches!(err, ConciliumRegistryError::NetworkMismatch));
    }

    #[test]
    fn tampered_witness_list_fails_signature_check() {
        let dir = tempdir().unwrap();
        let mut key_path = dir.path().to_path_buf();
        key_path.push("registry-signer.key");
        let signer = FileEd25519Backend::load_or_create(&key_path).unwrap();

        let path = write_registry(dir.path(), "net", 1000, 2000, &[ValidatorId(vec![1u8; 32])], &signer);
        let contents = fs::read_to_string(&path).unwrap();
        let tampered = contents.replace(
            &hex::encode(vec![1u8; 32]),
            &hex::encode(vec![2u8; 32]),
        );
        fs::write(&path, tampered).unwrap();

        let policy = ConciliumRegistryPolicy::default_with_now(1500);
        let err = load_and_verify_concilium_registry(&path, &hex::encode(signer.public_key()), &policy).unwrap_err();
        assert!(matches!(err, ConciliumRegistryError::BadSignature));
    }

    #[test]
    fn parse_accepts_well_formed_toml_without_verifying_signature() {
        let toml_str = r#"
            version = 1
            network = "net"
            issued_at_ms = 1
            expires_at_ms = 2
            witnesses = []
            signature_hex = "00"
        "#;
        assert!(parse_concilium_registry_toml(toml_str).is_ok());
    }
}
