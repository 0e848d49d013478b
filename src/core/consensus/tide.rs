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

//! Tide finality gadget (BFT-lite) with signature verification and double-vote detection.
//!
//! One `TideFinalizer` tracks a single concilium's votes; `ConciliumId` routing
//! across multiple finalizers is the job of `consensus::driver`.

use crate::core::{
    consensus::signing::{vote_signing_bytes_auto, SigningError},
    crypto::{self, CryptoError},
    types::{CanonicalMap, Commit, ConciliumId, H256, Signature, ValidatorId, Vote},
};
use std::collections::{BTreeMap, BTreeSet};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Tide errors.
#[derive(Debug, Error)]
pub enum TideError {
    /// Replay, stale, or out-of-window message rejected.
    #[error("replay/stale message")]
    Replay,
    #[error("wrong concilium")]
    WrongConcilium,
    #[error("unknown validator")]
    UnknownValidator,
    #[error("invalid signature")]
    BadSignature,
    #[error("double vote detected")]
    DoubleVote,
    #[error("insufficient votes for commit")]
    NotEnoughVotes,
    #[error("codec/signing")]
    Signing,
}

impl From<SigningError> for TideError {
    fn from(_: SigningError) -> Self {
        TideError::Signing
    }
}
impl From<CryptoError> for TideError {
    fn from(_: CryptoError) -> Self {
        TideError::BadSignature
    }
}

/// Slashing hook.
pub trait Slashing: Send + Sync {
    /// Called when a double vote is detected.
    fn on_double_vote(&self, offender: &ValidatorId);
}

/// No-op slashing (default).
#[derive(Clone)]
pub struct NoopSlashing;

impl Slashing for NoopSlashing {
    fn on_double_vote(&self, _offender: &ValidatorId) {}
}

/// Tide configuration.
#[derive(Clone)]
pub struct TideConfig {
    /// Concilium this finalizer tracks; votes/commits for any other id are rejected.
    pub concilium_id: ConciliumId,
    /// Current witness set.
    pub validators: BTreeSet<ValidatorId>,
    /// Maximum allowed clock skew (absolute) between sender timestamp and local time.
    /// Applies only when `sent_ts_ms != 0`.
    pub max_clock_skew_ms: u64,
    /// Maximum allowed TTL for consensus messages.
    /// Applies only when `ttl_ms != 0`.
    pub max_ttl_ms: u32,
    /// If true, reject legacy messages where `epoch == 0`.
    pub require_epoch: bool,
}

impl TideConfig {
    /// Create config with safe defaults.
    pub fn new(concilium_id: ConciliumId, validators: BTreeSet<ValidatorId>) -> Self {
        Self {
            concilium_id,
            validators,
            // 10s skew is usually safe across VPS/VMs while still limiting replay window.
            max_clock_skew_ms: 10_000,
            // 60s TTL cap for gossip consensus messages.
            max_ttl_ms: 60_000,
            require_epoch: cfg!(feature = "production"),
        }
    }
}

/// Stored metadata for replay-window sealed votes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct VoteMeta {
    epoch: u64,
    msg_counter: u64,
    sent_ts_ms: u64,
    ttl_ms: u32,
}

#[derive(Clone, Copy, Debug)]
struct ReplayState {
    epoch: u64,
    last_counter: u64,
    last_sent_ts_ms: u64,
}

type VoteMap = BTreeMap<ValidatorId, (H256, Signature, VoteMeta)>;

/// Tide finalizer state, scoped to one concilium.
pub struct TideFinalizer<S: Slashing> {
    cfg: TideConfig,
    slashing: S,
    // votes[height][round] = { voter -> (block_hash, sig, meta) }
    votes: BTreeMap<u64, BTreeMap<u64, VoteMap>>,
    // Per-validator replay protection state (best-effort).
    replay: BTreeMap<ValidatorId, ReplayState>,
}

impl<S: Slashing> TideFinalizer<S> {
    /// Create a new finalizer.
    pub fn new(cfg: TideConfig, slashing: S) -> Self {
        Self {
            cfg,
            slashing,
            votes: BTreeMap::new(),
            replay: BTreeMap::new(),
        }
    }

    /// Admit a new witness into the tracked validator set (see `Concilium::apply_join`).
    pub fn add_validator(&mut self, validator: ValidatorId) {
        self.cfg.validators.insert(validator);
    }

    fn now_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    fn check_freshness(&self, sent_ts_ms: u64, ttl_ms: u32) -> Result<(), TideError> {
        // Legacy messages skip freshness checks.
        if sent_ts_ms == 0 && ttl_ms == 0 {
            return Ok(());
        }

        // Cap TTL to avoid attackers selecting huge replay windows.
        if ttl_ms != 0 && ttl_ms > self.cfg.max_ttl_ms {
            return Err(TideError::Replay);
        }

        let now = Self::now_ms();
        if now == 0 {
            // If local time is unavailable, be conservative for non-legacy messages.
            return Err(TideError::Replay);
        }

        if sent_ts_ms != 0 {
            let skew = if now >= sent_ts_ms { now - sent_ts_ms } else { sent_ts_ms - now };
            if skew > self.cfg.max_clock_skew_ms {
                return Err(TideError::Replay);
            }
        }

        if sent_ts_ms != 0 && ttl_ms != 0 {
            let expiry = sent_ts_ms.saturating_add(ttl_ms as u64);
            if now > expiry.saturating_add(self.cfg.max_clock_skew_ms) {
                return Err(TideError::Replay);
            }
        }

        Ok(())
    }

    fn check_replay_counter(
        &mut self,
        voter: &ValidatorId,
        epoch: u64,
        msg_counter: u64,
        sent_ts_ms: u64,
    ) -> Result<(), TideError> {
        // Legacy messages do not carry replay protection fields.
        if epoch == 0 && msg_counter == 0 && sent_ts_ms == 0 {
            if self.cfg.require_epoch {
                return Err(TideError::Replay);
            }
            return Ok(());
        }
        if self.cfg.require_epoch && epoch == 0 {
            return Err(TideError::Replay);
        }

        let st = self.replay.get(voter).copied();
        if let Some(prev) = st {
            if prev.epoch == epoch {
                if msg_counter != 0 && msg_counter <= prev.last_counter {
                    return Err(TideError::Replay);
                }
                if sent_ts_ms != 0 && prev.last_sent_ts_ms != 0 && sent_ts_ms < prev.last_sent_ts_ms {
                    return Err(TideError::Replay);
                }
            }
        }

        self.replay.insert(
            voter.clone(),
            ReplayState {
                epoch,
                last_counter: msg_counter,
                last_sent_ts_ms: sent_ts_ms,
            },
        );

        Ok(())
    }

    /// Verify vote signature then process.
    pub fn process_vote_verified(&mut self, v: Vote) -> Result<Option<Commit>, TideError> {
        if v.concilium_id != self.cfg.concilium_id {
            return Err(TideError::WrongConcilium);
        }
        if !self.cfg.validators.contains(&v.voter) {
            return Err(TideError::UnknownValidator);
        }

        self.check_freshness(v.sent_ts_ms, v.ttl_ms)?;
        self.check_replay_counter(&v.voter, v.epoch, v.msg_counter, v.sent_ts_ms)?;

        let pk_bytes = v.voter.as_public_key_bytes().ok_or(TideError::BadSignature)?;
        let msg = vote_signing_bytes_auto(
            v.concilium_id,
            v.height,
            v.round,
            v.epoch,
            v.msg_counter,
            v.sent_ts_ms,
            v.ttl_ms,
            v.block_hash,
            &v.voter,
        )?;
        crypto::verify(&pk_bytes, &msg, &v.signature)?;

        self.process_vote_inner(v)
    }

    /// Verify commit signatures (supermajority) and accept.
    pub fn process_commit_verified(&mut self, c: Commit) -> Result<(), TideError> {
        if c.concilium_id != self.cfg.concilium_id {
            return Err(TideError::WrongConcilium);
        }
        self.check_freshness(c.sent_ts_ms, c.ttl_ms)?;
        if self.cfg.require_epoch && c.epoch == 0 {
            return Err(TideError::Replay);
        }
        for vid in c.signatures.keys() {
            if !self.cfg.validators.contains(vid) {
                return Err(TideError::UnknownValidator);
            }
        }

        let n = self.cfg.validators.len();
        let threshold = (2 * n) / 3 + 1;
        if c.signatures.len() < threshold {
            return Err(TideError::NotEnoughVotes);
        }

        for (vid, sig) in c.signatures.iter() {
            let pk_bytes = vid.as_public_key_bytes().ok_or(TideError::BadSignature)?;
            let bytes = vote_signing_bytes_auto(
                c.concilium_id,
                c.height,
                c.round,
                c.epoch,
                c.msg_counter,
                c.sent_ts_ms,
                c.ttl_ms,
                c.block_hash,
                vid,
            )?;
            crypto::verify(&pk_bytes, &bytes, sig)?;
        }

        Ok(())
    }

    fn process_vote_inner(&mut self, v: Vote) -> Result<Option<Commit>, TideError> {
        let height_votes = self.votes.entry(v.height).or_default();
        let round_votes = height_votes.entry(v.round).or_default();

        let meta = VoteMeta {
            epoch: v.epoch,
            msg_counter: v.msg_counter,
            sent_ts_ms: v.sent_ts_ms,
            ttl_ms: v.ttl_ms,
        };

        if let Some((prev_hash, _prev_sig, prev_meta)) = round_votes.get(&v.voter) {
            if prev_hash != &v.block_hash || prev_meta != &meta {
                self.slashing.on_double_vote(&v.voter);
                return Err(TideError::DoubleVote);
            }
            return Ok(None); // duplicate same vote
        }

        round_votes.insert(v.voter.clone(), (v.block_hash, v.signature.clone(), meta));
        self.try_build_commit(v.concilium_id, v.height, v.round)
    }

    fn try_build_commit(
        &self,
        concilium_id: ConciliumId,
        height: u64,
        round: u64,
    ) -> Result<Option<Commit>, TideError> {
        let Some(hm) = self.votes.get(&height) else {
            return Ok(None);
        };
        let Some(rm) = hm.get(&round) else {
            return Ok(None);
        };

        let mut counts: BTreeMap<(H256, VoteMeta), usize> = BTreeMap::new();
        for (hash, _sig, meta) in rm.values() {
            *counts.entry((*hash, *meta)).or_insert(0) += 1;
        }

        let n = self.cfg.validators.len();
        let threshold = (2 * n) / 3 + 1;

        for ((hash, meta), c) in counts.iter() {
            if *c >= threshold {
                let mut sigs: CanonicalMap<ValidatorId, Signature> = CanonicalMap::new();
                for (vid, (vh, vsig, vm)) in rm.iter() {
                    if vh == hash && vm == meta {
                        sigs.insert(vid.clone(), vsig.clone());
                    }
                }
                return Ok(Some(Commit {
                    concilium_id,
                    height,
                    round,
                    epoch: meta.epoch,
                    msg_counter: meta.msg_counter,
                    sent_ts_ms: meta.sent_ts_ms,
                    ttl_ms: meta.ttl_ms,
                    block_hash: *hash,
                    signatures: sigs,
                }));
            }
        }

        Ok(None)
    }
}

impl<S: Slashing> TideFinalizer<S> {
    /// Test-only helper: process a vote without network plumbing (signature
    /// verification, freshness, and replay checks all skipped). Not
    /// `#[cfg(test)]`-gated so integration tests under `tests/` — compiled
    /// against this crate as an ordinary dependency, without `cfg(test)` —
    /// can still reach it.
    pub fn process_vote_inner_for_tests(&mut self, v: Vote) -> Result<Option<Commit>, TideError> {
        self.process_vote_inner(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::security::keystore::{FileEd25519Backend, SignerBackend};
    use tempfile::tempdir;

    fn signed_vote(
        backend: &FileEd25519Backend,
        concilium_id: ConciliumId,
        height: u64,
        round: u64,
        block_hash: H256,
    ) -> Vote {
        let voter = ValidatorId(backend.public_key().to_vec());
        let msg = vote_signing_bytes_auto(concilium_id, height, round, 0, 0, 0, 0, block_hash, &voter)
            .unwrap();
        let sig = backend.sign(&msg).unwrap();
        Vote {
            concilium_id,
            height,
            round,
            epoch: 0,
            msg_counter: 0,
            sent_ts_ms: 0,
            ttl_ms: 0,
            block_hash,
            voter,
            signature: sig,
        }
    }

    #[test]
    fn three_of_three_votes_produce_a_commit() {
        let dir = tempdir().unwrap();
        let mut backends = Vec::new();
        let mut validators = BTreeSet::new();
        for i in 0..3 {
            let mut path = dir.path().to_path_buf();
            path.push(format!("v{i}.key"));
            let b = FileEd25519Backend::load_or_create(&path).unwrap();
            validators.insert(ValidatorId(b.public_key().to_vec()));
            backends.push(b);
        }

        let id = ConciliumId(1);
        let cfg = TideConfig::new(id, validators);
        let mut finalizer = TideFinalizer::new(cfg, NoopSlashing);

        let hash = H256::from_bytes([9u8; 32]);
        let mut commit = None;
        for b in &backends {
            let v = signed_vote(b, id, 1, 0, hash);
            commit = finalizer.process_vote_verified(v).unwrap();
        }
        assert!(commit.is_some());
        let commit = commit.unwrap();
        assert_eq!(commit.signatures.len(), 3);
    }

    #[test]
    fn vote_for_wrong_concilium_is_rejected() {
        let dir = tempdir().unwrap();
        let mut path = dir.path().to_path_buf();
        path.push("v0.key");
        let b = FileEd25519Backend::load_or_create(&path).unwrap();
        let mut validators = BTreeSet::new();
        validators.insert(ValidatorId(b.public_key().to_vec()));

        let cfg = TideConfig::new(ConciliumId(1), validators);
        let mut finalizer = TideFinalizer::new(cfg, NoopSlashing);

        let v = signed_vote(&b, ConciliumId(2), 1, 0, H256::from_bytes([1u8; 32]));
        assert!(matches!(
            finalizer.process_vote_verified(v),
            Err(TideError::WrongConcilium)
        ));
    }

    #[test]
    fn conflicting_votes_from_same_round_are_a_double_vote() {
        let dir = tempdir().unwrap();
        let mut path = dir.path().to_path_buf();
        path.push("v0.key");
        let b = FileEd25519Backend::load_or_create(&path).unwrap();
        let mut validators = BTreeSet::new();
        validators.insert(ValidatorId(b.public_key().to_vec()));

        let id = ConciliumId(1);
        let cfg = TideConfig::new(id, validators);
        let mut finalizer = TideFinalizer::new(cfg, NoopSlashing);

        let v1 = signed_vote(&b, id, 1, 0, H256::from_bytes([1u8; 32]));
        finalizer.process_vote_verified(v1).unwrap();

        let v2 = signed_vote(&b, id, 1, 0, H256::from_bytes([2u8; 32]));
        assert!(matches!(
            finalizer.process_vote_verified(v2),
            Err(TideError::DoubleVote)
        ));
    }
}
