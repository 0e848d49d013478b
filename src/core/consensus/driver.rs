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

#![allow(missing_docs)]
#![forbid(unsafe_code)]

//! Consensus driver: routes inbound `ConsensusMsg` to the `TideFinalizer` for
//! the concilium it names, spawning finalizers as conciliums are joined.

use crate::core::consensus::concilium::{Concilium, ConciliumError};
use crate::core::consensus::tide::{NoopSlashing, TideConfig, TideError, TideFinalizer};
use crate::core::types::{Commit, ConciliumId, ConsensusMsg, JoinTransaction, ValidatorId};
use std::collections::BTreeMap;
use thiserror::Error;

/// Driver errors.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("unknown concilium {0:?}")]
    UnknownConcilium(ConciliumId),
    #[error("concilium membership")]
    Concilium(#[from] ConciliumError),
    #[error("tide")]
    Tide(#[from] TideError),
}

/// Top-level consensus driver: one `Concilium` + `TideFinalizer` pair per lane.
pub struct ConsensusDriver {
    conciliums: BTreeMap<ConciliumId, Concilium>,
    finalizers: BTreeMap<ConciliumId, TideFinalizer<NoopSlashing>>,
}

impl Default for ConsensusDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsensusDriver {
    /// Create a driver tracking no conciliums yet.
    pub fn new() -> Self {
        Self {
            conciliums: BTreeMap::new(),
            finalizers: BTreeMap::new(),
        }
    }

    /// Register a concilium with a known initial witness set (e.g. loaded
    /// from a signed concilium registry at startup).
    pub fn register_concilium(&mut self, id: ConciliumId, validators: std::collections::BTreeSet<ValidatorId>) {
        let mut concilium = Concilium::new(id);
        concilium.witnesses = validators.clone();
        self.conciliums.insert(id, concilium);
        self.finalizers
            .insert(id, TideFinalizer::new(TideConfig::new(id, validators), NoopSlashing));
    }

    /// Apply a join transaction, creating the concilium if unseen and adding
    /// the witness to both the membership set and the live finalizer.
    pub fn on_join(&mut self, join: JoinTransaction) -> Result<(), DriverError> {
        let concilium = self
            .conciliums
            .entry(join.concilium_id)
            .or_insert_with(|| Concilium::new(join.concilium_id));
        concilium.apply_join(&join)?;

        let witness = join.witness.clone();
        self.finalizers
            .entry(join.concilium_id)
            .or_insert_with(|| {
                TideFinalizer::new(TideConfig::new(join.concilium_id, Default::default()), NoopSlashing)
            })
            .add_validator(witness);
        Ok(())
    }

    /// Route an inbound consensus message to its concilium's finalizer.
    pub fn on_msg(&mut self, msg: ConsensusMsg) -> Result<Option<Commit>, DriverError> {
        let concilium_id = match &msg {
            ConsensusMsg::Vote(v) => v.concilium_id,
            ConsensusMsg::Commit(c) => c.concilium_id,
        };
        let finalizer = self
            .finalizers
            .get_mut(&concilium_id)
            .ok_or(DriverError::UnknownConcilium(concilium_id))?;

        match msg {
            ConsensusMsg::Vote(v) => Ok(finalizer.process_vote_verified(v)?),
            ConsensusMsg::Commit(c) => {
                finalizer.process_commit_verified(c)?;
                Ok(None)
            }
        }
    }

    /// Current witness set for a concilium, if known.
    pub fn witnesses_of(&self, id: ConciliumId) -> Option<&std::collections::BTreeSet<ValidatorId>> {
        self.conciliums.get(&id).map(|c| &c.witnesses)
    }
}
