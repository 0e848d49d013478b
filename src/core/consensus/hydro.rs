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

//! Hydro: round-robin witness rotation for block production slots.
//!
//! Producer selection is a plain index into the sorted witness set, not a
//! VRF: the witness set for a concilium is known to every member, so there is
//! nothing to keep private about who produces the next slot.

use crate::core::types::ValidatorId;
use thiserror::Error;

/// Hydro errors.
#[derive(Debug, Error)]
pub enum HydroError {
    #[error("time outside slot window")]
    TimeWindow,
    #[error("empty witness set")]
    NoWitnesses,
}

/// Hydro configuration.
#[derive(Clone, Debug)]
pub struct HydroConfig {
    /// Genesis absolute time (ms since unix epoch).
    pub genesis_time_ms: u64,
    /// Slot duration in ms.
    pub slot_ms: u64,
    /// Allowed clock skew in ms.
    pub skew_ms: u64,
}

impl HydroConfig {
    /// Absolute time window check for slot.
    pub fn check_time_window_abs(&self, current_abs_ms: u64, slot_start_abs_ms: u64) -> Result<u64, HydroError> {
        let slot_end_abs_ms = slot_start_abs_ms.saturating_add(self.slot_ms);
        let min_ok = slot_start_abs_ms.saturating_sub(self.skew_ms);
        let max_ok = slot_end_abs_ms.saturating_add(self.skew_ms);

        if current_abs_ms < min_ok || current_abs_ms > max_ok {
            return Err(HydroError::TimeWindow);
        }
        Ok(current_abs_ms.saturating_sub(self.genesis_time_ms))
    }

    /// The slot index covering `abs_ms`.
    pub fn slot_at(&self, abs_ms: u64) -> u64 {
        abs_ms.saturating_sub(self.genesis_time_ms) / self.slot_ms.max(1)
    }
}

/// Pick the producer for `slot` by round-robin over a sorted witness set.
///
/// `witnesses` must be in the concilium's canonical (sorted) order so every
/// member computes the same result.
pub fn round_robin_producer(witnesses: &[ValidatorId], slot: u64) -> Result<&ValidatorId, HydroError> {
    if witnesses.is_empty() {
        return Err(HydroError::NoWitnesses);
    }
    let idx = (slot as usize) % witnesses.len();
    Ok(&witnesses[idx])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> HydroConfig {
        HydroConfig {
            genesis_time_ms: 1_000_000,
            slot_ms: 2_000,
            skew_ms: 200,
        }
    }

    #[test]
    fn time_window_accepts_within_slot_and_rejects_outside() {
        let c = cfg();
        assert!(c.check_time_window_abs(1_000_000, 1_000_000).is_ok());
        assert!(c.check_time_window_abs(1_003_000, 1_000_000).is_ok());
        assert!(c.check_time_window_abs(1_010_000, 1_000_000).is_err());
    }

    #[test]
    fn round_robin_cycles_through_witnesses_in_order() {
        let witnesses = vec![ValidatorId(vec![1]), ValidatorId(vec![2]), ValidatorId(vec![3])];
        assert_eq!(round_robin_producer(&witnesses, 0).unwrap(), &witnesses[0]);
        assert_eq!(round_robin_producer(&witnesses, 1).unwrap(), &witnesses[1]);
        assert_eq!(round_robin_producer(&witnesses, 3).unwrap(), &witnesses[0]);
    }

    #[test]
    fn round_robin_rejects_empty_witness_set() {
        assert!(round_robin_producer(&[], 0).is_err());
    }
}
