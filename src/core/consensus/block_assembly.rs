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

//! Block assembly: pack mempool transactions into a block under a wall-clock
//! budget, stopping early rather than overrunning the slot.

use crate::core::constants::{BLOCK_CREATION_TIME_LIMIT, MAX_BLOCK_SIZE};
use crate::core::mempool::Mempool;
use crate::core::state::merkle::merkle_root_sorted;
use crate::core::types::{Block, BlockHeader, ConciliumId, H256, Transaction, encode_canonical};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Block assembly errors.
#[derive(Debug, Error)]
pub enum AssemblyError {
    /// A transaction could not be canonically encoded.
    #[error("codec")]
    Codec,
}

/// Assemble a candidate block from a coinbase transaction plus pending
/// mempool transactions.
///
/// `coinbase` is always included first, regardless of the time budget — it
/// credits the block's producer and is not subject to eviction. Remaining
/// transactions are added oldest-first until `budget` elapses; the deadline
/// is a soft stopping point, not an interrupt: once it passes, assembly
/// admits exactly one more transaction (the "overrun" transaction, already
/// in flight when the clock ran out) and then stops, rather than truncating
/// mid-step. `MAX_BLOCK_SIZE` (encoded bytes) is a hard cap that can end
/// assembly earlier than the budget.
pub fn assemble_block(
    mempool: &Mempool,
    coinbase: Transaction,
    concilium_id: ConciliumId,
    parent_hashes: Vec<H256>,
    height: u64,
    timestamp_ms: u64,
    budget: Duration,
) -> Result<Block, AssemblyError> {
    let deadline = Instant::now() + budget.min(BLOCK_CREATION_TIME_LIMIT);
    let candidates = mempool.get_final_txns(usize::MAX);

    let mut chosen: Vec<Transaction> = Vec::new();
    let mut size_bytes: usize = 0;

    let coinbase_encoded = encode_canonical(&coinbase).map_err(|_| AssemblyError::Codec)?;
    size_bytes += coinbase_encoded.len();
    chosen.push(coinbase);

    let mut overrun_admitted = false;
    for tx in candidates {
        let past_deadline = Instant::now() >= deadline;
        if past_deadline && overrun_admitted {
            break;
        }
        let encoded = encode_canonical(&tx).map_err(|_| AssemblyError::Codec)?;
        if size_bytes + encoded.len() > MAX_BLOCK_SIZE as usize {
            break;
        }
        size_bytes += encoded.len();
        chosen.push(tx);
        if past_deadline {
            overrun_admitted = true;
            break;
        }
    }

    let mut pairs: Vec<(Vec<u8>, Vec<u8>)> = Vec::with_capacity(chosen.len());
    for (i, tx) in chosen.iter().enumerate() {
        let encoded = encode_canonical(tx).map_err(|_| AssemblyError::Codec)?;
        pairs.push((i.to_be_bytes().to_vec(), encoded));
    }
    let merkle_root = H256::from_bytes(merkle_root_sorted(&pairs));

    let header = BlockHeader {
        parent_hashes,
        merkle_root,
        concilium_id,
        timestamp: timestamp_ms,
        version: 1,
        height,
    };

    Ok(Block {
        header,
        txns: chosen,
        signatures: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Address, TransactionPayload, TxInput, TxOutput};

    fn tx(nonce: u64) -> Transaction {
        Transaction {
            payload: TransactionPayload {
                version: 1,
                concilium_id: ConciliumId(0),
                ins: vec![TxInput {
                    tx_hash: H256::from_bytes([1u8; 32]),
                    n_tx_output: 0,
                }],
                outs: vec![TxOutput {
                    amount: 1,
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

    fn coinbase() -> Transaction {
        tx(0)
    }

    #[test]
    fn assembles_all_pending_transactions_within_budget() {
        let mut mp = Mempool::default();
        let sender = Address::from_bytes([9u8; 20]);
        for n in 1..=5 {
            mp.accept(tx(n), sender).unwrap();
        }
        let block = assemble_block(
            &mp,
            coinbase(),
            ConciliumId(0),
            vec![H256::from_bytes([0u8; 32])],
            1,
            1_000,
            Duration::from_millis(500),
        )
        .unwrap();
        // coinbase plus all 5 pending transactions.
        assert_eq!(block.txns.len(), 6);
        assert_eq!(block.header.height, 1);
    }

    #[test]
    fn empty_mempool_produces_coinbase_only_block() {
        let mp = Mempool::default();
        let block = assemble_block(
            &mp,
            coinbase(),
            ConciliumId(0),
            vec![],
            0,
            0,
            Duration::from_millis(500),
        )
        .unwrap();
        assert_eq!(block.txns.len(), 1);
        assert_ne!(block.header.merkle_root.as_bytes(), &[0u8; 32]);
    }

    #[test]
    fn exhausted_budget_still_admits_exactly_one_overrun_transaction() {
        let mut mp = Mempool::default();
        let sender = Address::from_bytes([9u8; 20]);
        for n in 1..=3 {
            mp.accept(tx(n), sender).unwrap();
        }
        let block = assemble_block(
            &mp,
            coinbase(),
            ConciliumId(0),
            vec![],
            1,
            0,
            Duration::from_millis(0),
        )
        .unwrap();
        // coinbase always included, plus exactly one overrun transaction
        // even though the budget was already spent before the loop started.
        assert_eq!(block.txns.len(), 2);
    }
}
