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
#![allow(missing_docs)]

//! VM executor boundary.
//!
//! Contract execution is an external collaborator: this crate only needs a
//! seam to hand a transaction's contract call to it and get a `TxReceipt`
//! back. A real VM integration plugs in behind `VmExecutor`.

use crate::core::types::{Transaction, TxReceipt, TxStatus};
use thiserror::Error;

/// Execution error.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("not implemented")]
    NotImplemented,
}

/// VM executor seam.
pub trait VmExecutor: Send + Sync {
    /// Execute a transaction's contract call, if any, and return a receipt.
    fn execute(&self, tx: &Transaction) -> Result<TxReceipt, ExecError>;
}

/// Placeholder executor: contract-creating transactions are accepted as
/// no-ops with a zero-cost receipt. Swapped for a real VM at integration time.
#[derive(Clone, Debug, Default)]
pub struct NoopExecutor;

impl VmExecutor for NoopExecutor {
    fn execute(&self, _tx: &Transaction) -> Result<TxReceipt, ExecError> {
        Ok(TxReceipt {
            contract_address: None,
            coins_used: 0,
            status: TxStatus::Ok,
            message: None,
            internal_txns: Vec::new(),
            coins: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Address, ConciliumId, TransactionPayload, TxInput, TxOutput};

    #[test]
    fn noop_executor_always_succeeds() {
        let tx = Transaction {
            payload: TransactionPayload {
                version: 1,
                concilium_id: ConciliumId(0),
                ins: vec![TxInput {
                    tx_hash: crate::core::types::H256::from_bytes([0u8; 32]),
                    n_tx_output: 0,
                }],
                outs: vec![TxOutput {
                    amount: 1,
                    receiver_addr: Address::from_bytes([1u8; 20]),
                    contract_code: None,
                    addr_change_receiver: None,
                }],
                nonce: 1,
            },
            claim_proofs: vec![],
            tx_signature: None,
            public_key: vec![2u8; 32],
        };
        let receipt = NoopExecutor.execute(&tx).unwrap();
        assert!(matches!(receipt.status, TxStatus::Ok));
    }
}
