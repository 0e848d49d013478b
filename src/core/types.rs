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

//! Deterministic core types, canonical encoding, and consensus/wire payload schemas.

use bincode::Options;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Canonical serialization error.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Serialization failed.
    #[error("serialization")]
    Serialize,
    /// Deserialization failed.
    #[error("deserialization")]
    Deserialize,
    /// Payload exceeds the caller's size cap.
    #[error("size limit exceeded")]
    TooLarge,
}

/// Canonical bincode options (deterministic).
fn bincode_opts() -> impl Options {
    // Fixint encoding provides a stable integer representation.
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .reject_trailing_bytes()
}

/// Encode with deterministic rules. Requires deterministic container ordering (use BTreeMap/BTreeSet).
pub fn encode_canonical<T: Serialize>(v: &T) -> Result<Vec<u8>, CodecError> {
    bincode_opts().serialize(v).map_err(|_| CodecError::Serialize)
}

/// Decode with a hard size cap.
pub fn decode_canonical_limited<T: DeserializeOwned>(
    bytes: &[u8],
    max: usize,
) -> Result<T, CodecError> {
    // Fast-path cap on the raw wire payload.
    if bytes.len() > max {
        return Err(CodecError::TooLarge);
    }
    // Defensive cap inside the deserializer to prevent memory/CPU bombs via large container lengths.
    bincode_opts()
        .with_limit(max as u64)
        .deserialize(bytes)
        .map_err(|_| CodecError::Deserialize)
}

/// 256-bit hash type (32 bytes).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct H256([u8; 32]);

impl H256 {
    /// Construct from raw bytes.
    pub fn from_bytes(b: [u8; 32]) -> Self {
        Self(b)
    }
    /// Return bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// Ed25519 signature bytes (expected 64).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Signature(pub Vec<u8>);

/// Validator/witness identity (Ed25519 public key bytes, expected 32).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Hash)]
pub struct ValidatorId(pub Vec<u8>);

impl ValidatorId {
    /// Interpret as Ed25519 public key bytes if length is 32.
    pub fn as_public_key_bytes(&self) -> Option<[u8; 32]> {
        if self.0.len() != 32 {
            return None;
        }
        let mut out = [0u8; 32];
        out.copy_from_slice(&self.0);
        Some(out)
    }
}

/// Canonical map type alias.
pub type CanonicalMap<K, V> = BTreeMap<K, V>;

/// Numeric identifier of a concilium (a named witness set responsible for one lane of blocks).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConciliumId(pub u32);

/// Consensus vote message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    /// Concilium this vote belongs to.
    pub concilium_id: ConciliumId,
    /// Block height.
    pub height: u64,
    /// Consensus round (height-bound).
    pub round: u64,
    /// Epoch identifier (0 => legacy messages).
    #[serde(default)]
    pub epoch: u64,
    /// Per-sender monotonically increasing message counter (0 => legacy).
    #[serde(default)]
    pub msg_counter: u64,
    /// Sender wall-clock timestamp in milliseconds since UNIX epoch (0 => legacy).
    #[serde(default)]
    pub sent_ts_ms: u64,
    /// Time-to-live for this message in milliseconds (0 => legacy).
    #[serde(default)]
    pub ttl_ms: u32,
    /// Voted block hash.
    pub block_hash: H256,
    /// Voter identity.
    pub voter: ValidatorId,
    /// Signature over domain-separated vote bytes.
    pub signature: Signature,
}

/// Commit message proving finality.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    /// Concilium this commit belongs to.
    pub concilium_id: ConciliumId,
    /// Height.
    pub height: u64,
    /// Round.
    pub round: u64,
    /// Epoch identifier (0 => legacy messages).
    #[serde(default)]
    pub epoch: u64,
    /// Per-sender monotonically increasing message counter (0 => legacy).
    #[serde(default)]
    pub msg_counter: u64,
    /// Sender wall-clock timestamp in milliseconds since UNIX epoch (0 => legacy).
    #[serde(default)]
    pub sent_ts_ms: u64,
    /// Time-to-live for this message in milliseconds (0 => legacy).
    #[serde(default)]
    pub ttl_ms: u32,
    /// Finalized block hash.
    pub block_hash: H256,
    /// Signatures by validators (canonical ordering by key).
    pub signatures: CanonicalMap<ValidatorId, Signature>,
}

/// A consensus message as routed through the driver: either half of the
/// vote/commit exchange, tagged so the driver can dispatch by concilium.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsensusMsg {
    /// A single validator's vote.
    Vote(Vote),
    /// An aggregated commit proving finality.
    Commit(Commit),
}

/// A witness's announcement of itself to a concilium.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinTransaction {
    /// Target concilium.
    pub concilium_id: ConciliumId,
    /// The joining witness.
    pub witness: ValidatorId,
    /// Proof of possession: a signature over the concilium id by `witness`.
    pub proof: Signature,
}

/// Recognized advertised service kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ServiceKind {
    /// General participation (relay, address gossip).
    Node,
    /// Block producer; `Capability::data` carries the witness public key.
    Witness,
}

/// A single advertised capability: a service kind plus opaque data.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Capability {
    /// Which service this capability advertises.
    pub service: ServiceKind,
    /// Opaque service-specific data (e.g. a witness public key).
    pub data: Vec<u8>,
}

/// Immutable descriptor of a remote peer, as learned from handshake or gossip.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    /// Canonical network address bytes (family-agnostic).
    pub address: Vec<u8>,
    /// Transport port.
    pub port: u16,
    /// Advertised capabilities.
    pub capabilities: BTreeSet<Capability>,
}

impl PeerInfo {
    /// True iff this descriptor advertises the given service kind.
    pub fn has_service(&self, kind: ServiceKind) -> bool {
        self.capabilities.iter().any(|c| c.service == kind)
    }

    /// Merge another descriptor's capabilities into this one (union by service+data).
    pub fn merge_capabilities(&mut self, other: &PeerInfo) {
        for cap in &other.capabilities {
            self.capabilities.insert(cap.clone());
        }
    }
}

/// A chain address: 20 bytes derived from a public key (see `core::crypto`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address([u8; 20]);

impl Address {
    /// Construct from raw bytes.
    pub fn from_bytes(b: [u8; 20]) -> Self {
        Self(b)
    }
    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
    /// Render with the checked-string prefix (base58 payload).
    pub fn to_checked_string(&self) -> String {
        format!(
            "{}{}",
            crate::core::constants::ADDRESS_PREFIX,
            bs58::encode(self.0).into_string()
        )
    }
}

/// One transaction input: a reference to a previously produced output.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    /// Hash of the transaction that produced the referenced output.
    pub tx_hash: H256,
    /// Output index within that transaction.
    pub n_tx_output: u32,
}

/// One transaction output.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    /// Amount transferred.
    pub amount: u64,
    /// Receiving address.
    pub receiver_addr: Address,
    /// Contract bytecode, when this output creates a contract.
    pub contract_code: Option<Vec<u8>>,
    /// Address to receive any contract-owner change, when applicable.
    pub addr_change_receiver: Option<Address>,
}

/// The hashed, signable portion of a transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionPayload {
    /// Payload schema version.
    pub version: u32,
    /// Concilium this transaction is routed to (0 for the base chain lane).
    pub concilium_id: ConciliumId,
    /// Inputs consumed.
    pub ins: Vec<TxInput>,
    /// Outputs produced.
    pub outs: Vec<TxOutput>,
    /// Strictly increasing per-sender nonce.
    pub nonce: u64,
}

/// A full transaction: payload plus proofs. Hashing covers `payload` only.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// The hashed payload.
    pub payload: TransactionPayload,
    /// Ownership proofs for each consumed input, in input order.
    pub claim_proofs: Vec<Signature>,
    /// Optional contract-owner signature (present for contract-creating transactions).
    pub tx_signature: Option<Signature>,
    /// Public key of the originator, used to derive the sender address.
    pub public_key: Vec<u8>,
}

impl Transaction {
    /// Deterministic transaction hash over `TransactionPayload` only.
    ///
    /// Ignores `claim_proofs` and `tx_signature`: permuting or stripping
    /// signatures never changes a transaction's identity.
    pub fn hash(&self) -> Result<H256, CodecError> {
        let bytes = encode_canonical(&self.payload)?;
        Ok(sha256(&bytes))
    }
}

/// Block header; hashing covers exactly these fields.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Parent block hashes (plural to allow DAG-style multi-parent chains).
    pub parent_hashes: Vec<H256>,
    /// Merkle root over the block's transactions.
    pub merkle_root: H256,
    /// Concilium that produced this block.
    pub concilium_id: ConciliumId,
    /// Producer wall-clock timestamp, ms since UNIX epoch.
    pub timestamp: u64,
    /// Header schema version.
    pub version: u32,
    /// Chain height.
    pub height: u64,
}

impl BlockHeader {
    /// Deterministic block hash over the header only.
    pub fn hash(&self) -> Result<H256, CodecError> {
        let bytes = encode_canonical(self)?;
        Ok(sha256(&bytes))
    }
}

/// A full block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Header.
    pub header: BlockHeader,
    /// Transactions, coinbase first.
    pub txns: Vec<Transaction>,
    /// Witness signatures over the header hash.
    pub signatures: Vec<Signature>,
}

/// Inventory item kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvType {
    /// Transaction inventory.
    Tx = 11,
    /// Block inventory.
    Block = 21,
}

/// One inventory announcement.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryVector {
    /// Kind of object being announced.
    pub inv_type: InvType,
    /// Object hash.
    pub hash: H256,
}

/// Account balance/nonce record, as tracked in `ChainState` by the storage
/// collaborator. The networking core reads/writes this for transaction
/// validation; full account-model semantics are out of scope.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Spendable balance in the chain's base unit.
    pub balance: u64,
    /// Last applied transaction nonce (0 if none applied yet).
    pub nonce: u64,
}

/// One unspent output record as tracked by the storage collaborator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    /// Output indexes held at this key.
    pub arr_indexes: Vec<u32>,
    /// Corresponding outputs.
    pub arr_outputs: Vec<TxOutput>,
}

/// Transaction execution status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxStatus {
    /// Execution completed successfully.
    Ok = 1,
    /// Execution failed.
    Failed = 0,
}

/// Receipt produced by contract execution (see `core::runtime`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    /// Address of a contract created by this transaction, if any.
    pub contract_address: Option<Address>,
    /// Fee-equivalent cost consumed.
    pub coins_used: u64,
    /// Execution status.
    pub status: TxStatus,
    /// Optional human-readable failure message.
    pub message: Option<String>,
    /// Transactions emitted by contract execution (transfers, calls).
    pub internal_txns: Vec<Transaction>,
    /// Coin movements recorded by execution.
    pub coins: Vec<TxOutput>,
}

/// Handshake payload: what a node tells a freshly connected peer about itself.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionPayload {
    /// Sender's protocol version.
    pub protocol_version: u32,
    /// Sender's address/capability descriptor.
    pub node_info: PeerInfo,
    /// Sender's best known chain height.
    pub best_height: u64,
    /// Random nonce used to detect self-connections.
    pub nonce: u64,
}

/// Address-gossip payload, chunked to `ADDR_MAX_LENGTH` entries per message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddrPayload {
    /// Known peer descriptors.
    pub peers: Vec<PeerInfo>,
}

/// Rejection reason code, echoed back to a misbehaving or redundant peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectCode {
    /// A connection to this peer already exists.
    Duplicate,
    /// Protocol version is incompatible.
    IncompatibleProtocol,
    /// Malformed or unrecognized payload.
    Malformed,
}

/// Rejection payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectPayload {
    /// Why the peer is being rejected.
    pub code: RejectCode,
    /// Human-readable detail.
    pub reason: String,
}

/// Inventory announcement payload, used for both `Inv` (advertise) and
/// `GetData` (request) messages.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvPayload {
    /// Announced or requested items.
    pub items: Vec<InventoryVector>,
}

/// Block locator payload for chain sync requests.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetBlocksPayload {
    /// Locator hashes, most recent first.
    pub locator_hashes: Vec<H256>,
}

/// Liveness-check payload shared by `Ping`/`Pong`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingPongPayload {
    /// Echoed nonce.
    pub nonce: u64,
}

/// Witness-side next-round announcement: who the round-robin schedule picks
/// next for a concilium's slot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WNextRoundPayload {
    /// Concilium this round belongs to.
    pub concilium_id: ConciliumId,
    /// Slot index.
    pub slot: u64,
    /// Producer selected for this slot.
    pub producer: ValidatorId,
}

/// Witness capability exposure: advertises a witness's presence for a
/// concilium ahead of a formal `JoinTransaction`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WExposePayload {
    /// Concilium being advertised for.
    pub concilium_id: ConciliumId,
    /// The witness's identity.
    pub witness: ValidatorId,
}

/// Candidate block proposed for a concilium's current slot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WBlockPayload {
    /// The proposed block.
    pub block: Block,
}

/// The closed set of wire messages this node exchanges with peers.
///
/// Decoding a message never verifies `signature`/`public_key` on
/// `Envelope` — that is policy enforced by the node dispatch layer, not the
/// codec (a message is either well-formed or it isn't).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// Initial handshake announcement.
    Version(VersionPayload),
    /// Handshake acknowledgement; promotes the peer to fully connected.
    VerAck,
    /// Request for known peer addresses.
    GetAddr,
    /// Response to `GetAddr`.
    Addr(AddrPayload),
    /// Rejection of a prior action.
    Reject(RejectPayload),
    /// Relayed transaction.
    Tx(Transaction),
    /// Relayed block.
    Block(Block),
    /// Advertisement of available objects.
    Inv(InvPayload),
    /// Request for the full bodies of advertised objects.
    GetData(InvPayload),
    /// Chain sync locator request.
    GetBlocks(GetBlocksPayload),
    /// Liveness probe.
    Ping(PingPongPayload),
    /// Liveness reply.
    Pong(PingPongPayload),
    /// Witness self-registration handshake for a concilium.
    WHandshake(JoinTransaction),
    /// Announcement of the next round-robin producer for a concilium slot.
    WNextRound(WNextRoundPayload),
    /// Advance notice of witness capability for a concilium.
    WExpose(WExposePayload),
    /// Proposed block for the current concilium slot.
    WBlock(WBlockPayload),
    /// A vote or commit in the BFT finality exchange.
    WBlockVote(ConsensusMsg),
}

/// A message together with its optional sender signature, as carried on the
/// wire. Only handshake- and consensus-relevant kinds are normally signed;
/// unsigned gossip (e.g. `Addr`) carries `None` in both fields.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// The message itself.
    pub message: Message,
    /// Signature over the canonical encoding of `message`, if signed.
    pub signature: Option<Signature>,
    /// Signer's public key, if signed.
    pub public_key: Option<Vec<u8>>,
}

impl Envelope {
    /// Wrap a message with no signature.
    pub fn unsigned(message: Message) -> Self {
        Self {
            message,
            signature: None,
            public_key: None,
        }
    }
}

/// SHA-256 helper shared by hashing and address derivation.
pub(crate) fn sha256(data: &[u8]) -> H256 {
    let d = ring::digest::digest(&ring::digest::SHA256, data);
    let mut out = [0u8; 32];
    out.copy_from_slice(d.as_ref());
    H256(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tx(claim: Vec<Signature>) -> Transaction {
        Transaction {
            payload: TransactionPayload {
                version: 1,
                concilium_id: ConciliumId(0),
                ins: vec![TxInput {
                    tx_hash: H256::from_bytes([1u8; 32]),
                    n_tx_output: 0,
                }],
                outs: vec![TxOutput {
                    amount: 10,
                    receiver_addr: Address::from_bytes([2u8; 20]),
                    contract_code: None,
                    addr_change_receiver: None,
                }],
                nonce: 1,
            },
            claim_proofs: claim,
            tx_signature: None,
            public_key: vec![3u8; 32],
        }
    }

    #[test]
    fn tx_hash_ignores_proofs_and_signature() {
        let a = sample_tx(vec![Signature(vec![1, 2, 3])]);
        let mut b = sample_tx(vec![]);
        b.tx_signature = Some(Signature(vec![9, 9, 9]));
        assert_eq!(a.hash().unwrap(), b.hash().unwrap());
    }

    #[test]
    fn tx_hash_changes_with_payload() {
        let a = sample_tx(vec![]);
        let mut b = sample_tx(vec![]);
        b.payload.outs[0].amount = 11;
        assert_ne!(a.hash().unwrap(), b.hash().unwrap());
    }

    #[test]
    fn encode_decode_roundtrip() {
        let tx = sample_tx(vec![Signature(vec![1, 2])]);
        let bytes = encode_canonical(&tx).unwrap();
        let back: Transaction = decode_canonical_limited(&bytes, 1 << 20).unwrap();
        assert_eq!(tx, back);
    }

    #[test]
    fn envelope_roundtrips_through_canonical_encoding() {
        let env = Envelope {
            message: Message::Tx(sample_tx(vec![])),
            signature: Some(Signature(vec![7u8; 64])),
            public_key: Some(vec![8u8; 32]),
        };
        let bytes = encode_canonical(&env).unwrap();
        let back: Envelope = decode_canonical_limited(&bytes, 1 << 20).unwrap();
        assert_eq!(env, back);
    }

    #[test]
    fn unsigned_addr_message_roundtrips() {
        let env = Envelope::unsigned(Message::Addr(AddrPayload { peers: vec![] }));
        let bytes = encode_canonical(&env).unwrap();
        let back: Envelope = decode_canonical_limited(&bytes, 1 << 20).unwrap();
        assert_eq!(env, back);
    }
}
