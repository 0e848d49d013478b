// Copyright (c) 2026 Concilium
// Licensed under the Apache-2.0 License.

#![no_main]
#![forbid(unsafe_code)]

use arbitrary::Arbitrary;
use concilium_node::core::types::{
    ConciliumId, ConsensusMsg, Envelope, H256, Message, Signature, ValidatorId, Vote,
};
use concilium_node::networking::codec::{decode, encode};
use libfuzzer_sys::fuzz_target;

#[derive(Clone, Debug, Arbitrary)]
struct Input {
    concilium_id: u32,
    height: u64,
    round: u64,
    epoch: u64,
    msg_counter: u64,
    sent_ts_ms: u64,
    ttl_ms: u32,
    block_hash: [u8; 32],
    voter: Vec<u8>,
    signature: Vec<u8>,
}

fuzz_target!(|inp: Input| {
    let vote = Vote {
        concilium_id: ConciliumId(inp.concilium_id),
        height: inp.height,
        round: inp.round,
        epoch: inp.epoch,
        msg_counter: inp.msg_counter,
        sent_ts_ms: inp.sent_ts_ms,
        ttl_ms: inp.ttl_ms,
        block_hash: H256::from_bytes(inp.block_hash),
        voter: ValidatorId(inp.voter),
        signature: Signature(inp.signature),
    };
    let env = Envelope::unsigned(Message::WBlockVote(ConsensusMsg::Vote(vote)));

    let Ok(bytes) = encode(&env) else { return };
    let decoded = decode(&bytes).expect("a message we just encoded must decode");
    assert_eq!(decoded, env);
});
