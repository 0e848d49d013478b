// Copyright (c) 2026 Concilium
// Licensed under the Apache-2.0 License.

#![no_main]
#![forbid(unsafe_code)]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Decoding is peer-unaware and must never panic on arbitrary bytes,
    // however malformed or truncated.
    let _ = concilium_node::networking::codec::decode(data);
});
