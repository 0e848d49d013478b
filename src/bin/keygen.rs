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

//! Generate (or load) a validator's Ed25519 key under `<data-dir>/validator.key`
//! and print its public key as hex. Honors `CONCILIUM_KEY_PASSPHRASE` for
//! at-rest encryption, matching the keystore the node itself opens.

use anyhow::Result;
use concilium_node::core::security::keystore::FileEd25519Backend;
use std::path::PathBuf;

fn main() -> Result<()> {
    let out_dir = std::env::args().nth(1).unwrap_or_else(|| "data".to_string());
    std::fs::create_dir_all(&out_dir)?;

    let mut key_path = PathBuf::from(out_dir);
    key_path.push("validator.key");

    let backend = FileEd25519Backend::load_or_create(&key_path)?;
    println!("{}", hex::encode(backend.public_key()));
    Ok(())
}
