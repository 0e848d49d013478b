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

//! Wire codec: `Envelope` <-> bytes, independent of the transport framing.
//!
//! Decoding is pure and peer-unaware: it never verifies `signature`/
//! `public_key`, and it never assigns misbehavior points. That is `Node`
//! dispatch policy (one point per `UnknownMessageType`/`DecodeFailure`).

use crate::core::constants::MAX_BLOCK_SIZE;
use crate::core::types::{decode_canonical_limited, encode_canonical, CodecError, Envelope};
use thiserror::Error;

/// Codec errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MessageCodecError {
    /// The payload could not be decoded as a well-formed `Envelope`.
    #[error("decode failure")]
    DecodeFailure,
    /// The payload could not be canonically encoded.
    #[error("encode failure")]
    EncodeFailure,
}

impl From<CodecError> for MessageCodecError {
    fn from(_: CodecError) -> Self {
        MessageCodecError::DecodeFailure
    }
}

/// Encode an envelope to its canonical wire bytes.
pub fn encode(env: &Envelope) -> Result<Vec<u8>, MessageCodecError> {
    encode_canonical(env).map_err(|_| MessageCodecError::EncodeFailure)
}

/// Decode an envelope from wire bytes, capped at `MAX_BLOCK_SIZE`.
///
/// A structurally valid but semantically unrecognized payload (e.g. a
/// variant tag bincode can't map) and a truncated/corrupt payload both
/// surface as `DecodeFailure` — `bincode` does not distinguish them, and the
/// dispatch layer treats both identically (one misbehavior point, drop).
pub fn decode(bytes: &[u8]) -> Result<Envelope, MessageCodecError> {
    decode_canonical_limited(bytes, MAX_BLOCK_SIZE as usize).map_err(|_| MessageCodecError::DecodeFailure)
}
