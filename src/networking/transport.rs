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

//! Raw TCP transport: listen/connect/DNS resolution and the wire frame
//! envelope (magic + type tag + length-prefixed payload).

use crate::core::constants::{CONNECTION_TIMEOUT, MAX_BLOCK_SIZE, NETWORK_MAGIC};
use std::net::{IpAddr, SocketAddr};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{lookup_host, TcpListener, TcpStream};

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Underlying socket I/O failure.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    /// Connection attempt exceeded `CONNECTION_TIMEOUT`.
    #[error("unreachable")]
    Unreachable,
    /// DNS resolution failed or returned no records.
    #[error("resolve error")]
    ResolveError,
    /// Frame header magic did not match `NETWORK_MAGIC`.
    #[error("bad magic")]
    BadMagic,
    /// Declared frame length exceeds `MAX_BLOCK_SIZE`.
    #[error("oversized frame")]
    OversizedFrame,
    /// Canonical address bytes were malformed.
    #[error("bad address")]
    BadAddress,
}

/// Listen for inbound connections on `addr`.
pub async fn listen(addr: SocketAddr) -> Result<TcpListener, TransportError> {
    Ok(TcpListener::bind(addr).await?)
}

/// Connect to `addr`, failing `Unreachable` past `CONNECTION_TIMEOUT`.
pub async fn connect(addr: SocketAddr) -> Result<TcpStream, TransportError> {
    match tokio::time::timeout(CONNECTION_TIMEOUT, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(TransportError::Io(e)),
        Err(_) => Err(TransportError::Unreachable),
    }
}

/// Resolve a DNS seed name to a list of socket addresses.
pub async fn resolve_name(name: &str) -> Result<Vec<SocketAddr>, TransportError> {
    let addrs: Vec<SocketAddr> = lookup_host(name)
        .await
        .map_err(|_| TransportError::ResolveError)?
        .collect();
    if addrs.is_empty() {
        return Err(TransportError::ResolveError);
    }
    Ok(addrs)
}

/// Canonical, family-agnostic address bytes (4 bytes for IPv4, 16 for IPv6).
/// Stable across runs — used as the address-book identity key.
pub fn str_to_address(s: &str) -> Result<Vec<u8>, TransportError> {
    let ip: IpAddr = s.parse().map_err(|_| TransportError::BadAddress)?;
    Ok(match ip {
        IpAddr::V4(v4) => v4.octets().to_vec(),
        IpAddr::V6(v6) => v6.octets().to_vec(),
    })
}

/// Render canonical address bytes back to a human-readable string.
pub fn address_to_string(bytes: &[u8]) -> Result<String, TransportError> {
    match bytes.len() {
        4 => {
            let mut b = [0u8; 4];
            b.copy_from_slice(bytes);
            Ok(IpAddr::V4(b.into()).to_string())
        }
        16 => {
            let mut b = [0u8; 16];
            b.copy_from_slice(bytes);
            Ok(IpAddr::V6(b.into()).to_string())
        }
        _ => Err(TransportError::BadAddress),
    }
}

/// Render canonical address bytes + port back to a dialable `SocketAddr`.
pub fn address_to_socket(bytes: &[u8], port: u16) -> Result<SocketAddr, TransportError> {
    match bytes.len() {
        4 => {
            let mut b = [0u8; 4];
            b.copy_from_slice(bytes);
            Ok(SocketAddr::new(IpAddr::V4(b.into()), port))
        }
        16 => {
            let mut b = [0u8; 16];
            b.copy_from_slice(bytes);
            Ok(SocketAddr::new(IpAddr::V6(b.into()), port))
        }
        _ => Err(TransportError::BadAddress),
    }
}

/// Write one frame: `NETWORK_MAGIC` (u32 LE) + `type_tag` (u32 LE) + `len` (u32 LE) + `payload`.
///
/// Generic over the writer half so a split `TcpStream` (independent reader
/// and writer tasks) and a whole `TcpStream` both work.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    type_tag: u32,
    payload: &[u8],
) -> Result<(), TransportError> {
    if payload.len() > MAX_BLOCK_SIZE as usize {
        return Err(TransportError::OversizedFrame);
    }
    let mut header = [0u8; 12];
    header[0..4].copy_from_slice(&NETWORK_MAGIC.to_le_bytes());
    header[4..8].copy_from_slice(&type_tag.to_le_bytes());
    header[8..12].copy_from_slice(&(payload.len() as u32).to_le_bytes());
    writer.write_all(&header).await?;
    writer.write_all(payload).await?;
    Ok(())
}

/// Read one frame, rejecting bad magic or a declared length over `MAX_BLOCK_SIZE`.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<(u32, Vec<u8>), TransportError> {
    let mut header = [0u8; 12];
    reader.read_exact(&mut header).await?;

    let magic = u32::from_le_bytes(header[0..4].try_into().unwrap());
    if magic != NETWORK_MAGIC {
        return Err(TransportError::BadMagic);
    }
    let type_tag = u32::from_le_bytes(header[4..8].try_into().unwrap());
    let len = u32::from_le_bytes(header[8..12].try_into().unwrap());
    if len > MAX_BLOCK_SIZE {
        return Err(TransportError::OversizedFrame);
    }

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;
    Ok((type_tag, payload))
}
