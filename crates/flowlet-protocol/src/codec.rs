// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Envelope codec and payload compression.
//!
//! Messages on the wire are either a bare protobuf envelope or a gzip
//! stream wrapping one. The two are told apart by the gzip magic bytes:
//! - `0x1f 0x8b ...`: gzip-compressed envelope
//! - anything else: raw protobuf envelope

use std::io::{Read, Write};

use bytes::Bytes;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use prost::Message;
use tracing::debug;

use crate::envelope::Envelope;
use crate::error::{ProtocolError, Result};
use crate::proto;

/// Two-byte gzip header prefix.
pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Serialize an envelope to its canonical protobuf bytes.
pub fn encode(envelope: &Envelope) -> Bytes {
    Bytes::from(envelope.to_proto().encode_to_vec())
}

/// Parse protobuf bytes into an envelope.
pub fn decode(bytes: &[u8]) -> Result<Envelope> {
    let wire = proto::Envelope::decode(bytes)?;
    Ok(Envelope::from(wire))
}

/// Parse bytes as received from the broker, decompressing first if needed.
pub fn decode_wire(bytes: &[u8]) -> Result<Envelope> {
    if is_compressed(bytes) {
        let inflated = decompress(bytes)?;
        debug!(
            compressed = bytes.len(),
            size = inflated.len(),
            "Inflated compressed envelope"
        );
        decode(&inflated)
    } else {
        decode(bytes)
    }
}

/// True iff the bytes start with the gzip magic prefix.
pub fn is_compressed(bytes: &[u8]) -> bool {
    bytes.starts_with(&GZIP_MAGIC)
}

/// Gzip-compress the bytes.
pub fn compress(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(bytes.len() / 2), Compression::default());
    encoder.write_all(bytes).map_err(ProtocolError::Compress)?;
    encoder.finish().map_err(ProtocolError::Compress)
}

/// Inflate a gzip stream.
pub fn decompress(bytes: &[u8]) -> Result<Vec<u8>> {
    if !is_compressed(bytes) {
        return Err(ProtocolError::Decompress(
            "missing gzip header".to_string(),
        ));
    }
    let mut decoder = GzDecoder::new(bytes);
    let mut out = Vec::with_capacity(bytes.len() * 2);
    decoder.read_to_end(&mut out).map_err(|e| {
        debug!(size = bytes.len(), error = %e, "Gzip stream rejected");
        ProtocolError::Decompress(e.to_string())
    })?;
    Ok(out)
}
