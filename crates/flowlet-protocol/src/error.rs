// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Protocol error types.

use thiserror::Error;

/// Errors raised while encoding, decoding or (de)compressing envelopes.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The bytes are not a valid protobuf envelope.
    #[error("envelope decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    /// The bytes are not a valid gzip stream.
    #[error("decompression failed: {0}")]
    Decompress(String),

    /// The gzip encoder failed.
    #[error("compression failed: {0}")]
    Compress(#[source] std::io::Error),

    /// A payload could not be converted to or from a typed value.
    #[error("payload serialization error: {0}")]
    Payload(String),
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        ProtocolError::Payload(err.to_string())
    }
}

/// Type alias for protocol results.
pub type Result<T> = std::result::Result<T, ProtocolError>;
