// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Flowlet Protocol - node envelope wire format
//!
//! Every message exchanged between the nodes of a flowlet pipeline is an
//! [`Envelope`]: a request id for correlation, the name of the node that
//! published it, a message type, and either an opaque payload or an error.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    flowlet-protocol                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Domain: Envelope / Payload / MessageKind                   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Serialization: Protobuf (prost)                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Size control: gzip (flate2), detected by magic prefix      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use flowlet_protocol::{codec, Envelope, Payload};
//!
//! let envelope = Envelope::ok("req-1", "enricher", Payload::raw(bytes));
//! let wire = codec::encode(&envelope);
//!
//! let received = codec::decode_wire(&wire)?;
//! assert_eq!(received.request_id(), "req-1");
//! ```

pub mod codec;
pub mod envelope;
pub mod error;

// Wire types for the envelope protocol
pub mod envelope_proto {
    pub use crate::proto::*;
}

mod proto;

pub use codec::{
    GZIP_MAGIC, compress, decode, decode_wire, decompress, encode, is_compressed,
};
pub use envelope::{Envelope, MessageKind, Payload, new_request_id};
pub use error::{ProtocolError, Result};
