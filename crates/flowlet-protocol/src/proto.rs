// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Protobuf wire types for the node envelope, generated from
//! `proto/envelope.proto`.
//!
//! Prefer the domain [`crate::Envelope`] over these types; it enforces the
//! payload/error invariants that the raw wire struct cannot.

include!(concat!(env!("OUT_DIR"), "/flowlet.envelope.rs"));
