// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
use std::io::Result;

fn main() -> Result<()> {
    // Envelope protocol (exchanged by every node of a pipeline)
    prost_build::compile_protos(&["proto/envelope.proto"], &["proto/"])?;

    Ok(())
}
