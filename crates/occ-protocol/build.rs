// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
use std::io::Result;

fn main() -> Result<()> {
    unsafe {
        std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path().unwrap());
    }

    // Compile the control protocol (orchestrator <-> controlled task)
    prost_build::compile_protos(&["proto/occ.proto"], &["proto/"])?;

    Ok(())
}
