// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! occ Protocol - QUIC + Protobuf control wire protocol
//!
//! This crate provides the wire protocol between an orchestrator and a
//! single remotely-controlled task.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      occ-protocol                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  RPC Layer: Request/Response + Server Streaming             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Serialization: Protobuf (prost)                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Transport: QUIC (quinn)                                    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Methods
//!
//! | Method | Kind | Description |
//! |--------|------|-------------|
//! | `GetState` | unary | Current lifecycle state + pid |
//! | `Transition` | unary | Request a transition, blocks until settled |
//! | `StateStream` | server-streaming | Every observed state change |
//! | `EventStream` | server-streaming | Device events (end of stream, errors) |
//!
//! # Usage
//!
//! ```ignore
//! use occ_protocol::ControlClient;
//!
//! let client = ControlClient::insecure("127.0.0.1:47100".parse()?)?;
//! client.connect().await?;
//!
//! let reply = client.get_state().await?;
//! println!("task is {} (pid {})", reply.state, reply.pid);
//!
//! let reply = client.transition("STANDBY", "CONFIGURE", vec![]).await?;
//! assert!(reply.ok);
//! ```

pub mod client;
pub mod frame;
pub mod server;

// Re-export generated protobuf types for the control protocol
pub mod control_proto {
    include!(concat!(env!("OUT_DIR"), "/occ.control.rs"));
}

// Re-export main types
pub use client::{ClientError, ControlClient, ControlClientConfig, ServerStream};
pub use frame::{BiStream, Frame, FrameError, FramedStream, MessageType};
pub use server::{
    CallStream, ControlConnection, ControlListener, ControlListenerConfig, ServerError,
};
