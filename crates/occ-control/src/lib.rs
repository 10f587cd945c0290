// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! occ Control - remotely-driven lifecycle state machine
//!
//! This crate embeds a user-supplied data-processing task and lets a remote
//! orchestrator drive it through a well-defined lifecycle over the
//! [`occ-protocol`](occ_protocol) wire protocol. Two variants share the
//! contract: the *embedded* variant owns the task and the machine, the
//! *proxy* variant mirrors the state machine of an externally-managed
//! messaging device and merely drives it.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Orchestrator                          │
//! └──────────────────────────────────────────────────────────────┘
//!        │ GetState / Transition / StateStream / EventStream
//!        ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │  ControlServer (QUIC, occ-protocol)                          │
//! │        │                      │ register/forward             │
//! │        ▼                      ▼                              │
//! │  TransitionCoordinator ──► Subscriber Registries             │
//! │        │      ▲              (states, device events)         │
//! │        ▼      │ periodic hooks                               │
//! │  TaskAdapter  └── Supervisor (1 ms tick)                     │
//! │   ├── EmbeddedAdapter ── ControlledTask (user code)          │
//! │   └── ProxyAdapter ───── DeviceControl (external runtime)    │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Lifecycle (embedded variant)
//!
//! ```text
//!            CONFIGURE                 START
//!  STANDBY ────────────► CONFIGURED ─────────► RUNNING
//!     ▲  ◄──────────────    │  ▲  ◄──────────    │ │
//!     │       RESET         │  │      STOP       │ │ PAUSE
//!     │                EXIT │  │ STOP            │ ▼
//!     │ RECOVER             │  └──────────── PAUSED │
//!     │                     ▼         RESUME ───────┘
//!   ERROR ────────────►   DONE
//!              EXIT
//! ```
//!
//! Any hook failure moves the machine to ERROR; RECOVER and EXIT are the
//! only ways out. DONE is terminal.
//!
//! # Usage
//!
//! ```no_run
//! use async_trait::async_trait;
//! use occ_control::{ControlConfig, ControlledTask, HookResult, Instance, PropertyTree};
//!
//! struct Reader;
//!
//! #[async_trait]
//! impl ControlledTask for Reader {
//!     fn name(&self) -> &str {
//!         "reader"
//!     }
//!
//!     async fn execute_configure(&mut self, properties: &PropertyTree) -> HookResult {
//!         println!("configured with {properties}");
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let instance = Instance::embedded(Reader, ControlConfig::default()).await?;
//!     instance.wait().await;
//!     instance.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`adapter`]: capability trait over the two task variants
//! - [`config`]: port and role resolution
//! - [`coordinator`]: transition serialization, settlement and publication
//! - [`device`]: messaging-device interface and proxy adapter
//! - [`error`]: transition error taxonomy with RPC mapping
//! - [`properties`]: argument decoding into structured configuration
//! - [`registry`]: state and event fan-out to streaming subscribers
//! - [`state`]: state and event enumerations with their tables
//! - [`task`]: the integrator-facing task trait

pub mod adapter;
pub mod config;
pub mod coordinator;
pub mod device;
pub mod error;
pub mod instance;
pub mod properties;
pub mod registry;
pub mod state;
pub mod task;

mod server;
mod supervisor;

pub use adapter::{EmbeddedAdapter, Invocation, TaskAdapter};
pub use config::{ControlConfig, DEFAULT_CONTROL_PORT};
pub use coordinator::{Coordinator, TransitionOutcome};
pub use device::{DeviceControl, DeviceControlError, ProxyAdapter, StateCallback};
pub use error::ControlError;
pub use instance::Instance;
pub use properties::{PropertyTree, PropertyValue};
pub use registry::{DeviceEvent, StateNotice, Subscription};
pub use state::{DeviceState, DeviceTransition, TaskEvent, TaskState};
pub use task::{ControlledTask, HookResult, RunPolicy, TaskError, TaskIdentity};
