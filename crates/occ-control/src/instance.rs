// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Front-end tying the machine together.
//!
//! An [`Instance`] owns the coordinator, the QUIC control server and the
//! supervisor. Embedding programs construct one around their task (or
//! device controller), then park on [`Instance::wait`] until the
//! orchestrator drives the machine to its terminal state.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use occ_protocol::server::{ControlListener, ServerError};

use crate::adapter::{EmbeddedAdapter, TaskAdapter};
use crate::config::ControlConfig;
use crate::coordinator::Coordinator;
use crate::device::{DeviceControl, ProxyAdapter};
use crate::server;
use crate::supervisor;
use crate::task::ControlledTask;

/// A running control endpoint around one controlled task.
pub struct Instance {
    coordinator: Arc<Coordinator>,
    cancel: CancellationToken,
    local_addr: SocketAddr,
    role: String,
    server: JoinHandle<()>,
    supervisor: JoinHandle<()>,
}

impl Instance {
    /// Start an endpoint around an embedded task.
    pub async fn embedded(
        task: impl ControlledTask,
        config: ControlConfig,
    ) -> Result<Self, ServerError> {
        let role = config.role();
        let adapter = EmbeddedAdapter::new(task, role.clone());
        Self::start(Box::new(adapter), role, config).await
    }

    /// Start an endpoint mirroring an externally-managed device.
    pub async fn proxy<D: DeviceControl>(
        device: Arc<D>,
        config: ControlConfig,
    ) -> Result<Self, ServerError> {
        let role = config.role();
        let adapter = ProxyAdapter::new(device);
        Self::start(Box::new(adapter), role, config).await
    }

    async fn start(
        adapter: Box<dyn TaskAdapter>,
        role: String,
        config: ControlConfig,
    ) -> Result<Self, ServerError> {
        let coordinator = Coordinator::new(adapter);

        let listener = ControlListener::self_signed(config.bind_addr())?;
        let local_addr = listener.local_addr()?;

        let cancel = CancellationToken::new();

        let supervisor = tokio::spawn(supervisor::run(coordinator.clone(), cancel.clone()));

        let server_coordinator = coordinator.clone();
        let server_cancel = cancel.clone();
        let server = tokio::spawn(async move {
            if let Err(e) =
                server::run_control_server(listener, server_coordinator, server_cancel).await
            {
                error!("control server error: {e}");
            }
        });

        info!(addr = %local_addr, role = %role, "control endpoint ready");

        Ok(Self {
            coordinator,
            cancel,
            local_addr,
            role,
            server,
            supervisor,
        })
    }

    /// Address the control server is listening on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Role resolved at startup.
    pub fn role(&self) -> &str {
        &self.role
    }

    /// The coordinator driving this instance.
    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    /// Wait until the machine reaches its terminal state.
    pub async fn wait(&self) {
        let mut done = self.coordinator.machine_done();
        while !*done.borrow_and_update() {
            if done.changed().await.is_err() {
                break;
            }
        }
    }

    /// Tear the endpoint down: the supervisor exits on its next iteration
    /// and open streams are closed.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.supervisor.await;
        let _ = self.server.await;
        info!("control endpoint stopped");
    }
}
