// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Control endpoint configuration.
//!
//! Explicit options win over environment variables, which win over the
//! defaults. Command-line parsing belongs to the embedding program; it
//! hands any parsed values in through [`ControlConfig`].

use std::net::SocketAddr;

/// Fallback value for the control port.
pub const DEFAULT_CONTROL_PORT: u16 = 47100;

/// Environment variable queried for the control port.
pub const CONTROL_PORT_ENV: &str = "OCC_CONTROL_PORT";

/// Environment variable queried for the role.
pub const ROLE_ENV: &str = "OCC_ROLE";

/// Fallback role.
pub const DEFAULT_ROLE: &str = "default";

/// Options for one control endpoint.
#[derive(Debug, Clone, Default)]
pub struct ControlConfig {
    /// Port the endpoint listens on. `None` falls back to
    /// `OCC_CONTROL_PORT`, then to [`DEFAULT_CONTROL_PORT`].
    pub control_port: Option<u16>,
    /// Role attached to the task for orchestrator-side disambiguation.
    /// `None` falls back to `OCC_ROLE`, then to `"default"`.
    pub role: Option<String>,
}

impl ControlConfig {
    /// Resolved control port.
    pub fn control_port(&self) -> u16 {
        self.control_port
            .or_else(|| {
                std::env::var(CONTROL_PORT_ENV)
                    .ok()
                    .and_then(|v| v.parse().ok())
            })
            .unwrap_or(DEFAULT_CONTROL_PORT)
    }

    /// Resolved role.
    pub fn role(&self) -> String {
        self.role
            .clone()
            .or_else(|| std::env::var(ROLE_ENV).ok())
            .unwrap_or_else(|| DEFAULT_ROLE.to_string())
    }

    /// Listening address: all interfaces on the resolved port.
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.control_port()))
    }
}
