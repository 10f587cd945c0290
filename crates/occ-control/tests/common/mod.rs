// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for occ-control E2E tests.
//!
//! Provides a TestContext that runs a real control endpoint on an ephemeral
//! port with a real QUIC client connected to it.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use occ_control::device::StateCallback;
use occ_control::{
    ControlConfig, ControlledTask, DeviceControl, DeviceControlError, DeviceState,
    DeviceTransition, Instance, PropertyValue,
};
use occ_protocol::client::ControlClient;
use occ_protocol::control_proto::ConfigEntry;

/// Test context managing an instance and a connected client.
pub struct TestContext {
    pub instance: Instance,
    pub client: ControlClient,
}

impl TestContext {
    /// Start an embedded-variant endpoint around `task`.
    pub async fn embedded(task: impl ControlledTask) -> Self {
        let instance = Instance::embedded(task, test_config())
            .await
            .expect("failed to start instance");
        Self::connect(instance).await
    }

    /// Start a proxy-variant endpoint around `device`.
    pub async fn proxy<D: DeviceControl>(device: Arc<D>) -> Self {
        let instance = Instance::proxy(device, test_config())
            .await
            .expect("failed to start instance");
        Self::connect(instance).await
    }

    async fn connect(instance: Instance) -> Self {
        let server_addr: SocketAddr = format!("127.0.0.1:{}", instance.local_addr().port())
            .parse()
            .unwrap();
        let client = ControlClient::insecure(server_addr).expect("failed to create client");
        client.connect().await.expect("failed to connect");
        Self { instance, client }
    }
}

fn test_config() -> ControlConfig {
    ControlConfig {
        control_port: Some(0),
        role: Some("test".to_string()),
    }
}

pub fn entry(key: &str, value: &str) -> ConfigEntry {
    ConfigEntry {
        key: key.to_string(),
        value: value.to_string(),
    }
}

// ============================================================================
// Scripted messaging device
// ============================================================================

/// In-process device runtime: each commanded transition walks a fixed path
/// of reported states, invoking subscribed callbacks synchronously.
pub struct MockDevice {
    state: Mutex<DeviceState>,
    callbacks: Mutex<HashMap<String, StateCallback>>,
    pub properties: Mutex<Vec<(String, PropertyValue)>>,
    pub released: Mutex<bool>,
}

impl MockDevice {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(DeviceState::Idle),
            callbacks: Mutex::new(HashMap::new()),
            properties: Mutex::new(Vec::new()),
            released: Mutex::new(false),
        })
    }

    fn report(&self, state: DeviceState) {
        *self.state.lock().unwrap() = state;
        let callbacks = self.callbacks.lock().unwrap();
        for callback in callbacks.values() {
            callback(state);
        }
    }

    fn path(transition: DeviceTransition) -> Vec<DeviceState> {
        match transition {
            DeviceTransition::InitDevice => {
                vec![DeviceState::InitializingDevice, DeviceState::Initialized]
            }
            DeviceTransition::CompleteInit => vec![DeviceState::Initialized],
            DeviceTransition::Bind => vec![DeviceState::Binding, DeviceState::Bound],
            DeviceTransition::Connect => vec![DeviceState::Connecting, DeviceState::DeviceReady],
            DeviceTransition::InitTask => vec![DeviceState::InitializingTask, DeviceState::Ready],
            DeviceTransition::Run => vec![DeviceState::Running],
            DeviceTransition::Stop => vec![DeviceState::Ready],
            DeviceTransition::ResetTask => {
                vec![DeviceState::ResettingTask, DeviceState::DeviceReady]
            }
            DeviceTransition::ResetDevice => {
                vec![DeviceState::ResettingDevice, DeviceState::Idle]
            }
            DeviceTransition::End => vec![DeviceState::Exiting],
            DeviceTransition::ErrorFound => vec![DeviceState::Error],
        }
    }
}

impl DeviceControl for MockDevice {
    fn current_state(&self) -> DeviceState {
        *self.state.lock().unwrap()
    }

    fn subscribe_state_changes(&self, id: &str, callback: StateCallback) {
        self.callbacks
            .lock()
            .unwrap()
            .insert(id.to_string(), callback);
    }

    fn unsubscribe_state_changes(&self, id: &str) {
        self.callbacks.lock().unwrap().remove(id);
    }

    fn request_transition(&self, transition: DeviceTransition) -> Result<(), DeviceControlError> {
        for state in Self::path(transition) {
            self.report(state);
        }
        Ok(())
    }

    fn set_property(&self, key: &str, value: PropertyValue) -> Result<(), DeviceControlError> {
        self.properties
            .lock()
            .unwrap()
            .push((key.to_string(), value));
        Ok(())
    }

    fn release_control(&self) {
        *self.released.lock().unwrap() = true;
    }
}
