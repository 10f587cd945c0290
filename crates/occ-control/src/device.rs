// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Proxy adapter over an externally-managed messaging device.
//!
//! The device runtime owns its own state machine; this adapter merely
//! drives it and mirrors what it reports. Transitions are issued through
//! [`DeviceControl`] and settle asynchronously: the device reports each
//! reached state through a subscribed callback, and the adapter waits past
//! the auto-traversed intermediate states before answering.

use std::sync::Arc;

use async_trait::async_trait;
use occ_protocol::control_proto::ConfigEntry;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::adapter::{Invocation, TaskAdapter};
use crate::error::ControlError;
use crate::properties::{self, PropertyValue};
use crate::registry::{Registry, StateNotice, subscription_id};
use crate::state::{DeviceState, DeviceTransition};
use crate::task::{RunPolicy, TaskError};

/// Callback invoked by the device runtime for every reached state.
pub type StateCallback = Box<dyn Fn(DeviceState) + Send + Sync>;

/// Failure reported by the device control interface.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct DeviceControlError(pub String);

/// Control interface of the external messaging device.
///
/// This is the seam to the device runtime; the concrete implementation
/// lives outside this library. Callbacks are invoked synchronously by the
/// device for every state it reaches, in order.
pub trait DeviceControl: Send + Sync + 'static {
    /// The state the device currently reports.
    fn current_state(&self) -> DeviceState;

    /// Subscribe `callback` to state-change notifications under `id`.
    fn subscribe_state_changes(&self, id: &str, callback: StateCallback);

    /// Remove the subscription registered under `id`.
    fn unsubscribe_state_changes(&self, id: &str);

    /// Issue a device transition. Fails when this controller does not hold
    /// device control.
    fn request_transition(&self, transition: DeviceTransition) -> Result<(), DeviceControlError>;

    /// Inject one property through the device property interface.
    fn set_property(&self, key: &str, value: PropertyValue) -> Result<(), DeviceControlError>;

    /// Give up device control; called once the device reaches EXITING.
    fn release_control(&self) {}
}

/// Adapter mirroring an external device's lifecycle.
pub struct ProxyAdapter<D: DeviceControl> {
    device: Arc<D>,
    forward_id: Option<String>,
}

impl<D: DeviceControl> ProxyAdapter<D> {
    /// Wrap a device controller.
    pub fn new(device: Arc<D>) -> Self {
        Self {
            device,
            forward_id: None,
        }
    }
}

impl<D: DeviceControl> Drop for ProxyAdapter<D> {
    fn drop(&mut self) {
        if let Some(id) = self.forward_id.take() {
            self.device.unsubscribe_state_changes(&id);
        }
    }
}

/// Unsubscribes the transition observer on every exit path.
struct Unsubscribe<'a, D: DeviceControl> {
    device: &'a D,
    id: &'a str,
}

impl<D: DeviceControl> Drop for Unsubscribe<'_, D> {
    fn drop(&mut self) {
        self.device.unsubscribe_state_changes(self.id);
    }
}

/// Drain the argument list through the device property interface, applying
/// the channel typing rules. Malformed typed-subtree entries are dropped.
fn push_configuration<D: DeviceControl>(device: &D, entries: &[ConfigEntry]) {
    for entry in entries {
        match properties::decode_entry(&entry.key, &entry.value) {
            Ok(injection) => match device.set_property(&injection.key, injection.value) {
                Ok(()) => debug!(key = %injection.key, "property injected"),
                Err(e) => warn!(key = %injection.key, "property injection failed: {e}"),
            },
            Err(e) => warn!("dropping configuration entry: {e}"),
        }
    }
}

#[async_trait]
impl<D: DeviceControl> TaskAdapter for ProxyAdapter<D> {
    async fn invoke(
        &mut self,
        event: &str,
        arguments: &[ConfigEntry],
    ) -> Result<Invocation, ControlError> {
        let Ok(transition) = event.parse::<DeviceTransition>() else {
            return Err(ControlError::InvalidEvent {
                event: event.to_string(),
            });
        };

        let (tx, mut rx) = mpsc::unbounded_channel();
        let observer_id = subscription_id("Transition");

        let entries = arguments.to_vec();
        let injector = self.device.clone();
        let callback: StateCallback = Box::new(move |reached| {
            // Configuration must be pushed while the device is initializing.
            if reached == DeviceState::InitializingDevice {
                push_configuration(injector.as_ref(), &entries);
            }
            let _ = tx.send(reached);
        });

        self.device.subscribe_state_changes(&observer_id, callback);
        let _observer = Unsubscribe {
            device: self.device.as_ref(),
            id: &observer_id,
        };

        // The run number must be pushed immediately before RUN, not on
        // state entry.
        if transition == DeviceTransition::Run {
            for entry in arguments {
                if let Err(e) = self
                    .device
                    .set_property(&entry.key, PropertyValue::String(entry.value.clone()))
                {
                    warn!("cannot push RUN transition arguments: {e}");
                }
            }
        }

        self.device
            .request_transition(transition)
            .map_err(|e| ControlError::ControlLost {
                reason: e.to_string(),
            })?;

        let mut visited: Vec<DeviceState> = Vec::new();
        loop {
            if let Some(last) = visited.last()
                && !last.is_intermediate()
            {
                break;
            }
            match rx.recv().await {
                Some(state) => {
                    debug!(reached = %state, "transition reached state");
                    visited.push(state);
                }
                None => break,
            }
        }

        if visited.last() == Some(&DeviceState::Exiting) {
            debug!("releasing device control");
            self.device.release_control();
        }

        Ok(Invocation::Completed {
            visited: visited
                .into_iter()
                .map(|s| StateNotice {
                    state: s.to_string(),
                    intermediate: s.is_intermediate(),
                })
                .collect(),
        })
    }

    fn current_state(&self) -> String {
        self.device.current_state().to_string()
    }

    fn expected_final_state(&self, event: &str) -> Option<String> {
        event
            .parse::<DeviceTransition>()
            .ok()
            .map(|t| t.expected_final_state().to_string())
    }

    fn is_intermediate_state(&self, state: &str) -> bool {
        state
            .parse::<DeviceState>()
            .map(DeviceState::is_intermediate)
            .unwrap_or(false)
    }

    fn forwards_state_changes(&self) -> bool {
        true
    }

    fn attach_state_registry(&mut self, states: Registry<StateNotice>) {
        let id = subscription_id("StateForward");
        self.device.subscribe_state_changes(
            &id,
            Box::new(move |reached| {
                states.broadcast(StateNotice {
                    state: reached.to_string(),
                    intermediate: reached.is_intermediate(),
                });
            }),
        );
        self.forward_id = Some(id);
    }

    async fn periodic_running(&mut self) -> Result<RunPolicy, TaskError> {
        Ok(RunPolicy::Continue)
    }

    async fn periodic_check(&mut self) -> Result<(), TaskError> {
        Ok(())
    }

    fn set_error(&mut self) {
        // The device runtime owns its error state.
    }

    fn is_done(&self) -> bool {
        self.device.current_state() == DeviceState::Exiting
    }
}
