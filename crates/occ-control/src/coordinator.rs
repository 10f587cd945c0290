// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Serializes externally-requested transitions and publishes their effects.
//!
//! One mutex guards the state, every adapter hook invocation and the
//! transition in progress: a transition request, the supervisor's periodic
//! hooks and GetState all take the same lock, so user code never runs
//! concurrently with itself. A transition that blocks for a long time
//! (CONFIGURE) therefore delays supervisor iterations; this is intentional.

use std::sync::Arc;

use occ_protocol::control_proto::{ConfigEntry, StateChangeTrigger};
use tokio::sync::{Mutex, MutexGuard, watch};
use tracing::debug;

use crate::adapter::{Invocation, TaskAdapter};
use crate::error::{ControlError, Result};
use crate::registry::{DeviceEvent, Registry, StateNotice, Subscription};
use crate::state::TaskState;

/// Settled outcome of a transition request.
#[derive(Debug, Clone)]
pub struct TransitionOutcome {
    /// The last state actually visited while settling.
    pub state: String,
    /// The event that was processed.
    pub event: String,
    /// Whether the settling state matches the event's expected final state.
    pub ok: bool,
    /// Cause classification for the orchestrator.
    pub trigger: StateChangeTrigger,
}

/// Owner of the lifecycle lock, the adapter and the subscriber registries.
pub struct Coordinator {
    adapter: Mutex<Box<dyn TaskAdapter>>,
    states: Registry<StateNotice>,
    events: Registry<DeviceEvent>,
    machine_done: watch::Sender<bool>,
}

impl Coordinator {
    /// Wrap an adapter. The proxy adapter is handed the state registry so
    /// it can forward spontaneous device-driven changes.
    pub fn new(mut adapter: Box<dyn TaskAdapter>) -> Arc<Self> {
        let states = Registry::new();
        adapter.attach_state_registry(states.clone());
        let (machine_done, _) = watch::channel(false);
        Arc::new(Self {
            adapter: Mutex::new(adapter),
            states,
            events: Registry::new(),
            machine_done,
        })
    }

    /// Current state name, read under the lifecycle lock.
    pub async fn state(&self) -> String {
        self.adapter.lock().await.current_state()
    }

    /// Request a transition and block until it has visibly settled.
    pub async fn transition(
        &self,
        src_state: &str,
        event: &str,
        arguments: &[ConfigEntry],
    ) -> Result<TransitionOutcome> {
        let mut adapter = self.adapter.lock().await;

        let current = adapter.current_state();
        if src_state != current {
            return Err(ControlError::StateMismatch {
                src_state: src_state.to_string(),
                current,
            });
        }
        if adapter.is_done() {
            return Err(ControlError::Precondition { current });
        }

        let expected = adapter
            .expected_final_state(event)
            .ok_or_else(|| ControlError::InvalidEvent {
                event: event.to_string(),
            })?;

        debug!(src = %src_state, %current, %event, "transition requested");

        let visited = match adapter.invoke(event, arguments).await? {
            Invocation::InvalidEvent => {
                // The event is known but not routed from this state; the
                // machine is untouched and the reply says so.
                let state = adapter.current_state();
                return Ok(TransitionOutcome {
                    trigger: Self::trigger(&state, &expected),
                    ok: state == expected,
                    state,
                    event: event.to_string(),
                });
            }
            Invocation::Completed { visited } => visited,
        };

        if visited.is_empty() {
            return Err(ControlError::NoTransitionObserved {
                src_state: src_state.to_string(),
            });
        }

        let settled = visited.last().expect("visited is non-empty");
        let state = settled.state.clone();

        // Broadcast ahead of the terminal state notice: an event-stream
        // handler closing on DONE must still see this event.
        if state == TaskState::Done.to_string() {
            self.events.broadcast(DeviceEvent::BasicTaskTerminated);
        }

        // The proxy adapter forwards device-reported states itself, in the
        // order the device produced them; publishing here again would
        // duplicate every notification.
        if !adapter.forwards_state_changes() {
            for notice in &visited {
                self.states.broadcast(notice.clone());
            }
        }

        debug!(
            visited = %visited
                .iter()
                .map(|n| n.state.as_str())
                .collect::<Vec<_>>()
                .join(", "),
            "transition done"
        );

        Ok(TransitionOutcome {
            trigger: Self::trigger(&state, &expected),
            ok: state == expected,
            state,
            event: event.to_string(),
        })
    }

    fn trigger(state: &str, expected: &str) -> StateChangeTrigger {
        if state == "ERROR" {
            StateChangeTrigger::DeviceError
        } else if state == expected {
            StateChangeTrigger::Executor
        } else {
            StateChangeTrigger::DeviceIntentional
        }
    }

    /// Register a state subscriber together with an atomic snapshot of the
    /// current state, so stream handlers can replay it without racing a
    /// concurrent transition.
    pub async fn subscribe_states(&self, purpose: &str) -> (Subscription<StateNotice>, StateNotice) {
        let adapter = self.adapter.lock().await;
        let subscription = self.states.register(purpose);
        let state = adapter.current_state();
        let intermediate = adapter.is_intermediate_state(&state);
        (
            subscription,
            StateNotice {
                state,
                intermediate,
            },
        )
    }

    /// Register a device-event subscriber.
    pub fn subscribe_events(&self, purpose: &str) -> Subscription<DeviceEvent> {
        self.events.register(purpose)
    }

    /// Observe the machine-done flag.
    pub fn machine_done(&self) -> watch::Receiver<bool> {
        self.machine_done.subscribe()
    }

    pub(crate) async fn lock_adapter(&self) -> MutexGuard<'_, Box<dyn TaskAdapter>> {
        self.adapter.lock().await
    }

    pub(crate) fn publish_state(&self, notice: StateNotice) {
        self.states.broadcast(notice);
    }

    pub(crate) fn publish_event(&self, event: DeviceEvent) {
        self.events.broadcast(event);
    }

    pub(crate) fn set_machine_done(&self) {
        self.machine_done.send_replace(true);
    }
}
