// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The adapter boundary between the coordinator and a controlled task.
//!
//! Two implementations share the capability set: [`EmbeddedAdapter`] owns a
//! user-supplied [`ControlledTask`] and runs the state machine itself;
//! [`ProxyAdapter`](crate::device::ProxyAdapter) relays transitions to an
//! externally-managed messaging device and mirrors its reported state.

use async_trait::async_trait;
use occ_protocol::control_proto::ConfigEntry;
use tracing::{debug, warn};

use crate::error::ControlError;
use crate::properties;
use crate::registry::{Registry, StateNotice};
use crate::state::{TaskEvent, TaskState};
use crate::task::{ControlledTask, HookResult, RunPolicy, TaskError, TaskIdentity};

/// Outcome of an adapter invocation.
#[derive(Debug)]
pub enum Invocation {
    /// The transition was issued; these states were reached, in order.
    Completed {
        /// Every state visited, the settling state last.
        visited: Vec<StateNotice>,
    },
    /// The event exists but is not routed from the current state. The state
    /// is unchanged and the reply carries `ok = false`.
    InvalidEvent,
}

/// Variant-independent capability set over a controlled task.
#[async_trait]
pub trait TaskAdapter: Send {
    /// Perform the transition for `event`, blocking until it settles.
    async fn invoke(
        &mut self,
        event: &str,
        arguments: &[ConfigEntry],
    ) -> Result<Invocation, ControlError>;

    /// The adapter's view of the current state, as an uppercase name.
    fn current_state(&self) -> String;

    /// Expected settling state of `event`, or `None` for an event unknown
    /// to this variant.
    fn expected_final_state(&self, event: &str) -> Option<String>;

    /// Whether `state` is auto-traversed (proxy variant only).
    fn is_intermediate_state(&self, _state: &str) -> bool {
        false
    }

    /// Whether this adapter publishes its own state changes to the state
    /// registry, making coordinator-side publication redundant.
    fn forwards_state_changes(&self) -> bool {
        false
    }

    /// Hand the adapter the state registry it may forward changes to.
    fn attach_state_registry(&mut self, _states: Registry<StateNotice>) {}

    /// Periodic work hook, driven by the supervisor in the running state.
    async fn periodic_running(&mut self) -> Result<RunPolicy, TaskError>;

    /// Periodic health check, driven by the supervisor outside error.
    async fn periodic_check(&mut self) -> Result<(), TaskError>;

    /// Force the machine into the error state (supervisor verdicts).
    fn set_error(&mut self);

    /// Whether the machine reached its terminal state.
    fn is_done(&self) -> bool;
}

/// Adapter owning an embedded [`ControlledTask`].
pub struct EmbeddedAdapter<T> {
    task: T,
    state: TaskState,
    identity: TaskIdentity,
}

impl<T: ControlledTask> EmbeddedAdapter<T> {
    /// Wrap a task. The machine is promoted to standby immediately; the
    /// control endpoint is not reachable before that.
    pub fn new(task: T, role: impl Into<String>) -> Self {
        let identity = TaskIdentity::new(task.name(), role);
        Self {
            task,
            state: TaskState::Standby,
            identity,
        }
    }

    /// Identity of the wrapped task.
    pub fn identity(&self) -> &TaskIdentity {
        &self.identity
    }

    /// Direct access to the wrapped task.
    pub fn task(&self) -> &T {
        &self.task
    }
}

#[async_trait]
impl<T: ControlledTask> TaskAdapter for EmbeddedAdapter<T> {
    async fn invoke(
        &mut self,
        event: &str,
        arguments: &[ConfigEntry],
    ) -> Result<Invocation, ControlError> {
        let Ok(event) = event.parse::<TaskEvent>() else {
            return Err(ControlError::InvalidEvent {
                event: event.to_string(),
            });
        };

        let properties = properties::decode_tree(arguments);
        let run_number = properties::run_number(arguments);
        self.identity.set_run_number(run_number);

        debug!(
            task = self.identity.name(),
            state = %self.state,
            %event,
            run_number,
            "processing event"
        );

        let current = self.state;
        let outcome: Option<(HookResult, TaskState)> = match (current, event) {
            (TaskState::Standby, TaskEvent::Configure) => Some((
                self.task.execute_configure(&properties).await,
                TaskState::Configured,
            )),
            (TaskState::Standby, TaskEvent::Exit) => {
                Some((self.task.execute_exit().await, TaskState::Done))
            }
            (TaskState::Configured, TaskEvent::Start) => Some((
                self.task.execute_start(run_number).await,
                TaskState::Running,
            )),
            (TaskState::Configured, TaskEvent::Reset) => {
                Some((self.task.execute_reset().await, TaskState::Standby))
            }
            (TaskState::Configured, TaskEvent::Exit) => {
                Some((self.task.execute_exit().await, TaskState::Done))
            }
            (TaskState::Running, TaskEvent::Stop) => {
                Some((self.task.execute_stop().await, TaskState::Configured))
            }
            (TaskState::Running, TaskEvent::Pause) => {
                Some((self.task.execute_pause().await, TaskState::Paused))
            }
            (TaskState::Paused, TaskEvent::Resume) => {
                Some((self.task.execute_resume().await, TaskState::Running))
            }
            (TaskState::Paused, TaskEvent::Stop) => {
                Some((self.task.execute_stop().await, TaskState::Configured))
            }
            (TaskState::Error, TaskEvent::Recover) => {
                Some((self.task.execute_recover().await, TaskState::Standby))
            }
            (TaskState::Error, TaskEvent::Exit) => {
                Some((self.task.execute_exit().await, TaskState::Done))
            }
            _ => None,
        };

        let Some((hook_result, next)) = outcome else {
            warn!(
                task = self.identity.name(),
                state = %current,
                %event,
                "invalid event received"
            );
            return Ok(Invocation::InvalidEvent);
        };

        let reached = match hook_result {
            Ok(()) => next,
            Err(e) => {
                warn!(
                    task = self.identity.name(),
                    %event,
                    error = %e,
                    "transition hook failed"
                );
                TaskState::Error
            }
        };

        debug!(
            task = self.identity.name(),
            state = %current,
            new_state = %reached,
            "event processed"
        );
        self.state = reached;

        Ok(Invocation::Completed {
            visited: vec![StateNotice::stable(reached.to_string())],
        })
    }

    fn current_state(&self) -> String {
        self.state.to_string()
    }

    fn expected_final_state(&self, event: &str) -> Option<String> {
        event
            .parse::<TaskEvent>()
            .ok()
            .map(|e| e.expected_final_state().to_string())
    }

    async fn periodic_running(&mut self) -> Result<RunPolicy, TaskError> {
        self.task.iterate_running().await
    }

    async fn periodic_check(&mut self) -> Result<(), TaskError> {
        self.task.iterate_check().await
    }

    fn set_error(&mut self) {
        self.state = TaskState::Error;
    }

    fn is_done(&self) -> bool {
        self.state == TaskState::Done
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::properties::PropertyTree;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct Recorder {
        configured: Arc<AtomicU32>,
        started_with: Arc<AtomicU32>,
        fail_configure: bool,
    }

    #[async_trait]
    impl ControlledTask for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        async fn execute_configure(&mut self, _properties: &PropertyTree) -> crate::task::HookResult {
            if self.fail_configure {
                return Err("configure failed".into());
            }
            self.configured.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn execute_start(&mut self, run_number: u32) -> crate::task::HookResult {
            self.started_with.store(run_number, Ordering::SeqCst);
            Ok(())
        }
    }

    fn entry(key: &str, value: &str) -> ConfigEntry {
        ConfigEntry {
            key: key.to_string(),
            value: value.to_string(),
        }
    }

    #[tokio::test]
    async fn test_starts_in_standby() {
        let adapter = EmbeddedAdapter::new(Recorder::default(), "default");
        assert_eq!(adapter.current_state(), "STANDBY");
        assert!(!adapter.is_done());
    }

    #[tokio::test]
    async fn test_happy_path_dispatch() {
        let mut adapter = EmbeddedAdapter::new(Recorder::default(), "default");

        let invocation = adapter.invoke("CONFIGURE", &[]).await.unwrap();
        match invocation {
            Invocation::Completed { visited } => {
                assert_eq!(visited, vec![StateNotice::stable("CONFIGURED")]);
            }
            other => panic!("unexpected invocation: {other:?}"),
        }
        assert_eq!(adapter.current_state(), "CONFIGURED");

        adapter.invoke("START", &[]).await.unwrap();
        assert_eq!(adapter.current_state(), "RUNNING");
        adapter.invoke("STOP", &[]).await.unwrap();
        assert_eq!(adapter.current_state(), "CONFIGURED");
        adapter.invoke("EXIT", &[]).await.unwrap();
        assert_eq!(adapter.current_state(), "DONE");
        assert!(adapter.is_done());
    }

    #[tokio::test]
    async fn test_run_number_written_before_start() {
        let mut adapter = EmbeddedAdapter::new(Recorder::default(), "default");
        let started_with = adapter.task().started_with.clone();

        adapter.invoke("CONFIGURE", &[]).await.unwrap();
        adapter
            .invoke("START", &[entry("runNumber", "1234")])
            .await
            .unwrap();

        assert_eq!(started_with.load(Ordering::SeqCst), 1234);
        assert_eq!(adapter.identity().run_number(), 1234);
    }

    #[tokio::test]
    async fn test_invalid_event_in_state_leaves_state_unchanged() {
        let mut adapter = EmbeddedAdapter::new(Recorder::default(), "default");
        let invocation = adapter.invoke("STOP", &[]).await.unwrap();
        assert!(matches!(invocation, Invocation::InvalidEvent));
        assert_eq!(adapter.current_state(), "STANDBY");
    }

    #[tokio::test]
    async fn test_unknown_event_is_an_error() {
        let mut adapter = EmbeddedAdapter::new(Recorder::default(), "default");
        let result = adapter.invoke("WARP", &[]).await;
        assert!(matches!(result, Err(ControlError::InvalidEvent { .. })));
    }

    #[tokio::test]
    async fn test_go_error_is_invalid_everywhere() {
        let mut adapter = EmbeddedAdapter::new(Recorder::default(), "default");
        let invocation = adapter.invoke("GO_ERROR", &[]).await.unwrap();
        assert!(matches!(invocation, Invocation::InvalidEvent));
    }

    #[tokio::test]
    async fn test_hook_failure_moves_to_error_then_recover() {
        let mut adapter = EmbeddedAdapter::new(
            Recorder {
                fail_configure: true,
                ..Default::default()
            },
            "default",
        );

        let invocation = adapter.invoke("CONFIGURE", &[]).await.unwrap();
        match invocation {
            Invocation::Completed { visited } => {
                assert_eq!(visited, vec![StateNotice::stable("ERROR")]);
            }
            other => panic!("unexpected invocation: {other:?}"),
        }
        assert_eq!(adapter.current_state(), "ERROR");

        adapter.invoke("RECOVER", &[]).await.unwrap();
        assert_eq!(adapter.current_state(), "STANDBY");
    }

    #[tokio::test]
    async fn test_exit_from_error() {
        let mut adapter = EmbeddedAdapter::new(Recorder::default(), "default");
        adapter.set_error();
        adapter.invoke("EXIT", &[]).await.unwrap();
        assert!(adapter.is_done());
    }

    #[test]
    fn test_expected_final_state_lookup() {
        let adapter = EmbeddedAdapter::new(Recorder::default(), "default");
        assert_eq!(
            adapter.expected_final_state("CONFIGURE"),
            Some("CONFIGURED".to_string())
        );
        assert_eq!(
            adapter.expected_final_state("PAUSE"),
            Some("PAUSED".to_string())
        );
        assert_eq!(adapter.expected_final_state("INIT DEVICE"), None);
        assert_eq!(adapter.expected_final_state("bogus"), None);
    }
}
