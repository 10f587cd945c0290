// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The integrator-facing task trait and its identity.
//!
//! A [`ControlledTask`] is the body of a long-running data-processing
//! process. The library owns the lifecycle: transition hooks are invoked by
//! the coordinator when the orchestrator requests a transition, and the two
//! periodic hooks are driven by the supervisor. Only one hook runs at any
//! given time; while a transition hook is executing, periodic hooks are
//! blocked until it returns.

use async_trait::async_trait;
use thiserror::Error;

use crate::properties::PropertyTree;

/// Failure reported by a task hook.
///
/// Any hook error moves the machine to the error state, from which only
/// RECOVER and EXIT lead out.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct TaskError(pub String);

impl From<&str> for TaskError {
    fn from(message: &str) -> Self {
        TaskError(message.to_string())
    }
}

impl From<String> for TaskError {
    fn from(message: String) -> Self {
        TaskError(message)
    }
}

/// Outcome of a successful [`ControlledTask::iterate_running`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPolicy {
    /// Keep iterating.
    Continue,
    /// All data has been processed; publish end-of-stream once and stop
    /// iterating. The machine stays in the running state until an explicit
    /// STOP.
    EndOfData,
}

/// Result type of transition hooks.
pub type HookResult = std::result::Result<(), TaskError>;

/// A user-supplied task driven through the lifecycle state machine.
///
/// All hooks have succeeding defaults, so an implementation only overrides
/// the transitions it cares about.
#[async_trait]
pub trait ControlledTask: Send + 'static {
    /// Descriptive name of the task. Shown in logs; not necessarily unique.
    fn name(&self) -> &str;

    /// standby -> configured. Receives the decoded configuration tree.
    ///
    /// Move the task from a bare state into one where the dataflow may be
    /// initiated at any time. Taking a while here is fine; external
    /// transition requests and periodic checks wait.
    async fn execute_configure(&mut self, _properties: &PropertyTree) -> HookResult {
        Ok(())
    }

    /// configured -> standby. Clear all configuration, or make configure
    /// idempotent, to avoid keeping hidden state.
    async fn execute_reset(&mut self) -> HookResult {
        Ok(())
    }

    /// error -> standby.
    async fn execute_recover(&mut self) -> HookResult {
        Ok(())
    }

    /// configured -> running. Initiate the dataflow. The run number was
    /// taken from the transition arguments just before this call.
    async fn execute_start(&mut self, _run_number: u32) -> HookResult {
        Ok(())
    }

    /// running | paused -> configured. Terminate the dataflow.
    async fn execute_stop(&mut self) -> HookResult {
        Ok(())
    }

    /// running -> paused. Pausing implies no configuration change, only the
    /// absence of periodic iterate calls.
    async fn execute_pause(&mut self) -> HookResult {
        Ok(())
    }

    /// paused -> running.
    async fn execute_resume(&mut self) -> HookResult {
        Ok(())
    }

    /// standby | configured | error -> done. Release all resources in
    /// preparation for process exit.
    async fn execute_exit(&mut self) -> HookResult {
        Ok(())
    }

    /// Periodic work while running. Called continuously by the supervisor
    /// in the running state and never outside it.
    async fn iterate_running(&mut self) -> std::result::Result<RunPolicy, TaskError> {
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        Ok(RunPolicy::Continue)
    }

    /// Periodic health check, called in every state except error. An error
    /// moves the machine to the error state.
    async fn iterate_check(&mut self) -> std::result::Result<(), TaskError> {
        Ok(())
    }
}

/// Identity of a controlled task.
///
/// `name` is fixed at construction. `role` is resolved once from an
/// explicit option or the environment and never changes. `run_number` is
/// rewritten from the transition arguments before every START.
#[derive(Debug, Clone)]
pub struct TaskIdentity {
    name: String,
    role: String,
    run_number: u32,
}

impl TaskIdentity {
    /// Create an identity with run number 0.
    pub fn new(name: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: role.into(),
            run_number: 0,
        }
    }

    /// Task name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Orchestrator-side role of this task.
    pub fn role(&self) -> &str {
        &self.role
    }

    /// Current data-taking run number.
    pub fn run_number(&self) -> u32 {
        self.run_number
    }

    pub(crate) fn set_run_number(&mut self, run_number: u32) {
        self.run_number = run_number;
    }
}
