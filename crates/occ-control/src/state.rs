// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Lifecycle state model: states, transition events and their tables.
//!
//! Two models exist. The embedded variant drives a task owned by this
//! library through [`TaskState`]/[`TaskEvent`]. The proxy variant mirrors an
//! externally-managed messaging device through [`DeviceState`]/
//! [`DeviceTransition`], where some states are traversed automatically and
//! must be waited past before a transition settles.

use strum::{Display, EnumString};

/// Lifecycle state of an embedded controlled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "UPPERCASE")]
pub enum TaskState {
    /// Before the machine is brought up.
    Undefined,
    /// Bare, unconfigured; the initial operational state.
    Standby,
    /// Configured and ready to start the dataflow.
    Configured,
    /// Processing data; the periodic running hook is driven here.
    Running,
    /// Processing temporarily suspended.
    Paused,
    /// A hook or health check failed; only RECOVER or EXIT apply.
    Error,
    /// Terminal. No transitions leave this state.
    Done,
}

impl TaskState {
    /// Parse a state name, mapping anything unknown to `Undefined`.
    pub fn parse(s: &str) -> TaskState {
        s.parse().unwrap_or(TaskState::Undefined)
    }
}

/// Transition event of the embedded variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskEvent {
    /// standby -> configured
    Configure,
    /// configured -> standby
    Reset,
    /// configured -> running
    Start,
    /// running | paused -> configured
    Stop,
    /// running -> paused
    Pause,
    /// paused -> running
    Resume,
    /// error -> standby
    Recover,
    /// standby | configured | error -> done
    Exit,
    /// Named in the wire contract; not routed by any state, so it is
    /// reported as an invalid event everywhere.
    GoError,
}

impl TaskEvent {
    /// The state this event lands in when the hook succeeds.
    pub fn expected_final_state(self) -> TaskState {
        match self {
            TaskEvent::Configure => TaskState::Configured,
            TaskEvent::Reset => TaskState::Standby,
            TaskEvent::Start => TaskState::Running,
            TaskEvent::Stop => TaskState::Configured,
            TaskEvent::Pause => TaskState::Paused,
            TaskEvent::Resume => TaskState::Running,
            TaskEvent::Recover => TaskState::Standby,
            TaskEvent::Exit => TaskState::Done,
            TaskEvent::GoError => TaskState::Error,
        }
    }
}

/// State of an externally-managed messaging device (proxy variant).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum DeviceState {
    #[strum(serialize = "OK")]
    Ok,
    #[strum(serialize = "ERROR")]
    Error,
    #[strum(serialize = "IDLE")]
    Idle,
    #[strum(serialize = "INITIALIZING DEVICE")]
    InitializingDevice,
    #[strum(serialize = "INITIALIZED")]
    Initialized,
    #[strum(serialize = "BINDING")]
    Binding,
    #[strum(serialize = "BOUND")]
    Bound,
    #[strum(serialize = "CONNECTING")]
    Connecting,
    #[strum(serialize = "DEVICE READY")]
    DeviceReady,
    #[strum(serialize = "INITIALIZING TASK")]
    InitializingTask,
    #[strum(serialize = "READY")]
    Ready,
    #[strum(serialize = "RUNNING")]
    Running,
    #[strum(serialize = "RESETTING TASK")]
    ResettingTask,
    #[strum(serialize = "RESETTING DEVICE")]
    ResettingDevice,
    #[strum(serialize = "EXITING")]
    Exiting,
}

impl DeviceState {
    /// Whether the device traverses this state without external command.
    ///
    /// The transition coordinator waits past these before replying.
    pub fn is_intermediate(self) -> bool {
        matches!(
            self,
            DeviceState::InitializingTask
                | DeviceState::ResettingTask
                | DeviceState::ResettingDevice
                | DeviceState::Binding
                | DeviceState::Connecting
        )
    }
}

/// Commanded transition of the device lifecycle (proxy variant).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum DeviceTransition {
    #[strum(serialize = "INIT DEVICE")]
    InitDevice,
    #[strum(serialize = "COMPLETE INIT")]
    CompleteInit,
    #[strum(serialize = "BIND")]
    Bind,
    #[strum(serialize = "CONNECT")]
    Connect,
    #[strum(serialize = "INIT TASK")]
    InitTask,
    #[strum(serialize = "RUN")]
    Run,
    #[strum(serialize = "STOP")]
    Stop,
    #[strum(serialize = "RESET TASK")]
    ResetTask,
    #[strum(serialize = "RESET DEVICE")]
    ResetDevice,
    #[strum(serialize = "END")]
    End,
    #[strum(serialize = "ERROR FOUND")]
    ErrorFound,
}

impl DeviceTransition {
    /// The stable state this transition is expected to settle in.
    pub fn expected_final_state(self) -> DeviceState {
        match self {
            DeviceTransition::InitDevice => DeviceState::InitializingDevice,
            DeviceTransition::CompleteInit => DeviceState::Initialized,
            DeviceTransition::Bind => DeviceState::Bound,
            DeviceTransition::Connect => DeviceState::DeviceReady,
            DeviceTransition::InitTask => DeviceState::Ready,
            DeviceTransition::Run => DeviceState::Running,
            DeviceTransition::Stop => DeviceState::Ready,
            DeviceTransition::ResetTask => DeviceState::DeviceReady,
            DeviceTransition::ResetDevice => DeviceState::Idle,
            DeviceTransition::End => DeviceState::Exiting,
            DeviceTransition::ErrorFound => DeviceState::Error,
        }
    }
}

/// Whether a state name ends the streaming RPCs (`DONE` or `EXITING`).
pub fn is_terminal_state(state: &str) -> bool {
    state == "DONE" || state == "EXITING"
}
