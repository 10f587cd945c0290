// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for the control plane.
//!
//! Provides a unified error type that maps to RPC error responses.

use occ_protocol::control_proto::RpcError;
use thiserror::Error;

/// Result type using ControlError
pub type Result<T> = std::result::Result<T, ControlError>;

/// Errors that can reject a transition request.
///
/// Hook failures are not errors at this level: they move the machine to the
/// error state and are reported through the transition reply
/// (`ok = false`, trigger `DEVICE_ERROR`).
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum ControlError {
    /// The claimed source state disagrees with the observed current state.
    #[error("transition not possible: state mismatch: source: {src_state} current: {current}")]
    StateMismatch {
        /// Source state claimed by the caller.
        src_state: String,
        /// State actually observed.
        current: String,
    },

    /// The event is unknown, or not a valid transition for this variant.
    #[error("argument {event} is not a valid transition name")]
    InvalidEvent {
        /// The offending event name.
        event: String,
    },

    /// A transition was requested from the terminal state.
    #[error("transition not possible: current state: {current}")]
    Precondition {
        /// The terminal state the machine is in.
        current: String,
    },

    /// The adapter issued the transition but no state change was observed.
    #[error("no transitions made, current state stays {src_state}")]
    NoTransitionObserved {
        /// Source state of the failed transition.
        src_state: String,
    },

    /// The proxy adapter has no control over the device.
    #[error("cannot request transition, no device control: {reason}")]
    ControlLost {
        /// Device-side failure detail.
        reason: String,
    },
}

impl ControlError {
    /// Fine-grained reason code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::StateMismatch { .. } => "STATE_MISMATCH",
            Self::InvalidEvent { .. } => "INVALID_EVENT",
            Self::Precondition { .. } => "PRECONDITION",
            Self::NoTransitionObserved { .. } => "NO_TRANSITION_OBSERVED",
            Self::ControlLost { .. } => "ADAPTER_CONTROL_LOST",
        }
    }

    /// Coarse RPC status this error maps to.
    pub fn status(&self) -> &'static str {
        match self {
            Self::StateMismatch { .. } | Self::InvalidEvent { .. } => "INVALID_ARGUMENT",
            Self::Precondition { .. } => "FAILED_PRECONDITION",
            Self::NoTransitionObserved { .. } | Self::ControlLost { .. } => "INTERNAL",
        }
    }

    /// Convert this error to an RpcError for protocol responses.
    pub fn to_rpc_error(&self) -> RpcError {
        RpcError {
            status: self.status().to_string(),
            code: self.code().to_string(),
            message: self.to_string(),
        }
    }
}
