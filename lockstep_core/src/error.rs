// Copyright 2026 the Lockstep Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Error taxonomy for the fence ring.
//!
//! Every variant is absorbed inside [`FenceRing`](crate::ring::FenceRing):
//! the public entry points collapse failures into their documented `bool`
//! results, so these types surface only through logs, trace events, and the
//! [`SyncBackend`](crate::backend::SyncBackend) contract.

use alloc::string::String;
use core::fmt;
use core::time::Duration;

use crate::slot::{SlotOp, SlotState};

/// Which backend primitive a [`BackendError`] came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BackendOp {
    /// Capability probing.
    Probe,
    /// Creating a display-server fence.
    CreateFence,
    /// Triggering a display-server fence.
    TriggerFence,
    /// Re-arming a display-server fence.
    ResetFence,
    /// Creating a display-server counter.
    CreateCounter,
    /// Setting a display-server counter.
    SetCounter,
    /// Creating a display-server alarm.
    CreateAlarm,
    /// Changing an alarm's trigger threshold.
    ChangeAlarm,
    /// Synchronous round trip with the display server.
    RoundTrip,
    /// Synchronously consuming a pending alarm notification.
    DrainAlarm,
    /// Importing a display fence into the GPU timeline.
    ImportFence,
    /// Queueing a GPU-side wait.
    GpuWait,
    /// Inserting a GPU completion fence.
    InsertFence,
    /// Polling a GPU completion fence.
    ClientWait,
}

impl BackendOp {
    /// Returns a short, stable label for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Probe => "probe",
            Self::CreateFence => "create_fence",
            Self::TriggerFence => "trigger_fence",
            Self::ResetFence => "reset_fence",
            Self::CreateCounter => "create_counter",
            Self::SetCounter => "set_counter",
            Self::CreateAlarm => "create_alarm",
            Self::ChangeAlarm => "change_alarm",
            Self::RoundTrip => "round_trip",
            Self::DrainAlarm => "drain_alarm",
            Self::ImportFence => "import_fence",
            Self::GpuWait => "gpu_wait",
            Self::InsertFence => "insert_fence",
            Self::ClientWait => "client_wait",
        }
    }
}

impl fmt::Display for BackendOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A display-server or GPU driver call failed.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{op} failed: {message}")]
pub struct BackendError {
    /// The failing primitive.
    pub op: BackendOp,
    /// Backend-specific detail.
    pub message: String,
}

impl BackendError {
    /// Creates a backend error for `op`.
    pub fn new(op: BackendOp, message: impl Into<String>) -> Self {
        Self {
            op,
            message: message.into(),
        }
    }
}

/// Failures handled by the fence ring.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum FenceError {
    /// A required GPU or display-server capability is missing.
    ///
    /// This is an expected outcome: the ring simply never activates.
    #[error("fence ring unavailable: {0} not supported")]
    Unavailable(&'static str),

    /// A slot operation was attempted from the wrong state.
    #[error("slot {op} requires {expected:?}, found {found:?}")]
    InvalidTransition {
        /// The attempted operation.
        op: SlotOp,
        /// The state the operation requires.
        expected: SlotState,
        /// The state the slot was actually in.
        found: SlotState,
    },

    /// The renderer called the entry points out of order.
    #[error("protocol violation on slot {slot}: found {found:?}")]
    ProtocolViolation {
        /// Index of the current slot.
        slot: usize,
        /// State the current slot was in.
        found: SlotState,
    },

    /// The bounded fallback wait did not observe GPU completion.
    #[error("slot {slot} still pending after {waited:?}")]
    CompletionTimeout {
        /// Index of the slot being recycled.
        slot: usize,
        /// The bounded wait that expired.
        waited: Duration,
    },

    /// The reboot budget is spent; the ring is permanently disabled.
    #[error("fence ring disabled after {reboots} reboots")]
    RebootExhausted {
        /// Number of reboots attempted.
        reboots: u32,
    },

    /// A backend primitive failed.
    #[error(transparent)]
    Backend(#[from] BackendError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn backend_error_names_the_operation() {
        let err = BackendError::new(BackendOp::ClientWait, "GL_WAIT_FAILED");
        assert_eq!(err.to_string(), "client_wait failed: GL_WAIT_FAILED");
    }

    #[test]
    fn backend_error_converts_transparently() {
        let err: FenceError = BackendError::new(BackendOp::RoundTrip, "broken pipe").into();
        assert_eq!(err.to_string(), "round_trip failed: broken pipe");
    }

    #[test]
    fn display_prefixes_are_stable() {
        assert!(
            FenceError::Unavailable("GL_EXT_x11_sync_object")
                .to_string()
                .starts_with("fence ring unavailable"),
            "unavailable prefix changed"
        );
        assert_eq!(
            FenceError::RebootExhausted { reboots: 3 }.to_string(),
            "fence ring disabled after 3 reboots"
        );
        assert_eq!(
            FenceError::InvalidTransition {
                op: SlotOp::Reset,
                expected: SlotState::Done,
                found: SlotState::Ready,
            }
            .to_string(),
            "slot reset requires Done, found Ready"
        );
    }
}
