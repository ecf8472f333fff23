// Copyright 2026 the Lockstep Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Diagnostics for the fence ring.
//!
//! This module provides a [`TraceSink`] trait with per-event methods that the
//! [`FenceRing`](crate::ring::FenceRing) calls as slots move through their
//! lifecycle. All method bodies default to no-ops, so implementing only the
//! events you care about is fine.
//!
//! Logging goes through `tracing` independently of any sink; sinks are for
//! structured, per-frame observation (tests, recorders, HUDs).

use core::time::Duration;

use crate::slot::SlotState;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Why the ring rebooted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RebootCause {
    /// An entry point was called out of order.
    ProtocolViolation,
    /// The bounded fallback wait did not observe completion.
    CompletionTimeout,
    /// A backend primitive failed.
    BackendFailure,
    /// Reinitialization after a previous reboot failed.
    ReinitFailure,
}

impl RebootCause {
    /// Returns a short label for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ProtocolViolation => "protocol-violation",
            Self::CompletionTimeout => "completion-timeout",
            Self::BackendFailure => "backend-failure",
            Self::ReinitFailure => "reinit-failure",
        }
    }
}

// ---------------------------------------------------------------------------
// Event structs
// ---------------------------------------------------------------------------

/// Emitted whenever a slot changes state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlotTransitionEvent {
    /// Frames completed by the ring since it was last initialized.
    pub frame: u64,
    /// Slot index.
    pub slot: usize,
    /// State before the transition.
    pub from: SlotState,
    /// State after the transition.
    pub to: SlotState,
}

/// Emitted when `after_frame` recycles a slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecycleEvent {
    /// Frame counter.
    pub frame: u64,
    /// Slot `after_frame` was called for.
    pub current: usize,
    /// Slot that was checked and reset.
    pub victim: usize,
    /// Whether the zero-timeout poll was enough.
    pub fast_path: bool,
    /// Bound of the blocking fallback wait, if the fast path missed.
    pub fallback_wait: Option<Duration>,
}

/// Emitted for each warmup frame (no recycling yet).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WarmupEvent {
    /// Frame counter.
    pub frame: u64,
    /// Warmup frames seen so far, including this one.
    pub warmup_count: usize,
    /// Warmup frames needed before recycling starts.
    pub warmup_target: usize,
}

/// Emitted when the ring tears itself down to recover.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RebootEvent {
    /// What triggered the reboot.
    pub cause: RebootCause,
    /// Reboots so far, including this one.
    pub reboot_count: u32,
    /// Configured budget.
    pub max_reboots: u32,
}

/// Emitted once, when the ring disables itself permanently.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DisabledEvent {
    /// Reboots attempted.
    pub reboot_count: u32,
}

// ---------------------------------------------------------------------------
// TraceSink trait
// ---------------------------------------------------------------------------

/// Receives trace events from the fence ring.
///
/// All methods have default no-op implementations, so you only need to
/// override the events you care about.
pub trait TraceSink {
    /// Called when a slot changes state.
    fn on_slot_transition(&mut self, e: &SlotTransitionEvent) {
        _ = e;
    }

    /// Called for each warmup frame.
    fn on_warmup(&mut self, e: &WarmupEvent) {
        _ = e;
    }

    /// Called after a slot has been recycled.
    fn on_recycle(&mut self, e: &RecycleEvent) {
        _ = e;
    }

    /// Called when the ring reboots.
    fn on_reboot(&mut self, e: &RebootEvent) {
        _ = e;
    }

    /// Called once when the ring disables itself.
    fn on_disabled(&mut self, e: &DisabledEvent) {
        _ = e;
    }
}

// ---------------------------------------------------------------------------
// NoopSink
// ---------------------------------------------------------------------------

/// A [`TraceSink`] that discards all events.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSink;

impl TraceSink for NoopSink {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    #[test]
    fn noop_sink_compiles() {
        let mut sink = NoopSink;
        sink.on_slot_transition(&SlotTransitionEvent {
            frame: 0,
            slot: 0,
            from: SlotState::Ready,
            to: SlotState::Waiting,
        });
        sink.on_reboot(&RebootEvent {
            cause: RebootCause::CompletionTimeout,
            reboot_count: 1,
            max_reboots: 2,
        });
        sink.on_disabled(&DisabledEvent { reboot_count: 3 });
    }

    #[test]
    fn partial_sink_overrides_only_what_it_needs() {
        struct Victims(Vec<usize>);
        impl TraceSink for Victims {
            fn on_recycle(&mut self, e: &RecycleEvent) {
                self.0.push(e.victim);
            }
        }

        let mut sink = Victims(Vec::new());
        sink.on_warmup(&WarmupEvent {
            frame: 0,
            warmup_count: 1,
            warmup_target: 5,
        });
        sink.on_recycle(&RecycleEvent {
            frame: 5,
            current: 5,
            victim: 0,
            fast_path: true,
            fallback_wait: None,
        });
        assert_eq!(sink.0, [0]);
    }

    #[test]
    fn cause_labels_are_stable() {
        assert_eq!(RebootCause::ProtocolViolation.as_str(), "protocol-violation");
        assert_eq!(RebootCause::ReinitFailure.as_str(), "reinit-failure");
    }
}
