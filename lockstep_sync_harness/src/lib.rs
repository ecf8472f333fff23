// Copyright 2026 the Lockstep Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Mock backend and recording tools for exercising the fence ring.
//!
//! - [`MockBackend`] — in-memory display server and GPU driver that counts
//!   every create/destroy, scripts GPU completion ([`GpuCompletion`]), and
//!   queues alarm notifications like a host event loop would.
//! - [`RecordingSink`] — a [`TraceSink`](lockstep_core::trace::TraceSink)
//!   that keeps every event for assertions.
//! - [`pump_events`] / [`run_frame`] — drive a ring the way a present loop
//!   and event loop would.

#![no_std]

extern crate alloc;

mod mock;
mod recording;

pub use mock::{
    GpuCompletion, MockAlarm, MockBackend, MockCapabilities, MockCounter, MockEvent, MockFence,
    MockGpuFence, MockOp, ResourceCounts,
};
pub use recording::{RecordingSink, TraceRecord};

use lockstep_core::ring::FenceRing;

/// Forwards every queued event to `ring`, as a host event loop would.
///
/// Returns how many events the ring claimed.
pub fn pump_events(ring: &mut FenceRing<MockBackend>) -> usize {
    let events = ring.backend().take_events();
    events
        .iter()
        .filter(|event| ring.handle_event(event))
        .count()
}

/// Results of one [`run_frame`] call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameOutcome {
    /// What `insert_wait` returned.
    pub inserted: bool,
    /// What `after_frame` returned.
    pub advanced: bool,
    /// Alarm notifications the ring claimed afterwards.
    pub alarms: usize,
}

/// Runs one frame: `insert_wait`, `after_frame`, then an event pump.
pub fn run_frame(ring: &mut FenceRing<MockBackend>) -> FrameOutcome {
    let inserted = ring.insert_wait();
    let advanced = ring.after_frame();
    let alarms = pump_events(ring);
    FrameOutcome {
        inserted,
        advanced,
        alarms,
    }
}
