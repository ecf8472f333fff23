// Copyright 2026 the Lockstep Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Backend contract for platform integrations.
//!
//! The fence ring coordinates two independently scheduled signals: a GPU
//! command-queue fence and a display-server counter/alarm. Each platform
//! backend provides the following pieces through [`SyncBackend`]:
//!
//! - **Capability probe** — [`SyncBackend::probe`] reports whether the GPU
//!   and display-server extensions the ring needs are present. A missing
//!   extension is a normal outcome, not an error.
//!
//! - **Display-server primitives** — fences, counters, and alarms, plus a
//!   synchronous round trip and a way to consume one pending alarm
//!   notification inline during teardown.
//!
//! - **GPU primitives** — importing a display fence into the GPU timeline,
//!   queueing a GPU-side wait on it, inserting completion fences, and
//!   polling them with a bounded timeout.
//!
//! - **Event glue** — [`SyncBackend::alarm_for_event`] maps a host event to
//!   the alarm it notifies about, so the host can forward every event of the
//!   alarm-notification type without knowing about slots.
//!
//! # Crate boundaries
//!
//! `lockstep_core` owns the slot state machine, the ring, and this contract.
//! Backend crates depend on `lockstep_core` and resolve the entry points
//! once, when the backend value is constructed. The ring holds the resolved
//! backend behind an [`Rc`](alloc::rc::Rc) shared with its slots, so every
//! method here takes `&self`; backends that keep state use interior
//! mutability.
//!
//! # Threading
//!
//! Everything runs on the thread that drives both the present loop and the
//! host event loop. Backends are not required to be `Send`.

use core::fmt::Debug;
use core::hash::Hash;
use core::time::Duration;

use crate::error::{BackendError, FenceError};

/// Outcome of polling a GPU completion fence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WaitStatus {
    /// All GPU work queued before the fence has finished.
    Signaled,
    /// The timeout elapsed before the fence signaled.
    Pending,
}

/// Resolved display-server and GPU synchronization entry points.
///
/// Implementations are test doubles (see `lockstep_sync_harness`) or real
/// platform glue (see `lockstep_backend_x11`).
pub trait SyncBackend {
    /// Display-server fence handle.
    type DisplayFence: Copy + Eq + Debug;
    /// Display-server counter handle.
    type Counter: Copy + Eq + Debug;
    /// Display-server alarm handle. Used as the routing key for events.
    type Alarm: Copy + Eq + Hash + Debug;
    /// GPU fence object, either imported or inserted.
    type GpuFence: Debug;
    /// Host event type delivered by the event loop.
    type Event;

    /// Checks that every required capability is present.
    ///
    /// Returns [`FenceError::Unavailable`] naming the first missing
    /// capability.
    fn probe(&self) -> Result<(), FenceError>;

    /// Creates an untriggered display-server fence.
    fn create_fence(&self) -> Result<Self::DisplayFence, BackendError>;

    /// Moves `fence` to the triggered state.
    fn trigger_fence(&self, fence: Self::DisplayFence) -> Result<(), BackendError>;

    /// Moves `fence` back to the untriggered state.
    fn reset_fence(&self, fence: Self::DisplayFence) -> Result<(), BackendError>;

    /// Releases `fence`.
    fn destroy_fence(&self, fence: Self::DisplayFence);

    /// Creates a counter starting at `initial`.
    fn create_counter(&self, initial: i64) -> Result<Self::Counter, BackendError>;

    /// Sets `counter` to `value`.
    fn set_counter(&self, counter: Self::Counter, value: i64) -> Result<(), BackendError>;

    /// Releases `counter`.
    fn destroy_counter(&self, counter: Self::Counter);

    /// Creates an alarm that notifies once `counter` reaches `threshold`.
    fn create_alarm(
        &self,
        counter: Self::Counter,
        threshold: i64,
    ) -> Result<Self::Alarm, BackendError>;

    /// Re-arms `alarm` for a new absolute `threshold`.
    fn change_alarm(&self, alarm: Self::Alarm, threshold: i64) -> Result<(), BackendError>;

    /// Releases `alarm`.
    fn destroy_alarm(&self, alarm: Self::Alarm);

    /// Blocks until the display server has processed every request sent so
    /// far.
    fn round_trip(&self) -> Result<(), BackendError>;

    /// Consumes the pending notification for `alarm` synchronously.
    ///
    /// Must not dispatch or discard unrelated events: anything read while
    /// waiting stays available to the host event loop.
    fn drain_alarm(&self, alarm: Self::Alarm) -> Result<(), BackendError>;

    /// Imports `fence` into the GPU timeline.
    ///
    /// Only valid once the display server has seen the fence, i.e. after a
    /// [`round_trip`](Self::round_trip).
    fn import_fence(&self, fence: Self::DisplayFence) -> Result<Self::GpuFence, BackendError>;

    /// Queues a GPU-side wait: commands submitted afterwards do not execute
    /// until `fence` signals.
    fn gpu_wait(&self, fence: &Self::GpuFence) -> Result<(), BackendError>;

    /// Inserts a fence marking all GPU work queued so far.
    fn insert_completion_fence(&self) -> Result<Self::GpuFence, BackendError>;

    /// Polls `fence`, blocking at most `timeout`.
    fn client_wait(
        &self,
        fence: &Self::GpuFence,
        timeout: Duration,
    ) -> Result<WaitStatus, BackendError>;

    /// Releases a GPU fence.
    fn delete_gpu_fence(&self, fence: Self::GpuFence);

    /// Returns the alarm `event` notifies about, if it is an alarm
    /// notification at all.
    fn alarm_for_event(&self, event: &Self::Event) -> Option<Self::Alarm>;
}
