// Copyright 2026 the Lockstep Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! One reusable dual-fence resource and its state machine.
//!
//! A slot pairs a display-server fence with its import into the GPU
//! timeline, plus a counter and alarm used to learn when the display server
//! has processed a fence reset. Slots cycle through four states:
//!
//! ```text
//!        insert()            check_completion()
//! Ready ─────────► Waiting ──────────────────► Done
//!   ▲                                           │
//!   │ handle_alarm()                   reset()  │
//!   └──────────────── ResetPending ◄────────────┘
//! ```
//!
//! There is no terminal state; dropping the slot ends the cycle. Teardown is
//! encoded in [`Drop`]: each state releases exactly what it holds.
//!
//! Slots are created in two phases. [`FenceSlot::allocate`] creates the
//! display-side resources and returns an [`UnimportedSlot`]; the caller must
//! complete a display round trip before [`UnimportedSlot::import`] brings
//! the fence into the GPU timeline.

use alloc::rc::Rc;
use core::fmt;
use core::time::Duration;

use crate::backend::{SyncBackend, WaitStatus};
use crate::config::TeardownMode;
use crate::error::FenceError;

/// Lifecycle state of a [`FenceSlot`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SlotState {
    /// Display fence is untriggered and may be inserted.
    Ready,
    /// Fence inserted; GPU completion fence outstanding.
    Waiting,
    /// GPU work confirmed complete.
    Done,
    /// Fence re-armed; waiting for the display server's alarm.
    ResetPending,
}

impl SlotState {
    /// The only state this one may legally move to.
    #[must_use]
    pub const fn successor(self) -> Self {
        match self {
            Self::Ready => Self::Waiting,
            Self::Waiting => Self::Done,
            Self::Done => Self::ResetPending,
            Self::ResetPending => Self::Ready,
        }
    }

    /// Returns a short label for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Waiting => "waiting",
            Self::Done => "done",
            Self::ResetPending => "reset-pending",
        }
    }
}

/// Slot operations that carry a state precondition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SlotOp {
    /// [`FenceSlot::insert`].
    Insert,
    /// [`FenceSlot::check_completion`].
    CheckCompletion,
    /// [`FenceSlot::reset`].
    Reset,
}

impl fmt::Display for SlotOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Insert => "insert",
            Self::CheckCompletion => "check_completion",
            Self::Reset => "reset",
        })
    }
}

/// Display-side handles, released on drop.
struct DisplayResources<B: SyncBackend> {
    backend: Rc<B>,
    fence: B::DisplayFence,
    counter: B::Counter,
    alarm: B::Alarm,
}

impl<B: SyncBackend> Drop for DisplayResources<B> {
    fn drop(&mut self) {
        self.backend.destroy_alarm(self.alarm);
        self.backend.destroy_counter(self.counter);
        self.backend.destroy_fence(self.fence);
    }
}

impl<B: SyncBackend> fmt::Debug for DisplayResources<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisplayResources")
            .field("fence", &self.fence)
            .field("counter", &self.counter)
            .field("alarm", &self.alarm)
            .finish_non_exhaustive()
    }
}

/// A slot whose display resources exist but whose fence has not been
/// imported into the GPU timeline yet.
///
/// Dropping it releases the display resources.
#[derive(Debug)]
pub struct UnimportedSlot<B: SyncBackend> {
    display: DisplayResources<B>,
}

impl<B: SyncBackend> UnimportedSlot<B> {
    /// The alarm this slot will answer to.
    #[must_use]
    pub fn alarm(&self) -> B::Alarm {
        self.display.alarm
    }

    /// Imports the display fence into the GPU timeline.
    ///
    /// The display server must already know about the fence: call
    /// [`SyncBackend::round_trip`] after allocating and before importing.
    pub fn import(self, teardown: TeardownMode) -> Result<FenceSlot<B>, FenceError> {
        let imported = self.display.backend.import_fence(self.display.fence)?;
        Ok(FenceSlot {
            display: self.display,
            imported: Some(imported),
            completion: None,
            next_counter_value: 1,
            state: SlotState::Ready,
            teardown,
        })
    }
}

/// One ring position: a display fence, its GPU import, and the
/// counter/alarm pair that reports resets.
///
/// Invariant: a completion fence is held iff the state is
/// [`SlotState::Waiting`].
pub struct FenceSlot<B: SyncBackend> {
    // Dropped after `Drop::drop` has run the state-dependent cleanup.
    display: DisplayResources<B>,
    imported: Option<B::GpuFence>,
    completion: Option<B::GpuFence>,
    next_counter_value: i64,
    state: SlotState,
    teardown: TeardownMode,
}

impl<B: SyncBackend> fmt::Debug for FenceSlot<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FenceSlot")
            .field("display", &self.display)
            .field("imported", &self.imported)
            .field("completion", &self.completion)
            .field("next_counter_value", &self.next_counter_value)
            .field("state", &self.state)
            .field("teardown", &self.teardown)
            .finish()
    }
}

impl<B: SyncBackend> FenceSlot<B> {
    /// Creates the display-side resources for a new slot.
    ///
    /// The fence starts untriggered, the counter at zero, and the alarm is
    /// armed for one. Anything created before a failure is released again.
    pub fn allocate(backend: Rc<B>) -> Result<UnimportedSlot<B>, FenceError> {
        let fence = backend.create_fence()?;
        let counter = match backend.create_counter(0) {
            Ok(counter) => counter,
            Err(err) => {
                backend.destroy_fence(fence);
                return Err(err.into());
            }
        };
        let alarm = match backend.create_alarm(counter, 1) {
            Ok(alarm) => alarm,
            Err(err) => {
                backend.destroy_counter(counter);
                backend.destroy_fence(fence);
                return Err(err.into());
            }
        };
        Ok(UnimportedSlot {
            display: DisplayResources {
                backend,
                fence,
                counter,
                alarm,
            },
        })
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SlotState {
        self.state
    }

    /// The alarm this slot answers to.
    #[must_use]
    pub fn alarm(&self) -> B::Alarm {
        self.display.alarm
    }

    /// The threshold the next [`reset`](Self::reset) will arm.
    #[must_use]
    pub fn next_counter_value(&self) -> i64 {
        self.next_counter_value
    }

    fn expect_state(&self, op: SlotOp, expected: SlotState) -> Result<(), FenceError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(FenceError::InvalidTransition {
                op,
                expected,
                found: self.state,
            })
        }
    }

    /// Signals the display fence, makes the GPU wait on it, and records a
    /// completion fence for everything queued so far.
    ///
    /// Requires [`SlotState::Ready`]; moves to [`SlotState::Waiting`].
    pub fn insert(&mut self) -> Result<(), FenceError> {
        self.expect_state(SlotOp::Insert, SlotState::Ready)?;
        let backend = &self.display.backend;
        backend.trigger_fence(self.display.fence)?;
        if let Some(imported) = &self.imported {
            backend.gpu_wait(imported)?;
        }
        self.completion = Some(backend.insert_completion_fence()?);
        self.state = SlotState::Waiting;
        Ok(())
    }

    /// Polls the completion fence, blocking at most `timeout`.
    ///
    /// A [`SlotState::Done`] slot reports [`WaitStatus::Signaled`] without
    /// polling. From [`SlotState::Waiting`], a signaled fence is released and
    /// the slot moves to `Done`. Driver failures are returned as errors.
    pub fn check_completion(&mut self, timeout: Duration) -> Result<WaitStatus, FenceError> {
        match self.state {
            SlotState::Done => return Ok(WaitStatus::Signaled),
            SlotState::Waiting => {}
            found => {
                return Err(FenceError::InvalidTransition {
                    op: SlotOp::CheckCompletion,
                    expected: SlotState::Waiting,
                    found,
                });
            }
        }

        let status = match &self.completion {
            Some(fence) => self.display.backend.client_wait(fence, timeout)?,
            None => WaitStatus::Signaled,
        };
        if status == WaitStatus::Signaled {
            if let Some(fence) = self.completion.take() {
                self.display.backend.delete_gpu_fence(fence);
            }
            self.state = SlotState::Done;
        }
        Ok(status)
    }

    /// Re-arms the display fence and asks the display server to confirm via
    /// the alarm.
    ///
    /// Requires [`SlotState::Done`]; moves to [`SlotState::ResetPending`].
    pub fn reset(&mut self) -> Result<(), FenceError> {
        self.expect_state(SlotOp::Reset, SlotState::Done)?;
        let display = &self.display;
        display.backend.reset_fence(display.fence)?;
        display
            .backend
            .change_alarm(display.alarm, self.next_counter_value)?;
        display
            .backend
            .set_counter(display.counter, self.next_counter_value)?;
        self.next_counter_value = self.next_counter_value.wrapping_add(1);
        self.state = SlotState::ResetPending;
        Ok(())
    }

    /// Handles an alarm notification.
    ///
    /// Returns `false` if `alarm` belongs to a different slot. A matching
    /// alarm moves [`SlotState::ResetPending`] to [`SlotState::Ready`]; in any
    /// other state it is stale and ignored.
    pub fn handle_alarm(&mut self, alarm: B::Alarm) -> bool {
        if alarm != self.display.alarm {
            return false;
        }
        if self.state == SlotState::ResetPending {
            self.state = SlotState::Ready;
        } else {
            tracing::debug!(state = self.state.as_str(), "ignoring stale alarm notification");
        }
        true
    }
}

impl<B: SyncBackend> Drop for FenceSlot<B> {
    fn drop(&mut self) {
        let backend = &self.display.backend;
        match self.state {
            SlotState::Waiting => {
                if let Some(fence) = self.completion.take() {
                    backend.delete_gpu_fence(fence);
                }
            }
            SlotState::Done => {}
            SlotState::ResetPending => {
                if self.teardown == TeardownMode::Drain {
                    if let Err(err) = backend.drain_alarm(self.display.alarm) {
                        tracing::warn!(%err, "failed to drain alarm during teardown");
                    }
                }
                if let Err(err) = backend.trigger_fence(self.display.fence) {
                    tracing::warn!(%err, "failed to trigger fence during teardown");
                }
            }
            SlotState::Ready => {
                if let Err(err) = backend.trigger_fence(self.display.fence) {
                    tracing::warn!(%err, "failed to trigger fence during teardown");
                }
            }
        }
        if let Some(imported) = self.imported.take() {
            backend.delete_gpu_fence(imported);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{FenceSlot, SlotOp, SlotState};
    use crate::backend::{SyncBackend, WaitStatus};
    use crate::config::TeardownMode;
    use crate::error::{BackendError, FenceError};
    use alloc::rc::Rc;
    use alloc::string::ToString;
    use alloc::vec::Vec;
    use core::cell::{Cell, RefCell};
    use core::time::Duration;

    /// Always-succeeding backend that records alarm thresholds and counter
    /// values.
    #[derive(Default)]
    struct ThresholdLog {
        next_id: Cell<u32>,
        thresholds: RefCell<Vec<i64>>,
        counter_values: RefCell<Vec<i64>>,
    }

    impl ThresholdLog {
        fn id(&self) -> u32 {
            self.next_id.set(self.next_id.get() + 1);
            self.next_id.get()
        }
    }

    impl SyncBackend for ThresholdLog {
        type DisplayFence = u32;
        type Counter = u32;
        type Alarm = u32;
        type GpuFence = u32;
        type Event = u32;

        fn probe(&self) -> Result<(), FenceError> {
            Ok(())
        }
        fn create_fence(&self) -> Result<u32, BackendError> {
            Ok(self.id())
        }
        fn trigger_fence(&self, _: u32) -> Result<(), BackendError> {
            Ok(())
        }
        fn reset_fence(&self, _: u32) -> Result<(), BackendError> {
            Ok(())
        }
        fn destroy_fence(&self, _: u32) {}
        fn create_counter(&self, _: i64) -> Result<u32, BackendError> {
            Ok(self.id())
        }
        fn set_counter(&self, _: u32, value: i64) -> Result<(), BackendError> {
            self.counter_values.borrow_mut().push(value);
            Ok(())
        }
        fn destroy_counter(&self, _: u32) {}
        fn create_alarm(&self, _: u32, _: i64) -> Result<u32, BackendError> {
            Ok(self.id())
        }
        fn change_alarm(&self, _: u32, threshold: i64) -> Result<(), BackendError> {
            self.thresholds.borrow_mut().push(threshold);
            Ok(())
        }
        fn destroy_alarm(&self, _: u32) {}
        fn round_trip(&self) -> Result<(), BackendError> {
            Ok(())
        }
        fn drain_alarm(&self, _: u32) -> Result<(), BackendError> {
            Ok(())
        }
        fn import_fence(&self, _: u32) -> Result<u32, BackendError> {
            Ok(self.id())
        }
        fn gpu_wait(&self, _: &u32) -> Result<(), BackendError> {
            Ok(())
        }
        fn insert_completion_fence(&self) -> Result<u32, BackendError> {
            Ok(self.id())
        }
        fn client_wait(&self, _: &u32, _: Duration) -> Result<WaitStatus, BackendError> {
            Ok(WaitStatus::Signaled)
        }
        fn delete_gpu_fence(&self, _: u32) {}
        fn alarm_for_event(&self, event: &u32) -> Option<u32> {
            Some(*event)
        }
    }

    fn recycle(slot: &mut FenceSlot<ThresholdLog>) {
        slot.insert().unwrap();
        assert_eq!(slot.check_completion(Duration::ZERO).unwrap(), WaitStatus::Signaled);
        slot.reset().unwrap();
        assert!(slot.handle_alarm(slot.alarm()), "slot owns its alarm");
        assert_eq!(slot.state(), SlotState::Ready);
    }

    #[test]
    fn counter_threshold_wraps() {
        let backend = Rc::new(ThresholdLog::default());
        let mut slot = FenceSlot::allocate(Rc::clone(&backend))
            .unwrap()
            .import(TeardownMode::Detach)
            .unwrap();
        slot.next_counter_value = i64::MAX;

        recycle(&mut slot);
        assert_eq!(slot.next_counter_value(), i64::MIN);
        recycle(&mut slot);
        assert_eq!(slot.next_counter_value(), i64::MIN + 1);

        assert_eq!(*backend.thresholds.borrow(), [i64::MAX, i64::MIN]);
        assert_eq!(*backend.counter_values.borrow(), [i64::MAX, i64::MIN]);
    }

    #[test]
    fn successor_walks_the_cycle() {
        let mut state = SlotState::Ready;
        let mut seen = [SlotState::Ready; 4];
        for entry in &mut seen {
            *entry = state;
            state = state.successor();
        }
        assert_eq!(state, SlotState::Ready, "cycle must close after four steps");
        assert_eq!(
            seen,
            [
                SlotState::Ready,
                SlotState::Waiting,
                SlotState::Done,
                SlotState::ResetPending,
            ]
        );
    }

    #[test]
    fn op_labels_are_stable() {
        assert_eq!(SlotOp::Insert.to_string(), "insert");
        assert_eq!(SlotOp::CheckCompletion.to_string(), "check_completion");
        assert_eq!(SlotOp::Reset.to_string(), "reset");
        assert_eq!(SlotState::ResetPending.as_str(), "reset-pending");
    }
}
