// Copyright 2026 the Lockstep Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! In-memory [`SyncBackend`] with resource accounting and scripted GPU
//! completion.

use alloc::collections::VecDeque;
use alloc::format;
use alloc::vec::Vec;
use core::cell::RefCell;
use core::time::Duration;

use hashbrown::{HashMap, HashSet};
use lockstep_core::backend::{SyncBackend, WaitStatus};
use lockstep_core::error::{BackendError, BackendOp, FenceError};

/// Mock display-server fence handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MockFence(pub u32);

/// Mock display-server counter handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MockCounter(pub u32);

/// Mock display-server alarm handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MockAlarm(pub u32);

/// Mock GPU fence. Deliberately not `Copy`, like a real sync object.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct MockGpuFence(pub u32);

/// Event delivered by the mock host event loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MockEvent {
    /// An alarm's counter crossed its threshold.
    AlarmNotify {
        /// The alarm that fired.
        alarm: MockAlarm,
        /// Counter value that triggered it.
        counter_value: i64,
    },
    /// Any other host event (input, expose, ...).
    Unrelated(u32),
}

/// Which capabilities the mock reports as present.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MockCapabilities {
    /// GPU fence sync objects.
    pub gpu_sync: bool,
    /// Importing display fences into the GPU timeline.
    pub fence_import: bool,
    /// Display-server sync extension.
    pub display_sync: bool,
}

impl MockCapabilities {
    /// Everything present.
    pub const ALL: Self = Self {
        gpu_sync: true,
        fence_import: true,
        display_sync: true,
    };
}

impl Default for MockCapabilities {
    fn default() -> Self {
        Self::ALL
    }
}

/// How GPU completion fences behave when polled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum GpuCompletion {
    /// Every poll reports signaled.
    #[default]
    Instant,
    /// No poll ever reports signaled, however long it waits.
    Never,
    /// The first `n` polls of each fence report pending.
    AfterPolls(u32),
    /// Zero-timeout polls report pending; any blocking wait succeeds.
    OnBlockingWait,
    /// Every poll fails at the driver level.
    Fail,
}

/// Create/destroy tallies for every resource kind.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ResourceCounts {
    /// Display fences created.
    pub fences_created: u32,
    /// Display fences destroyed.
    pub fences_destroyed: u32,
    /// Counters created.
    pub counters_created: u32,
    /// Counters destroyed.
    pub counters_destroyed: u32,
    /// Alarms created.
    pub alarms_created: u32,
    /// Alarms destroyed.
    pub alarms_destroyed: u32,
    /// GPU fences created (imports and completion fences).
    pub gpu_fences_created: u32,
    /// GPU fences deleted.
    pub gpu_fences_deleted: u32,
    /// Round trips performed.
    pub round_trips: u32,
    /// Alarm notifications drained inline.
    pub drains: u32,
}

impl ResourceCounts {
    /// Returns `true` when every created resource has been released.
    #[must_use]
    pub fn is_balanced(&self) -> bool {
        self.fences_created == self.fences_destroyed
            && self.counters_created == self.counters_destroyed
            && self.alarms_created == self.alarms_destroyed
            && self.gpu_fences_created == self.gpu_fences_deleted
    }
}

/// One recorded backend call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MockOp {
    /// `trigger_fence`.
    TriggerFence(MockFence),
    /// `reset_fence`.
    ResetFence(MockFence),
    /// `change_alarm` to a threshold.
    ChangeAlarm(MockAlarm, i64),
    /// `set_counter` to a value.
    SetCounter(MockCounter, i64),
    /// `gpu_wait` on an imported fence.
    GpuWait(u32),
    /// `client_wait` with a timeout.
    ClientWait(u32, Duration),
    /// `drain_alarm`.
    DrainAlarm(MockAlarm),
    /// `destroy_alarm`.
    DestroyAlarm(MockAlarm),
}

#[derive(Debug)]
struct AlarmRecord {
    counter: MockCounter,
    threshold: i64,
    armed: bool,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: u32,
    capabilities: MockCapabilities,
    completion: GpuCompletion,
    counts: ResourceCounts,
    fences: HashMap<MockFence, bool>,
    counters: HashMap<MockCounter, i64>,
    alarms: HashMap<MockAlarm, AlarmRecord>,
    gpu_fences: HashMap<u32, u32>,
    imported: HashSet<u32>,
    fail_next: Vec<BackendOp>,
    events: VecDeque<MockEvent>,
    ops: Vec<MockOp>,
}

impl Inner {
    fn id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    fn check_failure(&mut self, op: BackendOp) -> Result<(), BackendError> {
        if let Some(pos) = self.fail_next.iter().position(|&o| o == op) {
            self.fail_next.remove(pos);
            return Err(BackendError::new(op, "injected failure"));
        }
        Ok(())
    }

    fn fire_alarms(&mut self, counter: MockCounter) {
        let value = self.counters.get(&counter).copied().unwrap_or_default();
        let mut fired: Vec<MockAlarm> = self
            .alarms
            .iter_mut()
            .filter(|(_, record)| record.armed && record.counter == counter)
            .filter(|(_, record)| value >= record.threshold)
            .map(|(alarm, record)| {
                record.armed = false;
                *alarm
            })
            .collect();
        fired.sort_by_key(|alarm| alarm.0);
        for alarm in fired {
            self.events.push_back(MockEvent::AlarmNotify {
                alarm,
                counter_value: value,
            });
        }
    }
}

/// In-memory stand-in for a display server plus GPU driver.
///
/// Share it with a ring through an `Rc` to inspect it afterwards:
///
/// ```
/// use std::rc::Rc;
/// use lockstep_core::{config::RingConfig, ring::FenceRing};
/// use lockstep_sync_harness::MockBackend;
///
/// let backend = Rc::new(MockBackend::new());
/// let mut ring: FenceRing<MockBackend> = FenceRing::new(Rc::clone(&backend), RingConfig::DEFAULT);
/// assert!(ring.init());
/// ring.destroy();
/// assert!(backend.counts().is_balanced());
/// ```
#[derive(Debug, Default)]
pub struct MockBackend {
    inner: RefCell<Inner>,
}

impl MockBackend {
    /// Creates a backend with every capability present and instant GPU
    /// completion.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend reporting the given capabilities.
    #[must_use]
    pub fn with_capabilities(capabilities: MockCapabilities) -> Self {
        let backend = Self::new();
        backend.inner.borrow_mut().capabilities = capabilities;
        backend
    }

    /// Changes how GPU completion fences respond to polls.
    pub fn set_gpu_completion(&self, completion: GpuCompletion) {
        self.inner.borrow_mut().completion = completion;
    }

    /// Changes the reported capabilities.
    pub fn set_capabilities(&self, capabilities: MockCapabilities) {
        self.inner.borrow_mut().capabilities = capabilities;
    }

    /// Makes the next call of `op` fail. Stacks with earlier requests.
    pub fn fail_next(&self, op: BackendOp) {
        self.inner.borrow_mut().fail_next.push(op);
    }

    /// Current create/destroy tallies.
    #[must_use]
    pub fn counts(&self) -> ResourceCounts {
        self.inner.borrow().counts
    }

    /// Number of display fences, counters, alarms, and GPU fences alive.
    #[must_use]
    pub fn live_handles(&self) -> usize {
        let inner = self.inner.borrow();
        inner.fences.len() + inner.counters.len() + inner.alarms.len() + inner.gpu_fences.len()
    }

    /// Whether `fence` is currently triggered. `None` if it does not exist.
    #[must_use]
    pub fn fence_triggered(&self, fence: MockFence) -> Option<bool> {
        self.inner.borrow().fences.get(&fence).copied()
    }

    /// Queues a host event that is not an alarm notification.
    pub fn push_unrelated_event(&self, tag: u32) {
        self.inner
            .borrow_mut()
            .events
            .push_back(MockEvent::Unrelated(tag));
    }

    /// Queues an arbitrary event.
    pub fn push_event(&self, event: MockEvent) {
        self.inner.borrow_mut().events.push_back(event);
    }

    /// Removes and returns every queued event, oldest first.
    pub fn take_events(&self) -> Vec<MockEvent> {
        self.inner.borrow_mut().events.drain(..).collect()
    }

    /// Number of queued events.
    #[must_use]
    pub fn pending_events(&self) -> usize {
        self.inner.borrow().events.len()
    }

    /// Every recorded backend call, oldest first.
    #[must_use]
    pub fn ops(&self) -> Vec<MockOp> {
        self.inner.borrow().ops.clone()
    }

    /// Clears the recorded calls.
    pub fn clear_ops(&self) {
        self.inner.borrow_mut().ops.clear();
    }
}

impl SyncBackend for MockBackend {
    type DisplayFence = MockFence;
    type Counter = MockCounter;
    type Alarm = MockAlarm;
    type GpuFence = MockGpuFence;
    type Event = MockEvent;

    fn probe(&self) -> Result<(), FenceError> {
        let caps = self.inner.borrow().capabilities;
        if !caps.gpu_sync {
            return Err(FenceError::Unavailable("GL_ARB_sync"));
        }
        if !caps.fence_import {
            return Err(FenceError::Unavailable("GL_EXT_x11_sync_object"));
        }
        if !caps.display_sync {
            return Err(FenceError::Unavailable("SYNC"));
        }
        Ok(())
    }

    fn create_fence(&self) -> Result<MockFence, BackendError> {
        let mut inner = self.inner.borrow_mut();
        inner.check_failure(BackendOp::CreateFence)?;
        let fence = MockFence(inner.id());
        inner.fences.insert(fence, false);
        inner.counts.fences_created += 1;
        Ok(fence)
    }

    fn trigger_fence(&self, fence: MockFence) -> Result<(), BackendError> {
        let mut inner = self.inner.borrow_mut();
        inner.check_failure(BackendOp::TriggerFence)?;
        inner.ops.push(MockOp::TriggerFence(fence));
        match inner.fences.get_mut(&fence) {
            Some(triggered) => {
                *triggered = true;
                Ok(())
            }
            None => Err(BackendError::new(
                BackendOp::TriggerFence,
                format!("unknown fence {}", fence.0),
            )),
        }
    }

    fn reset_fence(&self, fence: MockFence) -> Result<(), BackendError> {
        let mut inner = self.inner.borrow_mut();
        inner.check_failure(BackendOp::ResetFence)?;
        inner.ops.push(MockOp::ResetFence(fence));
        match inner.fences.get_mut(&fence) {
            Some(triggered) => {
                *triggered = false;
                Ok(())
            }
            None => Err(BackendError::new(
                BackendOp::ResetFence,
                format!("unknown fence {}", fence.0),
            )),
        }
    }

    fn destroy_fence(&self, fence: MockFence) {
        let mut inner = self.inner.borrow_mut();
        if inner.fences.remove(&fence).is_some() {
            inner.counts.fences_destroyed += 1;
        }
    }

    fn create_counter(&self, initial: i64) -> Result<MockCounter, BackendError> {
        let mut inner = self.inner.borrow_mut();
        inner.check_failure(BackendOp::CreateCounter)?;
        let counter = MockCounter(inner.id());
        inner.counters.insert(counter, initial);
        inner.counts.counters_created += 1;
        Ok(counter)
    }

    fn set_counter(&self, counter: MockCounter, value: i64) -> Result<(), BackendError> {
        let mut inner = self.inner.borrow_mut();
        inner.check_failure(BackendOp::SetCounter)?;
        inner.ops.push(MockOp::SetCounter(counter, value));
        match inner.counters.get_mut(&counter) {
            Some(current) => *current = value,
            None => {
                return Err(BackendError::new(
                    BackendOp::SetCounter,
                    format!("unknown counter {}", counter.0),
                ));
            }
        }
        inner.fire_alarms(counter);
        Ok(())
    }

    fn destroy_counter(&self, counter: MockCounter) {
        let mut inner = self.inner.borrow_mut();
        if inner.counters.remove(&counter).is_some() {
            inner.counts.counters_destroyed += 1;
        }
    }

    fn create_alarm(&self, counter: MockCounter, threshold: i64) -> Result<MockAlarm, BackendError> {
        let mut inner = self.inner.borrow_mut();
        inner.check_failure(BackendOp::CreateAlarm)?;
        let alarm = MockAlarm(inner.id());
        inner.alarms.insert(
            alarm,
            AlarmRecord {
                counter,
                threshold,
                armed: true,
            },
        );
        inner.counts.alarms_created += 1;
        inner.fire_alarms(counter);
        Ok(alarm)
    }

    fn change_alarm(&self, alarm: MockAlarm, threshold: i64) -> Result<(), BackendError> {
        let mut inner = self.inner.borrow_mut();
        inner.check_failure(BackendOp::ChangeAlarm)?;
        inner.ops.push(MockOp::ChangeAlarm(alarm, threshold));
        let counter = match inner.alarms.get_mut(&alarm) {
            Some(record) => {
                record.threshold = threshold;
                record.armed = true;
                record.counter
            }
            None => {
                return Err(BackendError::new(
                    BackendOp::ChangeAlarm,
                    format!("unknown alarm {}", alarm.0),
                ));
            }
        };
        inner.fire_alarms(counter);
        Ok(())
    }

    fn destroy_alarm(&self, alarm: MockAlarm) {
        let mut inner = self.inner.borrow_mut();
        inner.ops.push(MockOp::DestroyAlarm(alarm));
        if inner.alarms.remove(&alarm).is_some() {
            inner.counts.alarms_destroyed += 1;
        }
    }

    fn round_trip(&self) -> Result<(), BackendError> {
        let mut inner = self.inner.borrow_mut();
        inner.check_failure(BackendOp::RoundTrip)?;
        inner.counts.round_trips += 1;
        Ok(())
    }

    fn drain_alarm(&self, alarm: MockAlarm) -> Result<(), BackendError> {
        let mut inner = self.inner.borrow_mut();
        inner.check_failure(BackendOp::DrainAlarm)?;
        inner.ops.push(MockOp::DrainAlarm(alarm));
        let pos = inner.events.iter().position(|event| {
            matches!(event, MockEvent::AlarmNotify { alarm: a, .. } if *a == alarm)
        });
        match pos {
            Some(pos) => {
                inner.events.remove(pos);
                inner.counts.drains += 1;
                Ok(())
            }
            // A real server would block forever here.
            None => Err(BackendError::new(
                BackendOp::DrainAlarm,
                format!("no notification pending for alarm {}", alarm.0),
            )),
        }
    }

    fn import_fence(&self, fence: MockFence) -> Result<MockGpuFence, BackendError> {
        let mut inner = self.inner.borrow_mut();
        inner.check_failure(BackendOp::ImportFence)?;
        if !inner.fences.contains_key(&fence) {
            return Err(BackendError::new(
                BackendOp::ImportFence,
                format!("unknown fence {}", fence.0),
            ));
        }
        if inner.counts.round_trips == 0 {
            return Err(BackendError::new(
                BackendOp::ImportFence,
                "fence imported before the server saw it",
            ));
        }
        let id = inner.id();
        inner.gpu_fences.insert(id, 0);
        inner.imported.insert(id);
        inner.counts.gpu_fences_created += 1;
        Ok(MockGpuFence(id))
    }

    fn gpu_wait(&self, fence: &MockGpuFence) -> Result<(), BackendError> {
        let mut inner = self.inner.borrow_mut();
        inner.check_failure(BackendOp::GpuWait)?;
        inner.ops.push(MockOp::GpuWait(fence.0));
        if inner.imported.contains(&fence.0) {
            Ok(())
        } else {
            Err(BackendError::new(
                BackendOp::GpuWait,
                format!("fence {} is not an imported fence", fence.0),
            ))
        }
    }

    fn insert_completion_fence(&self) -> Result<MockGpuFence, BackendError> {
        let mut inner = self.inner.borrow_mut();
        inner.check_failure(BackendOp::InsertFence)?;
        let id = inner.id();
        inner.gpu_fences.insert(id, 0);
        inner.counts.gpu_fences_created += 1;
        Ok(MockGpuFence(id))
    }

    fn client_wait(
        &self,
        fence: &MockGpuFence,
        timeout: Duration,
    ) -> Result<WaitStatus, BackendError> {
        let mut inner = self.inner.borrow_mut();
        inner.check_failure(BackendOp::ClientWait)?;
        inner.ops.push(MockOp::ClientWait(fence.0, timeout));
        let completion = inner.completion;
        let Some(polls) = inner.gpu_fences.get_mut(&fence.0) else {
            return Err(BackendError::new(
                BackendOp::ClientWait,
                format!("unknown GPU fence {}", fence.0),
            ));
        };
        *polls += 1;
        let status = match completion {
            GpuCompletion::Instant => WaitStatus::Signaled,
            GpuCompletion::Never => WaitStatus::Pending,
            GpuCompletion::AfterPolls(n) if *polls > n => WaitStatus::Signaled,
            GpuCompletion::AfterPolls(_) => WaitStatus::Pending,
            GpuCompletion::OnBlockingWait if timeout.is_zero() => WaitStatus::Pending,
            GpuCompletion::OnBlockingWait => WaitStatus::Signaled,
            GpuCompletion::Fail => {
                return Err(BackendError::new(BackendOp::ClientWait, "GL_WAIT_FAILED"));
            }
        };
        Ok(status)
    }

    fn delete_gpu_fence(&self, fence: MockGpuFence) {
        let mut inner = self.inner.borrow_mut();
        inner.imported.remove(&fence.0);
        if inner.gpu_fences.remove(&fence.0).is_some() {
            inner.counts.gpu_fences_deleted += 1;
        }
    }

    fn alarm_for_event(&self, event: &MockEvent) -> Option<MockAlarm> {
        match event {
            MockEvent::AlarmNotify { alarm, .. } => Some(*alarm),
            MockEvent::Unrelated(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setting_a_counter_fires_matching_alarms() {
        let backend = MockBackend::new();
        let counter = backend.create_counter(0).unwrap();
        let alarm = backend.create_alarm(counter, 1).unwrap();
        assert_eq!(backend.pending_events(), 0, "alarm must not fire below threshold");

        backend.set_counter(counter, 1).unwrap();
        assert_eq!(
            backend.take_events(),
            [MockEvent::AlarmNotify {
                alarm,
                counter_value: 1
            }]
        );

        // Disarmed until changed.
        backend.set_counter(counter, 2).unwrap();
        assert_eq!(backend.pending_events(), 0, "fired alarm stays disarmed");
    }

    #[test]
    fn drain_removes_only_the_matching_notification() {
        let backend = MockBackend::new();
        let counter = backend.create_counter(0).unwrap();
        let alarm = backend.create_alarm(counter, 1).unwrap();
        backend.push_unrelated_event(7);
        backend.set_counter(counter, 1).unwrap();
        backend.push_unrelated_event(8);

        backend.drain_alarm(alarm).unwrap();
        assert_eq!(
            backend.take_events(),
            [MockEvent::Unrelated(7), MockEvent::Unrelated(8)]
        );
        assert!(backend.drain_alarm(alarm).is_err(), "nothing left to drain");
    }

    #[test]
    fn import_requires_a_round_trip() {
        let backend = MockBackend::new();
        let fence = backend.create_fence().unwrap();
        assert!(backend.import_fence(fence).is_err(), "import before round trip");
        backend.round_trip().unwrap();
        let imported = backend.import_fence(fence).unwrap();
        backend.delete_gpu_fence(imported);
        backend.destroy_fence(fence);
        assert!(backend.counts().is_balanced());
    }

    #[test]
    fn after_polls_signals_eventually() {
        let backend = MockBackend::new();
        backend.set_gpu_completion(GpuCompletion::AfterPolls(2));
        let fence = backend.insert_completion_fence().unwrap();
        assert_eq!(
            backend.client_wait(&fence, Duration::ZERO).unwrap(),
            WaitStatus::Pending
        );
        assert_eq!(
            backend.client_wait(&fence, Duration::ZERO).unwrap(),
            WaitStatus::Pending
        );
        assert_eq!(
            backend.client_wait(&fence, Duration::ZERO).unwrap(),
            WaitStatus::Signaled
        );
        backend.delete_gpu_fence(fence);
    }

    #[test]
    fn injected_failures_fire_once() {
        let backend = MockBackend::new();
        backend.fail_next(BackendOp::CreateFence);
        let err = backend.create_fence().unwrap_err();
        assert_eq!(err.op, BackendOp::CreateFence);
        assert!(backend.create_fence().is_ok(), "failure must be consumed");
    }

    #[test]
    fn probe_names_the_missing_capability() {
        let backend = MockBackend::with_capabilities(MockCapabilities {
            fence_import: false,
            ..MockCapabilities::ALL
        });
        assert_eq!(
            backend.probe(),
            Err(FenceError::Unavailable("GL_EXT_x11_sync_object"))
        );
    }
}
