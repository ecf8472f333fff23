// Copyright 2026 the Lockstep Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Fixed-capacity ring of fence slots with bounded self-recovery.
//!
//! The [`FenceRing`] answers one question per frame: is the GPU work queued
//! `capacity / 2` frames ago finished, so its slot can be reused? Under
//! normal vsync-paced presentation the answer is already "yes" by then, so
//! the check is a non-blocking poll. When it is not, the ring waits once
//! with a bounded timeout and otherwise reboots: it tears every slot down
//! and rebuilds them from scratch, up to a configured budget, after which it
//! disables itself for good.
//!
//! # Frame protocol
//!
//! ```rust,ignore
//! // Once, after the display backend is up:
//! let mut ring = FenceRing::new(backend, RingConfig::DEFAULT);
//! let active = ring.init();
//!
//! // Every frame:
//! ring.insert_wait();        // before submitting GPU commands
//! submit_gpu_commands();
//! request_presentation();
//! ring.after_frame();        // right after requesting presentation
//!
//! // From the host event loop, for alarm-notification events:
//! ring.handle_event(&event);
//! ```
//!
//! Every entry point returns `false` once the ring is inactive or disabled.
//! Callers treat that as "render without this aid", never as fatal.
//!
//! # Threading
//!
//! The ring is `!Send`: the present loop and the host event dispatch must
//! run on the same thread. Dropping the ring tears it down on that thread.

use alloc::boxed::Box;
use alloc::rc::Rc;
use alloc::vec::Vec;
use core::fmt;
use core::time::Duration;

use hashbrown::HashMap;

use crate::backend::{SyncBackend, WaitStatus};
use crate::config::RingConfig;
use crate::error::FenceError;
use crate::slot::{FenceSlot, SlotState};
use crate::trace::{
    DisabledEvent, RebootCause, RebootEvent, RecycleEvent, SlotTransitionEvent, TraceSink,
    WarmupEvent,
};

/// Ring of [`FenceSlot`]s owned by one renderer context.
///
/// The ring is either fully allocated (every slot valid) or fully torn down;
/// no partial state is observable between calls.
pub struct FenceRing<B: SyncBackend> {
    backend: Rc<B>,
    config: RingConfig,
    slots: Vec<FenceSlot<B>>,
    alarm_to_slot: HashMap<B::Alarm, usize>,
    current_index: usize,
    warmup_count: usize,
    frame: u64,
    reboot_count: u32,
    enabled: bool,
    /// `insert_wait` rebooted without queuing a frame; the matching
    /// `after_frame` has nothing to recycle.
    frame_dropped: bool,
    sink: Option<Box<dyn TraceSink>>,
}

impl<B: SyncBackend> fmt::Debug for FenceRing<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FenceRing")
            .field("config", &self.config)
            .field("slots", &self.slots.len())
            .field("current_index", &self.current_index)
            .field("warmup_count", &self.warmup_count)
            .field("frame", &self.frame)
            .field("reboot_count", &self.reboot_count)
            .field("enabled", &self.enabled)
            .field("frame_dropped", &self.frame_dropped)
            .field("has_sink", &self.sink.is_some())
            .finish_non_exhaustive()
    }
}

impl<B: SyncBackend> FenceRing<B> {
    /// Creates an inert ring. Nothing is allocated until [`init`](Self::init).
    pub fn new(backend: impl Into<Rc<B>>, config: RingConfig) -> Self {
        Self {
            backend: backend.into(),
            config,
            slots: Vec::new(),
            alarm_to_slot: HashMap::new(),
            current_index: 0,
            warmup_count: 0,
            frame: 0,
            reboot_count: 0,
            enabled: true,
            frame_dropped: false,
            sink: None,
        }
    }

    /// Installs a trace sink, replacing any previous one.
    pub fn set_trace_sink(&mut self, sink: Box<dyn TraceSink>) {
        self.sink = Some(sink);
    }

    /// Removes and returns the trace sink.
    pub fn take_trace_sink(&mut self) -> Option<Box<dyn TraceSink>> {
        self.sink.take()
    }

    /// The backend shared with every slot.
    #[must_use]
    pub fn backend(&self) -> &Rc<B> {
        &self.backend
    }

    /// The configuration this ring was built with.
    #[must_use]
    pub fn config(&self) -> &RingConfig {
        &self.config
    }

    /// Probes capabilities and allocates every slot.
    ///
    /// Returns `false` when a capability is missing (the renderer runs
    /// without this aid), when allocation fails, or when the ring has been
    /// disabled. Calling it on an active ring is a no-op returning `true`.
    pub fn init(&mut self) -> bool {
        if !self.enabled {
            return false;
        }
        if self.is_active() {
            return true;
        }
        match self.build() {
            Ok(()) => true,
            Err(FenceError::Unavailable(what)) => {
                tracing::debug!(missing = what, "fence ring unavailable");
                false
            }
            Err(err) => {
                tracing::warn!(%err, "fence ring initialization failed");
                false
            }
        }
    }

    /// Releases every slot and clears ring state.
    ///
    /// Idempotent: safe on a ring that is already torn down or was never
    /// initialized. Slots caught mid-reset are drained per
    /// [`RingConfig::teardown`], which may block on the display server.
    pub fn destroy(&mut self) {
        self.alarm_to_slot.clear();
        // Slots release their resources in `Drop`.
        self.slots.clear();
        self.current_index = 0;
        self.warmup_count = 0;
        self.frame = 0;
        self.frame_dropped = false;
    }

    /// Signals the current slot and makes subsequent GPU commands wait on
    /// it. Call immediately before submitting a frame's GPU commands.
    ///
    /// An out-of-order call (the current slot is not ready) reboots the
    /// ring; if the ring survives, the insert proceeds on the fresh ring.
    /// If the insert itself fails, the ring reboots and the frame is
    /// dropped: the following [`after_frame`](Self::after_frame) returns
    /// `false` without touching the rebuilt ring.
    pub fn insert_wait(&mut self) -> bool {
        if !self.is_active() {
            return false;
        }
        self.frame_dropped = false;

        let slot = self.current_index;
        let found = self.slots[slot].state();
        if found != SlotState::Ready {
            let err = FenceError::ProtocolViolation { slot, found };
            tracing::warn!(%err, "insert_wait out of order; are alarm events being forwarded?");
            if !self.reboot(RebootCause::ProtocolViolation) {
                return false;
            }
        }

        match self.insert_current() {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(%err, "insert_wait failed");
                self.reboot(RebootCause::BackendFailure);
                self.frame_dropped = true;
                false
            }
        }
    }

    /// Recycles the slot queued `capacity / 2` frames ago and advances the
    /// ring. Call immediately after requesting presentation.
    ///
    /// Returns `false` if the ring had to reboot, or if the frame's
    /// `insert_wait` already did.
    pub fn after_frame(&mut self) -> bool {
        if !self.is_active() {
            return false;
        }
        if core::mem::take(&mut self.frame_dropped) {
            return false;
        }
        match self.advance() {
            Ok(()) => true,
            Err(err) => {
                let cause = match &err {
                    FenceError::ProtocolViolation { .. } | FenceError::InvalidTransition { .. } => {
                        RebootCause::ProtocolViolation
                    }
                    FenceError::CompletionTimeout { .. } => RebootCause::CompletionTimeout,
                    _ => RebootCause::BackendFailure,
                };
                tracing::warn!(%err, cause = cause.as_str(), "after_frame failed");
                self.reboot(cause);
                false
            }
        }
    }

    /// Routes a host event to the slot owning its alarm.
    ///
    /// Returns `true` if the event belonged to this ring. Events that are not
    /// alarm notifications, or that name an alarm no slot owns, are ignored.
    pub fn handle_event(&mut self, event: &B::Event) -> bool {
        if !self.is_active() {
            return false;
        }
        match self.backend.alarm_for_event(event) {
            Some(alarm) => self.handle_alarm(alarm),
            None => false,
        }
    }

    /// Routes an alarm notification by alarm identity.
    ///
    /// Returns `true` if a slot owns `alarm`.
    pub fn handle_alarm(&mut self, alarm: B::Alarm) -> bool {
        if !self.is_active() {
            return false;
        }
        let Some(&index) = self.alarm_to_slot.get(&alarm) else {
            return false;
        };
        let slot = &mut self.slots[index];
        let from = slot.state();
        let owned = slot.handle_alarm(alarm);
        let to = slot.state();
        self.emit_transition(index, from, to);
        owned
    }

    /// Whether the ring may still be (re)initialized.
    ///
    /// Becomes `false` permanently once the reboot budget is spent.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Whether the ring is enabled and fully allocated.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.enabled && !self.slots.is_empty()
    }

    /// Number of slots in the ring.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.config.effective_capacity()
    }

    /// The slot `insert_wait` and `after_frame` currently operate on.
    #[must_use]
    pub fn current_index(&self) -> usize {
        self.current_index
    }

    /// Frames seen since initialization, capped at `capacity / 2`.
    #[must_use]
    pub fn warmup_count(&self) -> usize {
        self.warmup_count
    }

    /// Reboots performed since the ring was created.
    #[must_use]
    pub fn reboot_count(&self) -> u32 {
        self.reboot_count
    }

    /// State of slot `index`, or `None` when torn down or out of range.
    #[must_use]
    pub fn slot_state(&self, index: usize) -> Option<SlotState> {
        self.slots.get(index).map(FenceSlot::state)
    }

    /// Alarm owned by slot `index`.
    #[must_use]
    pub fn slot_alarm(&self, index: usize) -> Option<B::Alarm> {
        self.slots.get(index).map(FenceSlot::alarm)
    }

    /// Threshold slot `index` will arm on its next reset.
    #[must_use]
    pub fn slot_next_counter_value(&self, index: usize) -> Option<i64> {
        self.slots.get(index).map(FenceSlot::next_counter_value)
    }

    // -- internals ---------------------------------------------------------

    /// Allocates a full ring. On error nothing stays allocated.
    fn build(&mut self) -> Result<(), FenceError> {
        self.backend.probe()?;

        let capacity = self.config.effective_capacity();
        let mut pending = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            pending.push(FenceSlot::allocate(Rc::clone(&self.backend))?);
        }

        // Imports are only valid once the server has seen every fence.
        self.backend.round_trip()?;

        let mut slots = Vec::with_capacity(capacity);
        for slot in pending {
            slots.push(slot.import(self.config.teardown)?);
        }

        self.alarm_to_slot = slots
            .iter()
            .enumerate()
            .map(|(index, slot)| (slot.alarm(), index))
            .collect();
        self.slots = slots;
        self.current_index = 0;
        self.warmup_count = 0;
        self.frame = 0;
        tracing::debug!(capacity, "fence ring initialized");
        Ok(())
    }

    fn insert_current(&mut self) -> Result<(), FenceError> {
        let index = self.current_index;
        let slot = &mut self.slots[index];
        let from = slot.state();
        slot.insert()?;
        let to = slot.state();
        self.emit_transition(index, from, to);
        Ok(())
    }

    fn advance(&mut self) -> Result<(), FenceError> {
        let current = self.current_index;
        let found = self.slots[current].state();
        if found != SlotState::Waiting {
            return Err(FenceError::ProtocolViolation {
                slot: current,
                found,
            });
        }

        let capacity = self.slots.len();
        let warmup_target = self.config.warmup_frames();
        if self.warmup_count < warmup_target {
            self.warmup_count += 1;
            let event = WarmupEvent {
                frame: self.frame,
                warmup_count: self.warmup_count,
                warmup_target,
            };
            if let Some(sink) = &mut self.sink {
                sink.on_warmup(&event);
            }
        } else {
            let victim = (current + capacity - warmup_target) % capacity;
            self.recycle(current, victim)?;
        }

        self.current_index = (current + 1) % capacity;
        self.frame += 1;
        Ok(())
    }

    fn recycle(&mut self, current: usize, victim: usize) -> Result<(), FenceError> {
        let timeout = self.config.completion_timeout;
        let slot = &mut self.slots[victim];
        let from = slot.state();

        let mut fallback_wait = None;
        if slot.check_completion(Duration::ZERO)? == WaitStatus::Pending {
            tracing::warn!(
                slot = victim,
                "GPU work from {} frames ago still pending; waiting up to {:?}",
                self.config.warmup_frames(),
                timeout
            );
            fallback_wait = Some(timeout);
            if slot.check_completion(timeout)? == WaitStatus::Pending {
                return Err(FenceError::CompletionTimeout {
                    slot: victim,
                    waited: timeout,
                });
            }
        }
        let done = slot.state();
        self.emit_transition(victim, from, done);

        let slot = &mut self.slots[victim];
        slot.reset()?;
        let reset = slot.state();
        self.emit_transition(victim, done, reset);
        let event = RecycleEvent {
            frame: self.frame,
            current,
            victim,
            fast_path: fallback_wait.is_none(),
            fallback_wait,
        };
        if let Some(sink) = &mut self.sink {
            sink.on_recycle(&event);
        }
        Ok(())
    }

    /// Tears down and rebuilds the ring within the reboot budget.
    ///
    /// A rebuild that fails with a backend error spends another reboot.
    /// Returns whether the ring is active afterwards.
    fn reboot(&mut self, cause: RebootCause) -> bool {
        let mut cause = cause;
        loop {
            self.destroy();
            let exhausted = self.reboot_count >= self.config.max_reboots;
            self.reboot_count = self.reboot_count.saturating_add(1);

            let event = RebootEvent {
                cause,
                reboot_count: self.reboot_count,
                max_reboots: self.config.max_reboots,
            };
            if let Some(sink) = &mut self.sink {
                sink.on_reboot(&event);
            }

            if exhausted {
                let err = FenceError::RebootExhausted {
                    reboots: self.reboot_count,
                };
                self.disable(&err);
                return false;
            }

            tracing::info!(
                cause = cause.as_str(),
                reboot = self.reboot_count,
                max = self.config.max_reboots,
                "rebooting fence ring"
            );
            match self.build() {
                Ok(()) => return true,
                Err(err @ FenceError::Unavailable(_)) => {
                    self.disable(&err);
                    return false;
                }
                Err(err) => {
                    tracing::warn!(%err, "fence ring reinitialization failed");
                    cause = RebootCause::ReinitFailure;
                }
            }
        }
    }

    fn disable(&mut self, reason: &FenceError) {
        if !self.enabled {
            return;
        }
        self.enabled = false;
        tracing::error!(%reason, "fence ring disabled; frames will render without GPU pacing");
        let event = DisabledEvent {
            reboot_count: self.reboot_count,
        };
        if let Some(sink) = &mut self.sink {
            sink.on_disabled(&event);
        }
    }

    fn emit_transition(&mut self, slot: usize, from: SlotState, to: SlotState) {
        if from == to {
            return;
        }
        debug_assert_eq!(from.successor(), to, "slot {slot} skipped a state");
        let event = SlotTransitionEvent {
            frame: self.frame,
            slot,
            from,
            to,
        };
        if let Some(sink) = &mut self.sink {
            sink.on_slot_transition(&event);
        }
    }
}

impl<B: SyncBackend> Drop for FenceRing<B> {
    fn drop(&mut self) {
        self.destroy();
    }
}
