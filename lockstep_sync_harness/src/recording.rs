// Copyright 2026 the Lockstep Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Trace sink that keeps every event for later assertions.

use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::RefCell;

use lockstep_core::slot::SlotState;
use lockstep_core::trace::{
    DisabledEvent, RebootEvent, RecycleEvent, SlotTransitionEvent, TraceSink, WarmupEvent,
};

/// One recorded trace event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TraceRecord {
    /// See [`TraceSink::on_slot_transition`].
    Transition(SlotTransitionEvent),
    /// See [`TraceSink::on_warmup`].
    Warmup(WarmupEvent),
    /// See [`TraceSink::on_recycle`].
    Recycle(RecycleEvent),
    /// See [`TraceSink::on_reboot`].
    Reboot(RebootEvent),
    /// See [`TraceSink::on_disabled`].
    Disabled(DisabledEvent),
}

/// A [`TraceSink`] that appends every event to a shared list.
///
/// Clones share the same list, so keep one clone and hand the other to the
/// ring.
#[derive(Clone, Debug, Default)]
pub struct RecordingSink {
    records: Rc<RefCell<Vec<TraceRecord>>>,
}

impl RecordingSink {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded events, oldest first.
    #[must_use]
    pub fn records(&self) -> Vec<TraceRecord> {
        self.records.borrow().clone()
    }

    /// Forgets everything recorded so far.
    pub fn clear(&self) {
        self.records.borrow_mut().clear();
    }

    /// Victim slot of every recycle, in order.
    #[must_use]
    pub fn recycled_slots(&self) -> Vec<usize> {
        self.records
            .borrow()
            .iter()
            .filter_map(|record| match record {
                TraceRecord::Recycle(e) => Some(e.victim),
                _ => None,
            })
            .collect()
    }

    /// Every recycle event, in order.
    #[must_use]
    pub fn recycles(&self) -> Vec<RecycleEvent> {
        self.records
            .borrow()
            .iter()
            .filter_map(|record| match record {
                TraceRecord::Recycle(e) => Some(*e),
                _ => None,
            })
            .collect()
    }

    /// `(from, to)` pairs observed for `slot`, in order.
    #[must_use]
    pub fn transitions_for(&self, slot: usize) -> Vec<(SlotState, SlotState)> {
        self.records
            .borrow()
            .iter()
            .filter_map(|record| match record {
                TraceRecord::Transition(e) if e.slot == slot => Some((e.from, e.to)),
                _ => None,
            })
            .collect()
    }

    /// Every reboot event, in order.
    #[must_use]
    pub fn reboots(&self) -> Vec<RebootEvent> {
        self.records
            .borrow()
            .iter()
            .filter_map(|record| match record {
                TraceRecord::Reboot(e) => Some(*e),
                _ => None,
            })
            .collect()
    }

    /// How many times the ring reported being disabled.
    #[must_use]
    pub fn disabled_count(&self) -> usize {
        self.records
            .borrow()
            .iter()
            .filter(|record| matches!(record, TraceRecord::Disabled(_)))
            .count()
    }

    fn push(&self, record: TraceRecord) {
        self.records.borrow_mut().push(record);
    }
}

impl TraceSink for RecordingSink {
    fn on_slot_transition(&mut self, e: &SlotTransitionEvent) {
        self.push(TraceRecord::Transition(*e));
    }

    fn on_warmup(&mut self, e: &WarmupEvent) {
        self.push(TraceRecord::Warmup(*e));
    }

    fn on_recycle(&mut self, e: &RecycleEvent) {
        self.push(TraceRecord::Recycle(*e));
    }

    fn on_reboot(&mut self, e: &RebootEvent) {
        self.push(TraceRecord::Reboot(*e));
    }

    fn on_disabled(&mut self, e: &DisabledEvent) {
        self.push(TraceRecord::Disabled(*e));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockstep_core::trace::RebootCause;

    #[test]
    fn clones_share_the_record_list() {
        let sink = RecordingSink::new();
        let mut handle = sink.clone();
        handle.on_reboot(&RebootEvent {
            cause: RebootCause::CompletionTimeout,
            reboot_count: 1,
            max_reboots: 2,
        });
        handle.on_disabled(&DisabledEvent { reboot_count: 3 });

        assert_eq!(sink.reboots().len(), 1);
        assert_eq!(sink.disabled_count(), 1);
        sink.clear();
        assert!(handle.records().is_empty(), "clear is shared too");
    }

    #[test]
    fn transitions_filter_by_slot() {
        let mut sink = RecordingSink::new();
        for (slot, from, to) in [
            (0, SlotState::Ready, SlotState::Waiting),
            (1, SlotState::Ready, SlotState::Waiting),
            (0, SlotState::Waiting, SlotState::Done),
        ] {
            sink.on_slot_transition(&SlotTransitionEvent {
                frame: 0,
                slot,
                from,
                to,
            });
        }
        assert_eq!(
            sink.transitions_for(0),
            [
                (SlotState::Ready, SlotState::Waiting),
                (SlotState::Waiting, SlotState::Done),
            ]
        );
    }
}
