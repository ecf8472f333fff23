// Copyright 2026 the Lockstep Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Compact binary event recording and decoding.
//!
//! [`RecorderSink`] implements [`TraceSink`] and encodes events into a
//! `Vec<u8>` as fixed-size little-endian records. [`decode`] reads them back
//! as an iterator of [`RecordedEvent`].
//!
//! Slot indices and counts are stored as `u32`, saturating. Fallback wait
//! bounds are stored in nanoseconds, saturating at `u64::MAX`.

use std::time::Duration;

use lockstep_core::slot::SlotState;
use lockstep_core::trace::{
    DisabledEvent, RebootCause, RebootEvent, RecycleEvent, SlotTransitionEvent, TraceSink,
    WarmupEvent,
};

// ---------------------------------------------------------------------------
// Event type discriminants
// ---------------------------------------------------------------------------

const TAG_SLOT_TRANSITION: u8 = 1;
const TAG_WARMUP: u8 = 2;
const TAG_RECYCLE: u8 = 3;
const TAG_REBOOT: u8 = 4;
const TAG_DISABLED: u8 = 5;

// ---------------------------------------------------------------------------
// RecorderSink
// ---------------------------------------------------------------------------

/// A [`TraceSink`] that encodes events into a compact binary buffer.
#[derive(Debug, Default)]
pub struct RecorderSink {
    buf: Vec<u8>,
}

impl RecorderSink {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a view of the recorded bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Consumes the recorder and returns the recorded bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    // -- encoding helpers --------------------------------------------------

    fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn write_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn write_index(&mut self, v: usize) {
        self.write_u32(u32::try_from(v).unwrap_or(u32::MAX));
    }

    fn write_option_duration(&mut self, v: Option<Duration>) {
        match v {
            Some(d) => {
                self.write_u8(1);
                self.write_u64(u64::try_from(d.as_nanos()).unwrap_or(u64::MAX));
            }
            None => {
                self.write_u8(0);
                self.write_u64(0);
            }
        }
    }

    fn write_state(&mut self, s: SlotState) {
        self.write_u8(match s {
            SlotState::Ready => 0,
            SlotState::Waiting => 1,
            SlotState::Done => 2,
            SlotState::ResetPending => 3,
        });
    }

    fn write_cause(&mut self, c: RebootCause) {
        self.write_u8(match c {
            RebootCause::ProtocolViolation => 0,
            RebootCause::CompletionTimeout => 1,
            RebootCause::BackendFailure => 2,
            RebootCause::ReinitFailure => 3,
        });
    }
}

impl TraceSink for RecorderSink {
    fn on_slot_transition(&mut self, e: &SlotTransitionEvent) {
        self.write_u8(TAG_SLOT_TRANSITION);
        self.write_u64(e.frame);
        self.write_index(e.slot);
        self.write_state(e.from);
        self.write_state(e.to);
    }

    fn on_warmup(&mut self, e: &WarmupEvent) {
        self.write_u8(TAG_WARMUP);
        self.write_u64(e.frame);
        self.write_index(e.warmup_count);
        self.write_index(e.warmup_target);
    }

    fn on_recycle(&mut self, e: &RecycleEvent) {
        self.write_u8(TAG_RECYCLE);
        self.write_u64(e.frame);
        self.write_index(e.current);
        self.write_index(e.victim);
        self.write_u8(u8::from(e.fast_path));
        self.write_option_duration(e.fallback_wait);
    }

    fn on_reboot(&mut self, e: &RebootEvent) {
        self.write_u8(TAG_REBOOT);
        self.write_cause(e.cause);
        self.write_u32(e.reboot_count);
        self.write_u32(e.max_reboots);
    }

    fn on_disabled(&mut self, e: &DisabledEvent) {
        self.write_u8(TAG_DISABLED);
        self.write_u32(e.reboot_count);
    }
}

// ---------------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------------

/// A decoded event from a binary recording.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordedEvent {
    /// A [`SlotTransitionEvent`].
    SlotTransition(SlotTransitionEvent),
    /// A [`WarmupEvent`].
    Warmup(WarmupEvent),
    /// A [`RecycleEvent`].
    Recycle(RecycleEvent),
    /// A [`RebootEvent`].
    Reboot(RebootEvent),
    /// A [`DisabledEvent`].
    Disabled(DisabledEvent),
}

/// Decodes a byte slice produced by [`RecorderSink`] into an iterator of
/// [`RecordedEvent`].
///
/// Iteration stops at the first truncated or unrecognized record.
pub fn decode(bytes: &[u8]) -> DecodeIter<'_> {
    DecodeIter {
        data: bytes,
        pos: 0,
    }
}

/// Iterator over decoded events.
#[derive(Debug)]
pub struct DecodeIter<'a> {
    data: &'a [u8],
    pos: usize,
}

impl DecodeIter<'_> {
    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn read_u8(&mut self) -> Option<u8> {
        if self.remaining() < 1 {
            return None;
        }
        let v = self.data[self.pos];
        self.pos += 1;
        Some(v)
    }

    fn read_u32(&mut self) -> Option<u32> {
        if self.remaining() < 4 {
            return None;
        }
        let v = u32::from_le_bytes(self.data[self.pos..self.pos + 4].try_into().ok()?);
        self.pos += 4;
        Some(v)
    }

    fn read_u64(&mut self) -> Option<u64> {
        if self.remaining() < 8 {
            return None;
        }
        let v = u64::from_le_bytes(self.data[self.pos..self.pos + 8].try_into().ok()?);
        self.pos += 8;
        Some(v)
    }

    fn read_index(&mut self) -> Option<usize> {
        usize::try_from(self.read_u32()?).ok()
    }

    fn read_option_duration(&mut self) -> Option<Option<Duration>> {
        let present = self.read_u8()?;
        let nanos = self.read_u64()?;
        Some((present != 0).then(|| Duration::from_nanos(nanos)))
    }

    fn read_state(&mut self) -> Option<SlotState> {
        match self.read_u8()? {
            0 => Some(SlotState::Ready),
            1 => Some(SlotState::Waiting),
            2 => Some(SlotState::Done),
            3 => Some(SlotState::ResetPending),
            _ => None,
        }
    }

    fn read_cause(&mut self) -> Option<RebootCause> {
        match self.read_u8()? {
            0 => Some(RebootCause::ProtocolViolation),
            1 => Some(RebootCause::CompletionTimeout),
            2 => Some(RebootCause::BackendFailure),
            3 => Some(RebootCause::ReinitFailure),
            _ => None,
        }
    }

    fn decode_slot_transition(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::SlotTransition(SlotTransitionEvent {
            frame: self.read_u64()?,
            slot: self.read_index()?,
            from: self.read_state()?,
            to: self.read_state()?,
        }))
    }

    fn decode_warmup(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::Warmup(WarmupEvent {
            frame: self.read_u64()?,
            warmup_count: self.read_index()?,
            warmup_target: self.read_index()?,
        }))
    }

    fn decode_recycle(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::Recycle(RecycleEvent {
            frame: self.read_u64()?,
            current: self.read_index()?,
            victim: self.read_index()?,
            fast_path: self.read_u8()? != 0,
            fallback_wait: self.read_option_duration()?,
        }))
    }

    fn decode_reboot(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::Reboot(RebootEvent {
            cause: self.read_cause()?,
            reboot_count: self.read_u32()?,
            max_reboots: self.read_u32()?,
        }))
    }

    fn decode_disabled(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::Disabled(DisabledEvent {
            reboot_count: self.read_u32()?,
        }))
    }
}

impl Iterator for DecodeIter<'_> {
    type Item = RecordedEvent;

    fn next(&mut self) -> Option<Self::Item> {
        let tag = self.read_u8()?;
        match tag {
            TAG_SLOT_TRANSITION => self.decode_slot_transition(),
            TAG_WARMUP => self.decode_warmup(),
            TAG_RECYCLE => self.decode_recycle(),
            TAG_REBOOT => self.decode_reboot(),
            TAG_DISABLED => self.decode_disabled(),
            _ => None, // unknown tag → stop iteration
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_recycle() -> RecycleEvent {
        RecycleEvent {
            frame: 41,
            current: 3,
            victim: 8,
            fast_path: false,
            fallback_wait: Some(Duration::from_secs(1)),
        }
    }

    #[test]
    fn records_a_frame_in_order() {
        let mut rec = RecorderSink::new();
        rec.on_warmup(&WarmupEvent {
            frame: 0,
            warmup_count: 1,
            warmup_target: 5,
        });
        rec.on_slot_transition(&SlotTransitionEvent {
            frame: 41,
            slot: 8,
            from: SlotState::Waiting,
            to: SlotState::Done,
        });
        rec.on_recycle(&sample_recycle());
        rec.on_reboot(&RebootEvent {
            cause: RebootCause::ReinitFailure,
            reboot_count: 2,
            max_reboots: 2,
        });
        rec.on_disabled(&DisabledEvent { reboot_count: 3 });

        let events: Vec<_> = decode(rec.as_bytes()).collect();
        assert_eq!(events.len(), 5);
        assert!(matches!(events[0], RecordedEvent::Warmup(_)));
        assert_eq!(
            events[1],
            RecordedEvent::SlotTransition(SlotTransitionEvent {
                frame: 41,
                slot: 8,
                from: SlotState::Waiting,
                to: SlotState::Done,
            })
        );
        assert_eq!(events[2], RecordedEvent::Recycle(sample_recycle()));
        match &events[3] {
            RecordedEvent::Reboot(e) => {
                assert_eq!(e.cause, RebootCause::ReinitFailure);
                assert_eq!(e.reboot_count, 2);
            }
            other => panic!("expected Reboot, got {other:?}"),
        }
        assert_eq!(
            events[4],
            RecordedEvent::Disabled(DisabledEvent { reboot_count: 3 })
        );
    }

    #[test]
    fn fast_path_recycle_has_no_wait() {
        let mut rec = RecorderSink::new();
        rec.on_recycle(&RecycleEvent {
            fast_path: true,
            fallback_wait: None,
            ..sample_recycle()
        });
        match decode(rec.as_bytes()).next() {
            Some(RecordedEvent::Recycle(e)) => {
                assert!(e.fast_path);
                assert_eq!(e.fallback_wait, None);
            }
            other => panic!("expected Recycle, got {other:?}"),
        }
    }

    #[test]
    fn records_have_fixed_sizes() {
        let mut rec = RecorderSink::new();
        rec.on_disabled(&DisabledEvent { reboot_count: 3 });
        assert_eq!(rec.as_bytes().len(), 1 + 4);
        rec.on_recycle(&sample_recycle());
        assert_eq!(rec.as_bytes().len(), 5 + 1 + 8 + 4 + 4 + 1 + 1 + 8);
    }

    #[test]
    fn truncated_record_stops_decoding() {
        let mut rec = RecorderSink::new();
        rec.on_disabled(&DisabledEvent { reboot_count: 1 });
        rec.on_recycle(&sample_recycle());
        let bytes = rec.into_bytes();
        let events: Vec<_> = decode(&bytes[..bytes.len() - 3]).collect();
        assert_eq!(events.len(), 1, "only the complete record decodes");
    }

    #[test]
    fn unknown_tag_stops_decoding() {
        let events: Vec<_> = decode(&[0xff, 0, 0, 0, 0]).collect();
        assert!(events.is_empty());
    }

    #[test]
    fn empty_buffer_decodes_to_nothing() {
        let events: Vec<_> = decode(&[]).collect();
        assert!(events.is_empty());
    }
}
