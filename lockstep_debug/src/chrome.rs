// Copyright 2026 the Lockstep Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Chrome Trace Event Format exporter.
//!
//! [`export`] reads recorded bytes from a [`RecorderSink`](super::recorder::RecorderSink)
//! and writes [Chrome Trace Event Format][spec] JSON to the given writer.
//!
//! Recordings carry frame numbers rather than timestamps, so events are laid
//! out on a synthetic timeline of one `frame_period` per frame. Frame numbers
//! restart after a reboot; the exporter keeps the timeline monotonic by
//! continuing from the last frame seen. Each slot gets its own track, with a
//! span covering the time its GPU work was outstanding.
//!
//! [spec]: https://docs.google.com/document/d/1CvAClvFfyA5R-PhYUmn5OOQtYMH4h6I0nSsKchNAySU

use std::io::{self, Write};
use std::time::Duration;

use serde_json::{Value, json};

use lockstep_core::slot::SlotState;

use crate::recorder::{RecordedEvent, decode};

/// Track for ring-level events; slot `n` uses track `n + 1`.
const RING_TID: usize = 0;

/// Exports recorded events as Chrome Trace Event Format JSON.
///
/// The output is a complete JSON array of trace event objects, suitable for
/// loading into `chrome://tracing` or [Perfetto](https://ui.perfetto.dev/).
pub fn export(bytes: &[u8], frame_period: Duration, writer: &mut dyn Write) -> io::Result<()> {
    let period_us = frame_period.as_nanos() as f64 / 1000.0;
    let mut events: Vec<Value> = Vec::new();
    let mut timeline = Timeline::default();

    for recorded in decode(bytes) {
        match recorded {
            RecordedEvent::SlotTransition(e) => {
                let ts = timeline.at(e.frame) * period_us;
                let tid = e.slot + 1;
                match (e.from, e.to) {
                    (SlotState::Ready, SlotState::Waiting) => events.push(json!({
                        "ph": "B",
                        "name": "gpu",
                        "cat": "Slot",
                        "ts": ts,
                        "pid": 0,
                        "tid": tid,
                        "args": { "frame": e.frame },
                    })),
                    (SlotState::Waiting, SlotState::Done) => events.push(json!({
                        "ph": "E",
                        "name": "gpu",
                        "cat": "Slot",
                        "ts": ts,
                        "pid": 0,
                        "tid": tid,
                    })),
                    (from, to) => events.push(json!({
                        "ph": "i",
                        "name": to.as_str(),
                        "cat": "Slot",
                        "ts": ts,
                        "pid": 0,
                        "tid": tid,
                        "s": "t",
                        "args": { "from": from.as_str() },
                    })),
                }
            }
            RecordedEvent::Warmup(e) => {
                events.push(json!({
                    "ph": "i",
                    "name": "Warmup",
                    "cat": "Ring",
                    "ts": timeline.at(e.frame) * period_us,
                    "pid": 0,
                    "tid": RING_TID,
                    "s": "t",
                    "args": {
                        "warmup_count": e.warmup_count,
                        "warmup_target": e.warmup_target,
                    }
                }));
            }
            RecordedEvent::Recycle(e) => {
                events.push(json!({
                    "ph": "i",
                    "name": if e.fast_path { "Recycle" } else { "RecycleFallback" },
                    "cat": "Ring",
                    "ts": timeline.at(e.frame) * period_us,
                    "pid": 0,
                    "tid": RING_TID,
                    "s": "t",
                    "args": {
                        "current": e.current,
                        "victim": e.victim,
                        "fallback_wait_ms": e.fallback_wait.map(|d| d.as_secs_f64() * 1000.0),
                    }
                }));
            }
            RecordedEvent::Reboot(e) => {
                events.push(json!({
                    "ph": "i",
                    "name": "Reboot",
                    "cat": "Ring",
                    "ts": timeline.reboot() * period_us,
                    "pid": 0,
                    "tid": RING_TID,
                    "s": "g",
                    "args": {
                        "cause": e.cause.as_str(),
                        "reboot_count": e.reboot_count,
                        "max_reboots": e.max_reboots,
                    }
                }));
            }
            RecordedEvent::Disabled(e) => {
                events.push(json!({
                    "ph": "i",
                    "name": "Disabled",
                    "cat": "Ring",
                    "ts": timeline.current() * period_us,
                    "pid": 0,
                    "tid": RING_TID,
                    "s": "g",
                    "args": { "reboot_count": e.reboot_count },
                }));
            }
        }
    }

    serde_json::to_writer_pretty(writer, &events)?;
    Ok(())
}

/// Maps per-incarnation frame numbers onto one monotonic axis.
#[derive(Debug, Default)]
struct Timeline {
    base: u64,
    last: u64,
}

impl Timeline {
    fn at(&mut self, frame: u64) -> f64 {
        self.last = self.base.saturating_add(frame);
        self.current()
    }

    fn current(&self) -> f64 {
        self.last as f64
    }

    /// The rebuilt ring starts counting from zero one frame later.
    fn reboot(&mut self) -> f64 {
        self.base = self.last.saturating_add(1);
        self.last = self.base;
        self.current()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::RecorderSink;
    use lockstep_core::trace::{
        RebootCause, RebootEvent, RecycleEvent, SlotTransitionEvent, TraceSink,
    };

    const PERIOD: Duration = Duration::from_millis(10);

    fn transition(frame: u64, slot: usize, from: SlotState, to: SlotState) -> SlotTransitionEvent {
        SlotTransitionEvent {
            frame,
            slot,
            from,
            to,
        }
    }

    #[test]
    fn export_produces_valid_json() {
        let mut rec = RecorderSink::new();
        rec.on_slot_transition(&transition(0, 0, SlotState::Ready, SlotState::Waiting));
        rec.on_slot_transition(&transition(2, 0, SlotState::Waiting, SlotState::Done));
        rec.on_slot_transition(&transition(2, 0, SlotState::Done, SlotState::ResetPending));
        rec.on_recycle(&RecycleEvent {
            frame: 2,
            current: 2,
            victim: 0,
            fast_path: true,
            fallback_wait: None,
        });

        let mut out = Vec::new();
        export(rec.as_bytes(), PERIOD, &mut out).unwrap();
        let json_str = String::from_utf8(out).unwrap();

        let parsed: Vec<Value> = serde_json::from_str(&json_str).unwrap();
        assert_eq!(parsed.len(), 4);

        // GPU span on slot 0's track.
        assert_eq!(parsed[0]["ph"], "B");
        assert_eq!(parsed[0]["tid"], 1);
        assert_eq!(parsed[1]["ph"], "E");
        assert_eq!(parsed[1]["ts"], 20_000.0);

        assert_eq!(parsed[2]["ph"], "i");
        assert_eq!(parsed[2]["name"], "reset-pending");

        assert_eq!(parsed[3]["name"], "Recycle");
        assert_eq!(parsed[3]["tid"], 0);
        assert_eq!(parsed[3]["args"]["victim"], 0);
    }

    #[test]
    fn timeline_stays_monotonic_across_reboots() {
        let mut rec = RecorderSink::new();
        rec.on_slot_transition(&transition(5, 1, SlotState::Ready, SlotState::Waiting));
        rec.on_reboot(&RebootEvent {
            cause: RebootCause::CompletionTimeout,
            reboot_count: 1,
            max_reboots: 2,
        });
        rec.on_slot_transition(&transition(0, 0, SlotState::Ready, SlotState::Waiting));

        let mut out = Vec::new();
        export(rec.as_bytes(), PERIOD, &mut out).unwrap();
        let parsed: Vec<Value> = serde_json::from_slice(&out).unwrap();

        let ts: Vec<f64> = parsed.iter().map(|e| e["ts"].as_f64().unwrap()).collect();
        assert_eq!(ts, [50_000.0, 60_000.0, 60_000.0]);
        assert_eq!(parsed[1]["args"]["cause"], "completion-timeout");
    }

    #[test]
    fn export_empty_recording() {
        let mut out = Vec::new();
        export(&[], PERIOD, &mut out).unwrap();
        let json_str = String::from_utf8(out).unwrap();
        let parsed: Vec<Value> = serde_json::from_str(&json_str).unwrap();
        assert!(parsed.is_empty());
    }
}
