// Copyright 2026 the Lockstep Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Human-readable trace output.
//!
//! [`PrettyPrintSink`] implements [`TraceSink`] and writes one line per event
//! to a [`Write`](std::io::Write) destination (default: stderr).

use std::io::Write;
use std::time::Duration;

use lockstep_core::trace::{
    DisabledEvent, RebootEvent, RecycleEvent, SlotTransitionEvent, TraceSink, WarmupEvent,
};

/// Writes human-readable trace lines to a [`Write`](std::io::Write) destination.
pub struct PrettyPrintSink<W: Write = Box<dyn Write>> {
    writer: W,
    transitions: bool,
}

impl<W: Write> std::fmt::Debug for PrettyPrintSink<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrettyPrintSink")
            .field("transitions", &self.transitions)
            .finish_non_exhaustive()
    }
}

impl PrettyPrintSink {
    /// Creates a sink that writes to stderr.
    #[must_use]
    pub fn stderr() -> Self {
        Self::new(Box::new(std::io::stderr()))
    }

    /// Creates a sink that writes to a boxed writer.
    #[must_use]
    pub fn new(writer: Box<dyn Write>) -> Self {
        Self::with_writer(writer)
    }
}

impl<W: Write> PrettyPrintSink<W> {
    /// Creates a sink that writes to the given destination.
    ///
    /// Per-slot transitions are printed; see
    /// [`without_transitions`](Self::without_transitions).
    #[must_use]
    pub fn with_writer(writer: W) -> Self {
        Self {
            writer,
            transitions: true,
        }
    }

    /// Suppresses per-slot transition lines, which dominate the output at
    /// four per frame.
    #[must_use]
    pub fn without_transitions(mut self) -> Self {
        self.transitions = false;
        self
    }

    /// Consumes the sink and returns the writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

fn ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

impl<W: Write> TraceSink for PrettyPrintSink<W> {
    fn on_slot_transition(&mut self, e: &SlotTransitionEvent) {
        if !self.transitions {
            return;
        }
        let _ = writeln!(
            self.writer,
            "[slot] frame={} slot={} {} -> {}",
            e.frame,
            e.slot,
            e.from.as_str(),
            e.to.as_str(),
        );
    }

    fn on_warmup(&mut self, e: &WarmupEvent) {
        let _ = writeln!(
            self.writer,
            "[warmup] frame={} {}/{}",
            e.frame, e.warmup_count, e.warmup_target,
        );
    }

    fn on_recycle(&mut self, e: &RecycleEvent) {
        let path = match e.fallback_wait {
            None => "fast".to_owned(),
            Some(wait) => format!("fallback<={:.1}ms", ms(wait)),
        };
        let _ = writeln!(
            self.writer,
            "[recycle] frame={} current={} victim={} path={path}",
            e.frame, e.current, e.victim,
        );
    }

    fn on_reboot(&mut self, e: &RebootEvent) {
        let _ = writeln!(
            self.writer,
            "[reboot] cause={} count={}/{}",
            e.cause.as_str(),
            e.reboot_count,
            e.max_reboots,
        );
    }

    fn on_disabled(&mut self, e: &DisabledEvent) {
        let _ = writeln!(
            self.writer,
            "[disabled] after {} reboots",
            e.reboot_count
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockstep_core::slot::SlotState;
    use lockstep_core::trace::RebootCause;

    fn output(sink: PrettyPrintSink<Vec<u8>>) -> String {
        String::from_utf8(sink.into_inner()).unwrap()
    }

    #[test]
    fn pretty_print_recycle() {
        let mut sink = PrettyPrintSink::with_writer(Vec::<u8>::new());
        sink.on_recycle(&RecycleEvent {
            frame: 12,
            current: 2,
            victim: 7,
            fast_path: false,
            fallback_wait: Some(Duration::from_millis(1000)),
        });
        let output = output(sink);
        assert!(output.contains("[recycle]"), "got: {output}");
        assert!(output.contains("victim=7"), "got: {output}");
        assert!(output.contains("fallback<=1000.0ms"), "got: {output}");
    }

    #[test]
    fn reboot_and_disable_lines() {
        let mut sink = PrettyPrintSink::with_writer(Vec::<u8>::new());
        sink.on_reboot(&RebootEvent {
            cause: RebootCause::CompletionTimeout,
            reboot_count: 3,
            max_reboots: 2,
        });
        sink.on_disabled(&DisabledEvent { reboot_count: 3 });
        let output = output(sink);
        assert_eq!(
            output,
            "[reboot] cause=completion-timeout count=3/2\n[disabled] after 3 reboots\n"
        );
    }

    #[test]
    fn transitions_can_be_suppressed() {
        let event = SlotTransitionEvent {
            frame: 0,
            slot: 1,
            from: SlotState::Done,
            to: SlotState::ResetPending,
        };

        let mut sink = PrettyPrintSink::with_writer(Vec::<u8>::new());
        sink.on_slot_transition(&event);
        let shown = output(sink);
        assert!(shown.contains("slot=1"), "got: {shown}");

        let mut quiet = PrettyPrintSink::with_writer(Vec::<u8>::new()).without_transitions();
        quiet.on_slot_transition(&event);
        assert!(output(quiet).is_empty(), "transition lines must be suppressed");
    }
}
