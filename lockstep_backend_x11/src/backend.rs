// Copyright 2026 the Lockstep Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! [`SyncBackend`] over X11 SYNC and OpenGL.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::ffi::c_void;
use std::fmt;
use std::time::Duration;

use lockstep_core::backend::{SyncBackend, WaitStatus};
use lockstep_core::error::{BackendError, BackendOp, FenceError};
use x11rb::connection::Connection;
use x11rb::cookie::VoidCookie;
use x11rb::errors::ConnectionError;
use x11rb::protocol::Event;
use x11rb::protocol::sync::{
    self, ChangeAlarmAux, ConnectionExt as _, CreateAlarmAux, TESTTYPE as TestType, VALUETYPE as ValueType,
};
use x11rb::protocol::xproto::{ConnectionExt as _, Drawable};

use crate::convert::to_int64;
use crate::gl::GlSync;

/// SYNC protocol version requested during the probe.
const SYNC_VERSION: (u8, u8) = (3, 1);

fn fail<E: fmt::Display>(op: BackendOp) -> impl FnOnce(E) -> BackendError {
    move |err| BackendError::new(op, err.to_string())
}

fn is_notify_for(event: &Event, alarm: sync::Alarm) -> bool {
    matches!(event, Event::SyncAlarmNotify(notify) if notify.alarm == alarm)
}

/// Removes the first notification for `alarm` from `deferred`, keeping the
/// order of everything else.
fn take_notify(deferred: &mut VecDeque<Event>, alarm: sync::Alarm) -> bool {
    match deferred.iter().position(|event| is_notify_for(event, alarm)) {
        Some(index) => {
            deferred.remove(index);
            true
        }
        None => false,
    }
}

/// X11 SYNC fences, counters, and alarms paired with GL sync objects.
///
/// Alarm notifications arrive on the X connection's event stream; the host
/// event loop forwards them to [`FenceRing::handle_event`]. Tearing down a
/// slot mid-reset reads events until its notification shows up; anything
/// else read on the way is kept for [`take_deferred_events`].
///
/// [`FenceRing::handle_event`]: lockstep_core::ring::FenceRing::handle_event
/// [`take_deferred_events`]: Self::take_deferred_events
pub struct X11GlBackend<C: Connection> {
    conn: C,
    drawable: Drawable,
    gl: GlSync,
    deferred: RefCell<VecDeque<Event>>,
}

impl<C: Connection> fmt::Debug for X11GlBackend<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("X11GlBackend")
            .field("drawable", &self.drawable)
            .field("gl", &self.gl)
            .field("deferred", &self.deferred.borrow().len())
            .finish_non_exhaustive()
    }
}

impl<C: Connection> X11GlBackend<C> {
    /// Creates a backend for the screen owning `drawable` (typically its
    /// root window).
    ///
    /// `loader` resolves GL entry points, as passed to
    /// [`glow::Context::from_loader_function`]; it is used once, for
    /// `glImportSyncEXT`.
    ///
    /// # Safety
    ///
    /// `gl` must be the context `loader` resolves entry points for, and it
    /// must be current on the calling thread whenever the backend (or a ring
    /// using it) is called, including when the ring is dropped.
    pub unsafe fn new(
        conn: C,
        drawable: Drawable,
        gl: glow::Context,
        loader: impl FnMut(&str) -> *const c_void,
    ) -> Self {
        Self {
            conn,
            drawable,
            // SAFETY: forwarded from the caller.
            gl: unsafe { GlSync::new(gl, loader) },
            deferred: RefCell::new(VecDeque::new()),
        }
    }

    /// The X connection.
    pub fn connection(&self) -> &C {
        &self.conn
    }

    /// Events read from the connection while draining an alarm during
    /// teardown, oldest first. The host should dispatch them as if it had
    /// read them itself.
    pub fn take_deferred_events(&self) -> Vec<Event> {
        self.deferred.borrow_mut().drain(..).collect()
    }

    fn send(
        &self,
        op: BackendOp,
        request: Result<VoidCookie<'_, C>, ConnectionError>,
    ) -> Result<(), BackendError> {
        // Unchecked: protocol errors surface on the event stream.
        drop(request.map_err(fail(op))?);
        Ok(())
    }

    fn flush(&self, op: BackendOp) -> Result<(), BackendError> {
        self.conn.flush().map_err(fail(op))
    }

    fn generate_id(&self, op: BackendOp) -> Result<u32, BackendError> {
        self.conn.generate_id().map_err(fail(op))
    }

    fn release(&self, what: &str, request: Result<VoidCookie<'_, C>, ConnectionError>) {
        if let Err(err) = request {
            tracing::warn!(%err, "failed to destroy X11 sync {what}");
        }
    }

    fn probe_display(&self) -> Result<(), FenceError> {
        let present = self
            .conn
            .extension_information(sync::X11_EXTENSION_NAME)
            .map_err(fail(BackendOp::Probe))?;
        if present.is_none() {
            return Err(FenceError::Unavailable("SYNC"));
        }
        let (major, minor) = SYNC_VERSION;
        let reply = self
            .conn
            .sync_initialize(major, minor)
            .map_err(fail(BackendOp::Probe))?
            .reply()
            .map_err(fail(BackendOp::Probe))?;
        tracing::debug!(
            major = reply.major_version,
            minor = reply.minor_version,
            "X11 SYNC extension initialized"
        );
        Ok(())
    }
}

impl<C: Connection> SyncBackend for X11GlBackend<C> {
    type DisplayFence = sync::Fence;
    type Counter = sync::Counter;
    type Alarm = sync::Alarm;
    type GpuFence = glow::NativeFence;
    type Event = Event;

    fn probe(&self) -> Result<(), FenceError> {
        self.gl.probe()?;
        self.probe_display()
    }

    fn create_fence(&self) -> Result<sync::Fence, BackendError> {
        let op = BackendOp::CreateFence;
        let fence = self.generate_id(op)?;
        self.send(op, self.conn.sync_create_fence(self.drawable, fence, false))?;
        Ok(fence)
    }

    fn trigger_fence(&self, fence: sync::Fence) -> Result<(), BackendError> {
        let op = BackendOp::TriggerFence;
        self.send(op, self.conn.sync_trigger_fence(fence))?;
        self.flush(op)
    }

    fn reset_fence(&self, fence: sync::Fence) -> Result<(), BackendError> {
        self.send(BackendOp::ResetFence, self.conn.sync_reset_fence(fence))
    }

    fn destroy_fence(&self, fence: sync::Fence) {
        self.release("fence", self.conn.sync_destroy_fence(fence));
    }

    fn create_counter(&self, initial: i64) -> Result<sync::Counter, BackendError> {
        let op = BackendOp::CreateCounter;
        let counter = self.generate_id(op)?;
        self.send(op, self.conn.sync_create_counter(counter, to_int64(initial)))?;
        Ok(counter)
    }

    fn set_counter(&self, counter: sync::Counter, value: i64) -> Result<(), BackendError> {
        let op = BackendOp::SetCounter;
        self.send(op, self.conn.sync_set_counter(counter, to_int64(value)))?;
        self.flush(op)
    }

    fn destroy_counter(&self, counter: sync::Counter) {
        self.release("counter", self.conn.sync_destroy_counter(counter));
    }

    fn create_alarm(
        &self,
        counter: sync::Counter,
        threshold: i64,
    ) -> Result<sync::Alarm, BackendError> {
        let op = BackendOp::CreateAlarm;
        let alarm = self.generate_id(op)?;
        let attributes = CreateAlarmAux::new()
            .counter(counter)
            .value_type(ValueType::ABSOLUTE)
            .value(to_int64(threshold))
            .test_type(TestType::POSITIVE_COMPARISON)
            .delta(to_int64(1))
            .events(1);
        self.send(op, self.conn.sync_create_alarm(alarm, &attributes))?;
        Ok(alarm)
    }

    fn change_alarm(&self, alarm: sync::Alarm, threshold: i64) -> Result<(), BackendError> {
        let attributes = ChangeAlarmAux::new().value(to_int64(threshold));
        self.send(
            BackendOp::ChangeAlarm,
            self.conn.sync_change_alarm(alarm, &attributes),
        )
    }

    fn destroy_alarm(&self, alarm: sync::Alarm) {
        self.release("alarm", self.conn.sync_destroy_alarm(alarm));
    }

    fn round_trip(&self) -> Result<(), BackendError> {
        let op = BackendOp::RoundTrip;
        self.conn
            .get_input_focus()
            .map_err(fail(op))?
            .reply()
            .map_err(fail(op))?;
        Ok(())
    }

    fn drain_alarm(&self, alarm: sync::Alarm) -> Result<(), BackendError> {
        // An earlier drain may already have read this notification.
        if take_notify(&mut self.deferred.borrow_mut(), alarm) {
            return Ok(());
        }
        let op = BackendOp::DrainAlarm;
        self.flush(op)?;
        loop {
            let event = self.conn.wait_for_event().map_err(fail(op))?;
            if is_notify_for(&event, alarm) {
                return Ok(());
            }
            self.deferred.borrow_mut().push_back(event);
        }
    }

    fn import_fence(&self, fence: sync::Fence) -> Result<glow::NativeFence, BackendError> {
        self.gl.import(fence)
    }

    fn gpu_wait(&self, fence: &glow::NativeFence) -> Result<(), BackendError> {
        self.gl.wait(*fence);
        Ok(())
    }

    fn insert_completion_fence(&self) -> Result<glow::NativeFence, BackendError> {
        self.gl.fence()
    }

    fn client_wait(
        &self,
        fence: &glow::NativeFence,
        timeout: Duration,
    ) -> Result<WaitStatus, BackendError> {
        self.gl.client_wait(*fence, timeout)
    }

    fn delete_gpu_fence(&self, fence: glow::NativeFence) {
        self.gl.delete(fence);
    }

    fn alarm_for_event(&self, event: &Event) -> Option<sync::Alarm> {
        match event {
            Event::SyncAlarmNotify(notify) => Some(notify.alarm),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notify(alarm: sync::Alarm) -> Event {
        Event::SyncAlarmNotify(sync::AlarmNotifyEvent {
            alarm,
            ..Default::default()
        })
    }

    fn alarms(deferred: &VecDeque<Event>) -> Vec<Option<sync::Alarm>> {
        deferred
            .iter()
            .map(|event| match event {
                Event::SyncAlarmNotify(notify) => Some(notify.alarm),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn notifications_match_by_alarm() {
        assert!(is_notify_for(&notify(7), 7));
        assert!(!is_notify_for(&notify(7), 8));
        assert!(!is_notify_for(&Event::Unknown(Vec::new()), 7));
    }

    #[test]
    fn deferred_notification_is_taken_once() {
        // Slot 0 drained first and read the notifications recycled before it.
        let mut deferred: VecDeque<Event> = [
            notify(7),
            Event::Unknown(Vec::new()),
            notify(8),
            notify(9),
        ]
        .into_iter()
        .collect();

        assert!(take_notify(&mut deferred, 8), "slot 8's notification was already read");
        assert_eq!(alarms(&deferred), [Some(7), None, Some(9)]);
        assert!(!take_notify(&mut deferred, 8), "only one notification per reset");
        assert!(!take_notify(&mut deferred, 1), "unread notifications stay on the wire");

        assert!(take_notify(&mut deferred, 7));
        assert!(take_notify(&mut deferred, 9));
        assert_eq!(alarms(&deferred), [None], "unrelated events stay for the host");
    }
}
