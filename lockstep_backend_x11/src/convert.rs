// Copyright 2026 the Lockstep Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Value conversions between lockstep, the SYNC wire format, and GL.

use std::time::Duration;

use lockstep_core::backend::WaitStatus;
use x11rb::protocol::sync::Int64;

/// Splits a signed 64-bit value into the SYNC `INT64` wire pair.
#[expect(
    clippy::cast_possible_truncation,
    reason = "the two words are exactly the halves of the value"
)]
pub(crate) fn to_int64(value: i64) -> Int64 {
    Int64 {
        hi: (value >> 32) as i32,
        lo: value as u32,
    }
}

/// Clamps a timeout to what `glClientWaitSync` accepts through `glow`.
///
/// The binding takes a signed 32-bit nanosecond count, so waits are capped
/// just above two seconds.
pub(crate) fn client_wait_nanos(timeout: Duration) -> i32 {
    i32::try_from(timeout.as_nanos()).unwrap_or(i32::MAX)
}

/// Maps a `glClientWaitSync` status. `None` means the wait failed.
pub(crate) fn wait_status(status: u32) -> Option<WaitStatus> {
    match status {
        glow::ALREADY_SIGNALED | glow::CONDITION_SATISFIED => Some(WaitStatus::Signaled),
        glow::TIMEOUT_EXPIRED => Some(WaitStatus::Pending),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int64_splits_into_words() {
        for (value, hi, lo) in [
            (0, 0, 0),
            (1, 0, 1),
            (-1, -1, u32::MAX),
            (i64::from(u32::MAX) + 1, 1, 0),
            (i64::MAX, i32::MAX, u32::MAX),
            (i64::MIN, i32::MIN, 0),
        ] {
            let wire = to_int64(value);
            assert_eq!((wire.hi, wire.lo), (hi, lo), "value {value}");
        }
    }

    #[test]
    fn client_wait_is_clamped() {
        assert_eq!(client_wait_nanos(Duration::ZERO), 0);
        assert_eq!(client_wait_nanos(Duration::from_secs(1)), 1_000_000_000);
        assert_eq!(client_wait_nanos(Duration::from_secs(60)), i32::MAX);
    }

    #[test]
    fn wait_failures_are_not_statuses() {
        assert_eq!(wait_status(glow::ALREADY_SIGNALED), Some(WaitStatus::Signaled));
        assert_eq!(wait_status(glow::CONDITION_SATISFIED), Some(WaitStatus::Signaled));
        assert_eq!(wait_status(glow::TIMEOUT_EXPIRED), Some(WaitStatus::Pending));
        assert_eq!(wait_status(glow::WAIT_FAILED), None);
    }
}
