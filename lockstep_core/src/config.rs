// Copyright 2026 the Lockstep Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Ring configuration.

use core::time::Duration;

/// How a slot caught in `ResetPending` is torn down.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum TeardownMode {
    /// Consume the slot's pending alarm notification inline before
    /// releasing its resources.
    ///
    /// Blocks on the display server. Must run on the thread that owns the
    /// host event loop.
    #[default]
    Drain,
    /// Release the alarm without waiting for its notification.
    ///
    /// A notification already in flight arrives for an alarm no slot owns
    /// and is ignored by the ring.
    Detach,
}

/// Configuration for the [`FenceRing`](crate::ring::FenceRing).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RingConfig {
    /// Number of slots. Slot `i` is recycled `capacity / 2` frames after its
    /// GPU work was queued.
    pub capacity: usize,
    /// Reboots allowed before the ring disables itself permanently.
    pub max_reboots: u32,
    /// Ceiling for the blocking fallback wait in `after_frame`.
    pub completion_timeout: Duration,
    /// Teardown policy for slots with an alarm notification in flight.
    pub teardown: TeardownMode,
}

impl RingConfig {
    /// Smallest usable ring: one slot in flight, one being recycled.
    pub const MIN_CAPACITY: usize = 2;

    /// Default configuration: ten slots, two reboots, one-second fallback
    /// wait, draining teardown.
    pub const DEFAULT: Self = Self {
        capacity: 10,
        max_reboots: 2,
        completion_timeout: Duration::from_secs(1),
        teardown: TeardownMode::Drain,
    };

    /// Returns [`Self::DEFAULT`].
    #[must_use]
    pub const fn new() -> Self {
        Self::DEFAULT
    }

    /// Sets the slot count. Values below [`Self::MIN_CAPACITY`] are promoted.
    #[must_use]
    pub const fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = if capacity < Self::MIN_CAPACITY {
            Self::MIN_CAPACITY
        } else {
            capacity
        };
        self
    }

    /// Sets the reboot budget.
    #[must_use]
    pub const fn with_max_reboots(mut self, max_reboots: u32) -> Self {
        self.max_reboots = max_reboots;
        self
    }

    /// Sets the fallback wait ceiling.
    #[must_use]
    pub const fn with_completion_timeout(mut self, timeout: Duration) -> Self {
        self.completion_timeout = timeout;
        self
    }

    /// Sets the teardown policy.
    #[must_use]
    pub const fn with_teardown(mut self, teardown: TeardownMode) -> Self {
        self.teardown = teardown;
        self
    }

    /// Frames of history needed before the first recycle.
    #[must_use]
    pub const fn warmup_frames(&self) -> usize {
        self.effective_capacity() / 2
    }

    /// Capacity after promotion, for configs built by struct literal.
    #[must_use]
    pub const fn effective_capacity(&self) -> usize {
        if self.capacity < Self::MIN_CAPACITY {
            Self::MIN_CAPACITY
        } else {
            self.capacity
        }
    }
}

impl Default for RingConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}
