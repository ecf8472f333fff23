// Copyright 2026 the Lockstep Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Frame-completion fence ring for compositing renderers.
//!
//! `lockstep_core` paces GPU command submission against on-screen
//! presentation by cross-synchronizing a GPU completion fence with a
//! display-server fence/counter/alarm. It answers "is the GPU work from the
//! frame rendered `N` frames ago finished?" without blocking in the common
//! case, and recovers automatically (bounded "reboots") when that
//! assumption breaks down. It is `no_std` compatible (with `alloc`).
//!
//! # Architecture
//!
//! ```text
//!   renderer present loop                     host event loop
//!       │                                           │
//!       ├─► FenceRing::insert_wait()                │
//!       │       └─► FenceSlot::insert()             │
//!       │   (submit GPU commands, request present)  │
//!       └─► FenceRing::after_frame()                │
//!               ├─► victim.check_completion()       │
//!               └─► victim.reset() ──► alarm ───────┤
//!                                                   ▼
//!                                 FenceRing::handle_event()
//!                                       └─► FenceSlot::handle_alarm()
//! ```
//!
//! **[`backend`]** — The [`SyncBackend`](backend::SyncBackend) trait: the
//! capability probe, display-server and GPU primitives, and event glue that
//! platform backends implement.
//!
//! **[`slot`]** — [`FenceSlot`](slot::FenceSlot), one dual-fence resource
//! with a four-state lifecycle and state-dependent teardown in `Drop`.
//!
//! **[`ring`]** — [`FenceRing`](ring::FenceRing), which owns the slots,
//! decides which one to recycle each frame, and reboots on failure.
//!
//! **[`config`]** — [`RingConfig`](config::RingConfig): capacity, reboot
//! budget, fallback wait ceiling, teardown policy.
//!
//! **[`error`]** — [`FenceError`](error::FenceError) and
//! [`BackendError`](error::BackendError).
//!
//! **[`trace`]** — [`TraceSink`](trace::TraceSink) trait and event types for
//! per-frame instrumentation.
//!
//! # Crate features
//!
//! - `std` (disabled by default): Enables `std` support in dependencies.

#![no_std]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

extern crate alloc;

pub mod backend;
pub mod config;
pub mod error;
pub mod ring;
pub mod slot;
pub mod trace;
