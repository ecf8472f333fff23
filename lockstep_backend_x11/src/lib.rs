// Copyright 2026 the Lockstep Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! X11 backend for lockstep.
//!
//! [`X11GlBackend`] implements [`SyncBackend`] with:
//!
//! - X11 SYNC extension fences, counters, and alarms through `x11rb`
//! - OpenGL sync objects through `glow` (`GL_ARB_sync` or GL 3.2)
//! - `glImportSyncEXT` from `GL_EXT_x11_sync_object` to make the GPU wait on
//!   an X11 fence
//!
//! Missing pieces are reported by [`SyncBackend::probe`] as
//! [`FenceError::Unavailable`](lockstep_core::error::FenceError::Unavailable),
//! which leaves the ring inactive rather than failing the renderer.
//!
//! ```rust,ignore
//! let backend = unsafe { X11GlBackend::new(conn, root, gl, |name| loader(name)) };
//! let mut ring = FenceRing::new(backend, RingConfig::DEFAULT);
//! ring.init();
//! // In the event loop:
//! for event in ring.backend().take_deferred_events() {
//!     dispatch(event);
//! }
//! ```

#![expect(
    unsafe_code,
    reason = "glImportSyncEXT is resolved by hand and GL calls are unsafe in glow"
)]

mod backend;
mod convert;
mod gl;

pub use backend::X11GlBackend;
pub use lockstep_core::backend::SyncBackend;
